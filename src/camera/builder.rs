use super::interface::{DeviceInfo, FrameDevice};
use super::simulated::SimulatedDevice;
use crate::config::AcquisitionConfig;
use crate::error::{DeviceError, IonCountError, Result};
use std::sync::Arc;
use tracing::info;

/// List the devices a session can open.
///
/// Hardware cameras come first (when built with the `camera` feature); the
/// simulated source is always listed last.
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    #[allow(unused_mut)]
    let mut devices: Vec<DeviceInfo> = Vec::new();

    #[cfg(all(feature = "camera", target_os = "linux"))]
    devices.extend(super::gst::GstDevice::enumerate());

    devices.push(SimulatedDevice::device_info(devices.len()));
    devices
}

/// Builder that opens the configured device
pub struct DeviceBuilder {
    config: Option<AcquisitionConfig>,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self { config: None }
    }

    pub fn config(mut self, config: AcquisitionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Arc<dyn FrameDevice>> {
        let config = self
            .config
            .ok_or_else(|| IonCountError::system("Acquisition configuration must be specified"))?;

        let devices = enumerate_devices();
        let selected = devices
            .get(config.device_index)
            .cloned()
            .ok_or(DeviceError::NotFound {
                index: config.device_index,
                available: devices.len(),
            })?;

        info!("Opening device {}", selected);

        #[cfg(all(feature = "camera", target_os = "linux"))]
        if selected.interface == super::gst::GST_INTERFACE {
            let device = super::gst::GstDevice::open(selected, &config)?;
            return Ok(Arc::new(device));
        }

        Ok(Arc::new(SimulatedDevice::from_config(selected.index, &config)))
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
