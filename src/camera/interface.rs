use crate::error::{DeviceError, SourceError};
use crate::frame::Frame;
use serde::Serialize;
use std::sync::Arc;

/// Identity of an enumerated imaging device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub model_name: String,
    pub serial: String,
    pub interface: String,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} ({}) [{}]",
            self.index, self.model_name, self.serial, self.interface
        )
    }
}

/// Stream properties announced to a sink before the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
}

/// Receiver of frames pushed by a device.
///
/// Callbacks run on the device's own delivery thread and must not block on
/// the thread that controls the session.
pub trait FrameSink: Send + Sync {
    /// Called once before delivery starts; returning `false` refuses the stream
    fn on_stream_ready(&self, info: &StreamInfo) -> bool;

    /// Called for every delivered frame
    fn on_frame(&self, frame: Frame);

    /// Called when the device hands over a buffer that cannot become a frame
    fn on_frame_error(&self, error: SourceError);

    /// Called when the device will deliver no further frames
    fn on_end_of_stream(&self);
}

/// Imaging hardware that pushes frames asynchronously
pub trait FrameDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Configured sensor resolution as (width, height)
    fn resolution(&self) -> (u32, u32);

    /// Enable or disable trigger mode (frames only on trigger)
    fn set_trigger_mode(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Begin delivering frames to `sink`
    fn start_stream(&self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError>;

    /// Request a single frame while in trigger mode
    fn software_trigger(&self) -> Result<(), DeviceError>;

    /// Stop delivery. Returns only once no sink callback is still running.
    fn stop_stream(&self) -> Result<(), DeviceError>;

    /// Release the device
    fn close(&self) -> Result<(), DeviceError>;
}
