mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gst;
mod interface;
mod simulated;
#[cfg(test)]
mod tests;

pub use builder::{enumerate_devices, DeviceBuilder};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gst::GstDevice;
pub use interface::{DeviceInfo, FrameDevice, FrameSink, StreamInfo};
pub use simulated::{synthetic_impacts, FrameGenerator, SimulatedDevice};
