pub mod accumulator;
pub mod camera;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod kernel;
pub mod session;
pub mod source;

pub use accumulator::{AccumulatorSnapshot, Contribution, EventAccumulator};
pub use camera::{enumerate_devices, DeviceBuilder, DeviceInfo, FrameDevice, FrameSink, SimulatedDevice};
pub use config::IonCountConfig;
pub use error::{IonCountError, Result};
pub use export::{CsvExporter, Exporter};
pub use frame::Frame;
pub use kernel::{detect, Detection, DetectionParams, EventDetector, EventMap, Scoring};
pub use session::{ControlCommand, KeyboardInputHandler, RunMetadata, RunMode, RunReport, SessionController, SessionState};
pub use source::{BatchSource, FrameDecoder, ImageFileDecoder, StopSignal, StreamListener, TerminationReason};
