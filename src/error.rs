use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IonCountError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl IonCountError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Errors that cost a single frame and leave the run going.
    pub fn is_per_frame(&self) -> bool {
        match self {
            IonCountError::Kernel(_) => true,
            IonCountError::Source(SourceError::Decode { .. })
            | IonCountError::Source(SourceError::MalformedBuffer { .. }) => true,
            _ => false,
        }
    }
}

/// Precondition violations raised by the detection kernel before it scans a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Frame is empty")]
    EmptyFrame,

    #[error("Frame {rows}x{cols} is smaller than the {window}x{window} neighborhood")]
    FrameTooSmall {
        rows: usize,
        cols: usize,
        window: usize,
    },

    #[error("Expected a 2-D frame or a 3-D multi-channel buffer, got {ndim} dimensions")]
    Dimensionality { ndim: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Event map shape {actual:?} does not match accumulator shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("No frame was contributed, accumulator was never allocated")]
    NothingContributed,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to decode {path}: {details}")]
    Decode { path: PathBuf, details: String },

    #[error("Failed to read directory {path}: {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frame buffer: {details}")]
    MalformedBuffer { details: String },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No device at index {index} ({available} available)")]
    NotFound { index: usize, available: usize },

    #[error("Failed to open device: {details}")]
    Open { details: String },

    #[error("Stream setup failed: {details}")]
    StreamSetup { details: String },

    #[error("Software trigger failed: {details}")]
    Trigger { details: String },

    #[error("Failed to stop stream: {details}")]
    Stop { details: String },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to create output directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, IonCountError>;
