mod detect;
mod params;

pub use detect::{detect, Detection, EventDetector, EventMap};
pub use params::{DetectionParams, Scoring, SCALED_WEIGHT_MODE};
