//! Frame sources: a finite batch of image files or a push-based device stream.

mod batch;
mod streaming;

pub use batch::{BatchSource, FrameDecoder, ImageFileDecoder};
pub use streaming::{StopSignal, StreamListener};

use serde::{Deserialize, Serialize};

/// Why frame production ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    FrameCapReached,
    ExternalStop,
    SourceExhausted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::FrameCapReached => "frame_cap_reached",
            TerminationReason::ExternalStop => "external_stop",
            TerminationReason::SourceExhausted => "source_exhausted",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_reason_names() {
        assert_eq!(TerminationReason::FrameCapReached.to_string(), "frame_cap_reached");
        assert_eq!(
            serde_json::to_string(&TerminationReason::ExternalStop).unwrap(),
            "\"external_stop\""
        );
        let parsed: TerminationReason = serde_json::from_str("\"source_exhausted\"").unwrap();
        assert_eq!(parsed, TerminationReason::SourceExhausted);
    }
}
