use crate::accumulator::AccumulatorSnapshot;
use crate::source::TerminationReason;
use chrono::{DateTime, Local};
use ndarray::Array2;
use serde::Serialize;
use uuid::Uuid;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Configuring,
    Acquiring,
    Draining,
    Finalized,
}

/// Where a run's frames came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Batch,
    Streaming,
}

/// Commands accepted by the streaming control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Issue a software trigger
    Trigger,
    /// End acquisition with `external_stop`
    Stop,
}

/// Run metadata, stamped at start and completed at finalization
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub termination_reason: Option<TerminationReason>,
    pub frames: u64,
    pub events: u64,
    pub skipped: u64,
    pub shape: Option<(usize, usize)>,
    /// Frames folded into the background map (batch difference runs)
    pub background_frames: Option<u64>,
}

impl RunMetadata {
    pub fn start(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            start_time: Local::now(),
            end_time: None,
            termination_reason: None,
            frames: 0,
            events: 0,
            skipped: 0,
            shape: None,
            background_frames: None,
        }
    }

    pub fn finish(&mut self, reason: TerminationReason, snapshot: &AccumulatorSnapshot) {
        self.end_time = Some(Local::now());
        self.termination_reason = Some(reason);
        self.frames = snapshot.frames;
        self.events = snapshot.events;
        self.skipped += snapshot.skipped;
        self.shape = Some(snapshot.shape());
    }

    /// Seconds between start and end (or now, while running)
    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Local::now);
        (end - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Everything a finalized run hands to the exporter
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub snapshot: AccumulatorSnapshot,
    /// `sample - background * magnification`, batch runs with a background only
    pub difference: Option<Array2<f64>>,
}
