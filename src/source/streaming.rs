use super::TerminationReason;
use crate::accumulator::{AccumulatorSnapshot, Contribution, EventAccumulator};
use crate::camera::{FrameSink, StreamInfo};
use crate::error::{AggregationError, IonCountError, SourceError};
use crate::frame::Frame;
use crate::kernel::EventDetector;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// One-shot stop request shared by the control loop and the delivery path.
///
/// The first recorded reason wins; later requests only observe that the
/// stop has already happened.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<TerminationReason>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` and cancel. Returns `false` if a reason was already set.
    pub fn request(&self, reason: TerminationReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }

        info!("Stop requested: {}", reason);
        self.token.cancel();
        true
    }

    /// Cancel without recording a reason (fatal abort)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        *self.reason.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Device callback that runs the kernel on each delivered frame and folds
/// the result into the shared accumulator.
///
/// Frames arriving after the stop signal are dropped unprocessed. A frame
/// already inside `on_frame` when the stop arrives still completes its
/// contribution.
pub struct StreamListener {
    detector: EventDetector,
    accumulator: Arc<EventAccumulator>,
    frame_cap: Option<u64>,
    stop: StopSignal,
    fatal: Mutex<Option<IonCountError>>,
}

impl StreamListener {
    pub fn new(
        detector: EventDetector,
        accumulator: Arc<EventAccumulator>,
        frame_cap: Option<u64>,
        stop: StopSignal,
    ) -> Self {
        Self {
            detector,
            accumulator,
            frame_cap,
            stop,
            fatal: Mutex::new(None),
        }
    }

    pub fn accumulator(&self) -> &Arc<EventAccumulator> {
        &self.accumulator
    }

    /// Whether an error has aborted the run
    pub fn has_failed(&self) -> bool {
        self.fatal.lock().is_some()
    }

    /// Take the error that aborted the run, if any
    pub fn take_fatal_error(&self) -> Option<IonCountError> {
        self.fatal.lock().take()
    }

    /// Snapshot the accumulator once delivery has stopped
    pub fn finalize(&self) -> Result<AccumulatorSnapshot, IonCountError> {
        if let Some(err) = self.take_fatal_error() {
            return Err(err);
        }
        Ok(self.accumulator.snapshot()?)
    }

    /// Skip the frame on a per-frame error, abort the run on anything else
    fn handle_error(&self, frame_id: Option<u64>, err: IonCountError) {
        if err.is_per_frame() {
            self.skip(frame_id, &err);
        } else {
            self.fail(err);
        }
    }

    /// Keep the first fatal error and stop delivery without a termination reason
    fn fail(&self, err: IonCountError) {
        error!("Aborting stream: {}", err);
        {
            let mut slot = self.fatal.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.stop.cancel();
    }

    fn skip(&self, frame_id: Option<u64>, reason: &dyn std::fmt::Display) {
        let skipped = self.accumulator.record_skipped();
        match frame_id {
            Some(id) => warn!("Skipping frame {}: {} ({} skipped so far)", id, reason, skipped),
            None => warn!("Skipping buffer: {} ({} skipped so far)", reason, skipped),
        }
    }
}

impl FrameSink for StreamListener {
    fn on_stream_ready(&self, info: &StreamInfo) -> bool {
        let announced = (info.height as usize, info.width as usize);
        match self.accumulator.shape() {
            Some(shape) if shape != announced => {
                error!(
                    "Stream resolution {}x{} does not match accumulator {}x{}",
                    info.width, info.height, shape.1, shape.0
                );
                *self.fatal.lock() = Some(
                    AggregationError::ShapeMismatch {
                        expected: shape,
                        actual: announced,
                    }
                    .into(),
                );
                false
            }
            _ => {
                info!("Stream ready: {}x{}", info.width, info.height);
                true
            }
        }
    }

    fn on_frame(&self, frame: Frame) {
        if self.stop.is_stopped() {
            trace!("Dropping frame {} delivered after stop", frame.id);
            return;
        }

        let detection = match self.detector.detect(&frame) {
            Ok(detection) => detection,
            Err(e) => {
                self.handle_error(Some(frame.id), e.into());
                return;
            }
        };
        let frame_id = frame.id;
        drop(frame);

        match self.accumulator.contribute_capped(&detection, self.frame_cap) {
            Ok(Contribution::Accepted { frames }) => {
                debug!("Frame {} contributed ({} total)", frame_id, frames);
                if Some(frames) == self.frame_cap {
                    self.stop.request(TerminationReason::FrameCapReached);
                }
            }
            Ok(Contribution::Rejected) => {
                trace!("Frame {} rejected, frame cap already reached", frame_id);
                self.stop.request(TerminationReason::FrameCapReached);
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn on_frame_error(&self, error: SourceError) {
        if self.stop.is_stopped() {
            return;
        }
        self.handle_error(None, error.into());
    }

    fn on_end_of_stream(&self) {
        self.stop.request(TerminationReason::SourceExhausted);
    }
}
