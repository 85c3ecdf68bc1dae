use super::controller::SessionController;
use super::types::{RunMetadata, RunMode, RunReport, SessionState};
use crate::accumulator::{AccumulatorSnapshot, EventAccumulator};
use crate::error::{IonCountError, Result};
use crate::kernel::EventDetector;
use crate::source::{BatchSource, TerminationReason};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::sync::Arc;
use tracing::{info, warn};

impl SessionController {
    /// Process every file of `source` on a worker pool and export the summed
    /// event map.
    ///
    /// With a `background` source, both are accumulated independently and
    /// the report carries `sample - background * magnification`.
    pub async fn run_batch(
        &self,
        source: BatchSource,
        background: Option<BatchSource>,
    ) -> Result<RunReport> {
        self.begin()?;
        let mut metadata = RunMetadata::start(RunMode::Batch);
        info!(
            "Starting batch run {} over {} files",
            metadata.run_id,
            source.len()
        );

        self.set_state(SessionState::Acquiring);

        let snapshot = match self.accumulate(source, "sample").await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.abort(e)),
        };

        let difference = match background {
            Some(background) => {
                let result = self.accumulate(background, "background").await.and_then(|bg| {
                    let diff = snapshot.difference(&bg, self.config.batch.magnification)?;
                    Ok((bg, diff))
                });
                match result {
                    Ok((bg, diff)) => {
                        metadata.background_frames = Some(bg.frames);
                        metadata.skipped += bg.skipped;
                        Some(diff)
                    }
                    Err(e) => return Err(self.abort(e)),
                }
            }
            None => None,
        };

        self.set_state(SessionState::Draining);
        self.finalize(metadata, snapshot, difference, TerminationReason::SourceExhausted)
            .await
    }

    /// Map-reduce one source: decode and detect on rayon workers, folding each
    /// result into a shared accumulator as it completes
    async fn accumulate(&self, source: BatchSource, label: &'static str) -> Result<AccumulatorSnapshot> {
        let workers = self.config.batch.workers;
        let detector = EventDetector::new(self.params);
        let decoder = Arc::clone(&self.decoder);
        let accumulator = Arc::new(EventAccumulator::new());
        let shared = Arc::clone(&accumulator);
        let files = source.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("ioncount-worker-{}", i))
                .build()
                .map_err(|e| IonCountError::component("batch", e.to_string()))?;

            info!(
                "Processing {} {} files on {} workers",
                files,
                label,
                pool.current_num_threads()
            );

            pool.install(|| {
                source
                    .par_frames(decoder.as_ref())
                    .try_for_each(|decoded| -> Result<()> {
                        let frame = match decoded {
                            Ok(frame) => frame,
                            Err(e) => {
                                let err = IonCountError::from(e);
                                if !err.is_per_frame() {
                                    return Err(err);
                                }
                                let skipped = shared.record_skipped();
                                warn!("Skipping {} file: {} ({} skipped)", label, err, skipped);
                                return Ok(());
                            }
                        };

                        let detection = match detector.detect(&frame) {
                            Ok(detection) => detection,
                            Err(e) => {
                                let err = IonCountError::from(e);
                                if !err.is_per_frame() {
                                    return Err(err);
                                }
                                let skipped = shared.record_skipped();
                                warn!(
                                    "Skipping {} frame {}: {} ({} skipped)",
                                    label, frame.id, err, skipped
                                );
                                return Ok(());
                            }
                        };
                        drop(frame);

                        shared.contribute(&detection)?;
                        Ok(())
                    })
            })
        })
        .await
        .map_err(|e| IonCountError::component("batch", format!("worker pool failed: {}", e)))??;

        let snapshot = accumulator.snapshot()?;
        info!(
            "Accumulated {} {} frames ({} events, {} skipped)",
            snapshot.frames, label, snapshot.events, snapshot.skipped
        );
        Ok(snapshot)
    }
}
