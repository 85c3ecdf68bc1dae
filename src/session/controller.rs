use super::types::{RunMetadata, RunReport, SessionState};
use crate::accumulator::AccumulatorSnapshot;
use crate::config::IonCountConfig;
use crate::error::{IonCountError, Result};
use crate::export::{CsvExporter, Exporter};
use crate::kernel::DetectionParams;
use crate::source::{FrameDecoder, ImageFileDecoder, StopSignal, TerminationReason};
use ndarray::Array2;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Sequences acquisition, detection, aggregation and export for one run.
///
/// A controller starts in [`SessionState::Configuring`] with validated
/// parameters and ends in [`SessionState::Finalized`]; it cannot be reused.
pub struct SessionController {
    pub(super) config: IonCountConfig,
    pub(super) params: DetectionParams,
    pub(super) decoder: Arc<dyn FrameDecoder>,
    pub(super) exporter: Option<Arc<dyn Exporter>>,
    pub(super) handle_signals: bool,
    pub(super) stop: StopSignal,
    state: Mutex<SessionState>,
}

impl SessionController {
    /// Validate the configuration and the output destination and prepare a run
    pub fn new(config: IonCountConfig) -> Result<Self> {
        config.validate()?;
        let params = DetectionParams::try_from(&config.detection)?;
        debug!("Detection parameters: {:?}", params);

        let exporter: Arc<dyn Exporter> = Arc::new(CsvExporter::new(config.output.clone()));
        exporter.prepare()?;

        Ok(Self {
            config,
            params,
            decoder: Arc::new(ImageFileDecoder),
            exporter: Some(exporter),
            handle_signals: false,
            stop: StopSignal::new(),
            state: Mutex::new(SessionState::Configuring),
        })
    }

    /// Replace the batch decode collaborator
    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the export collaborator
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Finalize without writing anything
    pub fn without_export(mut self) -> Self {
        self.exporter = None;
        self
    }

    /// Treat Ctrl+C as an external stop during streaming runs
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn config(&self) -> &IonCountConfig {
        &self.config
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Handle for requesting a stop from outside the controller
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub(super) fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            info!("Session state: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Claim the controller for a run
    pub(super) fn begin(&self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Configuring {
            return Err(IonCountError::system(format!(
                "Session controller cannot start a run from state {:?}",
                state
            )));
        }

        // Covers exporters installed after `new`
        if let Some(exporter) = &self.exporter {
            exporter.prepare()?;
        }
        Ok(())
    }

    /// Record a fatal error and move to the terminal state
    pub(super) fn abort(&self, err: IonCountError) -> IonCountError {
        error!("Run aborted: {}", err);
        self.stop.cancel();
        self.set_state(SessionState::Finalized);
        err
    }

    /// Stamp metadata, move to FINALIZED and hand the report to the exporter
    pub(super) async fn finalize(
        &self,
        mut metadata: RunMetadata,
        snapshot: AccumulatorSnapshot,
        difference: Option<Array2<f64>>,
        reason: TerminationReason,
    ) -> Result<RunReport> {
        metadata.finish(reason, &snapshot);
        self.set_state(SessionState::Finalized);

        info!(
            "Run {} finished ({}): {} frames, {} events, {} skipped, {:.3}s",
            metadata.run_id,
            reason,
            metadata.frames,
            metadata.events,
            metadata.skipped,
            metadata.elapsed_seconds()
        );

        let report = RunReport {
            metadata,
            snapshot,
            difference,
        };

        if let Some(exporter) = &self.exporter {
            exporter.export(&report).await?;
        }

        Ok(report)
    }
}
