use super::controller::SessionController;
use super::types::{ControlCommand, RunMetadata, RunMode, RunReport, SessionState};
use crate::accumulator::EventAccumulator;
use crate::camera::FrameDevice;
use crate::error::{IonCountError, Result};
use crate::kernel::EventDetector;
use crate::source::{StreamListener, TerminationReason};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

impl SessionController {
    /// Acquire from a push-based device until the frame cap is reached, a stop
    /// is requested or the device reports end of stream.
    ///
    /// `controls` carries software-trigger and stop commands (keyboard or
    /// programmatic). The accumulator is sized from the device resolution.
    pub async fn run_streaming(
        &self,
        device: Arc<dyn FrameDevice>,
        controls: Option<mpsc::UnboundedReceiver<ControlCommand>>,
    ) -> Result<RunReport> {
        self.begin()?;
        let acquisition = &self.config.acquisition;

        let (width, height) = device.resolution();
        let accumulator = Arc::new(EventAccumulator::with_shape(
            height as usize,
            width as usize,
        ));
        let listener = Arc::new(StreamListener::new(
            EventDetector::new(self.params),
            accumulator,
            acquisition.frame_cap,
            self.stop.clone(),
        ));

        if let Err(e) = device.set_trigger_mode(acquisition.trigger_mode) {
            return Err(self.abort(e.into()));
        }

        let metadata = RunMetadata::start(RunMode::Streaming);
        info!(
            "Starting streaming run {} on {} (trigger mode: {}, frame cap: {:?})",
            metadata.run_id,
            device.info(),
            acquisition.trigger_mode,
            acquisition.frame_cap
        );

        if let Err(e) = device.start_stream(listener.clone()) {
            let err = listener.take_fatal_error().unwrap_or_else(|| e.into());
            return Err(self.abort(err));
        }
        self.set_state(SessionState::Acquiring);

        self.control_loop(device.as_ref(), controls).await;

        self.set_state(SessionState::Draining);
        if let Err(e) = self.drain(&device).await {
            return Err(self.abort(e));
        }

        let snapshot = match listener.finalize() {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.abort(e)),
        };

        if let Err(e) = device.close() {
            warn!("Failed to close device: {}", e);
        }

        // Every non-fatal exit from the control loop records a reason
        let reason = match self.stop.reason() {
            Some(reason) => reason,
            None => {
                return Err(self.abort(IonCountError::system(
                    "Stream stopped without a termination reason",
                )))
            }
        };
        self.finalize(metadata, snapshot, None, reason).await
    }

    /// Wait for a termination condition while forwarding control commands
    async fn control_loop(
        &self,
        device: &dyn FrameDevice,
        mut controls: Option<mpsc::UnboundedReceiver<ControlCommand>>,
    ) {
        let mut controls_open = controls.is_some();
        let mut signals_enabled = self.handle_signals;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,

                command = next_command(&mut controls), if controls_open => match command {
                    Some(ControlCommand::Trigger) => {
                        debug!("Software trigger requested");
                        if let Err(e) = device.software_trigger() {
                            warn!("Software trigger failed: {}", e);
                        }
                    }
                    Some(ControlCommand::Stop) => {
                        info!("Stop requested by control input");
                        self.stop.request(TerminationReason::ExternalStop);
                    }
                    None => {
                        debug!("Control channel closed");
                        controls_open = false;
                    }
                },

                result = tokio::signal::ctrl_c(), if signals_enabled => match result {
                    Ok(()) => {
                        info!("Received SIGINT signal (Ctrl+C)");
                        self.stop.request(TerminationReason::ExternalStop);
                    }
                    Err(e) => {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                        signals_enabled = false;
                    }
                },
            }
        }
    }

    /// Stop delivery and wait until no device callback is still running, so
    /// an in-flight frame is folded in before the snapshot
    async fn drain(&self, device: &Arc<dyn FrameDevice>) -> Result<()> {
        let device = Arc::clone(device);
        tokio::task::spawn_blocking(move || device.stop_stream())
            .await
            .map_err(|e| IonCountError::component("streaming", format!("drain failed: {}", e)))??;
        info!("Device stream drained");
        Ok(())
    }
}

async fn next_command(
    controls: &mut Option<mpsc::UnboundedReceiver<ControlCommand>>,
) -> Option<ControlCommand> {
    match controls {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
