use super::interface::{DeviceInfo, FrameDevice, FrameSink, StreamInfo};
use crate::config::AcquisitionConfig;
use crate::error::{DeviceError, SourceError};
use crate::frame::Frame;
use ndarray::{s, Array3};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, trace, warn};

/// Produces the buffer for frame `id`; `None` ends the stream
pub type FrameGenerator = Box<dyn FnMut(u64) -> Option<Result<Frame, SourceError>> + Send>;

const TRIGGER_POLL: Duration = Duration::from_millis(100);

/// Channels per synthetic pixel, matching a color sensor's native buffer
const SYNTHETIC_CHANNELS: usize = 3;

/// Synthetic ion-impact frames: a noisy baseline with a few bright spots at
/// positions derived from the frame id.
///
/// Buffers are produced as `rows x cols x channels` and collapsed to
/// grayscale the same way a hardware buffer is.
pub fn synthetic_impacts(width: u32, height: u32, baseline: f32, impacts: usize) -> FrameGenerator {
    Box::new(move |id| {
        let (rows, cols) = (height as usize, width as usize);
        let mut seed = id.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        let mut next = move || {
            // xorshift64
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut buffer = Array3::from_shape_fn((rows, cols, SYNTHETIC_CHANNELS), |_| {
            baseline + (next() % 4) as f32
        });
        for _ in 0..impacts {
            let y = (next() % rows.max(1) as u64) as usize;
            let x = (next() % cols.max(1) as u64) as usize;
            let peak = baseline + 120.0 + (next() % 100) as f32;
            buffer.slice_mut(s![y, x, ..]).fill(peak);
        }

        Some(
            Frame::from_buffer(id, SystemTime::now(), buffer.into_dyn()).map_err(|e| {
                SourceError::MalformedBuffer {
                    details: e.to_string(),
                }
            }),
        )
    })
}

/// In-process device delivering generated frames on its own thread.
///
/// In trigger mode a frame is produced per software trigger (or per
/// simulated hardware trigger when `hardware_trigger_interval` is set);
/// otherwise frames arrive at the configured rate.
pub struct SimulatedDevice {
    info: DeviceInfo,
    resolution: (u32, u32),
    frame_interval: Duration,
    hardware_trigger_interval: Option<Duration>,
    trigger_mode: AtomicBool,
    is_running: Arc<AtomicBool>,
    frame_counter: Arc<AtomicU64>,
    generator: Arc<Mutex<FrameGenerator>>,
    trigger_tx: Mutex<Option<mpsc::Sender<()>>>,
    delivery_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDevice {
    pub fn new(index: usize, resolution: (u32, u32), fps: u32, generator: FrameGenerator) -> Self {
        info!(
            "Initializing simulated device {} ({}x{} @ {}fps)",
            index, resolution.0, resolution.1, fps
        );

        Self {
            info: Self::device_info(index),
            resolution,
            frame_interval: Duration::from_micros(1_000_000 / fps.max(1) as u64),
            hardware_trigger_interval: None,
            trigger_mode: AtomicBool::new(false),
            is_running: Arc::new(AtomicBool::new(false)),
            frame_counter: Arc::new(AtomicU64::new(0)),
            generator: Arc::new(Mutex::new(generator)),
            trigger_tx: Mutex::new(None),
            delivery_thread: Mutex::new(None),
        }
    }

    /// Simulated device producing synthetic impacts at the configured resolution
    pub fn from_config(index: usize, config: &AcquisitionConfig) -> Self {
        let (width, height) = config.resolution;
        Self::new(
            index,
            config.resolution,
            config.fps,
            synthetic_impacts(width, height, 10.0, 12),
        )
    }

    pub(crate) fn device_info(index: usize) -> DeviceInfo {
        DeviceInfo {
            index,
            model_name: "Simulated impact source".to_string(),
            serial: format!("SIM-{:04}", index),
            interface: "in-process".to_string(),
        }
    }

    /// Emit a trigger at a fixed cadence while in trigger mode
    pub fn with_hardware_trigger_interval(mut self, interval: Duration) -> Self {
        self.hardware_trigger_interval = Some(interval);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Frames produced so far, including ones the sink refused
    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }

    fn deliver(
        generator: &Mutex<FrameGenerator>,
        frame_counter: &AtomicU64,
        sink: &dyn FrameSink,
    ) -> bool {
        let id = frame_counter.fetch_add(1, Ordering::SeqCst);
        let produced = {
            let mut generate = generator.lock();
            (*generate)(id)
        };

        match produced {
            Some(Ok(frame)) => {
                trace!("Delivering simulated frame {}", id);
                sink.on_frame(frame);
                true
            }
            Some(Err(e)) => {
                warn!("Simulated frame {} is malformed: {}", id, e);
                sink.on_frame_error(e);
                true
            }
            None => {
                info!("Simulated device reached end of stream after {} frames", id);
                sink.on_end_of_stream();
                false
            }
        }
    }
}

impl FrameDevice for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn set_trigger_mode(&self, enabled: bool) -> Result<(), DeviceError> {
        if self.is_streaming() {
            return Err(DeviceError::StreamSetup {
                details: "trigger mode cannot change while streaming".to_string(),
            });
        }
        debug!("Simulated device trigger mode: {}", enabled);
        self.trigger_mode.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn start_stream(&self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::StreamSetup {
                details: "stream already running".to_string(),
            });
        }

        let (width, height) = self.resolution;
        if !sink.on_stream_ready(&StreamInfo { width, height }) {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(DeviceError::StreamSetup {
                details: "sink refused the stream".to_string(),
            });
        }

        let (trigger_tx, trigger_rx) = mpsc::channel::<()>();
        let trigger_mode = self.trigger_mode.load(Ordering::SeqCst);
        let frame_interval = self.frame_interval;
        let hardware_trigger_interval = self.hardware_trigger_interval;
        let is_running = Arc::clone(&self.is_running);
        let frame_counter = Arc::clone(&self.frame_counter);
        let generator = Arc::clone(&self.generator);

        let handle = thread::Builder::new()
            .name("ioncount-delivery".to_string())
            .spawn(move || {
                info!(
                    "Simulated delivery thread started ({})",
                    if trigger_mode { "trigger mode" } else { "free-running" }
                );

                while is_running.load(Ordering::SeqCst) {
                    if trigger_mode {
                        let wait = hardware_trigger_interval.unwrap_or(TRIGGER_POLL);
                        match trigger_rx.recv_timeout(wait) {
                            Ok(()) => {}
                            Err(RecvTimeoutError::Timeout) if hardware_trigger_interval.is_some() => {
                                trace!("Simulated hardware trigger");
                            }
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    } else {
                        thread::sleep(frame_interval);
                    }

                    if !is_running.load(Ordering::SeqCst) {
                        break;
                    }

                    if !Self::deliver(&generator, &frame_counter, sink.as_ref()) {
                        break;
                    }
                }

                info!("Simulated delivery thread stopped");
            })
            .map_err(|e| {
                self.is_running.store(false, Ordering::SeqCst);
                DeviceError::StreamSetup {
                    details: format!("failed to spawn delivery thread: {}", e),
                }
            })?;

        *self.trigger_tx.lock() = Some(trigger_tx);
        *self.delivery_thread.lock() = Some(handle);
        Ok(())
    }

    fn software_trigger(&self) -> Result<(), DeviceError> {
        if !self.trigger_mode.load(Ordering::SeqCst) {
            return Err(DeviceError::Trigger {
                details: "device is not in trigger mode".to_string(),
            });
        }

        let sender = self.trigger_tx.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(()).map_err(|_| DeviceError::Trigger {
                details: "delivery thread has exited".to_string(),
            }),
            None => Err(DeviceError::Trigger {
                details: "stream is not running".to_string(),
            }),
        }
    }

    fn stop_stream(&self) -> Result<(), DeviceError> {
        self.is_running.store(false, Ordering::SeqCst);
        self.trigger_tx.lock().take();

        let handle = self.delivery_thread.lock().take();
        if let Some(handle) = handle {
            info!("Stopping simulated stream");
            handle.join().map_err(|_| {
                error!("Simulated delivery thread panicked");
                DeviceError::Stop {
                    details: "delivery thread panicked".to_string(),
                }
            })?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.stop_stream()?;
        debug!("Simulated device {} closed", self.info.index);
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}
