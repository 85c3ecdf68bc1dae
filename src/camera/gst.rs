use super::interface::{DeviceInfo, FrameDevice, FrameSink, StreamInfo};
use crate::config::AcquisitionConfig;
use crate::error::{DeviceError, SourceError};
use crate::frame::Frame;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use ndarray::Array3;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, trace, warn};

pub(crate) const GST_INTERFACE: &str = "v4l2";

const RGB_CHANNELS: usize = 3;

/// GStreamer-backed V4L2 camera delivering packed RGB buffers from the streaming
/// thread, collapsed to grayscale per frame
pub struct GstDevice {
    info: DeviceInfo,
    resolution: (u32, u32),
    pipeline: Pipeline,
    frame_counter: Arc<AtomicU64>,
    is_running: Arc<AtomicBool>,
}

impl GstDevice {
    /// List `/dev/video*` nodes in index order
    pub fn enumerate() -> Vec<DeviceInfo> {
        let mut nodes: Vec<String> = match std::fs::read_dir("/dev") {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.starts_with("video"))
                .collect(),
            Err(e) => {
                warn!("Failed to list /dev for video devices: {}", e);
                return Vec::new();
            }
        };
        nodes.sort();

        nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| {
                let model_name =
                    std::fs::read_to_string(format!("/sys/class/video4linux/{}/name", node))
                        .map(|name| name.trim().to_string())
                        .unwrap_or_else(|_| "V4L2 camera".to_string());
                DeviceInfo {
                    index,
                    model_name,
                    serial: format!("/dev/{}", node),
                    interface: GST_INTERFACE.to_string(),
                }
            })
            .collect()
    }

    /// Open the device and build its capture pipeline
    pub fn open(info: DeviceInfo, config: &AcquisitionConfig) -> Result<Self, DeviceError> {
        gstreamer::init().map_err(|e| DeviceError::Open {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = Self::build_pipeline_string(&info.serial, config);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| DeviceError::Open {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| DeviceError::Open {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        Ok(Self {
            info,
            resolution: config.resolution,
            pipeline,
            frame_counter: Arc::new(AtomicU64::new(0)),
            is_running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn build_pipeline_string(device_path: &str, config: &AcquisitionConfig) -> String {
        let (width, height) = config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={},height={} ! \
             queue max-size-buffers=4 ! \
             appsink name=sink sync=false max-buffers=10 drop=false qos=false enable-last-sample=false emit-signals=false",
            device_path, width, height
        )
    }

    fn sample_to_frame(sample: &gstreamer::Sample, id: u64) -> Result<Frame, SourceError> {
        let buffer = sample.buffer().ok_or_else(|| SourceError::MalformedBuffer {
            details: "No buffer in sample".to_string(),
        })?;

        let caps = sample.caps().ok_or_else(|| SourceError::MalformedBuffer {
            details: "No caps in sample".to_string(),
        })?;

        let video_info = VideoInfo::from_caps(caps).map_err(|e| SourceError::MalformedBuffer {
            details: format!("Failed to get video info: {}", e),
        })?;

        let map = buffer
            .map_readable()
            .map_err(|e| SourceError::MalformedBuffer {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let width = video_info.width() as usize;
        let height = video_info.height() as usize;
        let stride = video_info.stride()[0] as usize;
        let data = map.as_slice();

        let row_bytes = width * RGB_CHANNELS;
        if width == 0 || height == 0 || data.len() < stride * (height - 1) + row_bytes {
            return Err(SourceError::MalformedBuffer {
                details: format!(
                    "{} bytes cannot hold a {}x{} RGB frame with stride {}",
                    data.len(),
                    width,
                    height,
                    stride
                ),
            });
        }

        let rgb = Array3::from_shape_fn((height, width, RGB_CHANNELS), |(y, x, c)| {
            data[y * stride + x * RGB_CHANNELS + c] as f32
        });
        trace!("Captured frame {} ({}x{}, {} bytes)", id, width, height, data.len());

        Frame::from_buffer(id, SystemTime::now(), rgb.into_dyn()).map_err(|e| {
            SourceError::MalformedBuffer {
                details: e.to_string(),
            }
        })
    }
}

impl FrameDevice for GstDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn set_trigger_mode(&self, enabled: bool) -> Result<(), DeviceError> {
        if enabled {
            return Err(DeviceError::StreamSetup {
                details: "V4L2 devices do not support trigger mode; set acquisition.trigger_mode = false"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn start_stream(&self, sink: Arc<dyn FrameSink>) -> Result<(), DeviceError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::StreamSetup {
                details: "stream already running".to_string(),
            });
        }

        let appsink = self
            .pipeline
            .by_name("sink")
            .ok_or_else(|| DeviceError::StreamSetup {
                details: "Failed to get appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| DeviceError::StreamSetup {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        let (width, height) = self.resolution;
        if !sink.on_stream_ready(&StreamInfo { width, height }) {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(DeviceError::StreamSetup {
                details: "sink refused the stream".to_string(),
            });
        }

        let frame_sink = Arc::clone(&sink);
        let eos_sink = sink;
        let is_running = Arc::clone(&self.is_running);
        let frame_counter = Arc::clone(&self.frame_counter);

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    if !is_running.load(Ordering::SeqCst) {
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }

                    let id = frame_counter.fetch_add(1, Ordering::SeqCst);
                    match Self::sample_to_frame(&sample, id) {
                        Ok(frame) => frame_sink.on_frame(frame),
                        Err(e) => frame_sink.on_frame_error(e),
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .eos(move |_| {
                    info!("GStreamer pipeline reached end of stream");
                    eos_sink.on_end_of_stream();
                })
                .build(),
        );

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| {
                self.is_running.store(false, Ordering::SeqCst);
                DeviceError::StreamSetup {
                    details: format!("Failed to start GStreamer pipeline: {}", e),
                }
            })?;

        info!("GStreamer pipeline started for {}", self.info);
        Ok(())
    }

    fn software_trigger(&self) -> Result<(), DeviceError> {
        Err(DeviceError::Trigger {
            details: "V4L2 devices do not accept software triggers".to_string(),
        })
    }

    fn stop_stream(&self) -> Result<(), DeviceError> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            debug!("GStreamer stream is not running");
            return Ok(());
        }

        // Reaching Null joins the streaming thread
        self.pipeline
            .set_state(gstreamer::State::Null)
            .map_err(|e| DeviceError::Stop {
                details: format!("Failed to stop GStreamer pipeline: {}", e),
            })?;

        info!("GStreamer stream stopped after {} frames", self.frame_counter.load(Ordering::SeqCst));
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.stop_stream()
    }
}

impl Drop for GstDevice {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            error!("Failed to release GStreamer pipeline: {}", e);
        }
    }
}
