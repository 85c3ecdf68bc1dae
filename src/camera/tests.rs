use super::*;
use crate::config::IonCountConfig;
use crate::error::{DeviceError, IonCountError, SourceError};
use crate::frame::Frame;
use ndarray::Array2;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Default)]
struct RecordingSink {
    ready: Mutex<Option<StreamInfo>>,
    frame_ids: Mutex<Vec<u64>>,
    errors: AtomicU64,
    ended: AtomicBool,
    refuse: bool,
}

impl FrameSink for RecordingSink {
    fn on_stream_ready(&self, info: &StreamInfo) -> bool {
        *self.ready.lock() = Some(*info);
        !self.refuse
    }

    fn on_frame(&self, frame: Frame) {
        self.frame_ids.lock().push(frame.id);
    }

    fn on_frame_error(&self, _error: SourceError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_end_of_stream(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

fn flat_frames(limit: u64) -> FrameGenerator {
    Box::new(move |id| {
        (id < limit).then(|| Ok(Frame::new(id, SystemTime::now(), Array2::zeros((4, 6)))))
    })
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_free_running_delivery() {
    let device = SimulatedDevice::new(0, (6, 4), 200, flat_frames(u64::MAX));
    let sink = Arc::new(RecordingSink::default());

    device.set_trigger_mode(false).unwrap();
    device.start_stream(sink.clone()).unwrap();
    assert!(device.is_streaming());
    assert!(wait_for(|| sink.frame_ids.lock().len() >= 5));

    device.stop_stream().unwrap();
    let delivered = sink.frame_ids.lock().len();
    std::thread::sleep(Duration::from_millis(50));

    // Nothing arrives once stop_stream has returned
    assert_eq!(sink.frame_ids.lock().len(), delivered);
    assert!(!device.is_streaming());
    assert_eq!(
        *sink.ready.lock(),
        Some(StreamInfo {
            width: 6,
            height: 4
        })
    );

    let ids = sink.frame_ids.lock().clone();
    assert!(ids.windows(2).all(|pair| pair[1] == pair[0] + 1));
}

#[test]
fn test_trigger_mode_delivers_one_frame_per_trigger() {
    let device = SimulatedDevice::new(0, (6, 4), 30, flat_frames(u64::MAX));
    let sink = Arc::new(RecordingSink::default());

    device.set_trigger_mode(true).unwrap();
    device.start_stream(sink.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(150));
    assert!(sink.frame_ids.lock().is_empty());

    for _ in 0..3 {
        device.software_trigger().unwrap();
    }
    assert!(wait_for(|| sink.frame_ids.lock().len() == 3));

    device.stop_stream().unwrap();
    assert_eq!(*sink.frame_ids.lock(), vec![0, 1, 2]);
    assert_eq!(device.frame_count(), 3);
}

#[test]
fn test_software_trigger_requires_trigger_mode_and_stream() {
    let device = SimulatedDevice::new(0, (6, 4), 30, flat_frames(u64::MAX));

    device.set_trigger_mode(true).unwrap();
    assert!(matches!(
        device.software_trigger(),
        Err(DeviceError::Trigger { .. })
    ));

    device.set_trigger_mode(false).unwrap();
    let sink = Arc::new(RecordingSink::default());
    device.start_stream(sink).unwrap();
    assert!(matches!(
        device.software_trigger(),
        Err(DeviceError::Trigger { .. })
    ));
    assert!(device.set_trigger_mode(true).is_err());
    device.stop_stream().unwrap();
}

#[test]
fn test_hardware_trigger_interval() {
    let device = SimulatedDevice::new(0, (6, 4), 30, flat_frames(u64::MAX))
        .with_hardware_trigger_interval(Duration::from_millis(5));
    let sink = Arc::new(RecordingSink::default());

    device.set_trigger_mode(true).unwrap();
    device.start_stream(sink.clone()).unwrap();
    assert!(wait_for(|| sink.frame_ids.lock().len() >= 3));
    device.stop_stream().unwrap();
}

#[test]
fn test_end_of_stream() {
    let device = SimulatedDevice::new(0, (6, 4), 500, flat_frames(4));
    let sink = Arc::new(RecordingSink::default());

    device.set_trigger_mode(false).unwrap();
    device.start_stream(sink.clone()).unwrap();
    assert!(wait_for(|| sink.ended.load(Ordering::SeqCst)));

    device.stop_stream().unwrap();
    assert_eq!(*sink.frame_ids.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_malformed_frames_reach_error_callback() {
    let generator: FrameGenerator = Box::new(|id| match id {
        0..=1 => Some(Ok(Frame::new(id, SystemTime::now(), Array2::zeros((4, 6))))),
        2 => Some(Err(SourceError::MalformedBuffer {
            details: "short read".to_string(),
        })),
        _ => None,
    });
    let device = SimulatedDevice::new(0, (6, 4), 500, generator);
    let sink = Arc::new(RecordingSink::default());

    device.set_trigger_mode(false).unwrap();
    device.start_stream(sink.clone()).unwrap();
    assert!(wait_for(|| sink.ended.load(Ordering::SeqCst)));
    device.stop_stream().unwrap();

    assert_eq!(sink.frame_ids.lock().len(), 2);
    assert_eq!(sink.errors.load(Ordering::SeqCst), 1);
}

#[test]
fn test_refused_stream() {
    let device = SimulatedDevice::new(0, (6, 4), 30, flat_frames(u64::MAX));
    let sink = Arc::new(RecordingSink {
        refuse: true,
        ..Default::default()
    });

    assert!(matches!(
        device.start_stream(sink),
        Err(DeviceError::StreamSetup { .. })
    ));
    assert!(!device.is_streaming());
}

#[test]
fn test_double_start_is_rejected() {
    let device = SimulatedDevice::new(0, (6, 4), 30, flat_frames(u64::MAX));
    device.set_trigger_mode(true).unwrap();
    device
        .start_stream(Arc::new(RecordingSink::default()))
        .unwrap();
    assert!(device
        .start_stream(Arc::new(RecordingSink::default()))
        .is_err());
    device.close().unwrap();
}

#[test]
fn test_synthetic_impacts_are_deterministic() {
    let mut generator = synthetic_impacts(32, 16, 10.0, 3);
    let a = generator(7).unwrap().unwrap();
    let b = generator(7).unwrap().unwrap();

    assert_eq!(a.shape(), (16, 32));
    assert_eq!(a.pixels(), b.pixels());
    assert!(a.pixels().iter().any(|&v| v >= 130.0));
}

#[test]
fn test_synthetic_buffers_collapse_to_grayscale() {
    let mut generator = synthetic_impacts(12, 9, 10.0, 0);
    let frame = generator(3).unwrap().unwrap();

    assert_eq!(frame.shape(), (9, 12));
    assert!(frame.pixels().iter().all(|&v| (10.0..=13.0).contains(&v)));
}

#[test]
fn test_enumerate_lists_simulated_device_last() {
    let devices = enumerate_devices();
    let last = devices.last().unwrap();
    assert_eq!(last.index, devices.len() - 1);
    assert_eq!(last.interface, "in-process");
}

#[test]
fn test_builder_opens_configured_device() {
    let mut config = IonCountConfig::default().acquisition;
    config.device_index = enumerate_devices().len() - 1;
    config.resolution = (8, 6);

    let device = DeviceBuilder::new().config(config).build().unwrap();
    assert_eq!(device.resolution(), (8, 6));
    assert_eq!(device.info().interface, "in-process");
}

#[test]
fn test_builder_rejects_unknown_index() {
    let mut config = IonCountConfig::default().acquisition;
    config.device_index = 999;

    match DeviceBuilder::new().config(config).build() {
        Err(IonCountError::Device(DeviceError::NotFound { index, .. })) => assert_eq!(index, 999),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("device 999 should not exist"),
    }
}

#[test]
fn test_builder_requires_config() {
    assert!(matches!(
        DeviceBuilder::new().build(),
        Err(IonCountError::System { .. })
    ));
}
