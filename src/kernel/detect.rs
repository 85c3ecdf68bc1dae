use super::params::DetectionParams;
use crate::error::KernelError;
use crate::frame::Frame;
use ndarray::{s, Array2};
use tracing::{debug, trace};

/// Per-frame grid of event weights, zero outside detected footprints
pub type EventMap = Array2<i32>;

/// Result of running the kernel over one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub event_map: EventMap,
    /// Number of events detected in the frame
    pub count: u64,
}

impl Detection {
    pub fn shape(&self) -> (usize, usize) {
        self.event_map.dim()
    }
}

/// Find local-maximum events in a frame.
///
/// Every pixel at least `neighborhood_size / 2` away from each edge is a
/// candidate. A candidate whose offset-corrected value reaches `threshold` is
/// an event unless some sample in its window is strictly greater; equal
/// neighbors do not suppress, so a plateau yields one event per interior
/// pixel. Each event writes its weight over an `event_footprint` square,
/// clipped to the frame, with later events (raster order) overwriting
/// earlier ones.
pub fn detect(frame: &Frame, params: &DetectionParams) -> Result<Detection, KernelError> {
    let (rows, cols) = frame.shape();
    if rows == 0 || cols == 0 {
        return Err(KernelError::EmptyFrame);
    }

    let window = params.neighborhood_size;
    if rows < window || cols < window {
        return Err(KernelError::FrameTooSmall { rows, cols, window });
    }

    let half = params.half_window();
    let footprint_half = params.event_footprint / 2;
    let offset = params.intensity_offset;
    let threshold = params.threshold;
    let samples = frame.samples();

    // Sliding maximum over each row: entry `i` covers columns `i..i + window`.
    // `f32::max` skips NaN, so a NaN neighbor never suppresses.
    let span = cols - window + 1;
    let row_max: Vec<f32> = samples
        .chunks_exact(cols)
        .flat_map(|row| {
            row.windows(window)
                .map(|w| w.iter().copied().fold(f32::NAN, f32::max))
        })
        .collect();
    let row_max: Vec<&[f32]> = row_max.chunks_exact(span).collect();

    let mut event_map = EventMap::zeros((rows, cols));
    let mut count = 0u64;
    let mut window_max = vec![f32::NAN; span];

    for (y, (row, band)) in samples
        .chunks_exact(cols)
        .skip(half)
        .zip(row_max.windows(window))
        .enumerate()
    {
        let y = y + half;

        window_max.fill(f32::NAN);
        for maxima in band {
            for (peak, &m) in window_max.iter_mut().zip(maxima.iter()) {
                *peak = peak.max(m);
            }
        }

        let candidates = row[half..cols - half].iter().zip(window_max.iter());
        for (x, (&sample, &peak)) in candidates.enumerate() {
            let value = sample - offset;
            // NaN samples never qualify
            if !(value >= threshold) {
                continue;
            }
            // The center is part of its own window and never strictly greater
            if peak - offset > value {
                continue;
            }

            let x = x + half;
            let weight = params.scoring.weight(value, params.multiply_factor);
            let y0 = y.saturating_sub(footprint_half);
            let y1 = (y + footprint_half).min(rows - 1);
            let x0 = x.saturating_sub(footprint_half);
            let x1 = (x + footprint_half).min(cols - 1);
            event_map.slice_mut(s![y0..=y1, x0..=x1]).fill(weight);

            trace!("Event at ({}, {}) value {:.1} weight {}", y, x, value, weight);
            count += 1;
        }
    }

    Ok(Detection { event_map, count })
}

/// Detection kernel bound to a run's parameters
#[derive(Debug, Clone)]
pub struct EventDetector {
    params: DetectionParams,
}

impl EventDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Run the kernel over one frame
    pub fn detect(&self, frame: &Frame) -> Result<Detection, KernelError> {
        let detection = detect(frame, &self.params)?;
        debug!(
            "Frame {} ({}x{}): {} events",
            frame.id,
            frame.rows(),
            frame.cols(),
            detection.count
        );
        Ok(detection)
    }
}
