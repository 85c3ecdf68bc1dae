use crate::error::AggregationError;
use crate::kernel::Detection;
use ndarray::{Array2, Zip};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of a capped contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    /// Folded in; `frames` is the new contributed-frame total
    Accepted { frames: u64 },
    /// The frame cap had already been reached, nothing changed
    Rejected,
}

/// Point-in-time copy of the accumulator and its counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatorSnapshot {
    pub sum: Array2<i64>,
    pub frames: u64,
    pub events: u64,
    pub skipped: u64,
}

impl AccumulatorSnapshot {
    pub fn shape(&self) -> (usize, usize) {
        self.sum.dim()
    }

    /// Per-frame mean of the summed map, `None` if no frame was contributed
    pub fn average(&self) -> Option<Array2<f64>> {
        if self.frames == 0 {
            return None;
        }
        let frames = self.frames as f64;
        Some(self.sum.mapv(|v| v as f64 / frames))
    }

    /// `self - background * magnification`, elementwise
    pub fn difference(
        &self,
        background: &AccumulatorSnapshot,
        magnification: f64,
    ) -> Result<Array2<f64>, AggregationError> {
        if self.shape() != background.shape() {
            return Err(AggregationError::ShapeMismatch {
                expected: self.shape(),
                actual: background.shape(),
            });
        }

        let mut diff = self.sum.mapv(|v| v as f64);
        Zip::from(&mut diff)
            .and(&background.sum)
            .for_each(|d, &b| *d -= b as f64 * magnification);
        Ok(diff)
    }
}

#[derive(Debug, Default)]
struct AccumulatorState {
    sum: Option<Array2<i64>>,
    frames: u64,
    events: u64,
    skipped: u64,
}

impl AccumulatorState {
    fn fold(&mut self, detection: &Detection) -> Result<u64, AggregationError> {
        let shape = detection.shape();
        let sum = self.sum.get_or_insert_with(|| {
            info!("Allocating {}x{} accumulator", shape.0, shape.1);
            Array2::zeros(shape)
        });

        if sum.dim() != shape {
            return Err(AggregationError::ShapeMismatch {
                expected: sum.dim(),
                actual: shape,
            });
        }

        Zip::from(sum)
            .and(&detection.event_map)
            .for_each(|acc, &w| *acc += w as i64);
        self.frames += 1;
        self.events += detection.count;

        Ok(self.frames)
    }
}

/// Running elementwise sum of event maps plus frame and event counters.
///
/// All mutation goes through [`EventAccumulator::contribute`] (or its capped
/// variant), serialized by an internal lock, so it can be shared between
/// batch workers or handed to a device delivery thread.
#[derive(Debug, Default)]
pub struct EventAccumulator {
    state: Mutex<AccumulatorState>,
}

impl EventAccumulator {
    /// Create an accumulator whose shape is fixed by the first contribution
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an accumulator with a known shape
    pub fn with_shape(rows: usize, cols: usize) -> Self {
        info!("Allocating {}x{} accumulator", rows, cols);
        Self {
            state: Mutex::new(AccumulatorState {
                sum: Some(Array2::zeros((rows, cols))),
                ..Default::default()
            }),
        }
    }

    /// Fold one frame's detection into the sum and counters.
    ///
    /// Returns the contributed-frame total. A shape mismatch leaves the
    /// accumulator untouched and is fatal to the run.
    pub fn contribute(&self, detection: &Detection) -> Result<u64, AggregationError> {
        let frames = self.state.lock().fold(detection)?;
        debug!("Contributed frame #{} ({} events)", frames, detection.count);
        Ok(frames)
    }

    /// Like [`contribute`](Self::contribute), but refuses the frame once `cap`
    /// frames have been folded in. The check and the fold happen under the
    /// same lock, so concurrent callers can never overshoot the cap.
    pub fn contribute_capped(
        &self,
        detection: &Detection,
        cap: Option<u64>,
    ) -> Result<Contribution, AggregationError> {
        let mut state = self.state.lock();
        if let Some(cap) = cap {
            if state.frames >= cap {
                return Ok(Contribution::Rejected);
            }
        }
        let frames = state.fold(detection)?;
        drop(state);

        debug!("Contributed frame #{} ({} events)", frames, detection.count);
        Ok(Contribution::Accepted { frames })
    }

    /// Hold the lock, stalling every contribution until the guard drops
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.state.lock()
    }

    /// Count a frame lost to a per-frame error
    pub fn record_skipped(&self) -> u64 {
        let mut state = self.state.lock();
        state.skipped += 1;
        state.skipped
    }

    pub fn frames(&self) -> u64 {
        self.state.lock().frames
    }

    pub fn events(&self) -> u64 {
        self.state.lock().events
    }

    pub fn skipped(&self) -> u64 {
        self.state.lock().skipped
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.state.lock().sum.as_ref().map(|sum| sum.dim())
    }

    /// Consistent copy of the sum and counters
    pub fn snapshot(&self) -> Result<AccumulatorSnapshot, AggregationError> {
        let state = self.state.lock();
        let sum = state
            .sum
            .as_ref()
            .ok_or(AggregationError::NothingContributed)?
            .clone();

        Ok(AccumulatorSnapshot {
            sum,
            frames: state.frames,
            events: state.events,
            skipped: state.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::sync::Arc;
    use std::thread;

    fn detection(map: Array2<i32>, count: u64) -> Detection {
        Detection {
            event_map: map,
            count,
        }
    }

    #[test]
    fn test_contribution_adds_elementwise() {
        let acc = EventAccumulator::new();
        assert_eq!(acc.shape(), None);

        acc.contribute(&detection(arr2(&[[0, 5], [5, 0]]), 2)).unwrap();
        acc.contribute(&detection(arr2(&[[5, 5], [0, 0]]), 2)).unwrap();

        let snapshot = acc.snapshot().unwrap();
        assert_eq!(snapshot.sum, arr2(&[[5i64, 10], [5, 0]]));
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.events, 4);
        assert_eq!(snapshot.skipped, 0);
    }

    #[test]
    fn test_fold_order_does_not_matter() {
        let f1 = detection(arr2(&[[1, 0, 3], [0, 7, 0]]), 3);
        let f2 = detection(arr2(&[[0, 2, 0], [4, 0, 9]]), 3);

        let forward = EventAccumulator::new();
        forward.contribute(&f1).unwrap();
        forward.contribute(&f2).unwrap();

        let backward = EventAccumulator::new();
        backward.contribute(&f2).unwrap();
        backward.contribute(&f1).unwrap();

        let combined = EventAccumulator::new();
        combined
            .contribute(&detection(&f1.event_map + &f2.event_map, 6))
            .unwrap();

        let forward = forward.snapshot().unwrap();
        let backward = backward.snapshot().unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.sum, combined.snapshot().unwrap().sum);
        assert_eq!(forward.events, 6);
    }

    #[test]
    fn test_shape_mismatch_is_fatal_and_leaves_state() {
        let acc = EventAccumulator::new();
        acc.contribute(&detection(Array2::ones((3, 3)), 1)).unwrap();

        let err = acc
            .contribute(&detection(Array2::ones((4, 3)), 1))
            .unwrap_err();
        assert_eq!(
            err,
            AggregationError::ShapeMismatch {
                expected: (3, 3),
                actual: (4, 3)
            }
        );
        assert_eq!(acc.frames(), 1);
        assert_eq!(acc.events(), 1);
    }

    #[test]
    fn test_preallocated_shape() {
        let acc = EventAccumulator::with_shape(2, 4);
        assert_eq!(acc.shape(), Some((2, 4)));

        let snapshot = acc.snapshot().unwrap();
        assert_eq!(snapshot.frames, 0);
        assert!(snapshot.sum.iter().all(|&v| v == 0));

        assert!(acc.contribute(&detection(Array2::ones((4, 2)), 0)).is_err());
    }

    #[test]
    fn test_snapshot_before_any_contribution() {
        let acc = EventAccumulator::new();
        acc.record_skipped();
        assert_eq!(acc.snapshot().unwrap_err(), AggregationError::NothingContributed);
        assert_eq!(acc.skipped(), 1);
    }

    #[test]
    fn test_capped_contribution() {
        let acc = EventAccumulator::new();
        let d = detection(Array2::ones((2, 2)), 1);

        assert_eq!(
            acc.contribute_capped(&d, Some(2)).unwrap(),
            Contribution::Accepted { frames: 1 }
        );
        assert_eq!(
            acc.contribute_capped(&d, Some(2)).unwrap(),
            Contribution::Accepted { frames: 2 }
        );
        assert_eq!(acc.contribute_capped(&d, Some(2)).unwrap(), Contribution::Rejected);
        assert_eq!(acc.frames(), 2);

        assert_eq!(
            acc.contribute_capped(&d, None).unwrap(),
            Contribution::Accepted { frames: 3 }
        );
    }

    #[test]
    fn test_concurrent_contributions() {
        let acc = Arc::new(EventAccumulator::new());
        let workers = 8;
        let per_worker = 50;

        thread::scope(|scope| {
            for worker in 0..workers {
                let acc = Arc::clone(&acc);
                scope.spawn(move || {
                    let d = detection(Array2::from_elem((4, 4), worker + 1), 2);
                    for _ in 0..per_worker {
                        acc.contribute(&d).unwrap();
                    }
                });
            }
        });

        let snapshot = acc.snapshot().unwrap();
        let expected: i64 = (1..=workers as i64).sum::<i64>() * per_worker as i64;
        assert_eq!(snapshot.frames, (workers * per_worker) as u64);
        assert_eq!(snapshot.events, (workers * per_worker * 2) as u64);
        assert!(snapshot.sum.iter().all(|&v| v == expected));
    }

    #[test]
    fn test_concurrent_capped_contributions_never_overshoot() {
        let acc = Arc::new(EventAccumulator::new());

        thread::scope(|scope| {
            for _ in 0..6 {
                let acc = Arc::clone(&acc);
                scope.spawn(move || {
                    let d = detection(Array2::ones((2, 2)), 1);
                    for _ in 0..20 {
                        let _ = acc.contribute_capped(&d, Some(37)).unwrap();
                    }
                });
            }
        });

        assert_eq!(acc.frames(), 37);
        assert!(acc.snapshot().unwrap().sum.iter().all(|&v| v == 37));
    }

    #[test]
    fn test_average_and_difference() {
        let sample = AccumulatorSnapshot {
            sum: arr2(&[[10, 20], [0, 4]]),
            frames: 2,
            events: 3,
            skipped: 0,
        };
        let background = AccumulatorSnapshot {
            sum: arr2(&[[2, 4], [1, 0]]),
            frames: 2,
            events: 1,
            skipped: 1,
        };

        assert_eq!(sample.average().unwrap(), arr2(&[[5.0, 10.0], [0.0, 2.0]]));
        assert_eq!(
            sample.difference(&background, 1.5).unwrap(),
            arr2(&[[7.0, 14.0], [-1.5, 4.0]])
        );

        let empty = AccumulatorSnapshot {
            sum: Array2::zeros((2, 2)),
            frames: 0,
            events: 0,
            skipped: 0,
        };
        assert!(empty.average().is_none());

        let wrong = AccumulatorSnapshot {
            sum: Array2::zeros((3, 2)),
            ..empty
        };
        assert!(sample.difference(&wrong, 1.0).is_err());
    }
}
