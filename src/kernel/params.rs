use crate::config::DetectionConfig;
use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Numeric modes at or above this value select intensity-proportional weights
pub const SCALED_WEIGHT_MODE: i32 = 10;

/// How a detected event is weighted in the event map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scoring {
    /// Weight is the offset-corrected intensity times the multiply factor
    ScaledWeight,
    /// Weight is the multiply factor alone
    FixedWeight,
}

impl Scoring {
    /// Translate the instrument's numeric mode
    pub fn from_mode(mode: i32) -> Self {
        if mode >= SCALED_WEIGHT_MODE {
            Scoring::ScaledWeight
        } else {
            Scoring::FixedWeight
        }
    }

    #[inline]
    pub(crate) fn weight(self, value: f32, multiply_factor: i32) -> i32 {
        match self {
            Scoring::ScaledWeight => (value * multiply_factor as f32) as i32,
            Scoring::FixedWeight => multiply_factor,
        }
    }
}

/// Detection parameters, fixed for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Minimum offset-corrected intensity for a candidate
    pub threshold: f32,
    pub scoring: Scoring,
    /// Side of the square suppression window (odd, >= 1)
    pub neighborhood_size: usize,
    pub multiply_factor: i32,
    /// Baseline subtracted from every sample before thresholding
    pub intensity_offset: f32,
    /// Side of the square marked per event (odd, >= 1)
    pub event_footprint: usize,
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neighborhood_size == 0 || self.neighborhood_size % 2 == 0 {
            return Err(ConfigError::Message(format!(
                "Neighborhood size must be an odd integer >= 1, got {}",
                self.neighborhood_size
            )));
        }

        if self.event_footprint == 0 || self.event_footprint % 2 == 0 {
            return Err(ConfigError::Message(format!(
                "Event footprint must be an odd integer >= 1, got {}",
                self.event_footprint
            )));
        }

        if !self.threshold.is_finite() {
            return Err(ConfigError::Message(
                "Detection threshold must be a finite number".to_string(),
            ));
        }

        if !self.intensity_offset.is_finite() {
            return Err(ConfigError::Message(
                "Intensity offset must be a finite number".to_string(),
            ));
        }

        Ok(())
    }

    /// Half-width of the suppression window, also the width of the border band
    pub fn half_window(&self) -> usize {
        self.neighborhood_size / 2
    }
}

impl TryFrom<&DetectionConfig> for DetectionParams {
    type Error = ConfigError;

    fn try_from(config: &DetectionConfig) -> Result<Self, Self::Error> {
        let params = Self {
            threshold: config.threshold,
            scoring: Scoring::from_mode(config.mode),
            neighborhood_size: config.neighborhood_size,
            multiply_factor: config.multiply_factor,
            intensity_offset: config.intensity_offset,
            event_footprint: config.event_footprint,
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DetectionParams {
        DetectionParams {
            threshold: 70.0,
            scoring: Scoring::FixedWeight,
            neighborhood_size: 5,
            multiply_factor: 5,
            intensity_offset: 10.0,
            event_footprint: 1,
        }
    }

    #[test]
    fn test_mode_split_point() {
        assert_eq!(Scoring::from_mode(0), Scoring::FixedWeight);
        assert_eq!(Scoring::from_mode(9), Scoring::FixedWeight);
        assert_eq!(Scoring::from_mode(10), Scoring::ScaledWeight);
        assert_eq!(Scoring::from_mode(42), Scoring::ScaledWeight);
        assert_eq!(Scoring::from_mode(-3), Scoring::FixedWeight);
    }

    #[test]
    fn test_weights() {
        assert_eq!(Scoring::FixedWeight.weight(123.0, 5), 5);
        assert_eq!(Scoring::ScaledWeight.weight(12.0, 5), 60);
        // Fractional intensities truncate toward zero
        assert_eq!(Scoring::ScaledWeight.weight(12.7, 2), 25);
    }

    #[test]
    fn test_validation() {
        assert!(params().validate().is_ok());

        let mut bad = params();
        bad.neighborhood_size = 4;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.neighborhood_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.event_footprint = 2;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.threshold = f32::NAN;
        assert!(bad.validate().is_err());

        let mut bad = params();
        bad.intensity_offset = f32::INFINITY;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_from_config() {
        let config = DetectionConfig {
            threshold: 20.0,
            mode: 12,
            neighborhood_size: 3,
            multiply_factor: 2,
            intensity_offset: 1.0,
            event_footprint: 3,
        };

        let params = DetectionParams::try_from(&config).unwrap();
        assert_eq!(params.scoring, Scoring::ScaledWeight);
        assert_eq!(params.half_window(), 1);
        assert_eq!(params.event_footprint, 3);
    }
}
