use chrono::format::{Item, StrftimeItems};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IonCountConfig {
    pub detection: DetectionConfig,
    pub batch: BatchConfig,
    pub acquisition: AcquisitionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Minimum offset-corrected intensity for an event candidate
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Scoring mode (>= 10 weights by intensity, otherwise fixed weight)
    #[serde(default = "default_mode")]
    pub mode: i32,

    /// Side of the square suppression window (odd)
    #[serde(default = "default_neighborhood_size")]
    pub neighborhood_size: usize,

    /// Event weight multiplier
    #[serde(default = "default_multiply_factor")]
    pub multiply_factor: i32,

    /// Baseline subtracted from every sample
    #[serde(default = "default_intensity_offset")]
    pub intensity_offset: f32,

    /// Side of the square marked per event (odd)
    #[serde(default = "default_event_footprint")]
    pub event_footprint: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchConfig {
    /// File extensions picked up when walking an input directory
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Worker threads (0 = available parallelism)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Scale applied to the background map before subtraction
    #[serde(default = "default_magnification")]
    pub magnification: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AcquisitionConfig {
    /// Device index as listed by `list-devices`
    #[serde(default = "default_device_index")]
    pub device_index: usize,

    /// Sensor resolution (width, height)
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Free-running frame rate when trigger mode is off
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Deliver frames only on hardware or software triggers
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: bool,

    /// Stop after this many contributed frames
    #[serde(default)]
    pub frame_cap: Option<u64>,

    /// ENTER issues a software trigger, `q` stops the run
    #[serde(default = "default_keyboard_control")]
    pub keyboard_control: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Directory receiving grids and metadata
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Also write the per-frame average map
    #[serde(default = "default_save_average")]
    pub save_average: bool,

    /// chrono format for start/end timestamps in metadata
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl IonCountConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("detection.threshold", default_threshold() as f64)?
            .set_default("detection.mode", default_mode() as i64)?
            .set_default(
                "detection.neighborhood_size",
                default_neighborhood_size() as i64,
            )?
            .set_default("detection.multiply_factor", default_multiply_factor() as i64)?
            .set_default(
                "detection.intensity_offset",
                default_intensity_offset() as f64,
            )?
            .set_default("detection.event_footprint", default_event_footprint() as i64)?
            .set_default("batch.extensions", default_extensions())?
            .set_default("batch.workers", default_workers() as i64)?
            .set_default("batch.magnification", default_magnification())?
            .set_default("acquisition.device_index", default_device_index() as i64)?
            .set_default(
                "acquisition.resolution",
                vec![default_resolution().0, default_resolution().1],
            )?
            .set_default("acquisition.fps", default_fps())?
            .set_default("acquisition.trigger_mode", default_trigger_mode())?
            .set_default("acquisition.keyboard_control", default_keyboard_control())?
            .set_default("output.path", default_output_path())?
            .set_default("output.save_average", default_save_average())?
            .set_default("output.timestamp_format", default_timestamp_format())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables: IONCOUNT_DETECTION__THRESHOLD=40
            .add_source(
                Environment::with_prefix("IONCOUNT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: IonCountConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::kernel::DetectionParams::try_from(&self.detection)?;

        if self.batch.extensions.is_empty() {
            return Err(ConfigError::Message(
                "Batch extensions must not be empty".to_string(),
            ));
        }

        if !(self.batch.magnification.is_finite() && self.batch.magnification > 0.0) {
            return Err(ConfigError::Message(
                "Batch magnification must be a positive number".to_string(),
            ));
        }

        if self.acquisition.resolution.0 == 0 || self.acquisition.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Acquisition resolution must be greater than 0".to_string(),
            ));
        }

        if self.acquisition.fps == 0 {
            return Err(ConfigError::Message(
                "Acquisition fps must be greater than 0".to_string(),
            ));
        }

        if self.acquisition.frame_cap == Some(0) {
            return Err(ConfigError::Message(
                "Acquisition frame_cap must be greater than 0 when set".to_string(),
            ));
        }

        if self.output.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Output path must not be empty".to_string(),
            ));
        }

        if StrftimeItems::new(&self.output.timestamp_format).any(|item| item == Item::Error) {
            return Err(ConfigError::Message(format!(
                "Invalid output timestamp format: {}",
                self.output.timestamp_format
            )));
        }

        Ok(())
    }
}

impl Default for IonCountConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                threshold: default_threshold(),
                mode: default_mode(),
                neighborhood_size: default_neighborhood_size(),
                multiply_factor: default_multiply_factor(),
                intensity_offset: default_intensity_offset(),
                event_footprint: default_event_footprint(),
            },
            batch: BatchConfig {
                extensions: default_extensions(),
                workers: default_workers(),
                magnification: default_magnification(),
            },
            acquisition: AcquisitionConfig {
                device_index: default_device_index(),
                resolution: default_resolution(),
                fps: default_fps(),
                trigger_mode: default_trigger_mode(),
                frame_cap: None,
                keyboard_control: default_keyboard_control(),
            },
            output: OutputConfig {
                path: default_output_path(),
                save_average: default_save_average(),
                timestamp_format: default_timestamp_format(),
            },
        }
    }
}

// Default value functions
fn default_threshold() -> f32 {
    70.0
}
fn default_mode() -> i32 {
    5
}
fn default_neighborhood_size() -> usize {
    5
}
fn default_multiply_factor() -> i32 {
    5
}
fn default_intensity_offset() -> f32 {
    10.0
}
fn default_event_footprint() -> usize {
    1
}

fn default_extensions() -> Vec<String> {
    vec!["bmp".to_string()]
}
fn default_workers() -> usize {
    0
}
fn default_magnification() -> f64 {
    1.0
}

fn default_device_index() -> usize {
    0
}
fn default_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_fps() -> u32 {
    30
}
fn default_trigger_mode() -> bool {
    true
}
fn default_keyboard_control() -> bool {
    true
}

fn default_output_path() -> String {
    "./output".to_string()
}
fn default_save_average() -> bool {
    true
}
fn default_timestamp_format() -> String {
    "%Y/%m/%d, %H:%M:%S".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = IonCountConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.neighborhood_size, 5);
        assert_eq!(config.batch.extensions, vec!["bmp".to_string()]);
        assert!(config.acquisition.frame_cap.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = IonCountConfig::default();

        config.detection.neighborhood_size = 4;
        assert!(config.validate().is_err());
        config.detection.neighborhood_size = 3;
        assert!(config.validate().is_ok());

        config.acquisition.resolution = (0, 480);
        assert!(config.validate().is_err());
        config.acquisition.resolution = (640, 480);

        config.acquisition.frame_cap = Some(0);
        assert!(config.validate().is_err());
        config.acquisition.frame_cap = Some(100);
        assert!(config.validate().is_ok());

        config.batch.extensions.clear();
        assert!(config.validate().is_err());
        config.batch.extensions.push("png".to_string());

        config.batch.magnification = 0.0;
        assert!(config.validate().is_err());
        config.batch.magnification = 2.0;
        assert!(config.validate().is_ok());

        config.output.timestamp_format = "%Y-%m-%d %".to_string();
        assert!(config.validate().is_err());
        config.output.timestamp_format = "%Y%m%d-%H%M%S".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[detection]
threshold = 40.0
mode = 12
neighborhood_size = 3

[acquisition]
frame_cap = 250
trigger_mode = false
"#
        )
        .unwrap();

        let config = IonCountConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.detection.threshold, 40.0);
        assert_eq!(config.detection.mode, 12);
        assert_eq!(config.detection.neighborhood_size, 3);
        // Untouched keys keep their defaults
        assert_eq!(config.detection.multiply_factor, 5);
        assert_eq!(config.acquisition.frame_cap, Some(250));
        assert!(!config.acquisition.trigger_mode);
        assert_eq!(config.output.path, "./output");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = IonCountConfig::load_from_file("/nonexistent/ioncount.toml").unwrap();
        assert_eq!(config.detection.threshold, 70.0);
        assert_eq!(config.acquisition.resolution, (640, 480));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&IonCountConfig::default()).unwrap();
        let parsed: IonCountConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.detection.threshold, 70.0);
        assert_eq!(parsed.output.timestamp_format, "%Y/%m/%d, %H:%M:%S");
    }
}
