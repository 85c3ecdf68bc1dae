use crate::config::OutputConfig;
use crate::error::{ExportError, IonCountError, Result};
use crate::session::{RunMode, RunReport};
use crate::source::TerminationReason;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use config::ConfigError;
use ndarray::Array2;
use serde::Serialize;
use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const EVENT_COUNT_FILE: &str = "event_count.csv";
pub const AVERAGE_FILE: &str = "avg_event_count.csv";
pub const DIFFERENCE_FILE: &str = "difference.csv";
pub const METADATA_FILE: &str = "metadata.json";

/// Export collaborator receiving a finalized run
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Check the destination before any frame is acquired
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Persist the report, returning the files written
    async fn export(&self, report: &RunReport) -> Result<Vec<PathBuf>>;
}

/// Metadata record as written to `metadata.json`
#[derive(Debug, Serialize)]
pub struct MetadataRecord {
    pub run_id: String,
    pub mode: RunMode,
    pub image_counter: u64,
    pub event_count: u64,
    pub skipped_frames: u64,
    pub image_shape: Option<(usize, usize)>,
    pub start_time: String,
    pub end_time: Option<String>,
    #[serde(rename = "elapsed_time (s)")]
    pub elapsed_time: f64,
    pub termination_reason: Option<TerminationReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image_counter: Option<u64>,
}

impl MetadataRecord {
    pub fn from_report(report: &RunReport, timestamp_format: &str) -> Result<Self> {
        let metadata = &report.metadata;
        Ok(Self {
            run_id: metadata.run_id.to_string(),
            mode: metadata.mode,
            image_counter: metadata.frames,
            event_count: metadata.events,
            skipped_frames: metadata.skipped,
            image_shape: metadata.shape,
            start_time: format_timestamp(&metadata.start_time, timestamp_format)?,
            end_time: metadata
                .end_time
                .as_ref()
                .map(|end| format_timestamp(end, timestamp_format))
                .transpose()?,
            elapsed_time: metadata.elapsed_seconds(),
            termination_reason: metadata.termination_reason,
            background_image_counter: metadata.background_frames,
        })
    }
}

fn format_timestamp(time: &DateTime<Local>, format: &str) -> Result<String> {
    let mut rendered = String::new();
    write!(rendered, "{}", time.format(format)).map_err(|_| {
        IonCountError::component("export", format!("invalid timestamp format '{}'", format))
    })?;
    Ok(rendered)
}

/// Render a grid as comma-separated rows
pub fn grid_to_csv<T: Display>(grid: &Array2<T>) -> String {
    let mut out = String::with_capacity(grid.len() * 4);
    for row in grid.rows() {
        let mut first = true;
        for value in row.iter() {
            if !first {
                out.push(',');
            }
            first = false;
            let _ = write!(out, "{}", value);
        }
        out.push('\n');
    }
    out
}

/// Writes the summed map, optional average and difference maps as CSV, and
/// the run metadata as pretty JSON, into `output.path`
pub struct CsvExporter {
    config: OutputConfig,
}

impl CsvExporter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn output_dir(&self) -> &Path {
        Path::new(&self.config.path)
    }

    async fn write_file(&self, name: &str, contents: String) -> Result<PathBuf> {
        let path = self.output_dir().join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| ExportError::Write {
                path: path.display().to_string(),
                source,
            })?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl Exporter for CsvExporter {
    fn prepare(&self) -> Result<()> {
        let dir = self.output_dir();
        std::fs::create_dir_all(dir).map_err(|e| {
            ConfigError::Message(format!(
                "Output directory {} cannot be created: {}",
                dir.display(),
                e
            ))
        })?;

        let writable = std::fs::metadata(dir)
            .map(|meta| meta.is_dir() && !meta.permissions().readonly())
            .unwrap_or(false);
        if !writable {
            return Err(ConfigError::Message(format!(
                "Output directory {} is not writable",
                dir.display()
            ))
            .into());
        }

        debug!("Output directory {} is ready", dir.display());
        Ok(())
    }

    async fn export(&self, report: &RunReport) -> Result<Vec<PathBuf>> {
        let dir = self.output_dir();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ExportError::DirectoryCreation {
                path: dir.display().to_string(),
                source,
            })?;

        let mut written = Vec::new();
        written.push(
            self.write_file(EVENT_COUNT_FILE, grid_to_csv(&report.snapshot.sum))
                .await?,
        );

        if self.config.save_average {
            if let Some(average) = report.snapshot.average() {
                written.push(self.write_file(AVERAGE_FILE, grid_to_csv(&average)).await?);
            }
        }

        if let Some(difference) = &report.difference {
            written.push(self.write_file(DIFFERENCE_FILE, grid_to_csv(difference)).await?);
        }

        let record = MetadataRecord::from_report(report, &self.config.timestamp_format)?;
        let json = serde_json::to_string_pretty(&record)?;
        written.push(self.write_file(METADATA_FILE, json).await?);

        info!(
            "Exported run {} to {} ({} files)",
            report.metadata.run_id,
            dir.display(),
            written.len()
        );
        Ok(written)
    }
}
