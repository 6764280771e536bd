//! Record file writers.
//!
//! One CSV file per session with the header `tiempo,u (entrada),v (salida)`,
//! which MATLAB's `iddata` import understands directly.
use crate::error::{DaqError, DaqResult};
use crate::protocol::Sample;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Header row written once at file creation.
pub const HEADER: [&str; 3] = ["tiempo", "u (entrada)", "v (salida)"];

/// Append-only destination for samples.
pub trait SampleSink {
    /// Appends one sample.
    fn write_sample(&mut self, sample: &Sample) -> DaqResult<()>;

    /// Flushes and releases the destination. Calling it twice is a no-op.
    fn close(&mut self) -> DaqResult<()>;

    /// Samples accepted so far.
    fn samples_written(&self) -> usize;
}

/// CSV writer for acquisition samples.
pub struct CsvSink<W: Write> {
    writer: Option<csv::Writer<W>>,
    samples: usize,
}

impl CsvSink<File> {
    /// Creates `path` and writes the header row. Existing files are never
    /// overwritten.
    pub fn create(path: &Path) -> DaqResult<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        info!("CSV file created at '{}'.", path.display());
        Self::from_writer(file)
    }
}

impl<W: Write> CsvSink<W> {
    /// Wraps `inner` and writes the header row.
    pub fn from_writer(inner: W) -> DaqResult<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer: Some(writer),
            samples: 0,
        })
    }
}

impl<W: Write> SampleSink for CsvSink<W> {
    fn write_sample(&mut self, sample: &Sample) -> DaqResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| DaqError::UnexpectedFailure("write to closed CSV sink".into()))?;
        writer.write_record(&[
            format!("{:.4}", sample.elapsed_seconds),
            sample.input_value.to_string(),
            format_output(sample.output_value),
        ])?;
        writer.flush()?;
        self.samples += 1;
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(samples = self.samples, "CSV sink closed");
        }
        Ok(())
    }

    fn samples_written(&self) -> usize {
        self.samples
    }
}

impl<W: Write> Drop for CsvSink<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("CSV sink flush on drop failed: {}", e);
        }
    }
}

/// Formats the plant response with at least two decimals, keeping any
/// further precision the device sent.
pub fn format_output(value: f64) -> String {
    let mut text = value.to_string();
    if !value.is_finite() {
        return text;
    }
    match text.find('.') {
        Some(dot) => {
            let decimals = text.len() - dot - 1;
            for _ in decimals..2 {
                text.push('0');
            }
        }
        None => text.push_str(".00"),
    }
    text
}

/// `<prefix>_YYYY-mm-dd_HH-MM-SS.csv` for a session started at `started`.
pub fn session_file_name(prefix: &str, started: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, started.format("%Y-%m-%d_%H-%M-%S"))
}

/// Creates the output directory if needed and the session file inside it.
pub fn create_session_file(
    output_dir: &Path,
    prefix: &str,
    started: DateTime<Local>,
) -> DaqResult<(PathBuf, CsvSink<File>)> {
    if !output_dir.exists() {
        std::fs::create_dir_all(output_dir)?;
    }
    let path = output_dir.join(session_file_name(prefix, started));
    let sink = CsvSink::create(&path)?;
    Ok((path, sink))
}
