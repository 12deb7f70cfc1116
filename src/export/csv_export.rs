//! CSV export of simulated trajectories.
//!
//! One row per output time: `time_h`, every state component, then the
//! oxygen-transport columns not already present among the states.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::biochemistry::bohr::OxygenTransport;
use crate::biochemistry::simulation::Trajectory;

/// Streaming CSV writer for trajectories
pub struct CsvExporter<W: Write = File> {
    writer: csv::Writer<W>,
    /// Derived columns written after the states
    derived_columns: Vec<usize>,
    header_written: bool,
    rows: usize,
    path: Option<PathBuf>,
}

impl CsvExporter<File> {
    /// Create `trajectory_YYYYMMDD_HHMMSS.csv` inside `dir`
    ///
    /// Creates the directory if it doesn't exist.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        Self::create(&dir.join(format!("trajectory_{}.csv", timestamp)))
    }

    /// Write to exactly `path`
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        log::info!("CSV export started: {}", path.display());
        let mut exporter = Self::from_writer(file);
        exporter.path = Some(path.to_path_buf());
        Ok(exporter)
    }
}

impl<W: Write> CsvExporter<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            derived_columns: Vec::new(),
            header_written: false,
            rows: 0,
            path: None,
        }
    }

    fn write_header(&mut self, trajectory: &Trajectory) -> Result<()> {
        self.derived_columns = OxygenTransport::LABELS
            .iter()
            .enumerate()
            .filter(|(_, label)| !trajectory.state_names.iter().any(|n| n == *label))
            .map(|(i, _)| i)
            .collect();

        let mut header = Vec::with_capacity(1 + trajectory.n_state() + self.derived_columns.len());
        header.push("time_h");
        header.extend(trajectory.state_names.iter().map(String::as_str));
        header.extend(self.derived_columns.iter().map(|&i| OxygenTransport::LABELS[i]));
        self.writer.write_record(&header)?;
        self.header_written = true;
        Ok(())
    }

    /// Append every output point of `trajectory`
    pub fn write_trajectory(&mut self, trajectory: &Trajectory) -> Result<()> {
        if !self.header_written {
            self.write_header(trajectory)?;
        }
        for (k, (t, state)) in trajectory.times_h.iter().zip(&trajectory.states).enumerate() {
            let mut record = Vec::with_capacity(1 + state.len() + self.derived_columns.len());
            record.push(t.to_string());
            record.extend(state.iter().map(f64::to_string));
            match trajectory.derived.get(k) {
                Some(derived) => {
                    let values = derived.values();
                    record.extend(self.derived_columns.iter().map(|&i| values[i].to_string()));
                }
                None => record.extend(self.derived_columns.iter().map(|_| String::new())),
            }
            self.writer.write_record(&record)?;
            self.rows += 1;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and return the output path, if writing to a file
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.writer.flush()?;
        if let Some(path) = &self.path {
            log::info!("CSV export completed: {} ({} rows)", path.display(), self.rows);
        }
        Ok(self.path)
    }
}

/// Write `trajectory` to a timestamped CSV inside `dir`
pub fn export_trajectory_csv(trajectory: &Trajectory, dir: &Path) -> Result<PathBuf> {
    let mut exporter = CsvExporter::new(dir)?;
    exporter.write_trajectory(trajectory)?;
    let path = exporter.finish()?;
    path.context("CSV exporter lost its output path")
}

/// Write `trajectory` to `path`
pub fn export_trajectory_csv_to(trajectory: &Trajectory, path: &Path) -> Result<()> {
    let mut exporter = CsvExporter::create(path)?;
    exporter.write_trajectory(trajectory)?;
    exporter.finish()?;
    Ok(())
}
