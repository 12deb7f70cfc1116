//! JSON export of calibration results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;

use crate::calibration::CalibrationResult;

/// Export envelope
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationExport<'a> {
    /// Export timestamp
    pub exported_at: String,
    /// Export version for compatibility
    pub version: &'static str,
    pub result: &'a CalibrationResult,
}

impl<'a> CalibrationExport<'a> {
    pub fn new(result: &'a CalibrationResult) -> Self {
        Self {
            exported_at: Local::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            result,
        }
    }
}

/// Export a calibration result to `calibration_YYYYMMDD_HHMMSS.json` inside `dir`
///
/// Creates the directory if it doesn't exist. Returns the path written.
pub fn export_calibration_json(result: &CalibrationResult, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let filename = format!("calibration_{}.json", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);
    export_calibration_json_to(result, &path)?;
    Ok(path)
}

/// Export a calibration result to exactly `path`
pub fn export_calibration_json_to(result: &CalibrationResult, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &CalibrationExport::new(result))?;
    log::info!("Calibration result exported: {}", path.display());
    Ok(())
}
