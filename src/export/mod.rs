//! Export functionality for simulation and calibration output.
//!
//! Provides CSV trajectory export and JSON calibration-result export.

mod csv_export;
mod json_export;

pub use csv_export::{export_trajectory_csv, export_trajectory_csv_to, CsvExporter};
pub use json_export::{export_calibration_json, export_calibration_json_to, CalibrationExport};
