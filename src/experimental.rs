//! Experimental time-course data.
//!
//! Data arrive in long CSV format, one measurement per row:
//!
//! ```text
//! time_h,metabolite,concentration_mM
//! 0,GLC,30.0
//! 1,GLC,29.8
//! ```
//!
//! Series are kept sorted by time. Repeated measurements at the same time are
//! averaged.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

/// Demonstration time course shipped with the crate
pub const DEMO_TIMECOURSE: &str = include_str!("../data/experimental/brodbar_timecourse.csv");

/// Errors reading experimental data
#[derive(Debug, thiserror::Error)]
pub enum ExperimentalDataError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {message}")]
    InvalidRow { row: usize, message: String },
}

#[derive(Debug, Deserialize)]
struct Record {
    time_h: f64,
    metabolite: String,
    concentration_mM: f64,
}

/// Measurements of one metabolite, sorted by time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    pub times_h: Vec<f64>,
    pub values_mM: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.times_h.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times_h.is_empty()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times_h.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times_h.last().copied()
    }

    /// Measured value at an exact time point
    pub fn value_at(&self, t_h: f64) -> Option<f64> {
        self.times_h
            .iter()
            .position(|&t| (t - t_h).abs() < 1e-9)
            .map(|i| self.values_mM[i])
    }

    fn from_points(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut series = TimeSeries::default();
        let mut i = 0;
        while i < points.len() {
            let t = points[i].0;
            let mut sum = 0.0;
            let mut n = 0;
            while i < points.len() && (points[i].0 - t).abs() < 1e-9 {
                sum += points[i].1;
                n += 1;
                i += 1;
            }
            series.times_h.push(t);
            series.values_mM.push(sum / n as f64);
        }
        series
    }
}

/// Experimental time courses keyed by metabolite name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentalData {
    series: BTreeMap<String, TimeSeries>,
}

impl ExperimentalData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled demonstration time course
    pub fn demo() -> Result<Self, ExperimentalDataError> {
        Self::from_reader(DEMO_TIMECOURSE.as_bytes())
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ExperimentalDataError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ExperimentalDataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let data = Self::from_reader(file)?;
        log::info!(
            "Loaded {} experimental series from {}",
            data.series.len(),
            path.display()
        );
        Ok(data)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ExperimentalDataError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut points: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();

        for (i, record) in csv_reader.deserialize::<Record>().enumerate() {
            let record = record?;
            // Header is row 1
            let row = i + 2;
            if !record.time_h.is_finite() || record.time_h < 0.0 {
                return Err(ExperimentalDataError::InvalidRow {
                    row,
                    message: format!("time must be finite and non-negative, got {}", record.time_h),
                });
            }
            if !record.concentration_mM.is_finite() {
                return Err(ExperimentalDataError::InvalidRow {
                    row,
                    message: format!("non-finite concentration for {}", record.metabolite),
                });
            }
            if record.metabolite.is_empty() {
                return Err(ExperimentalDataError::InvalidRow {
                    row,
                    message: "empty metabolite name".into(),
                });
            }
            points
                .entry(record.metabolite)
                .or_default()
                .push((record.time_h, record.concentration_mM));
        }

        Ok(Self {
            series: points
                .into_iter()
                .map(|(name, pts)| (name, TimeSeries::from_points(pts)))
                .collect(),
        })
    }

    /// Add or replace a series
    pub fn insert(&mut self, metabolite: &str, times_h: &[f64], values_mM: &[f64]) {
        let points = times_h.iter().copied().zip(values_mM.iter().copied()).collect();
        self.series.insert(metabolite.to_string(), TimeSeries::from_points(points));
    }

    pub fn series(&self, metabolite: &str) -> Option<&TimeSeries> {
        self.series.get(metabolite)
    }

    pub fn metabolites(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeSeries)> {
        self.series.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Sorted union of all measurement times
    pub fn time_grid(&self) -> Vec<f64> {
        let mut grid: Vec<f64> = self.series.values().flat_map(|s| s.times_h.iter().copied()).collect();
        grid.sort_by(f64::total_cmp);
        grid.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        grid
    }

    /// Earliest and latest measurement time over all series
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let grid = self.time_grid();
        Some((*grid.first()?, *grid.last()?))
    }

    /// Copy without the measurements taken at `t_h` (leave-one-timepoint-out)
    pub fn without_time(&self, t_h: f64) -> Self {
        let series = self
            .series
            .iter()
            .map(|(name, s)| {
                let points = s
                    .times_h
                    .iter()
                    .zip(&s.values_mM)
                    .filter(|(t, _)| (**t - t_h).abs() >= 1e-9)
                    .map(|(t, v)| (*t, *v))
                    .collect();
                (name.clone(), TimeSeries::from_points(points))
            })
            .filter(|(_, s)| !s.is_empty())
            .collect();
        Self { series }
    }
}
