//! Incident sources
//!
//! The police archive publishes one table per month, named `YYYYMM`. A
//! month that has not been published is unavailable rather than an error;
//! only a request where no month at all is available fails.

use crate::loader::load_incidents;
use crate::{IncidentRecord, PipelineError, Result, FIRST_ARCHIVE_YEAR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// A validated archive month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IncidentPeriod {
    year: i32,
    month: u32,
}

impl IncidentPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if year < FIRST_ARCHIVE_YEAR {
            return Err(PipelineError::Validation(format!(
                "year {} is before the first archive year {}",
                year, FIRST_ARCHIVE_YEAR
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(PipelineError::Validation(format!(
                "month {} is not between 1-12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    /// All twelve months of a year
    pub fn months_of(year: i32) -> Result<Vec<Self>> {
        (1..=12).map(|month| Self::new(year, month)).collect()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Archive file stem, e.g. `201405`
    pub fn archive_stem(&self) -> String {
        format!("{}{:02}", self.year, self.month)
    }
}

impl fmt::Display for IncidentPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for IncidentPeriod {
    type Err = PipelineError;

    /// Accepts `YYYY-MM` or `YYYYMM`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (year, month) = match s.split_once('-') {
            Some((y, m)) => (y, m),
            None if s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()) => s.split_at(4),
            None => {
                return Err(PipelineError::Validation(format!(
                    "period {:?} is not YYYY-MM",
                    s
                )))
            }
        };
        let year: i32 = year
            .parse()
            .map_err(|_| PipelineError::Validation(format!("invalid year in {:?}", s)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| PipelineError::Validation(format!("invalid month in {:?}", s)))?;
        Self::new(year, month)
    }
}

/// Provider of raw incident tables by month
pub trait IncidentSource {
    /// `Err(PipelineError::Unavailable)` when the month has no data
    fn fetch(&self, period: IncidentPeriod) -> Result<Vec<IncidentRecord>>;
}

/// Reads extracted archive tables from `<dir>/<YYYYMM>.csv`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, period: IncidentPeriod) -> PathBuf {
        self.dir.join(format!("{}.csv", period.archive_stem()))
    }
}

impl IncidentSource for DirectorySource {
    fn fetch(&self, period: IncidentPeriod) -> Result<Vec<IncidentRecord>> {
        let path = self.path_for(period);
        if !path.is_file() {
            return Err(PipelineError::Unavailable(period));
        }
        load_incidents(&path)
    }
}

/// Concatenate the incidents of every available period, in request order
pub fn collect_incidents(
    source: &dyn IncidentSource,
    periods: &[IncidentPeriod],
) -> Result<Vec<IncidentRecord>> {
    let mut all = Vec::new();
    let mut available = 0;

    for &period in periods {
        match source.fetch(period) {
            Ok(rows) => {
                info!("Collected {} incidents for {}", rows.len(), period);
                available += 1;
                all.extend(rows);
            }
            Err(PipelineError::Unavailable(_)) => {
                warn!("No incident data for {}, skipping", period);
            }
            Err(e) => return Err(e),
        }
    }

    if available == 0 {
        let requested: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
        return Err(PipelineError::NoIncidentData(format!(
            "[{}]",
            requested.join(", ")
        )));
    }

    info!(
        "Collected {} incidents from {} of {} periods",
        all.len(),
        available,
        periods.len()
    );

    Ok(all)
}
