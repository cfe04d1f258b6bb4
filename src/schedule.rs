//! # Observation schedule
//!
//! Resolves the observation-schedule input of the pipeline: an ordered
//! list of [`ScheduleEntry`] records, each of which becomes one
//! observation owned by exactly one process group.
//!
//! Entries carry plain MJD start/stop times and the number of scan
//! sweeps performed during the entry; the sweeps partition the sample
//! stream into the observation's interval list.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::MJD;
use crate::todmc_errors::TodmcError;

/// One scheduled observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    /// Start of the observation (MJD, days)
    pub start: MJD,
    /// End of the observation (MJD, days)
    pub stop: MJD,
    /// Number of boresight sweeps; also the number of scan intervals
    pub n_scan: usize,
}

/// Ordered observation schedule.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a schedule from a CSV table with header
    /// `name,start,stop,n_scan`.
    pub fn from_csv_path(path: &Path) -> Result<Self, TodmcError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for record in reader.deserialize() {
            let entry: ScheduleEntry =
                record.map_err(|e| TodmcError::ScheduleParse(e.to_string()))?;
            if entry.stop <= entry.start {
                return Err(TodmcError::ScheduleParse(format!(
                    "entry '{}' has stop {} before start {}",
                    entry.name, entry.stop, entry.start
                )));
            }
            entries.push(entry);
        }
        let schedule = Schedule { entries };
        if schedule.is_empty() {
            return Err(TodmcError::EmptySchedule);
        }
        Ok(schedule)
    }

    /// Build a schedule programmatically from `(name, start, stop,
    /// n_scan)` tuples.
    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Result<Self, TodmcError> {
        if entries.is_empty() {
            return Err(TodmcError::EmptySchedule);
        }
        Ok(Schedule { entries })
    }
}
