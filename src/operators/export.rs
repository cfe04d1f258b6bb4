//! # Archival timestream exporters
//!
//! Two independent on-disk formats for the raw timestream of the
//! first realization:
//!
//! - [`export_tod_csv`] — one CSV file per observation with
//!   `(detector, sample, value)` rows,
//! - [`export_tod_raw`] — one little-endian `f64` blob per
//!   observation (detector-major) next to a small text header.
//!
//! Both are invoked once per run, on the first realization only.
//! Filenames carry the process rank: with grouped communicators every
//! rank holds a distinct detector shard of the same observation, so
//! each one writes its own disjoint set of files. Failures are treated
//! like every other error in this layer: fatal, with deterministic
//! re-run as the recovery path.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::observation::Observation;
use crate::todmc_errors::TodmcError;

#[derive(Debug, Serialize)]
struct TodRecord<'a> {
    detector: &'a str,
    sample: usize,
    value: f64,
}

/// Write the `src` timestream of every observation as CSV under `dir`,
/// into files suffixed with this process `rank`.
pub fn export_tod_csv(
    observations: &[Observation],
    src: &str,
    dir: &Path,
    rank: usize,
) -> Result<(), TodmcError> {
    fs::create_dir_all(dir)?;
    for obs in observations {
        let path = dir.join(format!("tod_{}_{rank:02}.csv", obs.name));
        let mut writer = csv::Writer::from_path(&path)?;
        for det in obs.detectors() {
            let buf = obs.cache.reference(src, det)?;
            for (sample, value) in buf.iter().enumerate() {
                writer.serialize(TodRecord {
                    detector: det,
                    sample,
                    value: *value,
                })?;
            }
        }
        writer.flush()?;
        log::info!("exported {} to {}", obs.name, path.display());
    }
    Ok(())
}

/// Write the `src` timestream of every observation as raw
/// little-endian `f64` (detector-major) plus a text header under
/// `dir`, into files suffixed with this process `rank`.
pub fn export_tod_raw(
    observations: &[Observation],
    src: &str,
    dir: &Path,
    rank: usize,
) -> Result<(), TodmcError> {
    fs::create_dir_all(dir)?;
    for obs in observations {
        let blob_path = dir.join(format!("tod_{}_{rank:02}.f64", obs.name));
        let header_path = dir.join(format!("tod_{}_{rank:02}.hdr", obs.name));

        let mut blob = fs::File::create(&blob_path)?;
        for det in obs.detectors() {
            let buf = obs.cache.reference(src, det)?;
            for value in buf {
                blob.write_all(&value.to_le_bytes())?;
            }
        }
        blob.flush()?;

        let mut header = fs::File::create(&header_path)?;
        writeln!(header, "observation {}", obs.name)?;
        writeln!(header, "nsamp {}", obs.nsamp())?;
        writeln!(header, "detectors {}", obs.detectors().join(","))?;
        log::info!("exported {} to {}", obs.name, blob_path.display());
    }
    Ok(())
}
