//! # Observations and their timestream cache
//!
//! An [`Observation`] is the logical unit of detector time-ordered
//! data: a named record holding the detector pointing for one schedule
//! entry, the scan-interval list partitioning its sample stream, a
//! noise model, and the [`TodCache`] of named timestream buffers the
//! synthesis and map-making stages operate on.
//!
//! ## Cache semantics
//!
//! Timestreams are addressed by `(signal name, detector)` and mutated
//! **in place** by the operators; the Monte Carlo loop overwrites the
//! working buffer each realization and never accumulates across
//! realizations. Buffers for a signal name always exist for every
//! detector of the observation, all of the same length.
//!
//! ## Building
//!
//! [`build_observations`] distributes schedule entries across process
//! groups so that every detector's full time range is owned by exactly
//! one group, and fails fast when the requested grouping size does not
//! evenly partition the available processes.

pub mod pointing;

use std::collections::HashMap;

use ahash::RandomState;
use smallvec::SmallVec;

use crate::comm::ProcComm;
use crate::constants::{DetectorId, SignalName};
use crate::focalplane::{Detector, Focalplane};
use crate::noise::NoiseModel;
use crate::pixels::RingGrid;
use crate::schedule::Schedule;
use crate::todmc_errors::TodmcError;

use pointing::Pointing;

/// Inclusive sample range of one scan sweep; holds at least one
/// sample by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanInterval {
    pub first: usize,
    pub last: usize,
}

/// Interval list of one observation; schedules rarely exceed a few
/// sweeps per entry.
pub type ScanIntervals = SmallVec<[ScanInterval; 8]>;

/// Named per-detector timestream buffers of one observation.
#[derive(Debug, Clone, Default)]
pub struct TodCache {
    buffers: HashMap<(SignalName, DetectorId), Vec<f64>, RandomState>,
}

impl TodCache {
    /// True when at least one detector buffer exists under `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.buffers.keys().any(|(n, _)| n == name)
    }

    /// Create (or reset to zero) the buffer for `(name, det)`.
    pub fn create(&mut self, name: &str, det: &str, nsamp: usize) {
        self.buffers
            .insert((name.to_string(), det.to_string()), vec![0.0; nsamp]);
    }

    /// Borrow a named detector buffer.
    pub fn reference(&self, name: &str, det: &str) -> Result<&[f64], TodmcError> {
        self.buffers
            .get(&(name.to_string(), det.to_string()))
            .map(|v| v.as_slice())
            .ok_or_else(|| TodmcError::SignalNotFound(format!("{name}:{det}")))
    }

    /// Mutably borrow a named detector buffer.
    pub fn reference_mut(&mut self, name: &str, det: &str) -> Result<&mut [f64], TodmcError> {
        self.buffers
            .get_mut(&(name.to_string(), det.to_string()))
            .map(|v| v.as_mut_slice())
            .ok_or_else(|| TodmcError::SignalNotFound(format!("{name}:{det}")))
    }

    /// `dest += src`, element-wise, for one detector.
    pub fn add_to(&mut self, dest: &str, src: &str, det: &str) -> Result<(), TodmcError> {
        let src_buf = self.reference(src, det)?.to_vec();
        let dest_buf = self.reference_mut(dest, det)?;
        if src_buf.len() != dest_buf.len() {
            return Err(TodmcError::SignalShapeMismatch {
                name: src.to_string(),
                expected: dest_buf.len(),
                actual: src_buf.len(),
            });
        }
        for (d, s) in dest_buf.iter_mut().zip(&src_buf) {
            *d += s;
        }
        Ok(())
    }

    /// Drop every buffer stored under `name`.
    pub fn clear(&mut self, name: &str) {
        self.buffers.retain(|(n, _), _| n != name);
    }
}

/// One observation: pointing, intervals, noise model, and timestreams.
#[derive(Debug, Clone)]
pub struct Observation {
    pub name: String,
    pub id: usize,
    pub pointing: Pointing,
    pub intervals: ScanIntervals,
    pub noise: NoiseModel,
    pub cache: TodCache,
}

impl Observation {
    /// Number of samples per detector timestream.
    pub fn nsamp(&self) -> usize {
        self.pointing.nsamp()
    }

    /// Detector names local to this observation (focalplane order).
    pub fn detectors(&self) -> &[DetectorId] {
        self.pointing.detectors()
    }
}

/// Construct the observation collection owned by the calling process.
///
/// Splits the communicator into groups of `group_size` processes and
/// assigns schedule entries round-robin to groups, so each entry (and
/// with it every detector's full time range) belongs to exactly one
/// group. Within a group, detectors are distributed round-robin
/// across the group ranks: each rank holds a disjoint detector shard,
/// and the shards of one group cover the full focalplane. Pointing is
/// expanded once here and reused unmodified across all realizations.
///
/// Arguments
/// -----------------
/// * `comm`: process communicator provider.
/// * `focalplane`: detector geometry and noise parameters.
/// * `schedule`: observation schedule; one entry per observation.
/// * `group_size`: requested processes per group; must evenly divide
///   the world size.
/// * `grid`: sky pixelization used for pointing expansion.
///
/// Return
/// ----------
/// * The observations owned by this process, or a fatal configuration
///   error. A rank whose shard is empty (more ranks per group than
///   detectors) surfaces later as [`TodmcError::NoHitPixels`].
pub fn build_observations(
    comm: &dyn ProcComm,
    focalplane: &Focalplane,
    schedule: &Schedule,
    group_size: usize,
    grid: RingGrid,
) -> Result<Vec<Observation>, TodmcError> {
    if focalplane.is_empty() {
        return Err(TodmcError::EmptyFocalplane);
    }
    if schedule.is_empty() {
        return Err(TodmcError::EmptySchedule);
    }
    let group_info = comm.split(group_size)?;

    // Local detector shard, keeping each detector's focalplane index
    // as its noise stream id.
    let shard: Vec<(usize, Detector)> = focalplane
        .detectors
        .iter()
        .enumerate()
        .filter(|(idx, _)| idx % group_info.group_size == group_info.group_rank)
        .map(|(idx, det)| (idx, det.clone()))
        .collect();
    let local_fp = Focalplane {
        detectors: shard.iter().map(|(_, det)| det.clone()).collect(),
    };

    let mut observations = Vec::new();
    for (id, entry) in schedule.entries.iter().enumerate() {
        if id % group_info.n_group != group_info.group {
            continue;
        }
        let pointing = Pointing::generate(entry, &local_fp, grid);
        let nsamp = pointing.nsamp();
        let intervals = split_intervals(nsamp, entry.n_scan.max(1));
        observations.push(Observation {
            name: entry.name.clone(),
            id,
            pointing,
            intervals,
            noise: NoiseModel::from_streams(&shard),
            cache: TodCache::default(),
        });
    }
    log::info!(
        "group {}/{} rank {} owns {} of {} observations, {} of {} detectors",
        group_info.group,
        group_info.n_group,
        group_info.group_rank,
        observations.len(),
        schedule.len(),
        local_fp.len(),
        focalplane.len()
    );
    Ok(observations)
}

/// Partition `[0, nsamp)` into `n_scan` contiguous inclusive intervals.
fn split_intervals(nsamp: usize, n_scan: usize) -> ScanIntervals {
    let mut intervals = ScanIntervals::new();
    let n_scan = n_scan.min(nsamp.max(1));
    for i in 0..n_scan {
        let first = i * nsamp / n_scan;
        let last = ((i + 1) * nsamp / n_scan).max(first + 1) - 1;
        intervals.push(ScanInterval { first, last });
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_partition_sample_range() {
        let intervals = split_intervals(1000, 3);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0].first, 0);
        assert_eq!(intervals[2].last, 999);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].last + 1, pair[1].first);
        }
    }

    #[test]
    fn cache_add_to_sums_buffers() {
        let mut cache = TodCache::default();
        cache.create("a", "det00", 4);
        cache.create("b", "det00", 4);
        cache.reference_mut("a", "det00").unwrap().fill(1.0);
        cache.reference_mut("b", "det00").unwrap().fill(2.0);
        cache.add_to("a", "b", "det00").unwrap();
        assert_eq!(cache.reference("a", "det00").unwrap(), &[3.0; 4]);
    }

    #[test]
    fn cache_clear_removes_name() {
        let mut cache = TodCache::default();
        cache.create("x", "det00", 2);
        assert!(cache.exists("x"));
        cache.clear("x");
        assert!(!cache.exists("x"));
    }
}
