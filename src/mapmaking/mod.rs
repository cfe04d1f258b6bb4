//! # Map-making dispatch
//!
//! Two mutually exclusive backends turn the per-realization total
//! signal into map products on disk:
//!
//! - [`binned::BinnedMapmaker`] — direct noise-weighted binning into
//!   pixels, no baseline removal;
//! - [`destripe::DestripingMapmaker`] — offset-template destriping
//!   (iterative PCG solve) followed by binning.
//!
//! Exactly one backend is constructed per run, selected once from the
//! configuration before the Monte Carlo loop begins; the loop body
//! only ever sees the [`MapMaker`] trait, so no backend flag is
//! branched on inside the loop.
//!
//! Both backends share [`PixelBinner`], which accumulates the hit map
//! and the inverse white-noise weight map **once** (pointing and
//! weights are fixed for the run) and writes them at the run-level
//! output root, outside the per-realization directories.

pub mod binned;
pub mod destripe;

use std::path::Path;
use std::sync::Arc;

use crate::comm::ProcComm;
use crate::constants::{DetWeights, Realization, EPS};
use crate::observation::Observation;
use crate::pixels::{HitMap, PixelMap, RingGrid};
use crate::todmc_errors::TodmcError;

/// Polymorphic map-making backend.
///
/// `process` consumes the current realization's total signal from the
/// observation caches and materializes map files under `outpath`
/// (the realization-specific directory).
pub trait MapMaker {
    fn name(&self) -> &'static str;

    fn process(
        &mut self,
        observations: &mut [Observation],
        mc: Realization,
        weights: &DetWeights,
        outpath: &Path,
    ) -> Result<(), TodmcError>;

    /// True when the caller must run a collective barrier after each
    /// realization (cross-realization I/O ordering).
    fn needs_barrier(&self) -> bool;
}

/// Shared pixel-space binning state: hit map and inverse white-noise
/// weight map, accumulated once per run.
pub struct PixelBinner {
    comm: Arc<dyn ProcComm>,
    grid: RingGrid,
    /// Σ w per pixel, co-added over all processes
    invnpp: PixelMap,
}

impl PixelBinner {
    /// Accumulate hits and weights over the local observations,
    /// co-add across processes, and write `hits.csv` / `invnpp.csv`
    /// at the run root (rank 0 only).
    ///
    /// Return
    /// ----------
    /// * The ready binner, or [`TodmcError::NoHitPixels`] when this
    ///   process contributed no samples at all.
    pub fn new(
        comm: Arc<dyn ProcComm>,
        observations: &[Observation],
        weights: &DetWeights,
        run_root: &Path,
    ) -> Result<Self, TodmcError> {
        let grid = observations
            .first()
            .ok_or(TodmcError::EmptySchedule)?
            .pointing
            .grid();

        let mut hits = HitMap::zeros(grid);
        let mut invnpp = PixelMap::zeros(grid);
        for obs in observations {
            for det in obs.detectors() {
                let w = *weights.get(det).unwrap_or(&1.0);
                for pix in obs.pointing.pixels(det)? {
                    hits.hits[*pix] += 1;
                    invnpp.data[*pix] += w;
                }
            }
        }
        if hits.total() == 0 {
            return Err(TodmcError::NoHitPixels { rank: comm.rank() });
        }

        hits.allreduce(comm.as_ref());
        invnpp.allreduce(comm.as_ref());

        if comm.rank() == 0 {
            std::fs::create_dir_all(run_root)?;
            hits.write_csv(&run_root.join("hits.csv"))?;
            invnpp.write_csv(&run_root.join("invnpp.csv"))?;
            log::info!("wrote hit and weight maps to {}", run_root.display());
        }

        Ok(PixelBinner {
            comm,
            grid,
            invnpp,
        })
    }

    pub fn grid(&self) -> RingGrid {
        self.grid
    }

    /// Noise-weighted binning of a named timestream into pixel space,
    /// co-added over all processes.
    pub fn bin_cache(
        &self,
        observations: &[Observation],
        name: &str,
        weights: &DetWeights,
    ) -> Result<PixelMap, TodmcError> {
        let mut zmap = PixelMap::zeros(self.grid);
        for obs in observations {
            for det in obs.detectors() {
                let w = *weights.get(det).unwrap_or(&1.0);
                let buf = obs.cache.reference(name, det)?;
                let pixels = obs.pointing.pixels(det)?;
                for (value, pix) in buf.iter().zip(pixels) {
                    zmap.data[*pix] += w * value;
                }
            }
        }
        zmap.allreduce(self.comm.as_ref());
        self.apply_covariance(&mut zmap);
        Ok(zmap)
    }

    /// Divide the accumulated noise-weighted map by the weight map
    /// (the intensity-only white-noise covariance application).
    pub fn apply_covariance(&self, zmap: &mut PixelMap) {
        for (value, w) in zmap.data.iter_mut().zip(&self.invnpp.data) {
            if *w > EPS {
                *value /= w;
            } else {
                *value = 0.0;
            }
        }
    }

    pub fn comm(&self) -> &dyn ProcComm {
        self.comm.as_ref()
    }
}
