//! # Offset-template destriping backend
//!
//! Removes correlated low-frequency baseline drift from the total
//! signal before binning. The noise is modeled as a step function:
//! every scan interval of every detector is chopped into baselines of
//! fixed length, one free amplitude each, and the amplitudes are
//! solved by preconditioned conjugate gradients on
//!
//! ```text
//! (Fᵀ N⁻¹ Z F) a = Fᵀ N⁻¹ Z y,    Z = I − P (Pᵀ N⁻¹ P)⁻¹ Pᵀ N⁻¹
//! ```
//!
//! where `F` is the offset template matrix, `P` the pointing matrix,
//! and `N⁻¹` the diagonal detector-weight matrix. The preconditioner
//! is the diagonal `1/(w·nsamp)` per baseline. Non-finite residuals
//! abort the run; a stalled solve stops iterating and keeps the best
//! amplitudes found, as the reference solver does.
//!
//! Per realization the backend writes both the plain binned map and
//! the destriped map into the realization directory. The caller is
//! responsible for the collective barrier after each realization
//! ([`MapMaker::needs_barrier`] returns `true`).

use std::path::Path;
use std::sync::Arc;

use itertools::izip;

use crate::comm::ProcComm;
use crate::constants::{DetWeights, DetectorId, Realization, TOTAL_NAME};
use crate::observation::Observation;
use crate::pixels::PixelMap;
use crate::todmc_errors::TodmcError;

use super::{MapMaker, PixelBinner};

/// Destriping parameter block, fixed once before the Monte Carlo
/// loop.
#[derive(Debug, Clone, Copy)]
pub struct DestripeParams {
    /// Baseline length in samples
    pub baseline_length: usize,
    /// Minimum PCG iterations before stall detection may stop
    pub niter_min: usize,
    /// Maximum PCG iterations
    pub niter_max: usize,
    /// Relative residual threshold for convergence
    pub convergence_limit: f64,
}

impl Default for DestripeParams {
    fn default() -> Self {
        DestripeParams {
            baseline_length: 100,
            niter_min: 3,
            niter_max: 100,
            convergence_limit: 1e-12,
        }
    }
}

/// One contiguous detector timestream inside the flattened local
/// signal vector.
#[derive(Debug, Clone)]
struct Segment {
    obs: usize,
    det: DetectorId,
    offset: usize,
    nsamp: usize,
}

/// One offset baseline: a sample range of one segment.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    seg: usize,
    /// First sample, relative to the segment
    first: usize,
    /// Inclusive last sample, relative to the segment
    last: usize,
}

impl Baseline {
    fn len(&self) -> usize {
        self.last + 1 - self.first
    }
}

pub struct DestripingMapmaker {
    binner: PixelBinner,
    params: DestripeParams,
    segments: Vec<Segment>,
    baselines: Vec<Baseline>,
    total_len: usize,
}

impl DestripingMapmaker {
    /// Initialize the shared binning state and the offset-template
    /// geometry (segments and baselines are fixed for the run because
    /// pointing and intervals never change across realizations).
    pub fn new(
        comm: Arc<dyn ProcComm>,
        observations: &[Observation],
        weights: &DetWeights,
        run_root: &Path,
        params: DestripeParams,
    ) -> Result<Self, TodmcError> {
        let binner = PixelBinner::new(comm, observations, weights, run_root)?;

        let mut segments = Vec::new();
        let mut baselines = Vec::new();
        let mut offset = 0;
        for (obs_idx, obs) in observations.iter().enumerate() {
            for det in obs.detectors() {
                let seg_idx = segments.len();
                segments.push(Segment {
                    obs: obs_idx,
                    det: det.clone(),
                    offset,
                    nsamp: obs.nsamp(),
                });
                for interval in &obs.intervals {
                    let mut first = interval.first;
                    while first <= interval.last {
                        let last = (first + params.baseline_length - 1).min(interval.last);
                        baselines.push(Baseline {
                            seg: seg_idx,
                            first,
                            last,
                        });
                        first = last + 1;
                    }
                }
                offset += obs.nsamp();
            }
        }
        log::info!(
            "destriper: {} segments, {} baselines of length {}",
            segments.len(),
            baselines.len(),
            params.baseline_length
        );

        Ok(DestripingMapmaker {
            binner,
            params,
            segments,
            baselines,
            total_len: offset,
        })
    }

    /// Flatten the total-signal cache buffers into one local vector.
    fn gather(&self, observations: &[Observation]) -> Result<Vec<f64>, TodmcError> {
        let mut y = vec![0.0; self.total_len];
        for seg in &self.segments {
            let buf = observations[seg.obs].cache.reference(TOTAL_NAME, &seg.det)?;
            y[seg.offset..seg.offset + seg.nsamp].copy_from_slice(buf);
        }
        Ok(y)
    }

    /// Noise-weighted binning of a flattened signal vector.
    fn bin_flat(
        &self,
        observations: &[Observation],
        weights: &DetWeights,
        y: &[f64],
    ) -> Result<PixelMap, TodmcError> {
        let mut zmap = PixelMap::zeros(self.binner.grid());
        for seg in &self.segments {
            let w = *weights.get(&seg.det).unwrap_or(&1.0);
            let pixels = observations[seg.obs].pointing.pixels(&seg.det)?;
            let samples = &y[seg.offset..seg.offset + seg.nsamp];
            for (value, pix) in samples.iter().zip(pixels) {
                zmap.data[*pix] += w * value;
            }
        }
        zmap.allreduce(self.binner.comm());
        self.binner.apply_covariance(&mut zmap);
        Ok(zmap)
    }

    /// `Z·y = y − scan(bin(y))`, in place.
    fn apply_projection(
        &self,
        observations: &[Observation],
        weights: &DetWeights,
        y: &mut [f64],
    ) -> Result<(), TodmcError> {
        let map = self.bin_flat(observations, weights, y)?;
        for seg in &self.segments {
            let pixels = observations[seg.obs].pointing.pixels(&seg.det)?;
            let samples = &mut y[seg.offset..seg.offset + seg.nsamp];
            for (value, pix) in samples.iter_mut().zip(pixels) {
                *value -= map.data[*pix];
            }
        }
        Ok(())
    }

    /// `a = Fᵀ N⁻¹ y` — project a signal vector onto the baselines.
    fn project_to_baselines(&self, weights: &DetWeights, y: &[f64]) -> Vec<f64> {
        let mut amps = vec![0.0; self.baselines.len()];
        for (amp, base) in amps.iter_mut().zip(&self.baselines) {
            let seg = &self.segments[base.seg];
            let w = *weights.get(&seg.det).unwrap_or(&1.0);
            let start = seg.offset + base.first;
            let stop = seg.offset + base.last + 1;
            *amp = w * y[start..stop].iter().sum::<f64>();
        }
        amps
    }

    /// `y = F·a` — expand baseline amplitudes into a signal vector.
    fn expand_baselines(&self, amps: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.total_len];
        for (amp, base) in amps.iter().zip(&self.baselines) {
            let seg = &self.segments[base.seg];
            let start = seg.offset + base.first;
            let stop = seg.offset + base.last + 1;
            for value in &mut y[start..stop] {
                *value += amp;
            }
        }
        y
    }

    /// Left-hand side operator `Fᵀ N⁻¹ Z F a`.
    fn apply_lhs(
        &self,
        observations: &[Observation],
        weights: &DetWeights,
        amps: &[f64],
    ) -> Result<Vec<f64>, TodmcError> {
        let mut y = self.expand_baselines(amps);
        self.apply_projection(observations, weights, &mut y)?;
        Ok(self.project_to_baselines(weights, &y))
    }

    /// Diagonal preconditioner `1/(w·nsamp)` per baseline.
    fn apply_precond(&self, weights: &DetWeights, amps: &[f64]) -> Vec<f64> {
        amps.iter()
            .zip(&self.baselines)
            .map(|(amp, base)| {
                let seg = &self.segments[base.seg];
                let w = *weights.get(&seg.det).unwrap_or(&1.0);
                amp / (w * base.len() as f64)
            })
            .collect()
    }

    /// Amplitude dot product, summed over all processes.
    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        self.binner.comm().allreduce_scalar(local)
    }

    /// Standard-issue PCG solve of the destriping equation.
    fn solve(
        &self,
        observations: &[Observation],
        weights: &DetWeights,
        rhs: &[f64],
    ) -> Result<Vec<f64>, TodmcError> {
        let rank = self.binner.comm().rank();
        let mut guess = vec![0.0; rhs.len()];
        let mut residual = rhs.to_vec();
        let mut precond_residual = self.apply_precond(weights, &residual);
        let mut proposal = precond_residual.clone();
        let mut sqsum = self.dot(&precond_residual, &residual);
        let init_sqsum = sqsum;
        let mut best_sqsum = sqsum;
        let mut last_best = sqsum;
        if rank == 0 {
            log::info!("destriper: initial residual {init_sqsum:.6e}");
        }
        if init_sqsum <= 0.0 {
            return Ok(guess);
        }

        for iiter in 0..self.params.niter_max {
            if !sqsum.is_finite() {
                return Err(TodmcError::SolverDiverged(format!(
                    "residual is not finite at iteration {iiter}"
                )));
            }
            let lhs_proposal = self.apply_lhs(observations, weights, &proposal)?;
            let denom = self.dot(&proposal, &lhs_proposal);
            if denom == 0.0 {
                break;
            }
            let alpha = sqsum / denom;
            for (g, r, p, lp) in izip!(
                guess.iter_mut(),
                residual.iter_mut(),
                &proposal,
                &lhs_proposal
            ) {
                *g += alpha * p;
                *r -= alpha * lp;
            }
            precond_residual = self.apply_precond(weights, &residual);
            let beta_denom = sqsum;
            sqsum = self.dot(&precond_residual, &residual);
            if rank == 0 {
                log::debug!(
                    "destriper: iter {iiter:4} relative residual {:.4e}",
                    sqsum / init_sqsum
                );
            }
            if sqsum < init_sqsum * self.params.convergence_limit {
                if rank == 0 {
                    log::info!("destriper: converged after {iiter} iterations");
                }
                break;
            }
            best_sqsum = best_sqsum.min(sqsum);
            if iiter % 10 == 0 && iiter >= self.params.niter_min {
                if last_best < best_sqsum * 2.0 {
                    if rank == 0 {
                        log::info!("destriper: stalled after {iiter} iterations");
                    }
                    break;
                }
                last_best = best_sqsum;
            }
            let beta = sqsum / beta_denom;
            for (p, pr) in proposal.iter_mut().zip(&precond_residual) {
                *p = pr + beta * *p;
            }
        }
        Ok(guess)
    }
}

impl MapMaker for DestripingMapmaker {
    fn name(&self) -> &'static str {
        "destripe"
    }

    fn process(
        &mut self,
        observations: &mut [Observation],
        mc: Realization,
        weights: &DetWeights,
        outpath: &Path,
    ) -> Result<(), TodmcError> {
        let y = self.gather(observations)?;

        let binned = self.bin_flat(observations, weights, &y)?;
        if self.binner.comm().rank() == 0 {
            binned.write_csv(&outpath.join("binned.csv"))?;
        }

        // rhs = Fᵀ N⁻¹ Z y
        let mut zy = y.clone();
        self.apply_projection(observations, weights, &mut zy)?;
        let rhs = self.project_to_baselines(weights, &zy);

        let amplitudes = self.solve(observations, weights, &rhs)?;

        // Clean the timestream and bin the destriped map.
        let template = self.expand_baselines(&amplitudes);
        let clean: Vec<f64> = y.iter().zip(&template).map(|(v, t)| v - t).collect();
        let destriped = self.bin_flat(observations, weights, &clean)?;
        if self.binner.comm().rank() == 0 {
            destriped.write_csv(&outpath.join("destriped.csv"))?;
            log::info!(
                "realization {mc}: wrote binned and destriped maps to {}",
                outpath.display()
            );
        }
        Ok(())
    }

    fn needs_barrier(&self) -> bool {
        true
    }
}
