//! # Noise model, detector weights, and Monte Carlo noise simulation
//!
//! ## Noise model
//!
//! Every observation carries a [`NoiseModel`] built from the
//! focalplane: per detector, white noise of NET `net` at sampling
//! rate `rate` with a `1/f` component described by `fknee` and
//! `alpha`. The model exposes the analytic PSD shape and the
//! per-sample white-noise sigma used for simulation.
//!
//! ## Detector weights
//!
//! [`detector_weights`] derives the inverse white-noise variance
//! `1/σ²` per detector, estimating the white level from the PSD well
//! below Nyquist the way the map-making kernels do. Weights are
//! computed **once** before the Monte Carlo loop, from the first
//! observation's model, and reused unmodified across all realizations
//! and observations.
//!
//! ## Noise regeneration
//!
//! [`OpSimNoise`] regenerates Gaussian noise into a named timestream
//! buffer, **overwriting** any prior realization's samples. The
//! generator is seeded from `(base seed, realization index,
//! observation id, noise stream id)` through a SplitMix64 mix, so the
//! same realization index reproduces bit-identical noise while
//! distinct indices (or detectors, or observations) draw from
//! independent streams. Retaining prior noise would couple
//! realizations and break Monte Carlo independence, hence the strict
//! overwrite contract.

use std::collections::HashMap;

use ahash::RandomState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::constants::{DetWeights, DetectorId, Realization};
use crate::focalplane::{Detector, Focalplane};
use crate::observation::Observation;
use crate::todmc_errors::TodmcError;

/// Per-detector noise parameters.
#[derive(Debug, Clone, Copy)]
pub struct NoiseParams {
    pub net: f64,
    pub fknee: f64,
    pub alpha: f64,
    pub rate: f64,
}

impl NoiseParams {
    /// Analytic `1/f` PSD value at frequency `freq` (Hz).
    pub fn psd(&self, freq: f64) -> f64 {
        let f = freq.max(1e-10);
        self.net * self.net * (1.0 + (self.fknee / f).powf(self.alpha))
    }
}

/// Noise description of one observation.
#[derive(Debug, Clone)]
pub struct NoiseModel {
    params: HashMap<DetectorId, NoiseParams, RandomState>,
    /// Focalplane index of each detector, used as its noise stream id
    streams: HashMap<DetectorId, usize, RandomState>,
    order: Vec<DetectorId>,
}

impl NoiseModel {
    pub fn from_focalplane(focalplane: &Focalplane) -> Self {
        let indexed: Vec<(usize, Detector)> =
            focalplane.detectors.iter().cloned().enumerate().collect();
        Self::from_streams(&indexed)
    }

    /// Build the model for a detector shard. The focalplane index of
    /// each detector is retained as its stream id, so a detector draws
    /// the same noise no matter which rank of the group owns it.
    pub fn from_streams(detectors: &[(usize, Detector)]) -> Self {
        let mut params: HashMap<DetectorId, NoiseParams, RandomState> = HashMap::default();
        let mut streams: HashMap<DetectorId, usize, RandomState> = HashMap::default();
        let mut order = Vec::with_capacity(detectors.len());
        for (idx, det) in detectors {
            order.push(det.name.clone());
            streams.insert(det.name.clone(), *idx);
            params.insert(
                det.name.clone(),
                NoiseParams {
                    net: det.net,
                    fknee: det.fknee,
                    alpha: det.alpha,
                    rate: det.rate,
                },
            );
        }
        NoiseModel {
            params,
            streams,
            order,
        }
    }

    pub fn params(&self, det: &str) -> Option<&NoiseParams> {
        self.params.get(det)
    }

    /// Noise stream id of a detector (its focalplane index).
    pub fn stream(&self, det: &str) -> Option<usize> {
        self.streams.get(det).copied()
    }

    /// Analytic PSD value at frequency `freq` (Hz).
    pub fn psd(&self, det: &str, freq: f64) -> Option<f64> {
        self.params.get(det).map(|p| p.psd(freq))
    }

    /// Per-sample white-noise standard deviation.
    pub fn sigma(&self, det: &str) -> Option<f64> {
        self.params.get(det).map(|p| p.net * p.rate.sqrt())
    }

    /// Detector names in focalplane order.
    pub fn detectors(&self) -> &[DetectorId] {
        &self.order
    }
}

/// Compute the fixed per-detector noise weights for the run.
///
/// The white-noise level is read off the PSD at 0.3 × Nyquist, away
/// from both the `1/f` rise and any transfer-function roll-off; the
/// weight is its inverse variance. Only the **first** observation's
/// model is consulted — the weight table is shared by every
/// observation and every realization.
pub fn detector_weights(observations: &[Observation]) -> Result<DetWeights, TodmcError> {
    let first = observations.first().ok_or(TodmcError::EmptySchedule)?;
    let mut weights: DetWeights = HashMap::default();
    for det in first.noise.detectors() {
        let p = first
            .noise
            .params(det)
            .ok_or_else(|| TodmcError::SignalNotFound(format!("noise:{det}")))?;
        let f_eval = 0.3 * p.rate / 2.0;
        let noisevar = p.psd(f_eval) * p.rate;
        weights.insert(det.clone(), 1.0 / noisevar);
    }
    Ok(weights)
}

/// Deterministic noise regeneration operator.
#[derive(Debug, Clone, Copy)]
pub struct OpSimNoise {
    base_seed: u64,
}

impl OpSimNoise {
    pub fn new(base_seed: u64) -> Self {
        OpSimNoise { base_seed }
    }

    /// Regenerate noise for realization `mc` into the `dest` buffers
    /// of every observation, overwriting prior contents.
    pub fn exec(
        &self,
        observations: &mut [Observation],
        mc: Realization,
        dest: &str,
    ) -> Result<(), TodmcError> {
        for obs in observations.iter_mut() {
            let nsamp = obs.nsamp();
            let dets: Vec<DetectorId> = obs.detectors().to_vec();
            for det in &dets {
                let sigma = obs
                    .noise
                    .sigma(det)
                    .ok_or_else(|| TodmcError::SignalNotFound(format!("noise:{det}")))?;
                let stream = obs
                    .noise
                    .stream(det)
                    .ok_or_else(|| TodmcError::SignalNotFound(format!("noise:{det}")))?;
                obs.cache.create(dest, det, nsamp);
                let buf = obs.cache.reference_mut(dest, det)?;
                let seed = realization_seed(self.base_seed, mc, obs.id, stream);
                let mut rng = StdRng::seed_from_u64(seed);
                for sample in buf.iter_mut() {
                    let draw: f64 = rng.sample(StandardNormal);
                    *sample = sigma * draw;
                }
            }
        }
        Ok(())
    }
}

/// SplitMix64-style mixing of the seed components into one RNG seed.
fn realization_seed(base: u64, mc: Realization, obs_id: usize, stream: usize) -> u64 {
    let mut z = base
        .wrapping_add(0x9e37_79b9_7f4a_7c15_u64.wrapping_mul(1 + mc as u64))
        .wrapping_add(0xbf58_476d_1ce4_e5b9_u64.wrapping_mul(1 + obs_id as u64))
        .wrapping_add(0x94d0_49bb_1331_11eb_u64.wrapping_mul(1 + stream as u64));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_differ_across_components() {
        let s = realization_seed(0, 1, 2, 3);
        assert_ne!(s, realization_seed(0, 2, 2, 3));
        assert_ne!(s, realization_seed(0, 1, 3, 3));
        assert_ne!(s, realization_seed(0, 1, 2, 4));
        assert_ne!(s, realization_seed(1, 1, 2, 3));
    }

    #[test]
    fn seed_is_stable() {
        assert_eq!(
            realization_seed(42, 7, 0, 1),
            realization_seed(42, 7, 0, 1)
        );
    }

    #[test]
    fn stream_ids_follow_the_focalplane_index() {
        let fp = Focalplane::synthetic(4, 2.0, 1.0e-4, 0.1, 10.0);
        let shard: Vec<(usize, Detector)> = fp
            .detectors
            .iter()
            .cloned()
            .enumerate()
            .filter(|(idx, _)| idx % 2 == 1)
            .collect();
        let model = NoiseModel::from_streams(&shard);
        assert_eq!(model.stream("det01"), Some(1));
        assert_eq!(model.stream("det03"), Some(3));
        assert_eq!(model.stream("det00"), None);
    }

    #[test]
    fn psd_flattens_to_white_level() {
        let fp = Focalplane::synthetic(1, 2.0, 1.0e-4, 0.1, 10.0);
        let model = NoiseModel::from_focalplane(&fp);
        let white = model.psd("det00", 100.0).unwrap();
        let knee = model.psd("det00", 0.1).unwrap();
        assert!(knee > white);
        assert!((white - 1.0e-8).abs() / 1.0e-8 < 0.01);
    }
}
