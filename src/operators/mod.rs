//! # Signal synthesis operators
//!
//! Operators that layer optional signal contributions into a named
//! timestream of every observation, in place:
//!
//! - [`OpSimScan`] — sky signal scanned from an input map,
//! - [`OpSimBeamSky`] — beam-convolved sky signal (Gaussian-beam
//!   smoothed map, per-detector leakage calibration),
//! - [`OpSimDipole`] — analytic dipole.
//!
//! Each operator is optional; [`synthesize_signal`] folds a sequence
//! of them left to right, carrying forward the last non-empty result,
//! so the caller ends up with `Some(name)` when at least one
//! contribution was produced and `None` otherwise. Downstream stages
//! must tolerate the `None` case (noise-only realizations).
//!
//! The non-synthesis operators of the pipeline live in their own
//! submodules: [`gain::OpApplyGain`] and the archival exporters in
//! [`export`].

pub mod export;
pub mod gain;

use std::f64::consts::PI;

use crate::constants::{DetWeights, SignalName};
use crate::focalplane::Focalplane;
use crate::observation::Observation;
use crate::pixels::PixelMap;
use crate::todmc_errors::TodmcError;

/// One optional signal contribution.
///
/// `exec` mutates the `dest` timestream of every observation in place
/// and returns the new current signal name when it produced output.
pub trait SynthOp {
    fn exec(
        &self,
        observations: &mut [Observation],
        dest: &str,
    ) -> Result<Option<SignalName>, TodmcError>;
}

/// Fold the synthesis chain left to right.
///
/// Return
/// ----------
/// * The last non-empty signal name produced by the chain, or `None`
///   when no operator produced output (the destination buffers then
///   remain absent).
pub fn synthesize_signal(
    observations: &mut [Observation],
    ops: &[&dyn SynthOp],
    dest: &str,
) -> Result<Option<SignalName>, TodmcError> {
    let mut current: Option<SignalName> = None;
    for op in ops {
        if let Some(name) = op.exec(observations, dest)? {
            current = Some(name);
        }
    }
    Ok(current)
}

/// Make sure `dest` buffers exist (zero-filled) for every detector of
/// the observation.
fn ensure_dest(obs: &mut Observation, dest: &str) {
    let nsamp = obs.nsamp();
    let dets: Vec<String> = obs.detectors().to_vec();
    for det in dets {
        if obs.cache.reference(dest, &det).is_err() {
            obs.cache.create(dest, &det, nsamp);
        }
    }
}

/// Project an input sky map through the pointing into the destination
/// timestream (`signal[i] += sky[pixel[i]]`).
#[derive(Debug, Clone)]
pub struct OpSimScan {
    sky: PixelMap,
}

impl OpSimScan {
    pub fn new(sky: PixelMap) -> Self {
        OpSimScan { sky }
    }
}

impl SynthOp for OpSimScan {
    fn exec(
        &self,
        observations: &mut [Observation],
        dest: &str,
    ) -> Result<Option<SignalName>, TodmcError> {
        for obs in observations.iter_mut() {
            ensure_dest(obs, dest);
            let dets: Vec<String> = obs.detectors().to_vec();
            for det in &dets {
                let pointing = &obs.pointing;
                let pixels = pointing.pixels(det)?;
                let buf = obs.cache.reference_mut(dest, det)?;
                for (sample, pix) in buf.iter_mut().zip(pixels) {
                    *sample += self.sky.data[*pix];
                }
            }
        }
        Ok(Some(dest.to_string()))
    }
}

/// Beam-convolved sky signal.
///
/// The external spherical-harmonic convolver is out of scope; its seam
/// is rendered as a symmetric Gaussian beam applied to the input map
/// on the ring grid before scanning, followed by the `2/(1+ε)`
/// leakage calibration the convolution library documents.
#[derive(Debug, Clone)]
pub struct OpSimBeamSky {
    smoothed: PixelMap,
    calibration: DetWeights,
}

impl OpSimBeamSky {
    /// Smooth `sky` with a symmetric Gaussian beam of `fwhm_deg` and
    /// prepare the per-detector calibration factors.
    pub fn new(sky: &PixelMap, fwhm_deg: f64, focalplane: &Focalplane) -> Self {
        let mut calibration: DetWeights = DetWeights::default();
        for det in &focalplane.detectors {
            calibration.insert(det.name.clone(), 2.0 / (1.0 + det.epsilon));
        }
        OpSimBeamSky {
            smoothed: smooth_map(sky, fwhm_deg.to_radians()),
            calibration,
        }
    }
}

impl SynthOp for OpSimBeamSky {
    fn exec(
        &self,
        observations: &mut [Observation],
        dest: &str,
    ) -> Result<Option<SignalName>, TodmcError> {
        for obs in observations.iter_mut() {
            ensure_dest(obs, dest);
            let dets: Vec<String> = obs.detectors().to_vec();
            for det in &dets {
                let cal = *self.calibration.get(det).unwrap_or(&1.0);
                let pointing = &obs.pointing;
                let pixels = pointing.pixels(det)?;
                let buf = obs.cache.reference_mut(dest, det)?;
                for (sample, pix) in buf.iter_mut().zip(pixels) {
                    *sample += cal * self.smoothed.data[*pix];
                }
            }
        }
        Ok(Some(dest.to_string()))
    }
}

/// Analytic dipole contribution `amp · cos θ`.
#[derive(Debug, Clone, Copy)]
pub struct OpSimDipole {
    amp: f64,
}

impl OpSimDipole {
    pub fn new(amp: f64) -> Self {
        OpSimDipole { amp }
    }
}

impl SynthOp for OpSimDipole {
    fn exec(
        &self,
        observations: &mut [Observation],
        dest: &str,
    ) -> Result<Option<SignalName>, TodmcError> {
        for obs in observations.iter_mut() {
            ensure_dest(obs, dest);
            let grid = obs.pointing.grid();
            let dets: Vec<String> = obs.detectors().to_vec();
            for det in &dets {
                let pointing = &obs.pointing;
                let pixels = pointing.pixels(det)?;
                let buf = obs.cache.reference_mut(dest, det)?;
                for (sample, pix) in buf.iter_mut().zip(pixels) {
                    *sample += self.amp * grid.pixel_theta(*pix).cos();
                }
            }
        }
        Ok(Some(dest.to_string()))
    }
}

/// Separable Gaussian smoothing on the ring grid: azimuth first
/// (periodic), then colatitude (clamped at the poles).
fn smooth_map(sky: &PixelMap, fwhm_rad: f64) -> PixelMap {
    let grid = sky.grid;
    let sigma = fwhm_rad / (8.0 * 2.0_f64.ln()).sqrt();

    let az_width = 2.0 * PI / grid.n_az as f64;
    let ring_height = PI / grid.n_ring as f64;

    let mut out = sky.clone();
    smooth_axis(&mut out, sigma / az_width, Axis::Azimuth);
    smooth_axis(&mut out, sigma / ring_height, Axis::Ring);
    out
}

enum Axis {
    Azimuth,
    Ring,
}

fn smooth_axis(map: &mut PixelMap, sigma_pix: f64, axis: Axis) {
    if sigma_pix <= 0.0 {
        return;
    }
    let half = (3.0 * sigma_pix).ceil() as isize;
    let kernel: Vec<f64> = (-half..=half)
        .map(|j| (-0.5 * (j as f64 / sigma_pix).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let grid = map.grid;
    let source = map.data.clone();
    for ring in 0..grid.n_ring {
        for az in 0..grid.n_az {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let j = k as isize - half;
                let idx = match axis {
                    Axis::Azimuth => {
                        let a = (az as isize + j).rem_euclid(grid.n_az as isize) as usize;
                        ring * grid.n_az + a
                    }
                    Axis::Ring => {
                        let r = (ring as isize + j).clamp(0, grid.n_ring as isize - 1) as usize;
                        r * grid.n_az + az
                    }
                };
                acc += w * source[idx];
            }
            map.data[ring * grid.n_az + az] = acc / norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::RingGrid;

    #[test]
    fn smoothing_preserves_constant_maps() {
        let grid = RingGrid::new(16, 32);
        let mut sky = PixelMap::zeros(grid);
        sky.fill(2.5);
        let smoothed = smooth_map(&sky, 10.0_f64.to_radians());
        for value in &smoothed.data {
            assert!((value - 2.5).abs() < 1e-9);
        }
    }

    #[test]
    fn smoothing_spreads_a_point_source() {
        let grid = RingGrid::new(16, 32);
        let mut sky = PixelMap::zeros(grid);
        let center = grid.ang2pix(PI / 2.0, PI);
        sky.data[center] = 1.0;
        let smoothed = smooth_map(&sky, 20.0_f64.to_radians());
        assert!(smoothed.data[center] < 1.0);
        assert!(smoothed.data[center + 1] > 0.0);
    }
}
