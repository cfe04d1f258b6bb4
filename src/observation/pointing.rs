//! # Detector pointing expansion
//!
//! Expands one schedule entry into per-detector pixel pointing on the
//! ring grid. The boresight sweeps azimuth `n_scan` times while
//! drifting in colatitude across the scan band; each detector's line
//! of sight is the boresight attitude composed with its focalplane
//! offset quaternion, rotated onto the z-axis and projected to a pixel
//! index — the same rotate-then-`vec2pix` pattern the external
//! pointing kernels use.
//!
//! Pointing is generated once per observation and treated as immutable
//! for the whole run: only signal buffers change across realizations.

use std::collections::HashMap;
use std::f64::consts::PI;

use ahash::RandomState;
use nalgebra::{UnitQuaternion, Vector3};

use crate::constants::{DetectorId, PixelIndex, SECONDS_PER_DAY};
use crate::focalplane::Focalplane;
use crate::pixels::RingGrid;
use crate::schedule::ScheduleEntry;
use crate::todmc_errors::TodmcError;

/// Colatitude band swept by the boresight during one observation.
const SCAN_THETA_MIN: f64 = PI / 3.0;
const SCAN_THETA_MAX: f64 = 2.0 * PI / 3.0;

/// Per-detector pixel pointing of one observation.
#[derive(Debug, Clone)]
pub struct Pointing {
    grid: RingGrid,
    detectors: Vec<DetectorId>,
    pixels: HashMap<DetectorId, Vec<PixelIndex>, RandomState>,
    nsamp: usize,
}

impl Pointing {
    /// Expand the pointing for every detector of the focalplane.
    ///
    /// The number of samples follows the entry duration and the
    /// focalplane sampling rate; an entry shorter than one sample
    /// still yields a single sample.
    pub fn generate(entry: &ScheduleEntry, focalplane: &Focalplane, grid: RingGrid) -> Self {
        let rate = focalplane
            .detectors
            .first()
            .map(|d| d.rate)
            .unwrap_or(1.0);
        let duration = (entry.stop - entry.start) * SECONDS_PER_DAY;
        let nsamp = ((duration * rate).round() as usize).max(1);
        let n_scan = entry.n_scan.max(1) as f64;

        let mut pixels: HashMap<DetectorId, Vec<PixelIndex>, RandomState> = HashMap::default();
        let mut detectors = Vec::with_capacity(focalplane.len());
        for det in &focalplane.detectors {
            detectors.push(det.name.clone());
            pixels.insert(det.name.clone(), Vec::with_capacity(nsamp));
        }

        for i in 0..nsamp {
            let phase = i as f64 / nsamp as f64;
            let phi = 2.0 * PI * n_scan * phase;
            let theta = SCAN_THETA_MIN + (SCAN_THETA_MAX - SCAN_THETA_MIN) * phase;
            let boresight = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), phi)
                * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), theta);
            for det in &focalplane.detectors {
                let dir = det.direction(&boresight);
                let det_theta = dir.z.clamp(-1.0, 1.0).acos();
                let det_phi = dir.y.atan2(dir.x);
                let pix = grid.ang2pix(det_theta, det_phi);
                if let Some(stream) = pixels.get_mut(&det.name) {
                    stream.push(pix);
                }
            }
        }

        Pointing {
            grid,
            detectors,
            pixels,
            nsamp,
        }
    }

    pub fn grid(&self) -> RingGrid {
        self.grid
    }

    pub fn nsamp(&self) -> usize {
        self.nsamp
    }

    /// Detector names covered by this pointing, in focalplane order.
    pub fn detectors(&self) -> &[DetectorId] {
        &self.detectors
    }

    /// Pixel stream of one detector.
    pub fn pixels(&self, det: &str) -> Result<&[PixelIndex], TodmcError> {
        self.pixels
            .get(det)
            .map(|v| v.as_slice())
            .ok_or_else(|| TodmcError::SignalNotFound(format!("pointing:{det}")))
    }
}
