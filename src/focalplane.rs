//! # Focalplane geometry and detector properties
//!
//! This module resolves the detector-geometry input of the pipeline:
//! every [`Detector`] carries its pointing offset from the boresight
//! (as a unit quaternion) together with the noise parameters used for
//! noise simulation and detector weighting.
//!
//! ## Overview
//!
//! A [`Focalplane`] is an ordered list of detectors. It can be
//! - loaded from a CSV table ([`Focalplane::from_csv_path`]), the
//!   on-disk format produced by instrument tooling, or
//! - built programmatically ([`Focalplane::synthetic`]) for tests and
//!   quick-look runs, placing `n_det` detectors on a ring around the
//!   boresight.
//!
//! ## Noise parameters
//!
//! Each detector models its noise as white noise of NET `net` with a
//! `1/f` knee at `fknee` and slope `alpha`, sampled at `rate` Hz; the
//! cross-polar leakage `epsilon` feeds the beam-convolution
//! calibration factor `2/(1+ε)`.

use std::f64::consts::PI;
use std::path::Path;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::constants::DetectorId;
use crate::todmc_errors::TodmcError;

/// One detector of the focalplane.
#[derive(Debug, Clone)]
pub struct Detector {
    pub name: DetectorId,
    /// Rotation from the boresight frame to the detector line of sight
    pub quat: UnitQuaternion<f64>,
    /// Noise-equivalent temperature (white-noise sigma per sample)
    pub net: f64,
    /// 1/f knee frequency in Hz
    pub fknee: f64,
    /// 1/f slope
    pub alpha: f64,
    /// Sampling rate in Hz
    pub rate: f64,
    /// Cross-polar leakage
    pub epsilon: f64,
}

impl Detector {
    /// Direction of the detector line of sight for a given boresight
    /// attitude (rotation of the z-axis, as in the pointing kernels).
    pub fn direction(&self, boresight: &UnitQuaternion<f64>) -> Vector3<f64> {
        (boresight * self.quat) * Vector3::z()
    }
}

/// On-disk focalplane row.
#[derive(Debug, Serialize, Deserialize)]
struct DetectorRecord {
    name: String,
    /// Offset colatitude from the boresight, degrees
    theta_deg: f64,
    /// Offset azimuth around the boresight, degrees
    phi_deg: f64,
    net: f64,
    fknee: f64,
    alpha: f64,
    rate: f64,
    epsilon: f64,
}

/// Ordered collection of detectors.
#[derive(Debug, Clone, Default)]
pub struct Focalplane {
    pub detectors: Vec<Detector>,
}

impl Focalplane {
    /// Number of detectors.
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Detector names in focalplane order.
    pub fn names(&self) -> Vec<DetectorId> {
        self.detectors.iter().map(|d| d.name.clone()).collect()
    }

    /// Load a focalplane from a CSV table.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: CSV file with header
    ///   `name,theta_deg,phi_deg,net,fknee,alpha,rate,epsilon`.
    ///
    /// Return
    /// ----------
    /// * The parsed [`Focalplane`], or [`TodmcError::EmptyFocalplane`]
    ///   when the table holds no rows.
    pub fn from_csv_path(path: &Path) -> Result<Self, TodmcError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut detectors = Vec::new();
        for record in reader.deserialize() {
            let rec: DetectorRecord =
                record.map_err(|e| TodmcError::FocalplaneParse(e.to_string()))?;
            detectors.push(detector_from_offsets(
                rec.name,
                rec.theta_deg.to_radians(),
                rec.phi_deg.to_radians(),
                rec.net,
                rec.fknee,
                rec.alpha,
                rec.rate,
                rec.epsilon,
            ));
        }
        let fp = Focalplane { detectors };
        if fp.is_empty() {
            return Err(TodmcError::EmptyFocalplane);
        }
        Ok(fp)
    }

    /// Build a synthetic focalplane of `n_det` detectors on a ring of
    /// angular radius `radius_deg` around the boresight, all sharing
    /// the same noise parameters.
    pub fn synthetic(n_det: usize, radius_deg: f64, net: f64, fknee: f64, rate: f64) -> Self {
        let radius = radius_deg.to_radians();
        let detectors = (0..n_det)
            .map(|i| {
                let phi = 2.0 * PI * i as f64 / n_det.max(1) as f64;
                detector_from_offsets(
                    format!("det{i:02}"),
                    radius,
                    phi,
                    net,
                    fknee,
                    1.0,
                    rate,
                    0.0,
                )
            })
            .collect();
        Focalplane { detectors }
    }
}

#[allow(clippy::too_many_arguments)]
fn detector_from_offsets(
    name: String,
    theta: f64,
    phi: f64,
    net: f64,
    fknee: f64,
    alpha: f64,
    rate: f64,
    epsilon: f64,
) -> Detector {
    // Rz(φ)·Ry(θ) tilts the z-axis to colatitude θ, azimuth φ.
    let quat = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), phi)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), theta);
    Detector {
        name,
        quat,
        net,
        fknee,
        alpha,
        rate,
        epsilon,
    }
}
