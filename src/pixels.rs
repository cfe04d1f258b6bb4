//! # Ring-grid pixelization and distributed pixel maps
//!
//! This module provides the pixel-space data structures shared by the
//! pointing generator and both map-making backends:
//!
//! - [`RingGrid`] — an equirectangular ring pixelization of the sphere
//!   (`n_ring` rings in colatitude × `n_az` pixels per ring), the
//!   lightweight stand-in for the external HEALPix-style grid the real
//!   kernels use. Exposes `ang2pix` and pixel-center lookups.
//! - [`PixelMap`] — a flat `f64` map over the grid with a collective
//!   sum reduction and CSV writers/readers.
//! - [`HitMap`] — the integer hit counter companion.
//!
//! Map files are plain two-column CSV (`pixel,value`), one row per
//! pixel; this is the on-disk contract of the map products the
//! pipeline materializes per realization.

use std::f64::consts::PI;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::comm::ProcComm;
use crate::constants::PixelIndex;
use crate::todmc_errors::TodmcError;

/// Equirectangular ring pixelization of the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGrid {
    /// Number of rings in colatitude `θ ∈ (0, π)`
    pub n_ring: usize,
    /// Number of pixels per ring in azimuth `φ ∈ [0, 2π)`
    pub n_az: usize,
}

impl RingGrid {
    pub fn new(n_ring: usize, n_az: usize) -> Self {
        RingGrid { n_ring, n_az }
    }

    /// Total number of pixels on the grid.
    pub fn npix(&self) -> usize {
        self.n_ring * self.n_az
    }

    /// Map spherical angles to a pixel index.
    ///
    /// Arguments
    /// -----------------
    /// * `theta`: colatitude in radians, clamped to `[0, π]`.
    /// * `phi`: azimuth in radians, wrapped to `[0, 2π)`.
    pub fn ang2pix(&self, theta: f64, phi: f64) -> PixelIndex {
        let t = theta.clamp(0.0, PI);
        let mut p = phi % (2.0 * PI);
        if p < 0.0 {
            p += 2.0 * PI;
        }
        let ring = (((t / PI) * self.n_ring as f64) as usize).min(self.n_ring - 1);
        let az = (((p / (2.0 * PI)) * self.n_az as f64) as usize).min(self.n_az - 1);
        ring * self.n_az + az
    }

    /// Colatitude of the pixel center.
    pub fn pixel_theta(&self, pixel: PixelIndex) -> f64 {
        let ring = pixel / self.n_az;
        (ring as f64 + 0.5) * PI / self.n_ring as f64
    }

    /// Azimuth of the pixel center.
    pub fn pixel_phi(&self, pixel: PixelIndex) -> f64 {
        let az = pixel % self.n_az;
        (az as f64 + 0.5) * 2.0 * PI / self.n_az as f64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PixRecord {
    pixel: usize,
    value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct HitRecord {
    pixel: usize,
    hits: u64,
}

/// A flat scalar map over a [`RingGrid`].
///
/// Each process accumulates into its local copy; co-addition across
/// processes happens through [`PixelMap::allreduce`]. Intensity-only
/// (one value per pixel): the polarized covariance machinery of the
/// external kernels stays out of scope.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMap {
    pub grid: RingGrid,
    pub data: Vec<f64>,
}

impl PixelMap {
    /// Create a zero-filled map over `grid`.
    pub fn zeros(grid: RingGrid) -> Self {
        PixelMap {
            grid,
            data: vec![0.0; grid.npix()],
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Co-add this map across all processes.
    pub fn allreduce(&mut self, comm: &dyn ProcComm) {
        comm.allreduce_sum(&mut self.data);
    }

    /// Write the map as two-column CSV (`pixel,value`).
    pub fn write_csv(&self, path: &Path) -> Result<(), TodmcError> {
        let mut writer = csv::Writer::from_path(path)?;
        for (pixel, value) in self.data.iter().enumerate() {
            writer.serialize(PixRecord {
                pixel,
                value: *value,
            })?;
        }
        writer.flush()?;
        log::debug!("wrote map to {}", path.display());
        Ok(())
    }

    /// Read a map previously written by [`PixelMap::write_csv`].
    pub fn from_csv_path(grid: RingGrid, path: &Path) -> Result<Self, TodmcError> {
        let mut map = PixelMap::zeros(grid);
        let mut reader = csv::Reader::from_path(path)?;
        for record in reader.deserialize() {
            let rec: PixRecord = record?;
            if rec.pixel >= map.data.len() {
                return Err(TodmcError::InvalidConfiguration(format!(
                    "pixel index {} out of range for a {} pixel grid",
                    rec.pixel,
                    map.data.len()
                )));
            }
            map.data[rec.pixel] = rec.value;
        }
        Ok(map)
    }
}

/// Integer hit counter over a [`RingGrid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitMap {
    pub grid: RingGrid,
    pub hits: Vec<u64>,
}

impl HitMap {
    pub fn zeros(grid: RingGrid) -> Self {
        HitMap {
            grid,
            hits: vec![0; grid.npix()],
        }
    }

    pub fn allreduce(&mut self, comm: &dyn ProcComm) {
        comm.allreduce_sum_u64(&mut self.hits);
    }

    /// Total number of hits over all pixels.
    pub fn total(&self) -> u64 {
        self.hits.iter().sum()
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TodmcError> {
        let mut writer = csv::Writer::from_path(path)?;
        for (pixel, hits) in self.hits.iter().enumerate() {
            writer.serialize(HitRecord {
                pixel,
                hits: *hits,
            })?;
        }
        writer.flush()?;
        log::debug!("wrote hit map to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ang2pix_covers_grid_corners() {
        let grid = RingGrid::new(8, 16);
        assert_eq!(grid.ang2pix(0.0, 0.0), 0);
        assert_eq!(grid.ang2pix(PI, 2.0 * PI - 1e-9), grid.npix() - 1);
    }

    #[test]
    fn pixel_center_roundtrip() {
        let grid = RingGrid::new(16, 32);
        for pixel in [0, 5, 200, grid.npix() - 1] {
            let theta = grid.pixel_theta(pixel);
            let phi = grid.pixel_phi(pixel);
            assert_eq!(grid.ang2pix(theta, phi), pixel);
        }
    }

    #[test]
    fn negative_azimuth_wraps() {
        let grid = RingGrid::new(8, 16);
        let a = grid.ang2pix(1.0, -0.1);
        let b = grid.ang2pix(1.0, 2.0 * PI - 0.1);
        assert_eq!(a, b);
    }
}
