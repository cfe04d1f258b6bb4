//! # Constants and type definitions for todmc
//!
//! This module centralizes the **unit conventions**, **naming
//! conventions**, and **common type definitions** used throughout the
//! `todmc` library.
//!
//! ## Overview
//!
//! - Time is carried as Modified Julian Date (`MJD`, days).
//! - Detectors are addressed by name; per-detector scalar tables
//!   (weights, gains) are `DetWeights` maps.
//! - Named timestreams inside an observation cache are addressed by
//!   `SignalName` keys; the canonical destination names used by the
//!   pipeline are [`SIGNAL_NAME`] and [`TOTAL_NAME`].
//! - Per-realization output directories follow the fixed
//!   `mc_{index:03}` convention (see [`MC_DIR_WIDTH`]).

use std::collections::HashMap;

use ahash::RandomState;

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Number of seconds in a day (MJD day → seconds)
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Solar-dipole style default amplitude in the simulated sky units
pub const DIPOLE_AMPLITUDE: f64 = 3.355e-3;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Naming conventions
// -------------------------------------------------------------------------------------------------

/// Zero-padding width of the per-realization directory index (`mc_000`)
pub const MC_DIR_WIDTH: usize = 3;

/// Destination timestream for the synthesized (sky + beam + dipole) signal
pub const SIGNAL_NAME: &str = "signal";

/// Working timestream holding noise + signal for the current realization.
/// Overwritten at the start of every realization, never accumulated.
pub const TOTAL_NAME: &str = "total";

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Time expressed in Modified Julian Date (days)
pub type MJD = f64;

/// Detector identifier (focalplane name)
pub type DetectorId = String;

/// Key identifying a named timestream inside an observation cache
pub type SignalName = String;

/// Index of a pixel on the ring grid
pub type PixelIndex = usize;

/// Monte Carlo realization index
pub type Realization = usize;

/// Per-detector scalar table (noise weights, gain factors)
pub type DetWeights = HashMap<DetectorId, f64, RandomState>;
