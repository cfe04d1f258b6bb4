//! # Pipeline façade and run parameters
//!
//! This module defines [`MapmakerParams`], the configuration block of
//! one Monte Carlo mapmaking run (with a validating fluent builder),
//! and [`MapmakingRun`], the central façade that wires together:
//!
//! 1. **Observation building** — focalplane + schedule partitioned
//!    across process groups ([`crate::observation::build_observations`]).
//! 2. **Signal synthesis** — the optional sky / beam-convolved sky /
//!    dipole chain, run once before the Monte Carlo loop.
//! 3. **Detector weighting** — the fixed `1/σ²` table.
//! 4. **Map-making dispatch** — exactly one backend (binned XOR
//!    destriping), selected here, once, and never switched mid-run.
//! 5. **The Monte Carlo loop** ([`mc_loop`]).
//!
//! ## Typical usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use todmc::comm::SerialComm;
//! use todmc::focalplane::Focalplane;
//! use todmc::pipeline::{MapmakerParams, MapmakingRun};
//! use todmc::schedule::{Schedule, ScheduleEntry};
//!
//! let focalplane = Focalplane::synthetic(4, 5.0, 1.0e-4, 0.1, 10.0);
//! let schedule = Schedule::from_entries(vec![ScheduleEntry {
//!     name: "scan-0".into(),
//!     start: 55000.0,
//!     stop: 55000.01,
//!     n_scan: 4,
//! }]).unwrap();
//! let params = MapmakerParams::builder()
//!     .outdir("out")
//!     .nmc(3)
//!     .build()
//!     .unwrap();
//!
//! let run = MapmakingRun::new(Arc::new(SerialComm), focalplane, schedule, params);
//! run.execute().unwrap();
//! ```

pub mod mc_loop;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::comm::ProcComm;
use crate::constants::{DetWeights, Realization, SIGNAL_NAME};
use crate::focalplane::Focalplane;
use crate::mapmaking::binned::BinnedMapmaker;
use crate::mapmaking::destripe::{DestripeParams, DestripingMapmaker};
use crate::mapmaking::MapMaker;
use crate::noise::detector_weights;
use crate::observation::build_observations;
use crate::operators::{synthesize_signal, OpSimBeamSky, OpSimDipole, OpSimScan, SynthOp};
use crate::pixels::{PixelMap, RingGrid};
use crate::schedule::Schedule;
use crate::todmc_errors::TodmcError;

/// Configuration of one Monte Carlo mapmaking run.
///
/// Build with [`MapmakerParams::builder`]; the builder validates the
/// block before the run starts, so configuration errors surface before
/// any observation is constructed.
#[derive(Debug, Clone)]
pub struct MapmakerParams {
    // --- Run layout ---
    /// Run-level output root; realization products land in
    /// `{outdir}/mc_{index:03}`
    pub outdir: PathBuf,
    /// First Monte Carlo realization index
    pub firstmc: Realization,
    /// Number of realizations
    pub nmc: usize,
    /// Processes per observation group
    pub group_size: usize,

    // --- Sky pixelization ---
    pub n_ring: usize,
    pub n_az: usize,

    // --- Signal synthesis ---
    /// Input sky map scanned into the timestreams
    pub sky: Option<PixelMap>,
    /// Symmetric Gaussian beam FWHM (degrees); when set, the sky is
    /// scanned beam-convolved instead of pixel-sharp
    pub beam_fwhm_deg: Option<f64>,
    /// Dipole amplitude in map units
    pub dipole_amp: Option<f64>,

    // --- Per-realization processing ---
    /// Optional per-detector gain table applied to the total signal
    pub gains: Option<DetWeights>,
    /// Export the raw timestream of the first realization
    pub write_tod: bool,
    /// Base seed of the deterministic noise streams
    pub base_seed: u64,

    // --- Map-making backend ---
    /// Destriping backend when true, binned-only otherwise
    pub destripe: bool,
    pub baseline_length: usize,
    pub niter_min: usize,
    pub niter_max: usize,
    pub convergence_limit: f64,
}

impl MapmakerParams {
    /// Equivalent to [`MapmakerParams::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fluent [`MapmakerParamsBuilder`] with default values.
    pub fn builder() -> MapmakerParamsBuilder {
        MapmakerParamsBuilder::new()
    }

    pub fn grid(&self) -> RingGrid {
        RingGrid::new(self.n_ring, self.n_az)
    }

    pub fn destripe_params(&self) -> DestripeParams {
        DestripeParams {
            baseline_length: self.baseline_length,
            niter_min: self.niter_min,
            niter_max: self.niter_max,
            convergence_limit: self.convergence_limit,
        }
    }
}

impl Default for MapmakerParams {
    fn default() -> Self {
        MapmakerParams {
            outdir: PathBuf::from("out"),
            firstmc: 0,
            nmc: 1,
            group_size: 1,

            n_ring: 32,
            n_az: 64,

            sky: None,
            beam_fwhm_deg: None,
            dipole_amp: None,

            gains: None,
            write_tod: false,
            base_seed: 0,

            destripe: false,
            baseline_length: 100,
            niter_min: 3,
            niter_max: 100,
            convergence_limit: 1e-12,
        }
    }
}

/// Builder for [`MapmakerParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct MapmakerParamsBuilder {
    params: MapmakerParams,
}

impl MapmakerParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: MapmakerParams::default(),
        }
    }

    // --- Run layout ---
    pub fn outdir(mut self, v: impl Into<PathBuf>) -> Self {
        self.params.outdir = v.into();
        self
    }
    pub fn firstmc(mut self, v: Realization) -> Self {
        self.params.firstmc = v;
        self
    }
    pub fn nmc(mut self, v: usize) -> Self {
        self.params.nmc = v;
        self
    }
    pub fn group_size(mut self, v: usize) -> Self {
        self.params.group_size = v;
        self
    }

    // --- Pixelization ---
    pub fn n_ring(mut self, v: usize) -> Self {
        self.params.n_ring = v;
        self
    }
    pub fn n_az(mut self, v: usize) -> Self {
        self.params.n_az = v;
        self
    }

    // --- Synthesis ---
    pub fn sky(mut self, v: PixelMap) -> Self {
        self.params.sky = Some(v);
        self
    }
    pub fn beam_fwhm_deg(mut self, v: f64) -> Self {
        self.params.beam_fwhm_deg = Some(v);
        self
    }
    pub fn dipole_amp(mut self, v: f64) -> Self {
        self.params.dipole_amp = Some(v);
        self
    }

    // --- Per-realization processing ---
    pub fn gains(mut self, v: DetWeights) -> Self {
        self.params.gains = Some(v);
        self
    }
    pub fn write_tod(mut self, v: bool) -> Self {
        self.params.write_tod = v;
        self
    }
    pub fn base_seed(mut self, v: u64) -> Self {
        self.params.base_seed = v;
        self
    }

    // --- Backend ---
    pub fn destripe(mut self, v: bool) -> Self {
        self.params.destripe = v;
        self
    }
    pub fn baseline_length(mut self, v: usize) -> Self {
        self.params.baseline_length = v;
        self
    }
    pub fn niter_min(mut self, v: usize) -> Self {
        self.params.niter_min = v;
        self
    }
    pub fn niter_max(mut self, v: usize) -> Self {
        self.params.niter_max = v;
        self
    }
    pub fn convergence_limit(mut self, v: f64) -> Self {
        self.params.convergence_limit = v;
        self
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `nmc ≥ 1` — an empty realization range is a configuration
    ///   error, not a no-op.
    /// * `group_size ≥ 1`.
    /// * `n_ring ≥ 1`, `n_az ≥ 1`.
    /// * `baseline_length ≥ 1`, `niter_max ≥ 1`,
    ///   `convergence_limit > 0`.
    /// * A beam FWHM without an input sky map is rejected: the beam
    ///   operator has nothing to convolve.
    /// * A sky map must match the configured grid dimensions.
    pub fn build(self) -> Result<MapmakerParams, TodmcError> {
        let p = &self.params;
        if p.nmc == 0 {
            return Err(TodmcError::InvalidConfiguration(
                "nmc must be at least 1".into(),
            ));
        }
        if p.group_size == 0 {
            return Err(TodmcError::InvalidConfiguration(
                "group_size must be at least 1".into(),
            ));
        }
        if p.n_ring == 0 || p.n_az == 0 {
            return Err(TodmcError::InvalidConfiguration(
                "pixel grid dimensions must be positive".into(),
            ));
        }
        if p.baseline_length == 0 || p.niter_max == 0 {
            return Err(TodmcError::InvalidConfiguration(
                "destriper parameters must be positive".into(),
            ));
        }
        if !(p.convergence_limit > 0.0) {
            return Err(TodmcError::InvalidConfiguration(
                "convergence_limit must be strictly positive".into(),
            ));
        }
        if p.beam_fwhm_deg.is_some() && p.sky.is_none() {
            return Err(TodmcError::InvalidConfiguration(
                "beam_fwhm_deg requires an input sky map".into(),
            ));
        }
        if let Some(sky) = &p.sky {
            if sky.grid != p.grid() {
                return Err(TodmcError::InvalidConfiguration(format!(
                    "sky map grid {:?} does not match configured grid {:?}",
                    sky.grid,
                    p.grid()
                )));
            }
        }
        Ok(self.params)
    }
}

/// Central façade of one mapmaking run.
pub struct MapmakingRun {
    comm: Arc<dyn ProcComm>,
    focalplane: Focalplane,
    schedule: Schedule,
    params: MapmakerParams,
}

impl MapmakingRun {
    pub fn new(
        comm: Arc<dyn ProcComm>,
        focalplane: Focalplane,
        schedule: Schedule,
        params: MapmakerParams,
    ) -> Self {
        MapmakingRun {
            comm,
            focalplane,
            schedule,
            params,
        }
    }

    pub fn params(&self) -> &MapmakerParams {
        &self.params
    }

    /// Execute the full run: build observations, synthesize the
    /// signal once, select the map-making backend once, then loop
    /// over realizations.
    pub fn execute(&self) -> Result<(), TodmcError> {
        let params = &self.params;
        let mut observations = build_observations(
            self.comm.as_ref(),
            &self.focalplane,
            &self.schedule,
            params.group_size,
            params.grid(),
        )?;

        // Synthesis chain: sky (sharp or beam-convolved), then dipole.
        let scan_op;
        let beam_op;
        let dipole_op;
        let mut ops: Vec<&dyn SynthOp> = Vec::new();
        if let Some(sky) = &params.sky {
            if let Some(fwhm) = params.beam_fwhm_deg {
                beam_op = OpSimBeamSky::new(sky, fwhm, &self.focalplane);
                ops.push(&beam_op);
            } else {
                scan_op = OpSimScan::new(sky.clone());
                ops.push(&scan_op);
            }
        }
        if let Some(amp) = params.dipole_amp {
            dipole_op = OpSimDipole::new(amp);
            ops.push(&dipole_op);
        }
        let signal = synthesize_signal(&mut observations, &ops, SIGNAL_NAME)?;
        log::info!(
            "signal synthesis produced {}",
            signal.as_deref().unwrap_or("no signal (noise-only run)")
        );

        let weights = detector_weights(&observations)?;

        // Backend selection happens here, once; the loop never
        // branches on the flag again.
        let mut backend: Box<dyn MapMaker> = if params.destripe {
            Box::new(DestripingMapmaker::new(
                Arc::clone(&self.comm),
                &observations,
                &weights,
                &params.outdir,
                params.destripe_params(),
            )?)
        } else {
            Box::new(BinnedMapmaker::new(
                Arc::clone(&self.comm),
                &observations,
                &weights,
                &params.outdir,
            )?)
        };
        log::info!("map-making backend: {}", backend.name());

        mc_loop::run_mc_loop(
            self.comm.as_ref(),
            &mut observations,
            backend.as_mut(),
            &weights,
            signal.as_deref(),
            params,
        )
    }
}

/// Output directory of one realization: `{outdir}/mc_{index:03}`.
pub fn mc_path(outdir: &Path, mc: Realization) -> PathBuf {
    outdir.join(format!(
        "mc_{mc:0width$}",
        width = crate::constants::MC_DIR_WIDTH
    ))
}
