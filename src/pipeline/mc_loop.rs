//! # Monte Carlo realization loop
//!
//! One pass of the loop, per realization `mc`:
//!
//! 1. Create `{outdir}/mc_{mc:03}` (rank 0 of the run).
//! 2. Regenerate detector noise into the `total` buffers, overwriting
//!    whatever the previous realization left there.
//! 3. Add the synthesized signal, when the run has one.
//! 4. Apply per-detector gains, when configured.
//! 5. On the first realization only, optionally export the raw
//!    timestreams (CSV and binary) under the realization directory.
//! 6. Hand the observations to the map-making backend.
//! 7. Barrier when the backend asks for one, then stamp the
//!    realization directory with `complete.ok`.
//!
//! The stamp is written strictly after the barrier, so a stamped
//! directory means every process of the run has finished that
//! realization.

use std::fs;
use std::time::Instant;

use crate::comm::ProcComm;
use crate::constants::{DetWeights, TOTAL_NAME};
use crate::mapmaking::MapMaker;
use crate::noise::OpSimNoise;
use crate::observation::Observation;
use crate::operators::export::{export_tod_csv, export_tod_raw};
use crate::operators::gain::OpApplyGain;
use crate::pipeline::{mc_path, MapmakerParams};
use crate::todmc_errors::TodmcError;

/// Name of the completion stamp written in each realization directory.
pub const COMPLETE_STAMP: &str = "complete.ok";

/// Exponentially smoothed per-realization wall time for the progress
/// bar message.
#[cfg(feature = "progress")]
struct RealizationTimer {
    ema_s: f64,
    count: u64,
}

#[cfg(feature = "progress")]
impl RealizationTimer {
    const ALPHA: f64 = 0.2;

    fn new() -> Self {
        RealizationTimer { ema_s: 0.0, count: 0 }
    }

    fn record(&mut self, elapsed: std::time::Duration) {
        let secs = elapsed.as_secs_f64();
        if self.count == 0 {
            self.ema_s = secs;
        } else {
            self.ema_s = Self::ALPHA * secs + (1.0 - Self::ALPHA) * self.ema_s;
        }
        self.count += 1;
    }

    fn avg_secs(&self) -> f64 {
        self.ema_s
    }
}

/// Drive the Monte Carlo loop over `firstmc .. firstmc + nmc`.
pub(crate) fn run_mc_loop(
    comm: &dyn ProcComm,
    observations: &mut [Observation],
    backend: &mut dyn MapMaker,
    weights: &DetWeights,
    signal: Option<&str>,
    params: &MapmakerParams,
) -> Result<(), TodmcError> {
    let noise = OpSimNoise::new(params.base_seed);
    let gain = params.gains.clone().map(OpApplyGain::new);

    #[cfg(feature = "progress")]
    let bar = {
        let bar = indicatif::ProgressBar::new(params.nmc as u64);
        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
            )
            .expect("indicatif template"),
        );
        bar.set_message("realizations");
        bar
    };
    #[cfg(feature = "progress")]
    let mut timer = RealizationTimer::new();

    for mc in params.firstmc..params.firstmc + params.nmc {
        let start = Instant::now();
        let outpath = mc_path(&params.outdir, mc);
        if comm.rank() == 0 {
            fs::create_dir_all(&outpath)?;
        }

        // Overwrite-noise: the previous realization's total is gone
        // before any signal is added back.
        noise.exec(observations, mc, TOTAL_NAME)?;
        if let Some(sig) = signal {
            for obs in observations.iter_mut() {
                let dets: Vec<String> = obs.detectors().to_vec();
                for det in &dets {
                    obs.cache.add_to(TOTAL_NAME, sig, det)?;
                }
            }
        }
        if let Some(gain) = &gain {
            gain.exec(observations, TOTAL_NAME)?;
        }

        if mc == params.firstmc && params.write_tod {
            export_tod_csv(observations, TOTAL_NAME, &outpath, comm.rank())?;
            export_tod_raw(observations, TOTAL_NAME, &outpath, comm.rank())?;
        }

        backend.process(observations, mc, weights, &outpath)?;

        if backend.needs_barrier() {
            comm.barrier();
        }
        if comm.rank() == 0 {
            fs::write(outpath.join(COMPLETE_STAMP), "")?;
        }

        log::info!(
            "realization {mc} done in {:.3} s",
            start.elapsed().as_secs_f64()
        );
        #[cfg(feature = "progress")]
        {
            timer.record(start.elapsed());
            bar.inc(1);
        }
    }
    #[cfg(feature = "progress")]
    bar.finish_with_message(format!(
        "realizations done, {:.2} s/realization",
        timer.avg_secs()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::pipeline::mc_path;

    #[test]
    fn mc_path_is_zero_padded() {
        let root = Path::new("/tmp/run");
        assert_eq!(mc_path(root, 0), root.join("mc_000"));
        assert_eq!(mc_path(root, 7), root.join("mc_007"));
        assert_eq!(mc_path(root, 42), root.join("mc_042"));
        assert_eq!(mc_path(root, 999), root.join("mc_999"));
    }

    #[test]
    fn mc_path_grows_past_the_padding() {
        let root = Path::new("/tmp/run");
        assert_eq!(mc_path(root, 1234), root.join("mc_1234"));
    }
}
