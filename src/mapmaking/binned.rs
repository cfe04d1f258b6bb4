//! # Binned-only map-making backend
//!
//! Projects the total signal of each realization directly into pixel
//! space and writes a binned map — no destriping, no iterative solve.
//! The hit and weight maps are accumulated once before the Monte
//! Carlo loop (see [`PixelBinner`]) and shared by every realization.

use std::path::Path;
use std::sync::Arc;

use crate::comm::ProcComm;
use crate::constants::{DetWeights, Realization};
use crate::observation::Observation;
use crate::todmc_errors::TodmcError;

use super::{MapMaker, PixelBinner};

pub struct BinnedMapmaker {
    binner: PixelBinner,
}

impl BinnedMapmaker {
    /// Initialize the shared binning state and write the run-level
    /// hit/weight maps.
    pub fn new(
        comm: Arc<dyn ProcComm>,
        observations: &[Observation],
        weights: &DetWeights,
        run_root: &Path,
    ) -> Result<Self, TodmcError> {
        let binner = PixelBinner::new(comm, observations, weights, run_root)?;
        Ok(BinnedMapmaker { binner })
    }
}

impl MapMaker for BinnedMapmaker {
    fn name(&self) -> &'static str {
        "binned"
    }

    fn process(
        &mut self,
        observations: &mut [Observation],
        mc: Realization,
        weights: &DetWeights,
        outpath: &Path,
    ) -> Result<(), TodmcError> {
        let binned = self
            .binner
            .bin_cache(observations, crate::constants::TOTAL_NAME, weights)?;
        if self.binner.comm().rank() == 0 {
            binned.write_csv(&outpath.join("binned.csv"))?;
            log::info!("realization {mc}: wrote binned map to {}", outpath.display());
        }
        Ok(())
    }

    fn needs_barrier(&self) -> bool {
        false
    }
}
