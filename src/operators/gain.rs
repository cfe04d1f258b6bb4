//! # Per-detector gain application
//!
//! [`OpApplyGain`] scales a named timestream in place with a
//! per-detector scalar table. The operation is pure element-wise
//! scaling; a detector missing from the table is a fatal error, and a
//! gain of exactly 1.0 leaves the buffer bit-identical.

use crate::constants::DetWeights;
use crate::observation::Observation;
use crate::todmc_errors::TodmcError;

#[derive(Debug, Clone)]
pub struct OpApplyGain {
    gains: DetWeights,
}

impl OpApplyGain {
    pub fn new(gains: DetWeights) -> Self {
        OpApplyGain { gains }
    }

    /// Scale the `name` timestream of every observation in place.
    pub fn exec(&self, observations: &mut [Observation], name: &str) -> Result<(), TodmcError> {
        for obs in observations.iter_mut() {
            let dets: Vec<String> = obs.detectors().to_vec();
            for det in &dets {
                let gain = *self
                    .gains
                    .get(det)
                    .ok_or_else(|| TodmcError::MissingGain(det.clone()))?;
                let buf = obs.cache.reference_mut(name, det)?;
                if gain != 1.0 {
                    for sample in buf.iter_mut() {
                        *sample *= gain;
                    }
                }
            }
        }
        Ok(())
    }
}
