mod common;

use todmc::comm::SerialComm;
use todmc::constants::TOTAL_NAME;
use todmc::noise::{detector_weights, OpSimNoise};
use todmc::observation::{build_observations, Observation};

use common::{small_focalplane, small_grid, small_schedule};

fn observations() -> Vec<Observation> {
    build_observations(
        &SerialComm,
        &small_focalplane(),
        &small_schedule(2),
        1,
        small_grid(),
    )
    .unwrap()
}

fn total_of(observations: &[Observation]) -> Vec<f64> {
    let mut flat = Vec::new();
    for obs in observations {
        for det in obs.detectors() {
            flat.extend_from_slice(obs.cache.reference(TOTAL_NAME, det).unwrap());
        }
    }
    flat
}

#[test]
fn same_realization_reproduces_identical_noise() {
    let noise = OpSimNoise::new(920);

    let mut first = observations();
    noise.exec(&mut first, 12, TOTAL_NAME).unwrap();

    let mut second = observations();
    noise.exec(&mut second, 12, TOTAL_NAME).unwrap();

    assert_eq!(total_of(&first), total_of(&second));
}

#[test]
fn different_realizations_differ() {
    let noise = OpSimNoise::new(920);
    let mut obs = observations();

    noise.exec(&mut obs, 0, TOTAL_NAME).unwrap();
    let a = total_of(&obs);
    noise.exec(&mut obs, 1, TOTAL_NAME).unwrap();
    let b = total_of(&obs);

    assert_ne!(a, b);
}

#[test]
fn different_base_seeds_differ() {
    let mut a_obs = observations();
    OpSimNoise::new(1).exec(&mut a_obs, 0, TOTAL_NAME).unwrap();
    let mut b_obs = observations();
    OpSimNoise::new(2).exec(&mut b_obs, 0, TOTAL_NAME).unwrap();

    assert_ne!(total_of(&a_obs), total_of(&b_obs));
}

#[test]
fn regeneration_overwrites_prior_contents() {
    let noise = OpSimNoise::new(7);
    let mut obs = observations();

    noise.exec(&mut obs, 3, TOTAL_NAME).unwrap();
    let pristine = total_of(&obs);

    // Pollute the buffers, then regenerate the same realization.
    for o in obs.iter_mut() {
        let dets: Vec<String> = o.detectors().to_vec();
        for det in &dets {
            for value in o.cache.reference_mut(TOTAL_NAME, det).unwrap() {
                *value += 5.0;
            }
        }
    }
    noise.exec(&mut obs, 3, TOTAL_NAME).unwrap();

    assert_eq!(total_of(&obs), pristine);
}

#[test]
fn detector_weights_are_uniform_for_identical_detectors() {
    let obs = observations();
    let weights = detector_weights(&obs).unwrap();

    assert_eq!(weights.len(), 3);
    let mut values: Vec<f64> = weights.values().copied().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    assert!(values[0] > 0.0);
    assert_eq!(values.first(), values.last());
}
