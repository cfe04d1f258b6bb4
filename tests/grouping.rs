mod common;

use todmc::comm::ProcComm;
use todmc::constants::TOTAL_NAME;
use todmc::noise::OpSimNoise;
use todmc::observation::build_observations;

use common::{init_logs, small_focalplane, small_grid, small_schedule};

/// Fixed-placement communicator standing in for one process of a
/// multi-process launch. Reductions are no-ops: each test inspects the
/// local shard directly.
struct RankComm {
    world: usize,
    rank: usize,
}

impl ProcComm for RankComm {
    fn world_size(&self) -> usize {
        self.world
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn barrier(&self) {}

    fn allreduce_sum(&self, _buf: &mut [f64]) {}

    fn allreduce_sum_u64(&self, _buf: &mut [u64]) {}
}

#[test]
fn group_ranks_share_observations_but_split_detectors() {
    init_logs();
    let focalplane = small_focalplane();
    let schedule = small_schedule(2);
    let grid = small_grid();

    let rank0 = build_observations(
        &RankComm { world: 2, rank: 0 },
        &focalplane,
        &schedule,
        2,
        grid,
    )
    .unwrap();
    let rank1 = build_observations(
        &RankComm { world: 2, rank: 1 },
        &focalplane,
        &schedule,
        2,
        grid,
    )
    .unwrap();

    // One group of two ranks: both ranks own every observation...
    let ids = |obs: &[todmc::observation::Observation]| -> Vec<usize> {
        obs.iter().map(|o| o.id).collect()
    };
    assert_eq!(ids(&rank0), vec![0, 1]);
    assert_eq!(ids(&rank1), vec![0, 1]);

    // ...but disjoint detector shards that together cover the
    // focalplane, so no sample is accumulated twice.
    assert_eq!(rank0[0].detectors(), ["det00", "det02"]);
    assert_eq!(rank1[0].detectors(), ["det01"]);
    for (a, b) in rank0.iter().zip(&rank1) {
        assert_eq!(
            a.detectors().len() + b.detectors().len(),
            focalplane.len()
        );
        assert!(a.detectors().iter().all(|d| !b.detectors().contains(d)));
    }
}

#[test]
fn sharded_sample_counts_add_up_to_the_serial_run() {
    let focalplane = small_focalplane();
    let schedule = small_schedule(2);
    let grid = small_grid();

    let serial = build_observations(
        &RankComm { world: 1, rank: 0 },
        &focalplane,
        &schedule,
        1,
        grid,
    )
    .unwrap();
    let samples = |obs: &[todmc::observation::Observation]| -> usize {
        obs.iter().map(|o| o.nsamp() * o.detectors().len()).sum()
    };

    let mut sharded = 0;
    for rank in 0..2 {
        let local = build_observations(
            &RankComm { world: 2, rank },
            &focalplane,
            &schedule,
            2,
            grid,
        )
        .unwrap();
        sharded += samples(&local);
    }
    assert_eq!(sharded, samples(&serial));
}

#[test]
fn noise_streams_are_stable_under_grouping() {
    // A detector must draw the same noise whether its observation is
    // built serially or on a sharded group rank.
    let focalplane = small_focalplane();
    let schedule = small_schedule(1);
    let grid = small_grid();
    let noise = OpSimNoise::new(4321);

    let mut serial = build_observations(
        &RankComm { world: 1, rank: 0 },
        &focalplane,
        &schedule,
        1,
        grid,
    )
    .unwrap();
    let mut rank1 = build_observations(
        &RankComm { world: 2, rank: 1 },
        &focalplane,
        &schedule,
        2,
        grid,
    )
    .unwrap();
    noise.exec(&mut serial, 0, TOTAL_NAME).unwrap();
    noise.exec(&mut rank1, 0, TOTAL_NAME).unwrap();

    // Rank 1 owns det01 only; its stream matches the serial run.
    assert_eq!(rank1[0].detectors(), ["det01"]);
    let shared = serial[0].cache.reference(TOTAL_NAME, "det01").unwrap();
    let local = rank1[0].cache.reference(TOTAL_NAME, "det01").unwrap();
    assert_eq!(shared, local);

    // And it is not a copy of another detector's stream.
    let other = serial[0].cache.reference(TOTAL_NAME, "det00").unwrap();
    assert_ne!(other, local);
}
