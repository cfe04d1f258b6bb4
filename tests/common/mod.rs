#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use todmc::comm::ProcComm;
use todmc::constants::DetWeights;
use todmc::focalplane::Focalplane;
use todmc::pixels::{PixelMap, RingGrid};
use todmc::schedule::{Schedule, ScheduleEntry};

/// Route `log` output to the test harness when `RUST_LOG` is set.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three detectors on a 5 degree ring, 2 Hz sampling.
pub fn small_focalplane() -> Focalplane {
    Focalplane::synthetic(3, 5.0, 1.0e-4, 0.05, 2.0)
}

/// `n_obs` back-to-back entries of ~173 s each (about 346 samples per
/// detector at 2 Hz).
pub fn small_schedule(n_obs: usize) -> Schedule {
    let entries = (0..n_obs)
        .map(|i| ScheduleEntry {
            name: format!("scan-{i}"),
            start: 55000.0 + i as f64 * 0.002,
            stop: 55000.0 + (i + 1) as f64 * 0.002,
            n_scan: 4,
        })
        .collect();
    Schedule::from_entries(entries).unwrap()
}

pub fn small_grid() -> RingGrid {
    RingGrid::new(16, 32)
}

/// Unit weight for every detector of the focalplane.
pub fn unit_weights(focalplane: &Focalplane) -> DetWeights {
    let mut weights = DetWeights::default();
    for name in focalplane.names() {
        weights.insert(name, 1.0);
    }
    weights
}

/// A sky map varying smoothly with colatitude, so it is not degenerate
/// with a constant baseline offset.
pub fn gradient_sky(grid: RingGrid) -> PixelMap {
    let mut sky = PixelMap::zeros(grid);
    for pixel in 0..grid.npix() {
        sky.data[pixel] = 10.0 * grid.pixel_theta(pixel).cos();
    }
    sky
}

/// Serial communicator that counts barrier invocations.
#[derive(Debug, Default)]
pub struct CountingComm {
    barriers: AtomicUsize,
}

impl CountingComm {
    pub fn barrier_count(&self) -> usize {
        self.barriers.load(Ordering::SeqCst)
    }
}

impl ProcComm for CountingComm {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn barrier(&self) {
        self.barriers.fetch_add(1, Ordering::SeqCst);
    }

    fn allreduce_sum(&self, _buf: &mut [f64]) {}

    fn allreduce_sum_u64(&self, _buf: &mut [u64]) {}
}

/// Read back a map written by `PixelMap::write_csv`.
pub fn read_map(grid: RingGrid, path: &Path) -> PixelMap {
    PixelMap::from_csv_path(grid, path).unwrap()
}
