mod common;

use std::sync::Arc;

use todmc::comm::SerialComm;
use todmc::constants::DIPOLE_AMPLITUDE;
use todmc::pipeline::{mc_path, MapmakerParams, MapmakingRun};

use common::{gradient_sky, init_logs, small_focalplane, small_grid, small_schedule};

#[test]
fn binned_run_writes_every_realization() {
    init_logs();
    let outdir = tempfile::tempdir().unwrap();
    let params = MapmakerParams::builder()
        .outdir(outdir.path())
        .firstmc(0)
        .nmc(3)
        .n_ring(16)
        .n_az(32)
        .sky(gradient_sky(small_grid()))
        .dipole_amp(DIPOLE_AMPLITUDE)
        .build()
        .unwrap();
    let run = MapmakingRun::new(
        Arc::new(SerialComm),
        small_focalplane(),
        small_schedule(2),
        params,
    );
    run.execute().unwrap();

    // Run-level products are written once, at the run root.
    assert!(outdir.path().join("hits.csv").is_file());
    assert!(outdir.path().join("invnpp.csv").is_file());

    for mc in 0..3 {
        let dir = mc_path(outdir.path(), mc);
        assert!(dir.join("binned.csv").is_file(), "missing binned map {mc}");
        assert!(dir.join("complete.ok").is_file(), "missing stamp {mc}");
        assert!(
            !dir.join("destriped.csv").exists(),
            "binned backend must not destripe"
        );
    }
    assert!(!mc_path(outdir.path(), 3).exists());
}

#[test]
fn binned_run_honors_firstmc_offset() {
    let outdir = tempfile::tempdir().unwrap();
    let params = MapmakerParams::builder()
        .outdir(outdir.path())
        .firstmc(40)
        .nmc(2)
        .build()
        .unwrap();
    let run = MapmakingRun::new(
        Arc::new(SerialComm),
        small_focalplane(),
        small_schedule(1),
        params,
    );
    run.execute().unwrap();

    assert!(mc_path(outdir.path(), 40).join("complete.ok").is_file());
    assert!(mc_path(outdir.path(), 41).join("complete.ok").is_file());
    assert!(!mc_path(outdir.path(), 0).exists());
}

#[test]
fn noise_only_run_succeeds() {
    // No sky, no dipole: the synthesis chain is empty and the total is
    // pure noise.
    let outdir = tempfile::tempdir().unwrap();
    let params = MapmakerParams::builder()
        .outdir(outdir.path())
        .nmc(1)
        .build()
        .unwrap();
    let run = MapmakingRun::new(
        Arc::new(SerialComm),
        small_focalplane(),
        small_schedule(1),
        params,
    );
    run.execute().unwrap();
    assert!(mc_path(outdir.path(), 0).join("binned.csv").is_file());
}

#[test]
fn tod_export_on_first_realization_only() {
    init_logs();
    let outdir = tempfile::tempdir().unwrap();
    let params = MapmakerParams::builder()
        .outdir(outdir.path())
        .firstmc(5)
        .nmc(2)
        .write_tod(true)
        .build()
        .unwrap();
    let run = MapmakingRun::new(
        Arc::new(SerialComm),
        small_focalplane(),
        small_schedule(1),
        params,
    );
    run.execute().unwrap();

    let first = mc_path(outdir.path(), 5);
    assert!(first.join("tod_scan-0_00.csv").is_file());
    assert!(first.join("tod_scan-0_00.f64").is_file());
    assert!(first.join("tod_scan-0_00.hdr").is_file());

    let second = mc_path(outdir.path(), 6);
    assert!(!second.join("tod_scan-0_00.csv").exists());
    assert!(!second.join("tod_scan-0_00.f64").exists());
}
