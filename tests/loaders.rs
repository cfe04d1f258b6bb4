mod common;

use std::fs;
use std::io::Write;

use todmc::constants::TOTAL_NAME;
use todmc::comm::SerialComm;
use todmc::focalplane::Focalplane;
use todmc::observation::build_observations;
use todmc::operators::export::{export_tod_csv, export_tod_raw};
use todmc::operators::{synthesize_signal, OpSimScan, SynthOp};
use todmc::pixels::PixelMap;
use todmc::schedule::Schedule;
use todmc::todmc_errors::TodmcError;

use common::{gradient_sky, small_focalplane, small_grid, small_schedule};

#[test]
fn focalplane_loads_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("focalplane.csv");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "name,theta_deg,phi_deg,net,fknee,alpha,rate,epsilon").unwrap();
    writeln!(file, "det00,5.0,0.0,1.0e-4,0.1,1.0,10.0,0.0").unwrap();
    writeln!(file, "det01,5.0,180.0,2.0e-4,0.2,1.5,10.0,0.05").unwrap();
    drop(file);

    let fp = Focalplane::from_csv_path(&path).unwrap();
    assert_eq!(fp.len(), 2);
    assert_eq!(fp.names(), vec!["det00".to_string(), "det01".to_string()]);
    assert_eq!(fp.detectors[1].epsilon, 0.05);
}

#[test]
fn empty_focalplane_table_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("focalplane.csv");
    fs::write(&path, "name,theta_deg,phi_deg,net,fknee,alpha,rate,epsilon\n").unwrap();

    let err = Focalplane::from_csv_path(&path).unwrap_err();
    assert!(matches!(err, TodmcError::EmptyFocalplane));
}

#[test]
fn schedule_loads_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    fs::write(
        &path,
        "name,start,stop,n_scan\nscan-0,55000.0,55000.01,4\nscan-1,55000.01,55000.02,4\n",
    )
    .unwrap();

    let schedule = Schedule::from_csv_path(&path).unwrap();
    assert_eq!(schedule.len(), 2);
    assert_eq!(schedule.entries[0].name, "scan-0");
    assert_eq!(schedule.entries[1].n_scan, 4);
}

#[test]
fn schedule_rejects_inverted_time_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    fs::write(&path, "name,start,stop,n_scan\nbad,55000.02,55000.01,4\n").unwrap();

    let err = Schedule::from_csv_path(&path).unwrap_err();
    assert!(matches!(err, TodmcError::ScheduleParse(_)));
}

#[test]
fn pixel_map_round_trips_through_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.csv");
    let grid = small_grid();
    let sky = gradient_sky(grid);
    sky.write_csv(&path).unwrap();

    let restored = PixelMap::from_csv_path(grid, &path).unwrap();
    assert_eq!(sky, restored);
}

#[test]
fn raw_export_matches_cache_contents() {
    let dir = tempfile::tempdir().unwrap();
    let focalplane = small_focalplane();
    let grid = small_grid();
    let mut observations =
        build_observations(&SerialComm, &focalplane, &small_schedule(1), 1, grid).unwrap();
    let scan = OpSimScan::new(gradient_sky(grid));
    let ops: Vec<&dyn SynthOp> = vec![&scan];
    synthesize_signal(&mut observations, &ops, TOTAL_NAME).unwrap();

    export_tod_csv(&observations, TOTAL_NAME, dir.path(), 0).unwrap();
    export_tod_raw(&observations, TOTAL_NAME, dir.path(), 0).unwrap();

    let obs = &observations[0];
    let blob = fs::read(dir.path().join(format!("tod_{}_00.f64", obs.name))).unwrap();
    assert_eq!(blob.len(), 8 * obs.nsamp() * obs.detectors().len());

    // Detector-major layout: first nsamp values belong to det00.
    let first_det = obs.cache.reference(TOTAL_NAME, "det00").unwrap();
    for (i, expected) in first_det.iter().enumerate() {
        let bytes: [u8; 8] = blob[8 * i..8 * (i + 1)].try_into().unwrap();
        assert_eq!(f64::from_le_bytes(bytes), *expected);
    }

    let header =
        fs::read_to_string(dir.path().join(format!("tod_{}_00.hdr", obs.name))).unwrap();
    assert!(header.contains(&format!("nsamp {}", obs.nsamp())));
    assert!(header.contains("det00,det01,det02"));
}
