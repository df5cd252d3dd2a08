use std::fs;
use std::path::Path;

use mrmdb::data::output::{checkpoint_path, read_results};
use mrmdb::error::MrmError;
use mrmdb::run::runner::run;
use mrmdb::settings::{Method, Settings};

const LIBRARY_HEADER: &str = "InChIKey,Name,PrecursorMZ,RT,MSMS,intensity,CE,NCE,Ion_mode,Precursor_type";

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn base_settings(dir: &Path, method: Method) -> Settings {
    write(
        &dir.join("library").join("a.csv"),
        &format!(
            "{LIBRARY_HEADER}\n\
             TGT-A,Target A,300,5,100,500,10,40,P,[M+H]+\n\
             TGT-A,Target A,300,5,150,300,10,40,P,[M+H]+\n"
        ),
    );
    write(
        &dir.join("library").join("b.csv"),
        &format!(
            "{LIBRARY_HEADER}\n\
             TGT-A,Target A,300,5,200,100,10,40,P,[M+H]+\n\
             TGT-B,Target B,410,7,120,50,10,40,P,[M+Na]+\n"
        ),
    );
    write(&dir.join("targets.csv"), "Name,InChIKey\nTarget A,TGT-A\nTarget B,TGT-B\nGhost,GHOST\nTarget A,TGT-A\n");

    Settings {
        method,
        library: dir.join("library"),
        targets: dir.join("targets.csv"),
        output: dir.join("out").join("results.csv"),
        cache_dir: dir.join("cache"),
        checkpoint_interval: 2,
        ..Settings::default()
    }
}

#[test]
fn coverage_run_writes_one_row_per_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = base_settings(dir.path(), Method::Coverage);
    let interference = dir.path().join("intf_nist");
    write(
        &interference.join("p.csv"),
        &format!(
            "{LIBRARY_HEADER}\n\
             OTHER,Other,300.4,5.5,100.3,80,10,40,P,[M+H]+\n\
             OTHER,Other,300.4,5.5,100.6,80,10,40,P,[M+H]+\n\
             FAR,Far,350,5,200,80,10,40,P,[M+H]+\n"
        ),
    );
    settings.interference = Some(interference);

    let summary = run(settings.clone()).unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.optimized, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);

    let rows = read_results(&settings.output).unwrap();
    let statuses: Vec<&str> = rows.iter().map(|r| r.status.as_str()).collect();
    assert_eq!(statuses, vec!["optimized", "no precursor type", "not found"]);

    let best = &rows[0];
    assert_eq!(best.name, "Target A");
    assert_eq!(best.coverage_all, 1);
    // OTHER only interferes with the 100 ion
    assert_eq!((best.mz_1, best.mz_2), (150.0, 200.0));
    assert!((best.max_sensitivity_score - 0.5).abs() < 1e-9);
    assert!((best.max_specificity_score - 1.0).abs() < 1e-9);
    assert!((best.max_score - 0.75).abs() < 1e-9);
    assert!((best.ce_instrument_1 - (0.5788 * 10.0 + 9.4452)).abs() < 1e-9);

    let checkpoint = checkpoint_path(&settings.output, Method::Coverage, 2);
    assert_eq!(read_results(&checkpoint).unwrap().len(), 2);
    assert_eq!(fs::read_dir(&settings.cache_dir).unwrap().count(), 1);
}

#[test]
fn overlap_run_prefers_the_clean_pair() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = base_settings(dir.path(), Method::Overlap);
    let interference = dir.path().join("intf_qe");
    write(
        &interference.join("p.csv"),
        "Alignment ID,Average Mz,Average Rt(min),CE,MS/MS spectrum\n\
         1,300.3,5.2,10,100.2:40 180:5\n\
         2,400,5.2,10,150:900\n",
    );
    settings.interference = Some(interference);
    settings.max_compounds = Some(1);

    let summary = run(settings.clone()).unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.optimized, 1);

    let rows = read_results(&settings.output).unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!((row.coverage_low, row.coverage_all), (1, 1));
    assert_eq!((row.mz_1, row.mz_2), (150.0, 200.0));
    assert!((row.max_sensitivity_score - 0.5).abs() < 1e-9);
    assert!((row.max_specificity_score + 1.0 / 41.0).abs() < 1e-9);
    assert!((row.max_score - (0.25 - 0.5 / 41.0)).abs() < 1e-9);
}

#[test]
fn single_compound_run_reports_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = base_settings(dir.path(), Method::Coverage);
    let interference = dir.path().join("intf_nist");
    write(&interference.join("p.csv"), &format!("{LIBRARY_HEADER}\n"));
    settings.interference = Some(interference);
    settings.single_compound = Some("UNKNOWN-KEY".to_string());

    let summary = run(settings.clone()).unwrap();
    assert_eq!(summary.total, 1);
    let rows = read_results(&settings.output).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "UNKNOWN-KEY");
    assert_eq!(rows[0].status, "not found");
}

#[test]
fn missing_library_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        library: dir.path().join("nowhere"),
        cache_dir: dir.path().join("cache"),
        ..Settings::default()
    };
    assert!(matches!(run(settings), Err(MrmError::SourceNotFound { .. })));
}
