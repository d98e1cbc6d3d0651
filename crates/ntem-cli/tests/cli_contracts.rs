#![allow(clippy::uninlined_format_args, clippy::float_cmp)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

const ZONES_CSV: &str = "\
Zone_ID,Zone_Name,Zone_Code,Authority_ID,County_ID,Region_ID
101,Newcastle upon Tyne 001,E02001701,1,1,1
102,Newcastle upon Tyne 002,E02001702,1,1,1
103,Newcastle upon Tyne 003,E02001703,1,1,1
104,Gateshead 001,E02001704,2,1,1
";

const PLANNING_CSV: &str = "\
ZoneID,PlanningDataType,2011,2016,2021,2026
101,4,39200,40000,40800,41600
102,4,39403,40303,41203,42103
103,4,39806,40606,41406,42206
104,4,30000,30500,31000,31500
9999,4,1,1,1,1
";

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            panic!("failed to create {}: {err}", parent.display());
        }
    }
    if let Err(err) = fs::write(path, content) {
        panic!("failed to write {}: {err}", path.display());
    }
}

fn fixture_workspace() -> TempDir {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("failed to create tempdir: {err}"),
    };
    let root = dir.path();
    write(&root.join("lookup/Zones.csv"), ZONES_CSV);
    write(
        &root.join("lookup/Authorities.csv"),
        "Authority_ID,Authority_Name,Authority_Code\n\
         1,Newcastle upon Tyne,E08000021\n\
         2,Gateshead,E08000037\n",
    );
    write(&root.join("lookup/Counties.csv"), "County_ID,County_Name\n1,Tyne and Wear\n");
    write(&root.join("lookup/Regions.csv"), "Region_ID,Region_Name\n1,North East\n");
    write(&root.join("core/Planning.csv"), PLANNING_CSV);
    write(
        &root.join("build.yml"),
        "output_path: ntem.sqlite\n\
         lookup_source: lookup\n\
         lookup_source_name: ntem_zoning\n\
         version: 8.0\n\
         tables: [planning]\n\
         sources:\n  - scenario: Core\n    paths: [core]\n",
    );
    dir
}

fn ntem(args: &[&str]) -> Output {
    match Command::new(env!("CARGO_BIN_EXE_ntem")).args(args).output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run ntem {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn read_log(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => panic!("failed to read log {}: {err}", path.display()),
    }
}

fn build(root: &Path) -> Value {
    let config = root.join("build.yml");
    let output = ntem(&["build", "--config", &config.to_string_lossy()]);
    assert!(
        output.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    stdout_json(&output)
}

#[test]
fn help_lists_build_and_query() {
    let output = ntem(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["build", "query", "--log-level", "--verbose-errors"] {
        assert!(stdout.contains(required), "missing {required} in help:\n{stdout}");
    }
}

#[test]
fn build_reports_zones_and_loaded_rows() {
    let workspace = fixture_workspace();
    let report = build(workspace.path());

    assert_eq!(report["lookup_source"], "ntem_zoning");
    assert_eq!(report["version"], "8.0");
    assert_eq!(report["zones"]["crosswalk_rows"], 12);
    assert_eq!(report["scenarios"][0]["scenario"], "Core");
    assert_eq!(report["scenarios"][0]["rows"]["planning"], 16);
    assert_eq!(report["scenarios"][0]["dropped_invalid_zone_rows"], 1);

    let conn = match Connection::open(workspace.path().join("ntem.sqlite")) {
        Ok(conn) => conn,
        Err(err) => panic!("failed to open built database: {err}"),
    };
    let zone_types: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM zone_types WHERE source = 'ntem_zoning'",
        [],
        |row| row.get(0),
    ) {
        Ok(count) => count,
        Err(err) => panic!("failed to count zone types: {err}"),
    };
    assert_eq!(zone_types, 4);

    let log = read_log(&workspace.path().join("ntem.log"));
    assert!(log.contains("building database"), "log: {log}");
    assert!(!log.contains('\u{1b}'), "log file carries ANSI escapes: {log}");
}

#[test]
fn query_writes_interpolated_authority_csv() {
    let workspace = fixture_workspace();
    build(workspace.path());
    let config = workspace.path().join("query.yml");
    write(
        &config,
        "db_path: ntem.sqlite\n\
         output_path: outputs\n\
         planning_runs:\n\
         \x20 - years: [2018, 2021]\n\
         \x20   scenarios: [Core]\n\
         \x20   output_zoning: authority\n\
         \x20   filter_zoning_system: authority\n\
         \x20   filter_zone_names: [Newcastle upon Tyne]\n\
         \x20   residential: false\n\
         \x20   employment: false\n",
    );

    let output = ntem(&["query", "--config", &config.to_string_lossy()]);
    assert!(
        output.status.success(),
        "query failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["outputs"][0]["name"], "Planning_Core_8.0");
    assert_eq!(report["outputs"][0]["rows"], 2);

    let csv_path = workspace.path().join("outputs/Planning_Core_8.0.csv");
    let mut reader = match csv::Reader::from_path(&csv_path) {
        Ok(reader) => reader,
        Err(err) => panic!("failed to open {}: {err}", csv_path.display()),
    };
    let headers = match reader.headers() {
        Ok(headers) => headers.iter().map(str::to_string).collect::<Vec<_>>(),
        Err(err) => panic!("failed to read headers: {err}"),
    };
    assert_eq!(headers, vec!["authority", "year", "Households"]);

    let records: Vec<Vec<String>> = reader
        .records()
        .map(|record| match record {
            Ok(record) => record.iter().map(str::to_string).collect(),
            Err(err) => panic!("bad csv record: {err}"),
        })
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0][0], "E08000021");
    assert_eq!(records[0][1], "2018");
    assert_eq!(records[0][2].parse::<f64>().unwrap_or_default(), 121_909.0);
    assert_eq!(records[1][1], "2021");
    assert_eq!(records[1][2].parse::<f64>().unwrap_or_default(), 123_409.0);

    let log = read_log(&workspace.path().join("outputs/ntem.log"));
    assert!(log.contains("wrote output"), "log: {log}");
    assert!(log.contains("Planning_Core_8.0"), "log: {log}");
}

#[test]
fn half_specified_zone_filter_exits_non_zero() {
    let workspace = fixture_workspace();
    build(workspace.path());
    let config = workspace.path().join("query.yml");
    write(
        &config,
        "db_path: ntem.sqlite\n\
         output_path: outputs\n\
         planning_runs:\n\
         \x20 - years: [2018]\n\
         \x20   scenarios: [Core]\n\
         \x20   filter_zoning_system: authority\n",
    );

    let output = ntem(&["query", "--config", &config.to_string_lossy()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("filter_zoning_system"), "stderr: {stderr}");
    assert!(!workspace.path().join("outputs").exists());
}

#[test]
fn rebuilding_without_clean_database_is_rejected() {
    let workspace = fixture_workspace();
    build(workspace.path());
    let config = workspace.path().join("build.yml");
    let output = ntem(&[
        "build",
        "--verbose-errors",
        "--config",
        &config.to_string_lossy(),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("clean_database"), "stderr: {stderr}");
}
