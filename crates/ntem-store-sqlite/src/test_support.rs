//! Fixture sources shared by the store tests.
//!
//! Tyne and Wear: "Newcastle upon Tyne" holds fine zones 101..=103 and
//! "Gateshead" holds 104. Greater Manchester: "Manchester" holds 105.
//! Raw authority/county/region ids deliberately overlap the raw zone ids.

use std::path::Path;

use anyhow::Result;
use ntem_core::{
    FactTable, MemorySource, ModelVersion, Scenario, SourceReader, SourceTable, SourceValue,
    YearGrid, INVALID_ZONE_ID,
};

use crate::load::{build_from_sources, BuildInputs, BuildReport, ScenarioSource};
use crate::SqliteNtemStore;

pub(crate) const LOOKUP_NAME: &str = "ntem_lookup";

pub(crate) fn must<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("test failure: {err:#}"),
    }
}

pub(crate) fn fixture_store() -> SqliteNtemStore {
    let store = must(SqliteNtemStore::open(Path::new(":memory:")));
    must(store.migrate());
    store
}

pub(crate) fn int(value: i64) -> SourceValue {
    SourceValue::Integer(value)
}

pub(crate) fn real(value: f64) -> SourceValue {
    SourceValue::Real(value)
}

pub(crate) fn text(value: &str) -> SourceValue {
    SourceValue::Text(value.to_string())
}

pub(crate) fn table(name: &str, columns: &[&str], rows: Vec<Vec<SourceValue>>) -> SourceTable {
    let columns = columns.iter().map(|column| (*column).to_string()).collect();
    match SourceTable::new(name, columns, rows) {
        Ok(table) => table,
        Err(err) => panic!("fixture table {name}: {err}"),
    }
}

pub(crate) fn fixture_zones_table() -> SourceTable {
    let zone = |id: i64, name: &str, code: &str, authority: i64, county: i64, region: i64| {
        vec![int(id), text(name), text(code), int(authority), int(county), int(region)]
    };
    table(
        "Zones",
        &["Zone_ID", "Zone_Name", "Zone_Code", "Authority_ID", "County_ID", "Region_ID"],
        vec![
            zone(101, "Newcastle upon Tyne 001", "E02001701", 1, 1, 1),
            zone(102, "Newcastle upon Tyne 002", "E02001702", 1, 1, 1),
            zone(103, "Newcastle upon Tyne 003", "E02001703", 1, 1, 1),
            zone(104, "Gateshead 001", "E02001704", 2, 1, 1),
            zone(105, "Manchester 001", "E02001705", 3, 2, 2),
        ],
    )
}

pub(crate) fn fixture_lookup_with_zones(zones: SourceTable) -> MemorySource {
    MemorySource::new(LOOKUP_NAME)
        .with_table(zones)
        .with_table(table(
            "Authorities",
            &["Authority_ID", "Authority_Name", "Authority_Code"],
            vec![
                vec![int(1), text("Newcastle upon Tyne"), text("E08000021")],
                vec![int(2), text("Gateshead"), text("E08000037")],
                vec![int(3), text("Manchester"), text("E08000003")],
            ],
        ))
        .with_table(table(
            "Counties",
            &["County_ID", "County_Name"],
            vec![
                vec![int(1), text("Tyne and Wear")],
                vec![int(2), text("Greater Manchester")],
            ],
        ))
        .with_table(table(
            "Regions",
            &["Region_ID", "Region_Name"],
            vec![vec![int(1), text("North East")], vec![int(2), text("North West")]],
        ))
}

pub(crate) fn fixture_lookup() -> MemorySource {
    fixture_lookup_with_zones(fixture_zones_table())
}

/// Households (4) and jobs (5) per fine zone for 2011, 2016, 2021 and 2026.
pub(crate) const HOUSEHOLDS: [(i64, [f64; 4]); 5] = [
    (101, [39_200.0, 40_000.0, 40_800.0, 41_600.0]),
    (102, [39_403.0, 40_303.0, 41_203.0, 42_103.0]),
    (103, [39_806.0, 40_606.0, 41_406.0, 42_206.0]),
    (104, [30_000.0, 30_500.0, 31_000.0, 31_500.0]),
    (105, [50_000.0, 51_000.0, 52_000.0, 53_000.0]),
];

pub(crate) const FIXTURE_YEARS: [&str; 4] = ["2011", "2016", "2021", "2026"];

pub(crate) fn planning_table() -> SourceTable {
    let mut columns = vec!["ZoneID", "PlanningDataType"];
    columns.extend(FIXTURE_YEARS);
    let mut rows = Vec::new();
    for (zone, households) in HOUSEHOLDS {
        let mut row = vec![int(zone), int(4)];
        row.extend(households.iter().map(|value| real(*value)));
        rows.push(row);

        let mut jobs = vec![int(zone), int(5)];
        jobs.extend(households.iter().map(|value| real(value / 2.0)));
        rows.push(jobs);
    }
    rows.push(vec![int(INVALID_ZONE_ID), int(4), real(1.0), real(1.0), real(1.0), real(1.0)]);
    table("Planning", &columns, rows)
}

pub(crate) fn car_ownership_table() -> SourceTable {
    let mut columns = vec!["ZoneID", "CarOwnershipType"];
    columns.extend(FIXTURE_YEARS);
    let mut rows = Vec::new();
    for (zone, _) in HOUSEHOLDS {
        for ownership in 1..=4_i64 {
            #[allow(clippy::cast_precision_loss)]
            let base = (zone * 10 + ownership) as f64;
            rows.push(vec![
                int(zone),
                int(ownership),
                real(base),
                real(base + 5.0),
                real(base + 10.0),
                real(base + 15.0),
            ]);
        }
    }
    table("CarOwnership", &columns, rows)
}

/// Directional trip ends: purpose 1, modes 3 and 5, AM peak (1) and Saturday (5), all trip types.
pub(crate) fn direction_table() -> SourceTable {
    let mut columns = vec!["ZoneID", "Purpose", "Mode", "TimePeriod", "TripType"];
    columns.extend(FIXTURE_YEARS);
    let mut rows = Vec::new();
    for (zone, _) in HOUSEHOLDS {
        for mode in [3_i64, 5] {
            for time_period in [1_i64, 5] {
                for trip_type in 1..=4_i64 {
                    rows.push(vec![
                        int(zone),
                        int(1),
                        int(mode),
                        int(time_period),
                        int(trip_type),
                        real(240.0),
                        real(480.0),
                        real(720.0),
                        real(960.0),
                    ]);
                }
            }
        }
    }
    table("TripEndDataByDirection", &columns, rows)
}

pub(crate) fn car_availability_table() -> SourceTable {
    let mut columns = vec!["ZoneID", "Purpose", "Mode", "CarAvailability"];
    columns.extend(FIXTURE_YEARS);
    let mut rows = Vec::new();
    for (zone, _) in HOUSEHOLDS {
        for purpose in [1_i64, 11] {
            for availability in [1_i64, 2] {
                rows.push(vec![
                    int(zone),
                    int(purpose),
                    int(3),
                    int(availability),
                    real(10.0),
                    real(20.0),
                    real(30.0),
                    real(40.0),
                ]);
            }
        }
    }
    table("TripEndDataByCarAvailability", &columns, rows)
}

pub(crate) fn fixture_core_source() -> MemorySource {
    MemorySource::new("core_ne")
        .with_table(planning_table())
        .with_table(car_ownership_table())
        .with_table(direction_table())
        .with_table(car_availability_table())
}

/// Store with the fixture lookup reconciled and the Core scenario loaded.
pub(crate) fn built_store(normalise: bool) -> (SqliteNtemStore, BuildReport) {
    store_with_core(&fixture_core_source(), &FactTable::ALL, normalise)
}

/// Store with the fixture lookup reconciled and `core` loaded as the Core scenario.
pub(crate) fn store_with_core(
    core: &MemorySource,
    tables: &[FactTable],
    normalise: bool,
) -> (SqliteNtemStore, BuildReport) {
    let mut store = fixture_store();
    let lookup = fixture_lookup();
    let scenarios = vec![ScenarioSource {
        scenario: Scenario::Core,
        sources: vec![core as &dyn SourceReader],
    }];
    let report = must(build_from_sources(
        &mut store,
        &BuildInputs {
            lookup: &lookup,
            lookup_name: LOOKUP_NAME,
            version: ModelVersion::Eight,
            scenarios: &scenarios,
            tables,
            grid: YearGrid::default(),
            normalise_time_periods: normalise,
        },
    ));
    (store, report)
}
