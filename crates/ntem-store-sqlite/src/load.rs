//! Fact loading and the build orchestration.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use ntem_core::{
    melt_fact_table, BuildConfig, CsvDirectorySource, FactTable, ModelVersion, NtemError,
    Scenario, SourceReader, YearGrid, ZoneIdMap,
};
use rusqlite::params;

use crate::reconcile::ZoneReconciliation;
use crate::{bool_to_sql, fact_insert_sql, now_rfc3339, SqliteNtemStore};

/// Sources of one scenario, read in order.
pub struct ScenarioSource<'a> {
    pub scenario: Scenario,
    pub sources: Vec<&'a dyn SourceReader>,
}

/// Everything one build pass reads, independent of where the sources live.
pub struct BuildInputs<'a> {
    pub lookup: &'a dyn SourceReader,
    pub lookup_name: &'a str,
    pub version: ModelVersion,
    pub scenarios: &'a [ScenarioSource<'a>],
    pub tables: &'a [FactTable],
    pub grid: YearGrid,
    pub normalise_time_periods: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub run_id: i64,
    pub rows: BTreeMap<FactTable, usize>,
    pub dropped_invalid_zone_rows: usize,
    pub time_period_normalised: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BuildReport {
    pub lookup_source: String,
    pub version: ModelVersion,
    pub zones: ZoneReconciliation,
    pub scenarios: Vec<ScenarioReport>,
    pub built_at: String,
}

impl SqliteNtemStore {
    /// Loads one scenario inside a single transaction: run row, then every fact row, then commit.
    pub fn load_scenario(
        &mut self,
        scenario: &ScenarioSource<'_>,
        version: ModelVersion,
        zones: &ZonesForLoad<'_>,
        tables: &[FactTable],
        grid: &YearGrid,
    ) -> Result<ScenarioReport> {
        if self.metadata_run(scenario.scenario, version)?.is_some() {
            return Err(NtemError::DataIntegrity(format!(
                "metadata run for scenario {} version {} already exists; \
                 use clean_database to rebuild",
                scenario.scenario.as_str(),
                version.as_str()
            ))
            .into());
        }

        let tx = self
            .conn
            .transaction()
            .context("failed to start scenario load transaction")?;

        tx.execute(
            "INSERT INTO metadata(scenario, version, share_type, time_period_normalised, created_at)
             VALUES (?1, ?2, NULL, 0, ?3)",
            params![scenario.scenario.as_str(), version.as_str(), now_rfc3339()?],
        )
        .context("failed to insert metadata run")?;
        let run_id = tx.last_insert_rowid();

        let mut rows = BTreeMap::new();
        let mut dropped = 0;
        for source in &scenario.sources {
            for table in tables {
                let wide = source.read_table(table.source_table()).with_context(|| {
                    format!("failed to read {} from {}", table.source_table(), source.describe())
                })?;
                let melted = melt_fact_table(&wide, *table, grid, zones.fine_zones)
                    .with_context(|| {
                        format!(
                            "failed to reshape {} from {}",
                            table.source_table(),
                            source.describe()
                        )
                    })?;

                let mut stmt = tx
                    .prepare_cached(&fact_insert_sql(*table))
                    .with_context(|| {
                        format!("failed to prepare insert into {}", table.table_name())
                    })?;
                for fact in &melted.rows {
                    let mut values: Vec<i64> = vec![run_id, fact.zone_id, zones.zone_type_id];
                    values.extend(&fact.dims);
                    values.push(i64::from(fact.year));
                    let mut bound: Vec<&dyn rusqlite::ToSql> =
                        values.iter().map(|value| value as &dyn rusqlite::ToSql).collect();
                    bound.push(&fact.value);
                    stmt.execute(bound.as_slice())
                        .with_context(|| format!("failed to append to {}", table.table_name()))?;
                }

                tracing::info!(
                    scenario = scenario.scenario.as_str(),
                    source = %source.describe(),
                    table = table.table_name(),
                    rows = melted.rows.len(),
                    "appended facts"
                );
                *rows.entry(*table).or_insert(0) += melted.rows.len();
                dropped += melted.dropped_rows;
            }
        }

        tx.commit().context("failed to commit scenario load transaction")?;

        Ok(ScenarioReport {
            scenario: scenario.scenario,
            run_id,
            rows,
            dropped_invalid_zone_rows: dropped,
            time_period_normalised: false,
        })
    }

    /// Divides directional values by their time period's `divide_by` once per run.
    ///
    /// Returns `false` when the run was already normalised and nothing changed.
    pub fn normalise_time_periods(&mut self, run_id: i64) -> Result<bool> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start normalisation transaction")?;

        let normalised: i64 = tx
            .query_row(
                "SELECT time_period_normalised FROM metadata WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to read metadata run {run_id}"))?;
        if normalised != 0 {
            tracing::debug!(run_id, "time periods already normalised");
            return Ok(false);
        }

        let updated = tx
            .execute(
                &format!(
                    "UPDATE {table} SET value = value / (
                       SELECT divide_by FROM time_period_types
                       WHERE time_period_types.id = {table}.time_period
                     ) WHERE metadata_id = ?1",
                    table = FactTable::TripEndByDirection.table_name()
                ),
                params![run_id],
            )
            .context("failed to normalise directional trip ends")?;
        tx.execute(
            "UPDATE metadata SET time_period_normalised = ?1 WHERE id = ?2",
            params![bool_to_sql(true), run_id],
        )
        .context("failed to flag metadata run as normalised")?;
        tx.commit().context("failed to commit normalisation transaction")?;

        tracing::info!(run_id, rows = updated, "normalised directional trip ends");
        Ok(true)
    }
}

/// The zone translation a fact load needs.
pub struct ZonesForLoad<'a> {
    pub zone_type_id: i64,
    pub fine_zones: &'a ZoneIdMap,
}

/// Reconciles zones, then loads and optionally normalises every scenario.
pub fn build_from_sources(
    store: &mut SqliteNtemStore,
    inputs: &BuildInputs<'_>,
) -> Result<BuildReport> {
    inputs.grid.validate()?;
    let zones = store
        .reconcile_zones(inputs.lookup, inputs.lookup_name, inputs.version)
        .context("zone reconciliation failed")?;
    let zone_type_id = zones.native_zone_type_id().ok_or_else(|| {
        NtemError::DataIntegrity("zone reconciliation produced no fine zone type".to_string())
    })?;
    let for_load = ZonesForLoad {
        zone_type_id,
        fine_zones: &zones.fine_zones,
    };

    let mut scenarios = Vec::with_capacity(inputs.scenarios.len());
    for scenario in inputs.scenarios {
        let mut report = store
            .load_scenario(scenario, inputs.version, &for_load, inputs.tables, &inputs.grid)
            .with_context(|| format!("failed to load scenario {}", scenario.scenario.as_str()))?;
        if inputs.normalise_time_periods && inputs.tables.contains(&FactTable::TripEndByDirection) {
            store.normalise_time_periods(report.run_id)?;
            report.time_period_normalised = true;
        }
        scenarios.push(report);
    }

    Ok(BuildReport {
        lookup_source: inputs.lookup_name.to_string(),
        version: inputs.version,
        zones,
        scenarios,
        built_at: now_rfc3339()?,
    })
}

/// Opens the database named by `config` and builds it from CSV-exported sources.
pub fn build_database(config: &BuildConfig) -> Result<BuildReport> {
    let mut store = SqliteNtemStore::open(&config.output_path)?;
    if config.clean_database {
        tracing::warn!(
            path = %config.output_path.display(),
            "clean_database set; dropping existing tables"
        );
        store.clean()?;
    }
    store.migrate()?;

    let lookup = open_source(&config.lookup_source)?;
    let mut opened: Vec<(Scenario, Vec<CsvDirectorySource>)> =
        Vec::with_capacity(config.sources.len());
    for entry in &config.sources {
        let sources = entry
            .paths
            .iter()
            .map(|path| open_source(path))
            .collect::<Result<Vec<_>>>()?;
        opened.push((entry.scenario, sources));
    }
    let scenarios: Vec<ScenarioSource<'_>> = opened
        .iter()
        .map(|(scenario, sources)| ScenarioSource {
            scenario: *scenario,
            sources: sources.iter().map(|source| source as &dyn SourceReader).collect(),
        })
        .collect();

    let lookup_name = config.lookup_name();
    build_from_sources(
        &mut store,
        &BuildInputs {
            lookup: &lookup,
            lookup_name: &lookup_name,
            version: config.version,
            scenarios: &scenarios,
            tables: &config.tables,
            grid: YearGrid::default(),
            normalise_time_periods: config.normalise_time_periods,
        },
    )
}

fn open_source(path: &Path) -> Result<CsvDirectorySource> {
    CsvDirectorySource::open(path)
        .with_context(|| format!("failed to open source {}", path.display()))
}
