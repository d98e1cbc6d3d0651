#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ntem_core::schema::time_period_divide_by;
use ntem_core::{Dimension, FactTable, ModelVersion, NtemError, Scenario, ZoningSystem};
use rusqlite::{params, Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

mod load;
mod query;
mod reconcile;

#[cfg(test)]
pub(crate) mod test_support;

pub use load::{
    build_database, build_from_sources, BuildInputs, BuildReport, ScenarioReport, ScenarioSource,
    ZonesForLoad,
};
pub use reconcile::ZoneReconciliation;

const NTEM_MIGRATION_VERSION: i64 = 1;

const SCHEMA_NTEM_V1: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  scenario TEXT NOT NULL,
  version TEXT NOT NULL,
  share_type TEXT,
  time_period_normalised INTEGER NOT NULL DEFAULT 0 CHECK (time_period_normalised IN (0, 1)),
  created_at TEXT NOT NULL,
  UNIQUE (scenario, version)
);

CREATE TABLE IF NOT EXISTS zone_types (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL CHECK (name IN ('zone', 'authority', 'county', 'region')),
  source TEXT NOT NULL,
  version TEXT NOT NULL,
  UNIQUE (name, source, version)
);

CREATE TABLE IF NOT EXISTS zones (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  zone_type_id INTEGER NOT NULL REFERENCES zone_types(id),
  name TEXT NOT NULL,
  source_code TEXT,
  UNIQUE (id, zone_type_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_zones_type_code
  ON zones(zone_type_id, source_code) WHERE source_code IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_zones_type_name
  ON zones(zone_type_id, name) WHERE source_code IS NULL;

CREATE TABLE IF NOT EXISTS geo_lookup (
  from_zone_id INTEGER NOT NULL,
  from_zone_type_id INTEGER NOT NULL,
  to_zone_id INTEGER NOT NULL,
  to_zone_type_id INTEGER NOT NULL,
  PRIMARY KEY (from_zone_id, to_zone_type_id),
  FOREIGN KEY (from_zone_id, from_zone_type_id) REFERENCES zones(id, zone_type_id),
  FOREIGN KEY (to_zone_id, to_zone_type_id) REFERENCES zones(id, zone_type_id)
);

CREATE INDEX IF NOT EXISTS idx_geo_lookup_to
  ON geo_lookup(to_zone_type_id, to_zone_id);
";

/// A metadata run as stored: one ingested (scenario, version) batch.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetadataRun {
    pub id: i64,
    pub scenario: Scenario,
    pub version: ModelVersion,
    pub share_type: Option<String>,
    pub time_period_normalised: bool,
    pub created_at: String,
}

pub struct SqliteNtemStore {
    conn: Connection,
}

impl SqliteNtemStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Creates every table that does not exist yet and seeds the dimension lookups.
    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_NTEM_V1)
            .context("failed to apply ntem schema")?;

        for dimension in Dimension::ALL {
            self.conn
                .execute_batch(&dimension_table_ddl(dimension))
                .with_context(|| format!("failed to create {}", dimension.lookup_table()))?;
            self.seed_dimension(dimension)?;
        }

        for table in FactTable::ALL {
            self.conn
                .execute_batch(&fact_table_ddl(table))
                .with_context(|| format!("failed to create {}", table.table_name()))?;
        }

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![NTEM_MIGRATION_VERSION, now_rfc3339()?],
            )
            .context("failed to register ntem schema migration")?;

        Ok(())
    }

    /// Drops every user table so the next [`Self::migrate`] starts from nothing.
    pub fn clean(&mut self) -> Result<()> {
        let tables: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                )
                .context("failed to list tables for clean")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            collect_rows(rows)?
        };

        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .context("failed to disable foreign keys for clean")?;
        let dropped = self.drop_tables(&tables);
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to re-enable foreign keys after clean")?;
        dropped?;

        tracing::info!(tables = tables.len(), "dropped existing tables");
        Ok(())
    }

    fn drop_tables(&mut self, tables: &[String]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start clean transaction")?;
        for table in tables {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", table.replace('"', "\"\"")))
                .with_context(|| format!("failed to drop table {table}"))?;
        }
        tx.commit().context("failed to commit clean transaction")
    }

    fn seed_dimension(&self, dimension: Dimension) -> Result<()> {
        let table = dimension.lookup_table();
        if dimension == Dimension::TimePeriod {
            let mut stmt = self.conn.prepare(&format!(
                "INSERT OR IGNORE INTO {table}(id, name, divide_by) VALUES (?1, ?2, ?3)"
            ))?;
            for (id, name) in dimension.reference_values() {
                let divide_by = time_period_divide_by(*id)
                    .ok_or_else(|| anyhow!("time period {id} has no divide_by"))?;
                stmt.execute(params![id, name, divide_by])
                    .with_context(|| format!("failed to seed {table}"))?;
            }
        } else {
            let mut stmt = self
                .conn
                .prepare(&format!("INSERT OR IGNORE INTO {table}(id, name) VALUES (?1, ?2)"))?;
            for (id, name) in dimension.reference_values() {
                stmt.execute(params![id, name])
                    .with_context(|| format!("failed to seed {table}"))?;
            }
        }
        Ok(())
    }

    pub fn metadata_run(
        &self,
        scenario: Scenario,
        version: ModelVersion,
    ) -> Result<Option<MetadataRun>> {
        self.conn
            .query_row(
                "SELECT id, share_type, time_period_normalised, created_at
                 FROM metadata WHERE scenario = ?1 AND version = ?2",
                params![scenario.as_str(), version.as_str()],
                |row| {
                    Ok(MetadataRun {
                        id: row.get(0)?,
                        scenario,
                        version,
                        share_type: row.get(1)?,
                        time_period_normalised: row.get::<_, i64>(2)? != 0,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| {
                format!(
                    "failed to read metadata run for {} {}",
                    scenario.as_str(),
                    version.as_str()
                )
            })
    }

    /// Like [`Self::metadata_run`] but a missing run is a configuration error.
    pub fn require_metadata_run(
        &self,
        scenario: Scenario,
        version: ModelVersion,
    ) -> Result<MetadataRun> {
        self.metadata_run(scenario, version)?.ok_or_else(|| {
            NtemError::Configuration(format!(
                "database has no metadata run for scenario {} version {}",
                scenario.as_str(),
                version.as_str()
            ))
            .into()
        })
    }

    /// The single zone type of `zoning` in this database.
    pub fn zone_type_id(&self, zoning: ZoningSystem) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM zone_types WHERE name = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![zoning.as_str()], |row| row.get::<_, i64>(0))?;
        let ids = collect_rows(rows)?;
        match ids.as_slice() {
            [id] => Ok(*id),
            [] => Err(NtemError::DataIntegrity(format!(
                "database has no {} zone type; build it first",
                zoning.as_str()
            ))
            .into()),
            many => Err(NtemError::DataIntegrity(format!(
                "database holds {} {} zone types from different lookups",
                many.len(),
                zoning.as_str()
            ))
            .into()),
        }
    }

    pub fn count_rows(&self, table: &str) -> Result<usize> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
            .with_context(|| format!("failed to count rows of {table}"))?;
        usize::try_from(count).context("row count out of range")
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn dimension_table_ddl(dimension: Dimension) -> String {
    let table = dimension.lookup_table();
    if dimension == Dimension::TimePeriod {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
               id INTEGER PRIMARY KEY,
               name TEXT NOT NULL,
               divide_by REAL NOT NULL CHECK (divide_by > 0)
             );"
        )
    } else {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
               id INTEGER PRIMARY KEY,
               name TEXT NOT NULL
             );"
        )
    }
}

fn fact_table_ddl(table: FactTable) -> String {
    let name = table.table_name();
    let dimension_columns: String = table
        .dimensions()
        .iter()
        .map(|dimension| {
            format!(
                "  {} INTEGER NOT NULL REFERENCES {}(id),\n",
                dimension.column(),
                dimension.lookup_table()
            )
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  metadata_id INTEGER NOT NULL REFERENCES metadata(id),
  zone_id INTEGER NOT NULL,
  zone_type_id INTEGER NOT NULL,
{dimension_columns}  year INTEGER NOT NULL,
  value REAL NOT NULL,
  FOREIGN KEY (zone_id, zone_type_id) REFERENCES zones(id, zone_type_id)
);
CREATE INDEX IF NOT EXISTS idx_{name}_run_year ON {name}(metadata_id, year);"
    )
}

/// Column list of a fact table's insert statement, without the generated id.
fn fact_insert_sql(table: FactTable) -> String {
    let mut columns = vec!["metadata_id", "zone_id", "zone_type_id"];
    columns.extend(table.dimensions().iter().map(|dimension| dimension.column()));
    columns.extend(["year", "value"]);
    let placeholders: Vec<String> = (1..=columns.len()).map(|index| format!("?{index}")).collect();
    format!(
        "INSERT INTO {}({}) VALUES ({})",
        table.table_name(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format current time")
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn id_names(conn: &Connection, table: &str) -> Result<BTreeMap<i64, String>> {
    let mut stmt = conn
        .prepare(&format!("SELECT id, name FROM {table}"))
        .with_context(|| format!("failed to read lookup table {table}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    Ok(collect_rows(rows)?.into_iter().collect())
}
