//! Aggregation queries over a built database.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use ntem_core::{
    interpolate_years, AggregationPlan, Dimension, LongRow, NtemError, Query, ResultTable,
    YearGrid, ZoneFilter, NATIVE_ZONING,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use crate::{collect_rows, id_names, SqliteNtemStore};

/// Store identifiers an aggregation runs against.
struct ResolvedRun {
    run_id: i64,
    normalised: bool,
    native_type_id: i64,
    output_type_id: i64,
    filter_type_id: Option<i64>,
}

impl SqliteNtemStore {
    /// Runs one query: plan, aggregate the native years, interpolate, then label.
    pub fn run_query(&self, query: &Query, grid: &YearGrid) -> Result<ResultTable> {
        let plan = query.plan()?;
        let name = query.name();

        let run = self.require_metadata_run(plan.scenario, plan.version)?;
        let native_type_id = self.zone_type_id(NATIVE_ZONING)?;
        let output_type_id = self.zone_type_id(plan.output_zoning)?;
        let filter_type_id = match &plan.zone_filter {
            Some(filter) => {
                let type_id = self.zone_type_id(filter.zoning)?;
                self.check_filter_names(filter, type_id)?;
                Some(type_id)
            }
            None => None,
        };
        let resolved = ResolvedRun {
            run_id: run.id,
            normalised: run.time_period_normalised,
            native_type_id,
            output_type_id,
            filter_type_id,
        };

        let mut table = interpolate_years(grid, &query.common().years, |native_years| {
            self.aggregate(&name, &plan, &resolved, native_years)
        })?;
        self.apply_labels(&plan, output_type_id, &mut table)?;

        tracing::info!(
            query = %name,
            rows = table.len(),
            columns = table.columns.len(),
            "query complete"
        );
        Ok(table)
    }

    fn check_filter_names(&self, filter: &ZoneFilter, type_id: i64) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM zones WHERE zone_type_id = ?1")
            .context("failed to prepare zone name lookup")?;
        let rows = stmt.query_map(params![type_id], |row| row.get::<_, String>(0))?;
        let known: BTreeSet<String> = collect_rows(rows)?.into_iter().collect();
        let unknown: Vec<&str> = filter
            .names
            .iter()
            .filter(|name| !known.contains(*name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(NtemError::Configuration(format!(
                "unknown {} zone names in filter: {}",
                filter.zoning.as_str(),
                unknown.join(", ")
            ))
            .into());
        }
        Ok(())
    }

    fn aggregate(
        &self,
        name: &str,
        plan: &AggregationPlan,
        run: &ResolvedRun,
        years: &[i32],
    ) -> Result<ResultTable> {
        let (sql, values) = aggregation_sql(plan, run, years);
        tracing::debug!(query = name, sql = %sql, "aggregating");

        let dimensions = plan.selected_dimensions();
        let index_len = plan.index_dimensions.len();
        let has_pivot = plan.pivot.is_some();

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare aggregation for {name}"))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                let mut key = Vec::with_capacity(index_len + 1);
                key.push(row.get::<_, i64>(0)?);
                for position in 0..index_len {
                    key.push(row.get::<_, i64>(position + 1)?);
                }
                let pivot = if has_pivot {
                    Some(row.get::<_, i64>(index_len + 1)?)
                } else {
                    None
                };
                Ok(LongRow {
                    key,
                    pivot,
                    year: row.get(dimensions.len() + 1)?,
                    value: row.get(dimensions.len() + 2)?,
                })
            })
            .with_context(|| format!("failed to run aggregation for {name}"))?;
        let rows = collect_rows(rows)?;

        if rows.is_empty() {
            return Err(NtemError::DataIntegrity(format!(
                "query {name} returned no rows for years {years:?}"
            ))
            .into());
        }
        Ok(ResultTable::pivot(plan.index_names(), rows)?)
    }

    fn apply_labels(
        &self,
        plan: &AggregationPlan,
        output_type_id: i64,
        table: &mut ResultTable,
    ) -> Result<()> {
        table.relabel_level(0, &self.zone_labels(output_type_id, &table.level_ids(0))?);

        if plan.output_names {
            for (position, dimension) in plan.index_dimensions.iter().enumerate() {
                table.relabel_level(position + 1, &id_names(&self.conn, dimension.lookup_table())?);
            }
            if let Some(pivot) = plan.pivot {
                table.relabel_columns(&id_names(&self.conn, pivot.lookup_table())?);
            }
        }
        Ok(())
    }

    /// Source codes when every zone present has one, otherwise names.
    fn zone_labels(&self, zone_type_id: i64, ids: &BTreeSet<i64>) -> Result<BTreeMap<i64, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, source_code FROM zones WHERE zone_type_id = ?1")
            .context("failed to prepare zone label lookup")?;
        let rows = stmt.query_map(params![zone_type_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let zones: Vec<(i64, String, Option<String>)> = collect_rows(rows)?
            .into_iter()
            .filter(|(id, _, _)| ids.contains(id))
            .collect();

        let use_codes = zones.iter().all(|(_, _, code)| code.is_some());
        Ok(zones
            .into_iter()
            .map(|(id, name, code)| match code {
                Some(code) if use_codes => (id, code),
                _ => (id, name),
            })
            .collect())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn aggregation_sql(
    plan: &AggregationPlan,
    run: &ResolvedRun,
    years: &[i32],
) -> (String, Vec<Value>) {
    let dimensions = plan.selected_dimensions();
    let native_output = plan.output_zoning == NATIVE_ZONING;
    let divide = plan.divide_by_time_period && !run.normalised;
    let mut values = Vec::new();

    let zone = if native_output { "f.zone_id" } else { "g.to_zone_id" };
    let dimension_columns: String = dimensions
        .iter()
        .map(|dimension| format!(", f.{}", dimension.column()))
        .collect();
    let value = if divide { "f.value / tp.divide_by" } else { "f.value" };
    let mut sql = format!(
        "SELECT {zone} AS zone{dimension_columns}, f.year, SUM({value}) FROM {} f",
        plan.table.table_name()
    );

    if divide {
        sql.push_str(&format!(
            " JOIN {} tp ON tp.id = f.{}",
            Dimension::TimePeriod.lookup_table(),
            Dimension::TimePeriod.column()
        ));
    }
    if !native_output {
        sql.push_str(
            " JOIN geo_lookup g ON g.from_zone_id = f.zone_id \
             AND g.from_zone_type_id = f.zone_type_id AND g.to_zone_type_id = ?",
        );
        values.push(Value::Integer(run.output_type_id));
    }

    sql.push_str(&format!(
        " WHERE f.metadata_id = ? AND f.zone_type_id = ? AND f.year IN ({})",
        placeholders(years.len())
    ));
    values.push(Value::Integer(run.run_id));
    values.push(Value::Integer(run.native_type_id));
    values.extend(years.iter().map(|year| Value::Integer(i64::from(*year))));

    for (dimension, ids) in &plan.dimension_filters {
        sql.push_str(&format!(" AND f.{} IN ({})", dimension.column(), placeholders(ids.len())));
        values.extend(ids.iter().map(|id| Value::Integer(*id)));
    }

    if let (Some(filter), Some(filter_type_id)) = (&plan.zone_filter, run.filter_type_id) {
        if filter.zoning == NATIVE_ZONING {
            sql.push_str(&format!(
                " AND f.zone_id IN (SELECT id FROM zones WHERE zone_type_id = ? AND name IN ({}))",
                placeholders(filter.names.len())
            ));
        } else {
            sql.push_str(&format!(
                " AND f.zone_id IN (SELECT gl.from_zone_id FROM geo_lookup gl \
                 JOIN zones z ON z.id = gl.to_zone_id AND z.zone_type_id = gl.to_zone_type_id \
                 WHERE gl.to_zone_type_id = ? AND z.name IN ({}))",
                placeholders(filter.names.len())
            ));
        }
        values.push(Value::Integer(filter_type_id));
        values.extend(filter.names.iter().map(|name| Value::Text(name.clone())));
    }

    sql.push_str(" GROUP BY zone");
    for dimension in &dimensions {
        sql.push_str(&format!(", f.{}", dimension.column()));
    }
    sql.push_str(", f.year");

    (sql, values)
}
