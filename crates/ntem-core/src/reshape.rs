//! Wide per-year source tables to long fact rows.

use std::collections::BTreeMap;

use crate::schema::{FactTable, INVALID_ZONE_ID};
use crate::source::SourceTable;
use crate::years::YearGrid;
use crate::zones::ZoneIdMap;
use crate::NtemError;

/// One long-format fact ready to append; `dims` follow [`FactTable::dimensions`].
#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    pub zone_id: i64,
    pub dims: Vec<i64>,
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeltedFacts {
    pub table: FactTable,
    pub rows: Vec<FactRow>,
    pub wide_rows: usize,
    pub year_columns: Vec<i32>,
    /// Wide rows skipped because they carry the invalid-zone marker.
    pub dropped_rows: usize,
}

impl MeltedFacts {
    /// Long rows the reshape must produce: every kept wide row times every year column.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        (self.wide_rows - self.dropped_rows) * self.year_columns.len()
    }
}

/// Renames source columns per the table's rename map and checks them.
pub fn renamed_columns(source: &SourceTable, fact: FactTable) -> Result<Vec<String>, NtemError> {
    let renames: BTreeMap<&str, &str> = fact.rename_map().iter().copied().collect();
    let missing: Vec<&str> = renames
        .keys()
        .copied()
        .filter(|column| source.column_index(column).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(NtemError::config(format!(
            "rename map for {} references columns absent from source table {}: {}",
            fact.table_name(),
            source.name,
            missing.join(", ")
        )));
    }

    Ok(source
        .columns
        .iter()
        .map(|column| {
            renames
                .get(column.as_str())
                .map_or_else(|| column.clone(), |renamed| (*renamed).to_string())
        })
        .collect())
}

/// Reshapes one wide source table into long fact rows with reconciled zone ids.
///
/// Columns whose header parses as a year are melted; every other non-key column
/// is ignored. No aggregation or deduplication happens here.
pub fn melt_fact_table(
    source: &SourceTable,
    fact: FactTable,
    grid: &YearGrid,
    zones: &ZoneIdMap,
) -> Result<MeltedFacts, NtemError> {
    let columns = renamed_columns(source, fact)?;
    let position_of = |name: &str| columns.iter().position(|column| column == name);

    let key_columns = fact.key_columns();
    let mut key_positions = Vec::with_capacity(key_columns.len());
    let mut missing = Vec::new();
    for column in &key_columns {
        match position_of(column) {
            Some(position) => key_positions.push(position),
            None => missing.push(*column),
        }
    }
    if !missing.is_empty() {
        return Err(NtemError::source_format(format!(
            "source table {} is missing key columns: {}",
            source.name,
            missing.join(", ")
        )));
    }

    let mut year_columns = Vec::new();
    for (position, column) in columns.iter().enumerate() {
        if key_positions.contains(&position) {
            continue;
        }
        let Ok(year) = column.trim().parse::<i32>() else {
            tracing::debug!(table = %source.name, column = %column, "ignoring non-year column");
            continue;
        };
        if !grid.is_native(year) {
            return Err(NtemError::source_format(format!(
                "source table {} has year column {year} outside the native grid",
                source.name
            )));
        }
        year_columns.push((position, year));
    }
    if year_columns.is_empty() {
        return Err(NtemError::source_format(format!(
            "source table {} has no year columns",
            source.name
        )));
    }

    let mut rows = Vec::with_capacity(source.rows.len() * year_columns.len());
    let mut dropped_rows = 0;
    for (row_number, row) in source.rows.iter().enumerate() {
        let mut keys = Vec::with_capacity(key_positions.len());
        for (column, position) in key_columns.iter().zip(&key_positions) {
            let id = row[*position].as_i64().ok_or_else(|| {
                NtemError::source_format(format!(
                    "source table {} row {row_number}: column {column} \
                     MUST be an integer (got {:?})",
                    source.name, row[*position]
                ))
            })?;
            keys.push(id);
        }

        let raw_zone = keys[0];
        if raw_zone == INVALID_ZONE_ID {
            dropped_rows += 1;
            continue;
        }
        let zone_id = zones.translate(raw_zone).ok_or_else(|| {
            NtemError::integrity(format!(
                "source table {} row {row_number}: zone {raw_zone} is not in the zone lookup",
                source.name
            ))
        })?;

        let dims = keys[1..].to_vec();
        for (dimension, id) in fact.dimensions().iter().zip(&dims) {
            if dimension.name_of(*id).is_none() {
                return Err(NtemError::integrity(format!(
                    "source table {} row {row_number}: unknown {} id {id}",
                    source.name,
                    dimension.column()
                )));
            }
        }

        for (position, year) in &year_columns {
            let value = row[*position].as_f64().ok_or_else(|| {
                NtemError::source_format(format!(
                    "source table {} row {row_number}: year {year} \
                     value MUST be numeric (got {:?})",
                    source.name, row[*position]
                ))
            })?;
            rows.push(FactRow {
                zone_id,
                dims: dims.clone(),
                year: *year,
                value,
            });
        }
    }

    tracing::debug!(
        table = %source.name,
        wide = source.rows.len(),
        long = rows.len(),
        dropped = dropped_rows,
        "melted source table"
    );

    Ok(MeltedFacts {
        table: fact,
        rows,
        wide_rows: source.rows.len(),
        year_columns: year_columns.into_iter().map(|(_, year)| year).collect(),
        dropped_rows,
    })
}
