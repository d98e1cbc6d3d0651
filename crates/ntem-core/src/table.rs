//! Pivoted tabular query results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::NtemError;

/// Header used when a query has no pivot dimension.
pub const VALUE_COLUMN: &str = "value";
pub const YEAR_COLUMN: &str = "year";

/// One index or column label: a store identifier until names are looked up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Id(i64),
    Label(String),
}

impl Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Aggregated long-format row as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub key: Vec<i64>,
    pub pivot: Option<i64>,
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub key: Vec<KeyValue>,
    pub year: i32,
    pub values: Vec<Option<f64>>,
}

/// Row index = `index_names` + year (always the last level); one column per pivot value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    pub index_names: Vec<String>,
    pub columns: Vec<KeyValue>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Pivots long rows: distinct pivot values become columns, the rest the row index.
    pub fn pivot(index_names: Vec<String>, rows: Vec<LongRow>) -> Result<Self, NtemError> {
        let pivot_values: BTreeSet<Option<i64>> = rows.iter().map(|row| row.pivot).collect();
        if pivot_values.contains(&None) && pivot_values.len() > 1 {
            return Err(NtemError::integrity(
                "pivot input mixes rows with and without a pivot value",
            ));
        }

        let columns: Vec<KeyValue> = if pivot_values.contains(&None) {
            vec![KeyValue::Label(VALUE_COLUMN.to_string())]
        } else {
            pivot_values.iter().flatten().map(|id| KeyValue::Id(*id)).collect()
        };
        let positions: BTreeMap<Option<i64>, usize> = pivot_values
            .iter()
            .enumerate()
            .map(|(position, value)| (*value, position))
            .collect();

        let mut grouped: BTreeMap<(i32, Vec<i64>), Vec<Option<f64>>> = BTreeMap::new();
        for row in rows {
            if row.key.len() != index_names.len() {
                return Err(NtemError::integrity(format!(
                    "row key has {} levels but the index has {}",
                    row.key.len(),
                    index_names.len()
                )));
            }
            let position = positions.get(&row.pivot).copied().unwrap_or_default();
            let values = grouped
                .entry((row.year, row.key))
                .or_insert_with(|| vec![None; columns.len()]);
            if values[position].is_some() {
                return Err(NtemError::integrity(format!(
                    "duplicate pivot cell for year {} column {}",
                    row.year, columns[position]
                )));
            }
            values[position] = Some(row.value);
        }

        let rows = grouped
            .into_iter()
            .map(|((year, key), values)| ResultRow {
                key: key.into_iter().map(KeyValue::Id).collect(),
                year,
                values,
            })
            .collect();

        Ok(Self {
            index_names,
            columns,
            rows,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|candidate| candidate.to_string() == column)
    }

    /// Value at (index key rendered as text, year, column header), for inspection and tests.
    #[must_use]
    pub fn value(&self, key: &[&str], year: i32, column: &str) -> Option<f64> {
        let position = self.column_position(column)?;
        self.rows
            .iter()
            .find(|row| {
                row.year == year
                    && row.key.len() == key.len()
                    && row.key.iter().zip(key).all(|(lhs, rhs)| lhs.to_string() == *rhs)
            })
            .and_then(|row| row.values[position])
    }

    /// Replaces identifiers on one index level with labels; unknown ids are kept as-is.
    pub fn relabel_level(&mut self, level: usize, labels: &BTreeMap<i64, String>) {
        for row in &mut self.rows {
            if let Some(KeyValue::Id(id)) = row.key.get(level) {
                if let Some(label) = labels.get(id) {
                    row.key[level] = KeyValue::Label(label.clone());
                }
            }
        }
    }

    pub fn relabel_columns(&mut self, labels: &BTreeMap<i64, String>) {
        for column in &mut self.columns {
            if let KeyValue::Id(id) = column {
                if let Some(label) = labels.get(id) {
                    *column = KeyValue::Label(label.clone());
                }
            }
        }
    }

    /// Identifiers present on one index level.
    #[must_use]
    pub fn level_ids(&self, level: usize) -> BTreeSet<i64> {
        self.rows
            .iter()
            .filter_map(|row| match row.key.get(level) {
                Some(KeyValue::Id(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn write_csv_to<W: Write>(&self, writer: W) -> Result<(), NtemError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header: Vec<String> = self.index_names.clone();
        header.push(YEAR_COLUMN.to_string());
        header.extend(self.columns.iter().map(ToString::to_string));
        csv_writer.write_record(&header).map_err(csv_error)?;

        for row in &self.rows {
            let mut record: Vec<String> = row.key.iter().map(ToString::to_string).collect();
            record.push(row.year.to_string());
            record.extend(
                row.values
                    .iter()
                    .map(|value| value.map(|inner| inner.to_string()).unwrap_or_default()),
            );
            csv_writer.write_record(&record).map_err(csv_error)?;
        }

        csv_writer
            .flush()
            .map_err(|err| NtemError::Io(format!("failed flushing csv output: {err}")))
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), NtemError> {
        let file = std::fs::File::create(path).map_err(|err| {
            NtemError::Io(format!("failed creating {}: {err}", path.display()))
        })?;
        self.write_csv_to(file)
    }
}

fn csv_error(err: csv::Error) -> NtemError {
    NtemError::Io(format!("failed writing csv output: {err}"))
}
