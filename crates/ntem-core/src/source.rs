//! Read access to exported source files.
//!
//! A source file is a set of named tables. [`SourceReader`] is the only thing
//! the loader needs from it; how the tables got exported is not its concern.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::NtemError;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SourceValue {
    /// One exported cell as read: empty is null, anything else keeps its raw text.
    ///
    /// Numbers are parsed on demand by [`Self::as_i64`] and [`Self::as_f64`], so codes
    /// such as `00123` or names such as `Nan` survive unchanged.
    #[must_use]
    pub fn from_cell(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Self::Null
        } else {
            Self::Text(raw.to_string())
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integral value; reals are accepted only when they carry no fraction.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Real(value) => integral(*value),
            Self::Text(text) => {
                let trimmed = text.trim();
                trimmed
                    .parse()
                    .ok()
                    .or_else(|| trimmed.parse().ok().and_then(integral))
            }
            Self::Null => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Text form used for names and codes; null stays absent.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
fn integral(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    if value.is_finite() && value.fract() == 0.0 && in_range {
        Some(value as i64)
    } else {
        None
    }
}

impl Display for SourceValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SourceValue>>,
}

impl SourceTable {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<SourceValue>>,
    ) -> Result<Self, NtemError> {
        let name = name.into();
        if let Some((position, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(NtemError::source_format(format!(
                "table {name} row {position} has {} values but {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|candidate| candidate == column)
    }

    /// Like [`Self::column_index`] but a missing column is a source-format error.
    pub fn require_column(&self, column: &str) -> Result<usize, NtemError> {
        self.column_index(column).ok_or_else(|| {
            NtemError::source_format(format!(
                "table {} is missing expected column {column}",
                self.name
            ))
        })
    }
}

/// Returns named tables of one source file with their original column names.
pub trait SourceReader {
    /// Human-readable identity of the source, used in errors and logs.
    fn describe(&self) -> String;

    fn read_table(&self, name: &str) -> Result<SourceTable, NtemError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    label: String,
    tables: BTreeMap<String, SourceTable>,
}

impl MemorySource {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: SourceTable) -> Self {
        self.insert(table);
        self
    }

    pub fn insert(&mut self, table: SourceTable) {
        self.tables.insert(table.name.clone(), table);
    }
}

impl SourceReader for MemorySource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn read_table(&self, name: &str) -> Result<SourceTable, NtemError> {
        self.tables.get(name).cloned().ok_or_else(|| {
            NtemError::source_format(format!("source {} has no table {name}", self.label))
        })
    }
}

/// A source exported as a directory holding one `<Table>.csv` per table.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

impl CsvDirectorySource {
    pub fn open(root: &Path) -> Result<Self, NtemError> {
        if !root.is_dir() {
            return Err(NtemError::Io(format!(
                "source directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl SourceReader for CsvDirectorySource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn read_table(&self, name: &str) -> Result<SourceTable, NtemError> {
        let path = self.root.join(format!("{name}.csv"));
        if !path.is_file() {
            return Err(NtemError::source_format(format!(
                "source {} has no table {name} (expected {})",
                self.root.display(),
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|err| NtemError::Io(format!("failed opening {}: {err}", path.display())))?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|err| {
                NtemError::source_format(format!("table {name} has an unreadable header: {err}"))
            })?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (position, record) in reader.records().enumerate() {
            let record = record.map_err(|err| {
                NtemError::source_format(format!("table {name} record {position}: {err}"))
            })?;
            rows.push(record.iter().map(SourceValue::from_cell).collect());
        }

        tracing::debug!(
            table = name,
            rows = rows.len(),
            path = %path.display(),
            "read source table"
        );
        SourceTable::new(name, columns, rows)
    }
}
