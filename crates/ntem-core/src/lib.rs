//! Shape-transformation and aggregation logic for NTEM trip-end data.
//!
//! This crate holds everything that does not need a database connection:
//! - [`schema`] declares the normalized entities and the source-to-store mapping.
//! - [`zones`] and [`reshape`] turn raw lookup / wide fact tables into store rows.
//! - [`query`] turns declarative query parameters into aggregation plans.
//! - [`interpolate`] fills non-native years from their bracketing native years.
//!
//! The SQLite store lives in `ntem-store-sqlite`; the `ntem` binary in `ntem-cli`.

#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod interpolate;
pub mod query;
pub mod reshape;
pub mod schema;
pub mod source;
pub mod table;
pub mod years;
pub mod zones;

pub use config::{
    BuildConfig, CarOwnershipRun, PlanningRun, QueryConfig, RunCommon, RunOptions, ScenarioSources,
    TripEndByCarAvailabilityRun, TripEndByDirectionRun,
};
pub use interpolate::{interpolate_value, interpolate_years, InterpolationPlan};
pub use query::{
    AggregationPlan, CarOwnershipParams, CommonParams, PlanningParams, Query,
    TripEndByCarAvailabilityParams, TripEndByDirectionParams, TripTypeSelection, ZoneFilter,
};
pub use reshape::{melt_fact_table, FactRow, MeltedFacts};
pub use schema::{
    Dimension, FactTable, ModelVersion, Scenario, ZoningSystem, INVALID_ZONE_ID,
    NATIVE_ZONING,
};
pub use source::{CsvDirectorySource, MemorySource, SourceReader, SourceTable, SourceValue};
pub use table::{KeyValue, LongRow, ResultRow, ResultTable};
pub use years::YearGrid;
pub use zones::{CrosswalkRow, NaturalKey, RawZone, StoredZone, ZoneIdMap};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum NtemError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    #[error("source format error: {0}")]
    SourceFormat(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("io error: {0}")]
    Io(String),
}

impl NtemError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub(crate) fn source_format(message: impl Into<String>) -> Self {
        Self::SourceFormat(message.into())
    }
}
