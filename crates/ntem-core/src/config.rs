//! YAML configuration for the build and query sub-commands.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::query::{
    CarOwnershipParams, CommonParams, PlanningParams, Query, TripEndByCarAvailabilityParams,
    TripEndByDirectionParams, TripTypeSelection,
};
use crate::schema::{FactTable, ModelVersion, Scenario, ZoningSystem, NATIVE_ZONING};
use crate::NtemError;

fn default_true() -> bool {
    true
}

fn native_zoning() -> ZoningSystem {
    NATIVE_ZONING
}

fn all_fact_tables() -> Vec<FactTable> {
    FactTable::ALL.to_vec()
}

/// Explicit run switches passed at the command boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOptions {
    pub log_level: String,
    /// Report the whole error chain instead of the top-level message.
    pub verbose_errors: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose_errors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSources {
    pub scenario: Scenario,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Database file to create or extend.
    pub output_path: PathBuf,
    pub lookup_source: PathBuf,
    /// Identifier stored on zone types; defaults to the lookup file name.
    #[serde(default)]
    pub lookup_source_name: Option<String>,
    #[serde(default)]
    pub version: ModelVersion,
    pub sources: Vec<ScenarioSources>,
    /// Fact tables read from every source; all four unless narrowed.
    #[serde(default = "all_fact_tables")]
    pub tables: Vec<FactTable>,
    #[serde(default)]
    pub clean_database: bool,
    #[serde(default)]
    pub normalise_time_periods: bool,
}

impl BuildConfig {
    pub fn from_path(path: &Path) -> Result<Self, NtemError> {
        let content = read_config(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, NtemError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|err| NtemError::config(format!("invalid build config YAML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NtemError> {
        if self.sources.is_empty() {
            return Err(NtemError::config("build config MUST list at least one source"));
        }
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.scenario) {
                return Err(NtemError::config(format!(
                    "scenario {} is listed more than once",
                    source.scenario.as_str()
                )));
            }
            if source.paths.is_empty() {
                return Err(NtemError::config(format!(
                    "scenario {} MUST list at least one source path",
                    source.scenario.as_str()
                )));
            }
        }
        if self.tables.is_empty() {
            return Err(NtemError::config("build config tables MUST not be empty"));
        }
        if let Some(name) = &self.lookup_source_name {
            if name.trim().is_empty() {
                return Err(NtemError::config("lookup_source_name MUST not be empty"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn lookup_name(&self) -> String {
        self.lookup_source_name.clone().unwrap_or_else(|| {
            self.lookup_source
                .file_name()
                .map_or_else(|| self.lookup_source.display().to_string(), |name| {
                    name.to_string_lossy().into_owned()
                })
        })
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        resolve(&mut self.output_path, base);
        resolve(&mut self.lookup_source, base);
        for source in &mut self.sources {
            for path in &mut source.paths {
                resolve(path, base);
            }
        }
    }
}

/// Fields shared by every run section of a query config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCommon {
    pub years: Vec<i32>,
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub version: ModelVersion,
    #[serde(default = "native_zoning")]
    pub output_zoning: ZoningSystem,
    #[serde(default)]
    pub filter_zoning_system: Option<ZoningSystem>,
    #[serde(default)]
    pub filter_zone_names: Option<Vec<String>>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub output_names: bool,
}

impl RunCommon {
    fn params(&self, scenario: Scenario, config_label: Option<&str>) -> CommonParams {
        CommonParams {
            years: self.years.clone(),
            scenario,
            version: self.version,
            output_zoning: self.output_zoning,
            filter_zoning_system: self.filter_zoning_system,
            filter_zone_names: self.filter_zone_names.clone(),
            label: self.label.clone().or_else(|| config_label.map(str::to_string)),
            output_names: self.output_names,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRun {
    #[serde(flatten)]
    pub common: RunCommon,
    #[serde(default = "default_true")]
    pub residential: bool,
    #[serde(default = "default_true")]
    pub employment: bool,
    #[serde(default = "default_true")]
    pub household: bool,
    /// Keys no field claimed; rejected when the config is loaded.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarOwnershipRun {
    #[serde(flatten)]
    pub common: RunCommon,
    /// Keys no field claimed; rejected when the config is loaded.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEndByDirectionRun {
    #[serde(flatten)]
    pub common: RunCommon,
    #[serde(default)]
    pub trip_type: TripTypeSelection,
    #[serde(default)]
    pub purpose_filter: Option<Vec<i64>>,
    #[serde(default)]
    pub mode_filter: Option<Vec<i64>>,
    #[serde(default)]
    pub time_period_filter: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    pub aggregate_purpose: bool,
    #[serde(default = "default_true")]
    pub aggregate_mode: bool,
    /// Keys no field claimed; rejected when the config is loaded.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEndByCarAvailabilityRun {
    #[serde(flatten)]
    pub common: RunCommon,
    #[serde(default)]
    pub purpose_filter: Option<Vec<i64>>,
    #[serde(default)]
    pub mode_filter: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    pub aggregate_purpose: bool,
    #[serde(default = "default_true")]
    pub aggregate_mode: bool,
    #[serde(default)]
    pub aggregate_car_availability: bool,
    /// Keys no field claimed; rejected when the config is loaded.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    pub db_path: PathBuf,
    /// Directory receiving one CSV per query.
    pub output_path: PathBuf,
    /// Default label for runs that do not set their own.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub planning_runs: Vec<PlanningRun>,
    #[serde(default)]
    pub car_ownership_runs: Vec<CarOwnershipRun>,
    #[serde(default)]
    pub trip_end_by_direction_runs: Vec<TripEndByDirectionRun>,
    #[serde(default)]
    pub trip_end_by_car_availability_runs: Vec<TripEndByCarAvailabilityRun>,
}

impl QueryConfig {
    pub fn from_path(path: &Path) -> Result<Self, NtemError> {
        let content = read_config(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            resolve(&mut config.db_path, base);
            resolve(&mut config.output_path, base);
        }
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, NtemError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|err| NtemError::config(format!("invalid query config YAML: {err}")))?;
        config.reject_unknown_keys()?;
        let queries = config.queries()?;
        if queries.is_empty() {
            return Err(NtemError::config("query config MUST define at least one run"));
        }
        let mut names = BTreeSet::new();
        for query in &queries {
            query.validate()?;
            if !names.insert(query.name()) {
                return Err(NtemError::config(format!(
                    "two runs produce the same output name {}; give one a label",
                    query.name()
                )));
            }
        }
        Ok(config)
    }

    fn reject_unknown_keys(&self) -> Result<(), NtemError> {
        let sections = [
            ("planning_runs", unknown_keys(&self.planning_runs, |run| &run.unknown)),
            ("car_ownership_runs", unknown_keys(&self.car_ownership_runs, |run| &run.unknown)),
            (
                "trip_end_by_direction_runs",
                unknown_keys(&self.trip_end_by_direction_runs, |run| &run.unknown),
            ),
            (
                "trip_end_by_car_availability_runs",
                unknown_keys(&self.trip_end_by_car_availability_runs, |run| &run.unknown),
            ),
        ];
        for (section, found) in sections {
            if let Some((index, keys)) = found {
                return Err(NtemError::config(format!(
                    "{section}[{index}] has unknown field(s) {}",
                    keys.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// One query per run and scenario, in config order.
    pub fn queries(&self) -> Result<Vec<Query>, NtemError> {
        let label = self.label.as_deref();
        let mut queries = Vec::new();

        for run in &self.planning_runs {
            for scenario in scenarios(&run.common)? {
                queries.push(Query::Planning(PlanningParams {
                    common: run.common.params(scenario, label),
                    residential: run.residential,
                    employment: run.employment,
                    household: run.household,
                }));
            }
        }
        for run in &self.car_ownership_runs {
            for scenario in scenarios(&run.common)? {
                queries.push(Query::CarOwnership(CarOwnershipParams {
                    common: run.common.params(scenario, label),
                }));
            }
        }
        for run in &self.trip_end_by_direction_runs {
            for scenario in scenarios(&run.common)? {
                queries.push(Query::TripEndByDirection(TripEndByDirectionParams {
                    common: run.common.params(scenario, label),
                    trip_type: run.trip_type,
                    purpose_filter: run.purpose_filter.clone(),
                    mode_filter: run.mode_filter.clone(),
                    time_period_filter: run.time_period_filter.clone(),
                    aggregate_purpose: run.aggregate_purpose,
                    aggregate_mode: run.aggregate_mode,
                }));
            }
        }
        for run in &self.trip_end_by_car_availability_runs {
            for scenario in scenarios(&run.common)? {
                queries.push(Query::TripEndByCarAvailability(TripEndByCarAvailabilityParams {
                    common: run.common.params(scenario, label),
                    purpose_filter: run.purpose_filter.clone(),
                    mode_filter: run.mode_filter.clone(),
                    aggregate_purpose: run.aggregate_purpose,
                    aggregate_mode: run.aggregate_mode,
                    aggregate_car_availability: run.aggregate_car_availability,
                }));
            }
        }

        Ok(queries)
    }
}

fn unknown_keys<R>(
    runs: &[R],
    unknown: impl Fn(&R) -> &BTreeMap<String, serde_yaml::Value>,
) -> Option<(usize, Vec<String>)> {
    runs.iter().enumerate().find_map(|(index, run)| {
        let keys = unknown(run);
        (!keys.is_empty()).then(|| (index, keys.keys().cloned().collect()))
    })
}

fn scenarios(run: &RunCommon) -> Result<Vec<Scenario>, NtemError> {
    if run.scenarios.is_empty() {
        return Err(NtemError::config("every run MUST list at least one scenario"));
    }
    Ok(run.scenarios.clone())
}

fn read_config(path: &Path) -> Result<String, NtemError> {
    fs::read_to_string(path)
        .map_err(|err| NtemError::Io(format!("failed reading config {}: {err}", path.display())))
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
