//! Query parameter variants and the aggregation plans they reduce to.
//!
//! Each [`Query`] variant validates itself without touching the store and
//! produces an [`AggregationPlan`]: which fact table to read, how to filter it,
//! which dimensions stay in the row index and which one becomes the columns.

use serde::{Deserialize, Serialize};

use crate::schema::{
    Dimension, FactTable, ModelVersion, Scenario, ZoningSystem, NATIVE_ZONING,
    PLANNING_EMPLOYMENT, PLANNING_HOUSEHOLD, PLANNING_RESIDENTIAL,
};
use crate::NtemError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripTypeSelection {
    /// Origin and destination trip ends.
    #[default]
    Od,
    /// Production and attraction trip ends.
    Pa,
}

impl TripTypeSelection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Od => "od",
            Self::Pa => "pa",
        }
    }

    #[must_use]
    pub fn trip_type_ids(self) -> &'static [i64] {
        match self {
            Self::Od => &[1, 2],
            Self::Pa => &[3, 4],
        }
    }
}

/// Parameters every query type accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonParams {
    pub years: Vec<i32>,
    pub scenario: Scenario,
    pub version: ModelVersion,
    pub output_zoning: ZoningSystem,
    pub filter_zoning_system: Option<ZoningSystem>,
    pub filter_zone_names: Option<Vec<String>>,
    pub label: Option<String>,
    /// Replace dimension identifiers with their names in the output.
    pub output_names: bool,
}

impl CommonParams {
    #[must_use]
    pub fn new(years: Vec<i32>, scenario: Scenario) -> Self {
        Self {
            years,
            scenario,
            version: ModelVersion::default(),
            output_zoning: NATIVE_ZONING,
            filter_zoning_system: None,
            filter_zone_names: None,
            label: None,
            output_names: true,
        }
    }

    pub fn validate(&self) -> Result<(), NtemError> {
        if self.years.is_empty() {
            return Err(NtemError::config("query years MUST not be empty"));
        }
        match (&self.filter_zoning_system, &self.filter_zone_names) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(NtemError::config(
                    "both filter_zoning_system and filter_zone_names must be provided, \
                     or neither when no spatial filter is wanted",
                ));
            }
            (Some(_), Some(names)) if names.is_empty() => {
                return Err(NtemError::config("filter_zone_names MUST not be empty"));
            }
            _ => {}
        }
        if let Some(label) = &self.label {
            if label.trim().is_empty() || label.contains(['/', '\\']) {
                return Err(NtemError::config(format!(
                    "query label {label:?} MUST be non-empty and contain no path separators"
                )));
            }
        }
        Ok(())
    }

    fn zone_filter(&self) -> Option<ZoneFilter> {
        match (&self.filter_zoning_system, &self.filter_zone_names) {
            (Some(zoning), Some(names)) => Some(ZoneFilter {
                zoning: *zoning,
                names: names.clone(),
            }),
            _ => None,
        }
    }

    fn name(&self, prefix: &str) -> String {
        let mut parts = vec![prefix.to_string()];
        if let Some(label) = &self.label {
            parts.push(label.clone());
        }
        parts.push(self.scenario.as_str().to_string());
        parts.push(self.version.as_str().to_string());
        parts.join("_")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningParams {
    pub common: CommonParams,
    pub residential: bool,
    pub employment: bool,
    pub household: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarOwnershipParams {
    pub common: CommonParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripEndByDirectionParams {
    pub common: CommonParams,
    pub trip_type: TripTypeSelection,
    pub purpose_filter: Option<Vec<i64>>,
    pub mode_filter: Option<Vec<i64>>,
    pub time_period_filter: Option<Vec<i64>>,
    pub aggregate_purpose: bool,
    pub aggregate_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripEndByCarAvailabilityParams {
    pub common: CommonParams,
    pub purpose_filter: Option<Vec<i64>>,
    pub mode_filter: Option<Vec<i64>>,
    pub aggregate_purpose: bool,
    pub aggregate_mode: bool,
    pub aggregate_car_availability: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    Planning(PlanningParams),
    CarOwnership(CarOwnershipParams),
    TripEndByDirection(TripEndByDirectionParams),
    TripEndByCarAvailability(TripEndByCarAvailabilityParams),
}

/// Restricts input rows to fine zones inside the named zones of one zoning system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneFilter {
    pub zoning: ZoningSystem,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationPlan {
    pub table: FactTable,
    pub scenario: Scenario,
    pub version: ModelVersion,
    pub output_zoning: ZoningSystem,
    pub zone_filter: Option<ZoneFilter>,
    pub dimension_filters: Vec<(Dimension, Vec<i64>)>,
    /// Dimensions kept in the row index, after the zone.
    pub index_dimensions: Vec<Dimension>,
    /// Dimension spread into columns; `None` yields a single value column.
    pub pivot: Option<Dimension>,
    /// Divide each value by its time period's `divide_by` before summing.
    pub divide_by_time_period: bool,
    pub output_names: bool,
}

impl AggregationPlan {
    /// Names of the non-year index levels, zone first.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        let mut names = vec![self.output_zoning.as_str().to_string()];
        names.extend(
            self.index_dimensions
                .iter()
                .map(|dimension| dimension.column().to_string()),
        );
        names
    }

    /// Every dimension column the query selects, index dimensions first.
    #[must_use]
    pub fn selected_dimensions(&self) -> Vec<Dimension> {
        let mut dimensions = self.index_dimensions.clone();
        dimensions.extend(self.pivot);
        dimensions
    }
}

impl Query {
    #[must_use]
    pub fn common(&self) -> &CommonParams {
        match self {
            Self::Planning(params) => &params.common,
            Self::CarOwnership(params) => &params.common,
            Self::TripEndByDirection(params) => &params.common,
            Self::TripEndByCarAvailability(params) => &params.common,
        }
    }

    #[must_use]
    pub fn table(&self) -> FactTable {
        match self {
            Self::Planning(_) => FactTable::Planning,
            Self::CarOwnership(_) => FactTable::CarOwnership,
            Self::TripEndByDirection(_) => FactTable::TripEndByDirection,
            Self::TripEndByCarAvailability(_) => FactTable::TripEndByCarAvailability,
        }
    }

    /// Deterministic output name, also used as the CSV file stem.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Planning(params) => params.common.name("Planning"),
            Self::CarOwnership(params) => params.common.name("Car_Ownership"),
            Self::TripEndByDirection(params) => params
                .common
                .name(&format!("Trip_Ends_By_Direction_{}", params.trip_type.as_str())),
            Self::TripEndByCarAvailability(params) => {
                params.common.name("Trip_Ends_By_Car_Availability")
            }
        }
    }

    pub fn validate(&self) -> Result<(), NtemError> {
        self.common().validate()?;
        match self {
            Self::Planning(params) => {
                if !(params.residential || params.employment || params.household) {
                    return Err(NtemError::config(
                        "planning query MUST keep at least one of \
                         residential, employment, household",
                    ));
                }
            }
            Self::CarOwnership(_) => {}
            Self::TripEndByDirection(params) => {
                check_ids(Dimension::Purpose, params.purpose_filter.as_deref())?;
                check_ids(Dimension::Mode, params.mode_filter.as_deref())?;
                check_ids(Dimension::TimePeriod, params.time_period_filter.as_deref())?;
            }
            Self::TripEndByCarAvailability(params) => {
                check_ids(Dimension::Purpose, params.purpose_filter.as_deref())?;
                check_ids(Dimension::Mode, params.mode_filter.as_deref())?;
            }
        }
        Ok(())
    }

    /// Validates and reduces the query to an aggregation plan.
    pub fn plan(&self) -> Result<AggregationPlan, NtemError> {
        self.validate()?;
        let common = self.common();
        let mut plan = AggregationPlan {
            table: self.table(),
            scenario: common.scenario,
            version: common.version,
            output_zoning: common.output_zoning,
            zone_filter: common.zone_filter(),
            dimension_filters: Vec::new(),
            index_dimensions: Vec::new(),
            pivot: None,
            divide_by_time_period: false,
            output_names: common.output_names,
        };

        match self {
            Self::Planning(params) => {
                let mut kept = Vec::new();
                if params.residential {
                    kept.extend_from_slice(PLANNING_RESIDENTIAL);
                }
                if params.employment {
                    kept.extend_from_slice(PLANNING_EMPLOYMENT);
                }
                if params.household {
                    kept.extend_from_slice(PLANNING_HOUSEHOLD);
                }
                if kept.len() < Dimension::PlanningData.reference_values().len() {
                    kept.sort_unstable();
                    plan.dimension_filters.push((Dimension::PlanningData, kept));
                }
                plan.pivot = Some(Dimension::PlanningData);
            }
            Self::CarOwnership(_) => {
                plan.pivot = Some(Dimension::CarOwnership);
            }
            Self::TripEndByDirection(params) => {
                plan.dimension_filters
                    .push((Dimension::TripType, params.trip_type.trip_type_ids().to_vec()));
                push_filter(&mut plan, Dimension::Purpose, params.purpose_filter.as_ref());
                push_filter(&mut plan, Dimension::Mode, params.mode_filter.as_ref());
                push_filter(&mut plan, Dimension::TimePeriod, params.time_period_filter.as_ref());
                plan.index_dimensions.push(Dimension::TripType);
                if !params.aggregate_purpose {
                    plan.index_dimensions.push(Dimension::Purpose);
                }
                if !params.aggregate_mode {
                    plan.index_dimensions.push(Dimension::Mode);
                }
                plan.pivot = Some(Dimension::TimePeriod);
                plan.divide_by_time_period = true;
            }
            Self::TripEndByCarAvailability(params) => {
                push_filter(&mut plan, Dimension::Purpose, params.purpose_filter.as_ref());
                push_filter(&mut plan, Dimension::Mode, params.mode_filter.as_ref());
                if !params.aggregate_purpose {
                    plan.index_dimensions.push(Dimension::Purpose);
                }
                if !params.aggregate_mode {
                    plan.index_dimensions.push(Dimension::Mode);
                }
                if !params.aggregate_car_availability {
                    plan.pivot = Some(Dimension::CarAvailability);
                }
            }
        }

        Ok(plan)
    }
}

fn push_filter(plan: &mut AggregationPlan, dimension: Dimension, ids: Option<&Vec<i64>>) {
    if let Some(ids) = ids {
        let mut ids = ids.clone();
        ids.sort_unstable();
        ids.dedup();
        plan.dimension_filters.push((dimension, ids));
    }
}

fn check_ids(dimension: Dimension, ids: Option<&[i64]>) -> Result<(), NtemError> {
    let Some(ids) = ids else {
        return Ok(());
    };
    if ids.is_empty() {
        return Err(NtemError::config(format!(
            "{} filter MUST list at least one id",
            dimension.column()
        )));
    }
    let unknown: Vec<String> = ids
        .iter()
        .filter(|id| dimension.name_of(**id).is_none())
        .map(ToString::to_string)
        .collect();
    if !unknown.is_empty() {
        return Err(NtemError::config(format!(
            "unknown {} ids in filter: {}",
            dimension.column(),
            unknown.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must<T>(result: Result<T, NtemError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn planning(common: CommonParams) -> Query {
        Query::Planning(PlanningParams {
            common,
            residential: true,
            employment: true,
            household: true,
        })
    }

    fn direction(common: CommonParams) -> TripEndByDirectionParams {
        TripEndByDirectionParams {
            common,
            trip_type: TripTypeSelection::Od,
            purpose_filter: None,
            mode_filter: None,
            time_period_filter: None,
            aggregate_purpose: true,
            aggregate_mode: true,
        }
    }

    #[test]
    fn filter_system_without_names_is_rejected() {
        let mut common = CommonParams::new(vec![2018], Scenario::Core);
        common.filter_zoning_system = Some(ZoningSystem::Authority);
        match planning(common).plan() {
            Err(NtemError::Configuration(message)) => {
                assert!(message.contains("filter_zoning_system"), "{message}");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn filter_names_without_system_is_rejected() {
        let mut common = CommonParams::new(vec![2018], Scenario::Core);
        common.filter_zone_names = Some(vec!["Newcastle upon Tyne".to_string()]);
        assert!(matches!(planning(common).validate(), Err(NtemError::Configuration(_))));
    }

    #[test]
    fn names_follow_label_scenario_version() {
        let mut common = CommonParams::new(vec![2018], Scenario::High);
        assert_eq!(planning(common.clone()).name(), "Planning_High_8.0");
        common.label = Some("tyne".to_string());
        assert_eq!(planning(common.clone()).name(), "Planning_tyne_High_8.0");

        let mut params = direction(common);
        params.trip_type = TripTypeSelection::Pa;
        assert_eq!(
            Query::TripEndByDirection(params).name(),
            "Trip_Ends_By_Direction_pa_tyne_High_8.0"
        );
    }

    #[test]
    fn planning_flags_filter_data_types() {
        let query = Query::Planning(PlanningParams {
            common: CommonParams::new(vec![2016], Scenario::Core),
            residential: false,
            employment: false,
            household: true,
        });
        let plan = must(query.plan());
        assert_eq!(plan.dimension_filters, vec![(Dimension::PlanningData, vec![4])]);
        assert_eq!(plan.pivot, Some(Dimension::PlanningData));

        let nothing = Query::Planning(PlanningParams {
            common: CommonParams::new(vec![2016], Scenario::Core),
            residential: false,
            employment: false,
            household: false,
        });
        assert!(nothing.plan().is_err());
    }

    #[test]
    fn direction_plan_keeps_trip_type_and_divides() {
        let mut params = direction(CommonParams::new(vec![2016], Scenario::Core));
        params.aggregate_mode = false;
        params.purpose_filter = Some(vec![3, 1, 1]);
        let plan = must(Query::TripEndByDirection(params).plan());

        assert_eq!(plan.index_dimensions, vec![Dimension::TripType, Dimension::Mode]);
        assert_eq!(plan.pivot, Some(Dimension::TimePeriod));
        assert!(plan.divide_by_time_period);
        assert!(plan
            .dimension_filters
            .contains(&(Dimension::TripType, vec![1, 2])));
        assert!(plan.dimension_filters.contains(&(Dimension::Purpose, vec![1, 3])));
        assert_eq!(plan.index_names(), vec!["zone", "trip_type", "mode"]);
    }

    #[test]
    fn unknown_filter_ids_are_rejected() {
        let mut params = direction(CommonParams::new(vec![2016], Scenario::Core));
        params.mode_filter = Some(vec![42]);
        assert!(matches!(
            Query::TripEndByDirection(params).validate(),
            Err(NtemError::Configuration(_))
        ));
    }

    #[test]
    fn car_availability_can_collapse_to_value_column() {
        let plan = must(
            Query::TripEndByCarAvailability(TripEndByCarAvailabilityParams {
                common: CommonParams::new(vec![2016], Scenario::Core),
                purpose_filter: None,
                mode_filter: None,
                aggregate_purpose: false,
                aggregate_mode: true,
                aggregate_car_availability: true,
            })
            .plan(),
        );
        assert_eq!(plan.pivot, None);
        assert_eq!(plan.selected_dimensions(), vec![Dimension::Purpose]);
        assert!(!plan.divide_by_time_period);
    }
}
