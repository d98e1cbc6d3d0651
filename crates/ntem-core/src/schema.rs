//! Static description of the normalized store and of the source files it is built from.
//!
//! Table and column names here are the on-disk format of a built database and
//! must stay stable across releases.

use serde::{Deserialize, Serialize};

use crate::NtemError;

/// Raw zone identifier that source files use for "no zone". Rows carrying it are dropped.
pub const INVALID_ZONE_ID: i64 = 9999;

/// Zoning system that fact rows are stored in.
pub const NATIVE_ZONING: ZoningSystem = ZoningSystem::Zone;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ZoningSystem {
    Zone,
    Authority,
    County,
    Region,
}

impl ZoningSystem {
    pub const ALL: [Self; 4] = [Self::Zone, Self::Authority, Self::County, Self::Region];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zone => "zone",
            Self::Authority => "authority",
            Self::County => "county",
            Self::Region => "region",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "zone" => Some(Self::Zone),
            "authority" => Some(Self::Authority),
            "county" => Some(Self::County),
            "region" => Some(Self::Region),
            _ => None,
        }
    }

    /// Hierarchies every fine zone is mapped into through the crosswalk.
    #[must_use]
    pub fn coarser() -> [Self; 3] {
        [Self::Authority, Self::County, Self::Region]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Scenario {
    Core,
    High,
    Low,
    Regional,
    Behavioural,
    Technology,
}

impl Scenario {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::High => "High",
            Self::Low => "Low",
            Self::Regional => "Regional",
            Self::Behavioural => "Behavioural",
            Self::Technology => "Technology",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum ModelVersion {
    #[default]
    #[serde(rename = "8.0")]
    Eight,
}

impl ModelVersion {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eight => "8.0",
        }
    }

    pub fn parse(value: &str) -> Result<Self, NtemError> {
        match value {
            "8.0" | "8" => Ok(Self::Eight),
            other => Err(NtemError::config(format!(
                "unsupported model version {other}; supported versions: 8.0"
            ))),
        }
    }
}

// YAML writes `version: 8.0` as a float, so numbers are accepted as well as strings.
impl<'de> Deserialize<'de> for ModelVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VersionVisitor;

        impl serde::de::Visitor<'_> for VersionVisitor {
            type Value = ModelVersion;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a model version such as 8.0")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
                ModelVersion::parse(value).map_err(E::custom)
            }

            fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Self::Value, E> {
                self.visit_str(&format!("{value:.1}"))
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
                self.visit_str(&value.to_string())
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
                self.visit_str(&value.to_string())
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

/// A demand dimension stored as a foreign key into a static lookup table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    PlanningData,
    CarOwnership,
    CarAvailability,
    Purpose,
    Mode,
    TimePeriod,
    TripType,
}

impl Dimension {
    pub const ALL: [Self; 7] = [
        Self::PlanningData,
        Self::CarOwnership,
        Self::CarAvailability,
        Self::Purpose,
        Self::Mode,
        Self::TimePeriod,
        Self::TripType,
    ];

    /// Column name inside fact tables, also used as the output index / header label.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::PlanningData => "planning_data_type",
            Self::CarOwnership => "car_ownership_type",
            Self::CarAvailability => "car_availability",
            Self::Purpose => "purpose",
            Self::Mode => "mode",
            Self::TimePeriod => "time_period",
            Self::TripType => "trip_type",
        }
    }

    #[must_use]
    pub fn lookup_table(self) -> &'static str {
        match self {
            Self::PlanningData => "planning_data_types",
            Self::CarOwnership => "car_ownership_types",
            Self::CarAvailability => "car_availability_types",
            Self::Purpose => "purpose_types",
            Self::Mode => "mode_types",
            Self::TimePeriod => "time_period_types",
            Self::TripType => "trip_type",
        }
    }

    #[must_use]
    pub fn reference_values(self) -> &'static [(i64, &'static str)] {
        match self {
            Self::PlanningData => PLANNING_DATA_TYPES,
            Self::CarOwnership => CAR_OWNERSHIP_TYPES,
            Self::CarAvailability => CAR_AVAILABILITY_TYPES,
            Self::Purpose => PURPOSES,
            Self::Mode => MODES,
            Self::TimePeriod => TIME_PERIODS,
            Self::TripType => TRIP_TYPES,
        }
    }

    #[must_use]
    pub fn name_of(self, id: i64) -> Option<&'static str> {
        self.reference_values()
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, name)| *name)
    }
}

pub const PLANNING_DATA_TYPES: &[(i64, &str)] = &[
    (1, "Less than 16"),
    (2, "16 to 74"),
    (3, "75 +"),
    (4, "Households"),
    (5, "Jobs"),
    (6, "Workers"),
];

pub const PLANNING_RESIDENTIAL: &[i64] = &[1, 2, 3];
pub const PLANNING_HOUSEHOLD: &[i64] = &[4];
pub const PLANNING_EMPLOYMENT: &[i64] = &[5, 6];

pub const CAR_OWNERSHIP_TYPES: &[(i64, &str)] =
    &[(1, "No Car"), (2, "1 Car"), (3, "2 Cars"), (4, "3+ Cars")];

pub const CAR_AVAILABILITY_TYPES: &[(i64, &str)] =
    &[(1, "No Car Available"), (2, "Car Available")];

pub const PURPOSES: &[(i64, &str)] = &[
    (1, "HB Work"),
    (2, "HB Employers Business"),
    (3, "HB Education"),
    (4, "HB Shopping"),
    (5, "HB Personal Business"),
    (6, "HB Recreation / Social"),
    (7, "HB Visiting Friends and Relatives"),
    (8, "HB Holiday / Day Trip"),
    (11, "NHB Work"),
    (12, "NHB Employers Business"),
    (13, "NHB Education"),
    (14, "NHB Shopping"),
    (15, "NHB Personal Business"),
    (16, "NHB Recreation / Social"),
    (18, "NHB Holiday / Day Trip"),
];

pub const MODES: &[(i64, &str)] = &[
    (1, "Walk"),
    (2, "Cycle"),
    (3, "Car Driver"),
    (4, "Car Passenger"),
    (5, "Bus"),
    (6, "Rail"),
];

pub const TIME_PERIODS: &[(i64, &str)] = &[
    (1, "Weekday AM Peak"),
    (2, "Weekday Inter Peak"),
    (3, "Weekday PM Peak"),
    (4, "Weekday Off Peak"),
    (5, "Saturday"),
    (6, "Sunday"),
];

/// Hours covered by each time period; directional values are divided by these.
pub const TIME_PERIOD_DIVIDE_BY: &[(i64, f64)] =
    &[(1, 3.0), (2, 6.0), (3, 3.0), (4, 12.0), (5, 24.0), (6, 24.0)];

pub const TRIP_TYPES: &[(i64, &str)] = &[
    (1, "Origin"),
    (2, "Destination"),
    (3, "Production"),
    (4, "Attraction"),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactTable {
    Planning,
    CarOwnership,
    TripEndByDirection,
    TripEndByCarAvailability,
}

impl FactTable {
    pub const ALL: [Self; 4] = [
        Self::Planning,
        Self::CarOwnership,
        Self::TripEndByDirection,
        Self::TripEndByCarAvailability,
    ];

    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::CarOwnership => "car_ownership",
            Self::TripEndByDirection => "trip_end_data_by_direction",
            Self::TripEndByCarAvailability => "trip_end_data_by_car_availability",
        }
    }

    #[must_use]
    pub fn source_table(self) -> &'static str {
        match self {
            Self::Planning => "Planning",
            Self::CarOwnership => "CarOwnership",
            Self::TripEndByDirection => "TripEndDataByDirection",
            Self::TripEndByCarAvailability => "TripEndDataByCarAvailability",
        }
    }

    /// Dimension columns in the order they are stored.
    #[must_use]
    pub fn dimensions(self) -> &'static [Dimension] {
        match self {
            Self::Planning => &[Dimension::PlanningData],
            Self::CarOwnership => &[Dimension::CarOwnership],
            Self::TripEndByDirection => &[
                Dimension::Purpose,
                Dimension::Mode,
                Dimension::TimePeriod,
                Dimension::TripType,
            ],
            Self::TripEndByCarAvailability => &[
                Dimension::Purpose,
                Dimension::Mode,
                Dimension::CarAvailability,
            ],
        }
    }

    /// Source column -> normalized column. Every entry must exist in the source table.
    #[must_use]
    pub fn rename_map(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Planning => &[("ZoneID", "zone_id"), ("PlanningDataType", "planning_data_type")],
            Self::CarOwnership => {
                &[("ZoneID", "zone_id"), ("CarOwnershipType", "car_ownership_type")]
            }
            Self::TripEndByDirection => &[
                ("ZoneID", "zone_id"),
                ("Purpose", "purpose"),
                ("Mode", "mode"),
                ("TimePeriod", "time_period"),
                ("TripType", "trip_type"),
            ],
            Self::TripEndByCarAvailability => &[
                ("ZoneID", "zone_id"),
                ("Purpose", "purpose"),
                ("Mode", "mode"),
                ("CarAvailability", "car_availability"),
            ],
        }
    }

    /// Natural-key (non-year) columns after renaming; the zone column comes first.
    #[must_use]
    pub fn key_columns(self) -> Vec<&'static str> {
        let mut columns = vec![ZONE_ID_COLUMN];
        columns.extend(self.dimensions().iter().map(|dimension| dimension.column()));
        columns
    }
}

pub const ZONE_ID_COLUMN: &str = "zone_id";

/// Where one geographic hierarchy lives inside the lookup source.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HierarchySource {
    pub zoning: ZoningSystem,
    pub table: &'static str,
    pub id_column: &'static str,
    pub name_column: &'static str,
    pub code_column: Option<&'static str>,
    /// Raw foreign keys into coarser hierarchies (fine zones only).
    pub parent_columns: &'static [(ZoningSystem, &'static str)],
}

pub const LOOKUP_HIERARCHIES: [HierarchySource; 4] = [
    HierarchySource {
        zoning: ZoningSystem::Zone,
        table: "Zones",
        id_column: "Zone_ID",
        name_column: "Zone_Name",
        code_column: Some("Zone_Code"),
        parent_columns: &[
            (ZoningSystem::Authority, "Authority_ID"),
            (ZoningSystem::County, "County_ID"),
            (ZoningSystem::Region, "Region_ID"),
        ],
    },
    HierarchySource {
        zoning: ZoningSystem::Authority,
        table: "Authorities",
        id_column: "Authority_ID",
        name_column: "Authority_Name",
        code_column: Some("Authority_Code"),
        parent_columns: &[],
    },
    HierarchySource {
        zoning: ZoningSystem::County,
        table: "Counties",
        id_column: "County_ID",
        name_column: "County_Name",
        code_column: None,
        parent_columns: &[],
    },
    HierarchySource {
        zoning: ZoningSystem::Region,
        table: "Regions",
        id_column: "Region_ID",
        name_column: "Region_Name",
        code_column: None,
        parent_columns: &[],
    },
];

#[must_use]
pub fn hierarchy_source(zoning: ZoningSystem) -> &'static HierarchySource {
    match zoning {
        ZoningSystem::Zone => &LOOKUP_HIERARCHIES[0],
        ZoningSystem::Authority => &LOOKUP_HIERARCHIES[1],
        ZoningSystem::County => &LOOKUP_HIERARCHIES[2],
        ZoningSystem::Region => &LOOKUP_HIERARCHIES[3],
    }
}

#[must_use]
pub fn time_period_divide_by(id: i64) -> Option<f64> {
    TIME_PERIOD_DIVIDE_BY
        .iter()
        .find(|(candidate, _)| *candidate == id)
        .map(|(_, divide_by)| *divide_by)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_time_period_has_a_divisor() {
        for (id, _) in TIME_PERIODS {
            assert!(time_period_divide_by(*id).is_some(), "missing divisor for {id}");
        }
    }

    #[test]
    fn rename_maps_cover_every_key_column() {
        for table in FactTable::ALL {
            let renamed: Vec<&str> = table.rename_map().iter().map(|(_, to)| *to).collect();
            for column in table.key_columns() {
                assert!(renamed.contains(&column), "{column} not produced for {table:?}");
            }
        }
    }

    #[test]
    fn hierarchy_lookup_matches_zoning() {
        for zoning in ZoningSystem::ALL {
            assert_eq!(hierarchy_source(zoning).zoning, zoning);
        }
    }

    #[test]
    fn unknown_model_version_is_configuration_error() {
        assert!(matches!(
            ModelVersion::parse("7.2"),
            Err(NtemError::Configuration(_))
        ));
        assert_eq!(ModelVersion::parse("8.0"), Ok(ModelVersion::Eight));
    }

    #[test]
    fn model_version_reads_yaml_numbers_and_strings() {
        for text in ["8.0", "\"8.0\"", "8"] {
            match serde_yaml::from_str::<ModelVersion>(text) {
                Ok(version) => assert_eq!(version, ModelVersion::Eight),
                Err(err) => panic!("{text}: {err}"),
            }
        }
        assert!(serde_yaml::from_str::<ModelVersion>("7.2").is_err());
    }
}
