//! Pure parts of zone reconciliation.
//!
//! The store assigns new zone identifiers; this module reads the raw lookup
//! records, checks their natural keys, joins store-assigned identifiers back
//! onto the raw records and derives the crosswalk rows.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::schema::{HierarchySource, ZoningSystem};
use crate::source::{SourceReader, SourceTable};
use crate::NtemError;

/// Identity of a zone within its hierarchy: the source code when one exists, otherwise the name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NaturalKey {
    Code(String),
    Name(String),
}

impl NaturalKey {
    #[must_use]
    pub fn of(name: &str, code: Option<&str>) -> Self {
        match code {
            Some(code) => Self::Code(code.to_string()),
            None => Self::Name(name.to_string()),
        }
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "code {code}"),
            Self::Name(name) => write!(f, "name {name}"),
        }
    }
}

/// One record of a lookup hierarchy as it appears in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawZone {
    pub raw_id: i64,
    pub name: String,
    pub code: Option<String>,
    /// Raw identifiers of the containing zones, fine zones only.
    pub parents: BTreeMap<ZoningSystem, i64>,
}

impl RawZone {
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::of(&self.name, self.code.as_deref())
    }
}

/// A zone row read back from the store after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredZone {
    pub id: i64,
    pub name: String,
    pub source_code: Option<String>,
}

impl StoredZone {
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::of(&self.name, self.source_code.as_deref())
    }
}

/// Translation from raw source identifiers to store-assigned zone identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ZoneIdMap {
    ids: BTreeMap<i64, i64>,
}

impl ZoneIdMap {
    #[must_use]
    pub fn translate(&self, raw_id: i64) -> Option<i64> {
        self.ids.get(&raw_id).copied()
    }

    pub fn insert(&mut self, raw_id: i64, zone_id: i64) -> Option<i64> {
        self.ids.insert(raw_id, zone_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.ids.iter().map(|(raw, id)| (*raw, *id))
    }
}

/// One crosswalk edge from a fine zone to the zone containing it in a coarser hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CrosswalkRow {
    pub from_zone_id: i64,
    pub to_zoning: ZoningSystem,
    pub to_zone_id: i64,
}

/// Reads one hierarchy's table from the lookup source.
pub fn read_hierarchy(
    source: &dyn SourceReader,
    hierarchy: &HierarchySource,
) -> Result<Vec<RawZone>, NtemError> {
    let table = source.read_table(hierarchy.table)?;
    parse_hierarchy(&table, hierarchy)
}

pub fn parse_hierarchy(
    table: &SourceTable,
    hierarchy: &HierarchySource,
) -> Result<Vec<RawZone>, NtemError> {
    let id_index = table.require_column(hierarchy.id_column)?;
    let name_index = table.require_column(hierarchy.name_column)?;
    let code_index = hierarchy
        .code_column
        .map(|column| table.require_column(column))
        .transpose()?;
    let parent_indexes = hierarchy
        .parent_columns
        .iter()
        .map(|(zoning, column)| table.require_column(column).map(|index| (*zoning, *column, index)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut zones = Vec::with_capacity(table.rows.len());
    for (position, row) in table.rows.iter().enumerate() {
        let raw_id = row[id_index].as_i64().ok_or_else(|| {
            NtemError::source_format(format!(
                "table {} row {position}: column {} MUST be an integer (got {:?})",
                table.name, hierarchy.id_column, row[id_index]
            ))
        })?;
        let name = row[name_index].as_text().ok_or_else(|| {
            NtemError::source_format(format!(
                "table {} row {position}: column {} MUST not be empty",
                table.name, hierarchy.name_column
            ))
        })?;
        let code = code_index.and_then(|index| row[index].as_text());

        let mut parents = BTreeMap::new();
        for (zoning, column, index) in &parent_indexes {
            let parent = row[*index].as_i64().ok_or_else(|| {
                NtemError::integrity(format!(
                    "zone {raw_id} ({name}) has no {} parent in column {column}",
                    zoning.as_str()
                ))
            })?;
            parents.insert(*zoning, parent);
        }

        zones.push(RawZone {
            raw_id,
            name,
            code,
            parents,
        });
    }

    check_unique_keys(hierarchy.zoning, &zones)?;
    Ok(zones)
}

/// Raw ids and natural keys must both be unique within a hierarchy.
pub fn check_unique_keys(zoning: ZoningSystem, zones: &[RawZone]) -> Result<(), NtemError> {
    let mut raw_ids = BTreeSet::new();
    let mut keys = BTreeMap::new();
    for zone in zones {
        if !raw_ids.insert(zone.raw_id) {
            return Err(NtemError::integrity(format!(
                "{} lookup repeats raw id {}",
                zoning.as_str(),
                zone.raw_id
            )));
        }
        if let Some(previous) = keys.insert(zone.natural_key(), zone.raw_id) {
            return Err(NtemError::integrity(format!(
                "{} lookup records {previous} and {} share natural key {}",
                zoning.as_str(),
                zone.raw_id,
                zone.natural_key()
            )));
        }
    }
    Ok(())
}

/// Joins store-assigned ids back onto raw records through the natural key.
///
/// The correspondence must be one-to-one; anything else is a data-integrity error.
pub fn join_assigned_ids(
    zoning: ZoningSystem,
    raw: &[RawZone],
    stored: &[StoredZone],
) -> Result<ZoneIdMap, NtemError> {
    if raw.len() != stored.len() {
        return Err(NtemError::integrity(format!(
            "{} zones: {} source records but {} stored rows",
            zoning.as_str(),
            raw.len(),
            stored.len()
        )));
    }

    let mut by_key: BTreeMap<NaturalKey, i64> = BTreeMap::new();
    for zone in stored {
        if by_key.insert(zone.natural_key(), zone.id).is_some() {
            return Err(NtemError::integrity(format!(
                "{} zones: stored rows share natural key {}",
                zoning.as_str(),
                zone.natural_key()
            )));
        }
    }

    let mut map = ZoneIdMap::default();
    for zone in raw {
        let key = zone.natural_key();
        let id = by_key.get(&key).copied().ok_or_else(|| {
            NtemError::integrity(format!(
                "{} zone {} ({key}) did not join back to a stored row",
                zoning.as_str(),
                zone.raw_id
            ))
        })?;
        map.insert(zone.raw_id, id);
    }
    Ok(map)
}

/// One row per fine zone and coarser hierarchy.
pub fn build_crosswalk(
    fine: &[RawZone],
    fine_map: &ZoneIdMap,
    coarse_maps: &BTreeMap<ZoningSystem, ZoneIdMap>,
) -> Result<Vec<CrosswalkRow>, NtemError> {
    let mut rows = Vec::with_capacity(fine.len() * coarse_maps.len());
    for zone in fine {
        let from_zone_id = fine_map.translate(zone.raw_id).ok_or_else(|| {
            NtemError::integrity(format!("fine zone {} has no reconciled id", zone.raw_id))
        })?;
        for (zoning, map) in coarse_maps {
            let parent = zone.parents.get(zoning).copied().ok_or_else(|| {
                NtemError::integrity(format!(
                    "fine zone {} has no {} parent",
                    zone.raw_id,
                    zoning.as_str()
                ))
            })?;
            let to_zone_id = map.translate(parent).ok_or_else(|| {
                NtemError::integrity(format!(
                    "fine zone {} references unknown {} {parent}",
                    zone.raw_id,
                    zoning.as_str()
                ))
            })?;
            rows.push(CrosswalkRow {
                from_zone_id,
                to_zoning: *zoning,
                to_zone_id,
            });
        }
    }
    Ok(rows)
}
