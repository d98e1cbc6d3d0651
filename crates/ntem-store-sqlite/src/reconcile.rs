//! Zone reconciliation against the store: insert, flush, re-select, join.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ntem_core::schema::{hierarchy_source, LOOKUP_HIERARCHIES};
use ntem_core::zones::{build_crosswalk, join_assigned_ids, read_hierarchy};
use ntem_core::{
    ModelVersion, NtemError, RawZone, SourceReader, StoredZone, ZoneIdMap, ZoningSystem,
    NATIVE_ZONING,
};
use rusqlite::{params, Connection, Transaction};

use crate::{collect_rows, SqliteNtemStore};

/// Outcome of reconciling one lookup source.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ZoneReconciliation {
    pub zone_type_ids: BTreeMap<ZoningSystem, i64>,
    pub zone_counts: BTreeMap<ZoningSystem, usize>,
    pub crosswalk_rows: usize,
    /// Zone types for this source and version already existed and were reused.
    pub reused: bool,
    #[serde(skip)]
    pub fine_zones: ZoneIdMap,
}

impl ZoneReconciliation {
    #[must_use]
    pub fn native_zone_type_id(&self) -> Option<i64> {
        self.zone_type_ids.get(&NATIVE_ZONING).copied()
    }
}

impl SqliteNtemStore {
    /// Builds the zone dimension and crosswalk for `source_name`, or re-joins an existing one.
    pub fn reconcile_zones(
        &mut self,
        lookup: &dyn SourceReader,
        source_name: &str,
        version: ModelVersion,
    ) -> Result<ZoneReconciliation> {
        let mut raw: BTreeMap<ZoningSystem, Vec<RawZone>> = BTreeMap::new();
        for hierarchy in &LOOKUP_HIERARCHIES {
            let zones = read_hierarchy(lookup, hierarchy).with_context(|| {
                format!(
                    "failed to read {} hierarchy from {}",
                    hierarchy.zoning.as_str(),
                    lookup.describe()
                )
            })?;
            raw.insert(hierarchy.zoning, zones);
        }

        let existing = existing_zone_types(&self.conn, source_name, version)?;
        if !existing.is_empty() {
            return self.rejoin_existing(&raw, existing, source_name, version);
        }

        let tx = self
            .conn
            .transaction()
            .context("failed to start zone reconciliation transaction")?;

        let mut zone_type_ids = BTreeMap::new();
        let mut zone_counts = BTreeMap::new();
        let mut maps: BTreeMap<ZoningSystem, ZoneIdMap> = BTreeMap::new();
        for (zoning, zones) in &raw {
            tx.execute(
                "INSERT INTO zone_types(name, source, version) VALUES (?1, ?2, ?3)",
                params![zoning.as_str(), source_name, version.as_str()],
            )
            .with_context(|| format!("failed to insert {} zone type", zoning.as_str()))?;
            let zone_type_id = tx.last_insert_rowid();

            insert_zones(&tx, zone_type_id, zones)
                .with_context(|| format!("failed to insert {} zones", zoning.as_str()))?;
            let stored = stored_zones(&tx, zone_type_id)?;
            let map = join_assigned_ids(*zoning, zones, &stored)?;

            tracing::debug!(
                zoning = zoning.as_str(),
                zone_type_id,
                zones = map.len(),
                "reconciled zones"
            );
            zone_type_ids.insert(*zoning, zone_type_id);
            zone_counts.insert(*zoning, map.len());
            maps.insert(*zoning, map);
        }

        let fine_zones = maps.remove(&NATIVE_ZONING).unwrap_or_default();
        let fine_raw = raw.get(&NATIVE_ZONING).map(Vec::as_slice).unwrap_or_default();
        let crosswalk = build_crosswalk(fine_raw, &fine_zones, &maps)?;
        let native_type_id = type_id(&zone_type_ids, NATIVE_ZONING)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO geo_lookup(
                         from_zone_id, from_zone_type_id, to_zone_id, to_zone_type_id
                     ) VALUES (?1, ?2, ?3, ?4)",
                )
                .context("failed to prepare crosswalk insert")?;
            for row in &crosswalk {
                stmt.execute(params![
                    row.from_zone_id,
                    native_type_id,
                    row.to_zone_id,
                    type_id(&zone_type_ids, row.to_zoning)?
                ])
                .with_context(|| {
                    format!(
                        "failed to insert crosswalk row {} -> {} {}",
                        row.from_zone_id,
                        row.to_zoning.as_str(),
                        row.to_zone_id
                    )
                })?;
            }
        }

        tx.commit()
            .context("failed to commit zone reconciliation transaction")?;

        tracing::info!(
            source = source_name,
            zones = fine_zones.len(),
            crosswalk_rows = crosswalk.len(),
            "built zone lookup"
        );

        Ok(ZoneReconciliation {
            zone_type_ids,
            zone_counts,
            crosswalk_rows: crosswalk.len(),
            reused: false,
            fine_zones,
        })
    }

    fn rejoin_existing(
        &self,
        raw: &BTreeMap<ZoningSystem, Vec<RawZone>>,
        existing: BTreeMap<ZoningSystem, i64>,
        source_name: &str,
        version: ModelVersion,
    ) -> Result<ZoneReconciliation> {
        if existing.len() != ZoningSystem::ALL.len() {
            return Err(NtemError::DataIntegrity(format!(
                "zone types for {source_name} {} are incomplete ({} of {})",
                version.as_str(),
                existing.len(),
                ZoningSystem::ALL.len()
            ))
            .into());
        }

        let mut zone_counts = BTreeMap::new();
        let mut fine_zones = ZoneIdMap::default();
        for (zoning, zones) in raw {
            let zone_type_id = type_id(&existing, *zoning)?;
            let stored = stored_zones(&self.conn, zone_type_id)?;
            let map = join_assigned_ids(*zoning, zones, &stored)
                .with_context(|| {
                    format!("lookup {source_name} no longer matches the stored zones")
                })?;
            zone_counts.insert(*zoning, map.len());
            if *zoning == NATIVE_ZONING {
                fine_zones = map;
            }
        }

        let crosswalk_rows = self.count_rows("geo_lookup")?;
        tracing::info!(
            source = source_name,
            zones = fine_zones.len(),
            "reusing existing zone lookup"
        );

        Ok(ZoneReconciliation {
            zone_type_ids: existing,
            zone_counts,
            crosswalk_rows,
            reused: true,
            fine_zones,
        })
    }
}

fn existing_zone_types(
    conn: &Connection,
    source_name: &str,
    version: ModelVersion,
) -> Result<BTreeMap<ZoningSystem, i64>> {
    let mut stmt = conn
        .prepare("SELECT name, id FROM zone_types WHERE source = ?1 AND version = ?2")
        .context("failed to prepare zone type lookup")?;
    let rows = stmt.query_map(params![source_name, version.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut types = BTreeMap::new();
    for (name, id) in collect_rows(rows)? {
        let zoning = ZoningSystem::parse(&name).ok_or_else(|| {
            NtemError::DataIntegrity(format!("zone_types row {id} has unknown name {name}"))
        })?;
        types.insert(zoning, id);
    }
    Ok(types)
}

fn insert_zones(tx: &Transaction<'_>, zone_type_id: i64, zones: &[RawZone]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO zones(zone_type_id, name, source_code) VALUES (?1, ?2, ?3)",
    )?;
    for zone in zones {
        stmt.execute(params![zone_type_id, zone.name, zone.code])
            .with_context(|| {
                format!("failed to insert zone {} ({})", zone.raw_id, zone.natural_key())
            })?;
    }
    Ok(())
}

fn stored_zones(conn: &Connection, zone_type_id: i64) -> Result<Vec<StoredZone>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, name, source_code FROM zones WHERE zone_type_id = ?1 ORDER BY id",
        )
        .context("failed to prepare zone re-select")?;
    let rows = stmt.query_map(params![zone_type_id], |row| {
        Ok(StoredZone {
            id: row.get(0)?,
            name: row.get(1)?,
            source_code: row.get(2)?,
        })
    })?;
    collect_rows(rows)
}

fn type_id(types: &BTreeMap<ZoningSystem, i64>, zoning: ZoningSystem) -> Result<i64> {
    types.get(&zoning).copied().ok_or_else(|| {
        NtemError::DataIntegrity(format!(
            "no zone type recorded for {} ({} table)",
            zoning.as_str(),
            hierarchy_source(zoning).table
        ))
        .into()
    })
}
