//! World state store: the single mutation point for structures,
//! resources and land claims.
//!
//! Every apply function takes the inbound event's sender, `created_at`
//! and event id so conflicts can be resolved without any assumption
//! about delivery order. Rejections come back as errors the engine
//! logs and drops; nothing here re-publishes.

use crate::error::{FrontierError, Result};
use crate::protocol::{LandClaimPayload, ResourceCollectionPayload, ResourceNodePayload, StructurePayload};
use crate::region::{RegionMap, region_for};
use crate::types::{LandClaim, Structure};
use std::collections::HashMap;
use tracing::{debug, info};

/// Placement metadata kept per structure for conflict resolution
#[derive(Debug, Clone)]
struct PlacementMeta {
    region_id: String,
    created_at: u64,
    event_id: String,
}

/// What an apply changed, for surfacing to the application
#[derive(Debug, Clone)]
pub enum WorldChange {
    StructurePlaced { region_id: String, structure: Structure },
    /// A later-placed overlapping structure lost occupancy to an
    /// earlier event that arrived out of order.
    StructureEvicted { region_id: String, structure_id: String },
    StructureUpdated { region_id: String, structure_id: String },
    StructureRemoved { region_id: String, structure_id: String },
    ResourceSpawned { region_id: String, node_id: String },
    ResourceCollected { region_id: String, node_id: String, amount: u32, depleted: bool },
    RegionClaimed { claim: LandClaim },
}

/// The store. Holds conflict-resolution indexes; the entities
/// themselves live in the [`RegionMap`] passed to each apply.
#[derive(Debug)]
pub struct World {
    world_size: f64,
    region_size: f64,
    placements: HashMap<String, PlacementMeta>,
    resource_regions: HashMap<String, String>,
    claim_event_ids: HashMap<String, String>,
}

impl World {
    pub fn new(world_size: f64, region_size: f64) -> Self {
        Self {
            world_size,
            region_size,
            placements: HashMap::new(),
            resource_regions: HashMap::new(),
            claim_event_ids: HashMap::new(),
        }
    }

    /// Apply a structure placement, update or tombstone.
    pub fn apply_structure_event(
        &mut self,
        regions: &mut RegionMap,
        payload: StructurePayload,
        sender: &str,
        created_at: u64,
        event_id: &str,
    ) -> Result<Vec<WorldChange>> {
        match payload {
            StructurePayload::Place { structure } => {
                self.place_structure(regions, structure, sender, created_at, event_id)
            }
            StructurePayload::Update { id, health, permissions } => {
                let meta = self
                    .placements
                    .get(&id)
                    .ok_or_else(|| FrontierError::Consistency(format!("unknown structure {id}")))?;
                let region_id = meta.region_id.clone();
                let region = regions.region_mut(&region_id);
                let structure = region
                    .structures
                    .get_mut(&id)
                    .ok_or_else(|| FrontierError::Consistency(format!("unknown structure {id}")))?;

                if !structure.permissions.allows(sender, &structure.owner_pubkey) {
                    return Err(FrontierError::NotAuthorized(format!(
                        "{sender} may not modify structure {id}"
                    )));
                }

                if let Some(health) = health {
                    structure.health = health;
                }
                if let Some(permissions) = permissions {
                    // Permission changes are owner-only even on public structures
                    if sender != structure.owner_pubkey {
                        return Err(FrontierError::NotAuthorized(format!(
                            "{sender} may not change permissions of {id}"
                        )));
                    }
                    structure.permissions = permissions;
                }

                Ok(vec![WorldChange::StructureUpdated {
                    region_id,
                    structure_id: id,
                }])
            }
            StructurePayload::Remove { id } => {
                let meta = self
                    .placements
                    .get(&id)
                    .ok_or_else(|| FrontierError::Consistency(format!("unknown structure {id}")))?;
                let region_id = meta.region_id.clone();
                let allowed = regions
                    .region(&region_id)
                    .and_then(|r| r.structures.get(&id))
                    .map(|s| s.permissions.allows(sender, &s.owner_pubkey))
                    .unwrap_or(false);
                if !allowed {
                    return Err(FrontierError::NotAuthorized(format!(
                        "{sender} may not remove structure {id}"
                    )));
                }

                regions.remove_structure(&region_id, &id);
                self.placements.remove(&id);
                info!("Structure removed: {}", id);
                Ok(vec![WorldChange::StructureRemoved {
                    region_id,
                    structure_id: id,
                }])
            }
        }
    }

    fn place_structure(
        &mut self,
        regions: &mut RegionMap,
        mut structure: Structure,
        sender: &str,
        created_at: u64,
        event_id: &str,
    ) -> Result<Vec<WorldChange>> {
        if sender != structure.owner_pubkey {
            return Err(FrontierError::NotAuthorized(
                "structure owner must match event author".to_string(),
            ));
        }
        if !structure.position.in_bounds(self.world_size) {
            return Err(FrontierError::Consistency(
                "structure position out of world bounds".to_string(),
            ));
        }
        if self.placements.contains_key(&structure.id) {
            // Duplicate delivery of the same placement
            return Ok(vec![]);
        }
        structure.position = structure.position.clamped(self.world_size);

        let region_id = region_for(
            structure.position.x,
            structure.position.y,
            self.world_size,
            self.region_size,
        );

        // Occupancy conflict: the event with the smaller created_at wins,
        // ties broken by lexicographic event id. Losers are rejected
        // locally with no error re-published, an accepted limitation of
        // a serverless design.
        let mut evicted = Vec::new();
        if let Some(region) = regions.region(&region_id) {
            for existing in region.structures.values() {
                if !existing.overlaps(&structure) {
                    continue;
                }
                let existing_meta = match self.placements.get(&existing.id) {
                    Some(m) => m,
                    None => continue,
                };
                let existing_key = (existing_meta.created_at, existing_meta.event_id.as_str());
                let incoming_key = (created_at, event_id);
                if existing_key <= incoming_key {
                    debug!(
                        "Rejected structure {}: footprint held by {}",
                        structure.id, existing.id
                    );
                    return Err(FrontierError::Consistency(format!(
                        "footprint occupied by {}",
                        existing.id
                    )));
                }
                // The incoming event is older: it wins and the later
                // placement is evicted.
                evicted.push(existing.id.clone());
            }
        }

        let mut changes = Vec::new();
        for id in evicted {
            regions.remove_structure(&region_id, &id);
            self.placements.remove(&id);
            changes.push(WorldChange::StructureEvicted {
                region_id: region_id.clone(),
                structure_id: id,
            });
        }

        self.placements.insert(
            structure.id.clone(),
            PlacementMeta {
                region_id: region_id.clone(),
                created_at,
                event_id: event_id.to_string(),
            },
        );
        info!("Structure placed: {} in {}", structure.id, region_id);
        changes.push(WorldChange::StructurePlaced {
            region_id: region_id.clone(),
            structure: structure.clone(),
        });
        regions.add_structure(&region_id, structure);
        Ok(changes)
    }

    /// Apply a resource node spawn. Duplicate spawns of a known node id
    /// are ignored.
    pub fn apply_resource_event(
        &mut self,
        regions: &mut RegionMap,
        payload: ResourceNodePayload,
    ) -> Result<Vec<WorldChange>> {
        let node = payload.node;
        if self.resource_regions.contains_key(&node.id) {
            return Ok(vec![]);
        }
        if !node.position.in_bounds(self.world_size) {
            return Err(FrontierError::Consistency(
                "resource position out of world bounds".to_string(),
            ));
        }

        let region_id = region_for(
            node.position.x,
            node.position.y,
            self.world_size,
            self.region_size,
        );
        self.resource_regions
            .insert(node.id.clone(), region_id.clone());
        let node_id = node.id.clone();
        regions.add_resource(&region_id, node);
        debug!("Resource spawned: {} in {}", node_id, region_id);
        Ok(vec![WorldChange::ResourceSpawned { region_id, node_id }])
    }

    /// Apply a collection against a known node. Collections racing past
    /// depletion saturate at zero; the depleted node leaves the region.
    pub fn apply_collection_event(
        &mut self,
        regions: &mut RegionMap,
        payload: ResourceCollectionPayload,
    ) -> Result<Vec<WorldChange>> {
        let region_id = self
            .resource_regions
            .get(&payload.node_id)
            .cloned()
            .ok_or_else(|| {
                FrontierError::Consistency(format!("unknown resource node {}", payload.node_id))
            })?;

        let region = regions.region_mut(&region_id);
        let node = region.resources.get_mut(&payload.node_id).ok_or_else(|| {
            FrontierError::Consistency(format!("unknown resource node {}", payload.node_id))
        })?;

        node.remaining = node.remaining.saturating_sub(payload.amount);
        let depleted = node.remaining == 0;
        if depleted {
            regions.remove_resource(&region_id, &payload.node_id);
            self.resource_regions.remove(&payload.node_id);
        }
        Ok(vec![WorldChange::ResourceCollected {
            region_id,
            node_id: payload.node_id,
            amount: payload.amount,
            depleted,
        }])
    }

    /// Apply a land claim.
    ///
    /// At most one active claim per region. A live claim by another
    /// owner rejects the incoming event unless the incoming event is
    /// older (smaller created_at, event-id tie-break), in which case it
    /// wins retroactively. The current owner may renew, extending the
    /// expiration.
    pub fn apply_land_claim_event(
        &mut self,
        regions: &mut RegionMap,
        payload: LandClaimPayload,
        sender: &str,
        created_at: u64,
        event_id: &str,
        now: u64,
    ) -> Result<Vec<WorldChange>> {
        let region_id = payload.region_id;
        if let Some(existing) = regions.claim(&region_id) {
            if !existing.is_expired(now) {
                if existing.owner_pubkey == sender {
                    let mut renewed = existing.clone();
                    renewed.expires_at = renewed.expires_at.max(payload.expires_at);
                    renewed.name = payload.name;
                    self.claim_event_ids
                        .insert(region_id.clone(), event_id.to_string());
                    regions.set_claim(&region_id, renewed.clone());
                    return Ok(vec![WorldChange::RegionClaimed { claim: renewed }]);
                }

                let existing_event_id = self
                    .claim_event_ids
                    .get(&region_id)
                    .map(String::as_str)
                    .unwrap_or("");
                let existing_key = (existing.claimed_at, existing_event_id);
                if existing_key <= (created_at, event_id) {
                    return Err(FrontierError::Consistency(format!(
                        "region {region_id} already claimed by {}",
                        existing.owner_pubkey
                    )));
                }
            }
        }

        let claim = LandClaim {
            region_id: region_id.clone(),
            owner_pubkey: sender.to_string(),
            name: payload.name,
            claimed_at: created_at,
            expires_at: payload.expires_at,
        };
        self.claim_event_ids
            .insert(region_id.clone(), event_id.to_string());
        regions.set_claim(&region_id, claim.clone());
        info!("Region {} claimed by {}", region_id, sender);
        Ok(vec![WorldChange::RegionClaimed { claim }])
    }

    /// Whether a region has a live claim at `now`.
    pub fn is_region_claimed(&self, regions: &RegionMap, region_id: &str, now: u64) -> bool {
        regions
            .claim(region_id)
            .map(|c| !c.is_expired(now))
            .unwrap_or(false)
    }

    /// Drop every claim whose expiration has passed. Idempotent and
    /// safe to call every frame; no revoke event is published or
    /// required.
    pub fn tick(&mut self, regions: &mut RegionMap, now: u64) -> Vec<LandClaim> {
        let expired_ids: Vec<String> = regions
            .region_ids()
            .filter(|id| {
                regions
                    .claim(id.as_str())
                    .map(|c| c.is_expired(now))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut expired = Vec::new();
        for id in expired_ids {
            if let Some(claim) = regions.clear_claim(&id) {
                self.claim_event_ids.remove(&id);
                debug!("Claim on {} expired", id);
                expired.push(claim);
            }
        }
        expired
    }

    /// Region the structure currently occupies, if known.
    pub fn structure_region(&self, structure_id: &str) -> Option<&str> {
        self.placements
            .get(structure_id)
            .map(|m| m.region_id.as_str())
    }

    /// Region the resource node currently occupies, if known.
    pub fn resource_region(&self, node_id: &str) -> Option<&str> {
        self.resource_regions.get(node_id).map(String::as_str)
    }
}
