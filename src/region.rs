//! Spatial partition: fixed-size grid cells scoping subscriptions and
//! entity indexing.

use crate::types::{LandClaim, ResourceNode, Structure};
use std::collections::{HashMap, HashSet};

/// Map a coordinate to its region id ("gx:gy").
///
/// Pure, deterministic and total over the world bounds: out-of-range
/// input is clamped to the nearest edge cell, so every coordinate maps
/// to exactly one region.
pub fn region_for(x: f64, y: f64, world_size: f64, region_size: f64) -> String {
    let max_cell = ((world_size / region_size).ceil() as i64 - 1).max(0);
    let cell = |v: f64| -> i64 {
        let v = v.clamp(0.0, world_size);
        ((v / region_size).floor() as i64).min(max_cell)
    };
    format!("{}:{}", cell(x), cell(y))
}

/// Parse a region id back into grid coordinates.
pub fn parse_region_id(id: &str) -> Option<(i64, i64)> {
    let (gx, gy) = id.split_once(':')?;
    Some((gx.parse().ok()?, gy.parse().ok()?))
}

/// All region ids whose cells intersect the axis-aligned square of
/// `radius` around the point. Used to scope subscriptions and rendering.
pub fn visible_regions(
    x: f64,
    y: f64,
    radius: f64,
    world_size: f64,
    region_size: f64,
) -> Vec<String> {
    let max_cell = ((world_size / region_size).ceil() as i64 - 1).max(0);
    let cell = |v: f64| -> i64 {
        let v = v.clamp(0.0, world_size);
        ((v / region_size).floor() as i64).min(max_cell)
    };

    let min_gx = cell(x - radius);
    let max_gx = cell(x + radius);
    let min_gy = cell(y - radius);
    let max_gy = cell(y + radius);

    let mut out = Vec::new();
    for gx in min_gx..=max_gx {
        for gy in min_gy..=max_gy {
            out.push(format!("{gx}:{gy}"));
        }
    }
    out
}

/// One grid cell and the entities currently indexed in it
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub structures: HashMap<String, Structure>,
    pub resources: HashMap<String, ResourceNode>,
    pub players: HashSet<String>,
    pub land_claim: Option<LandClaim>,
}

/// The region index. Cells materialize lazily on first write.
#[derive(Debug, Default)]
pub struct RegionMap {
    regions: HashMap<String, Region>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn region_mut(&mut self, id: &str) -> &mut Region {
        self.regions.entry(id.to_string()).or_default()
    }

    pub fn region_ids(&self) -> impl Iterator<Item = &String> {
        self.regions.keys()
    }

    pub fn add_structure(&mut self, region_id: &str, structure: Structure) {
        self.region_mut(region_id)
            .structures
            .insert(structure.id.clone(), structure);
    }

    pub fn remove_structure(&mut self, region_id: &str, structure_id: &str) -> Option<Structure> {
        self.regions
            .get_mut(region_id)
            .and_then(|r| r.structures.remove(structure_id))
    }

    pub fn add_resource(&mut self, region_id: &str, node: ResourceNode) {
        self.region_mut(region_id)
            .resources
            .insert(node.id.clone(), node);
    }

    pub fn remove_resource(&mut self, region_id: &str, node_id: &str) -> Option<ResourceNode> {
        self.regions
            .get_mut(region_id)
            .and_then(|r| r.resources.remove(node_id))
    }

    pub fn add_player(&mut self, region_id: &str, pubkey: &str) {
        self.region_mut(region_id).players.insert(pubkey.to_string());
    }

    pub fn remove_player(&mut self, region_id: &str, pubkey: &str) {
        if let Some(region) = self.regions.get_mut(region_id) {
            region.players.remove(pubkey);
        }
    }

    /// Move a player between regions as remove-then-add under one
    /// borrow, so no observable state has the player in zero or two
    /// regions.
    pub fn move_player(&mut self, pubkey: &str, from: &str, to: &str) {
        if from == to {
            return;
        }
        self.remove_player(from, pubkey);
        self.add_player(to, pubkey);
    }

    pub fn claim(&self, region_id: &str) -> Option<&LandClaim> {
        self.regions.get(region_id)?.land_claim.as_ref()
    }

    pub fn set_claim(&mut self, region_id: &str, claim: LandClaim) {
        self.region_mut(region_id).land_claim = Some(claim);
    }

    pub fn clear_claim(&mut self, region_id: &str) -> Option<LandClaim> {
        self.regions.get_mut(region_id)?.land_claim.take()
    }
}
