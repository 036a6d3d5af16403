//! Player synchronization: the local player and the reconciled map of
//! remote players.
//!
//! The local player is exclusively owned and mutated here; a remote
//! player's fields change only through inbound events bearing that
//! pubkey. Remote positions reconcile last-write-wins by the sender's
//! own timestamp, so reordered relay delivery cannot roll a player
//! backwards.

use crate::region::{RegionMap, region_for};
use crate::types::{Item, PlayerProfile, PlayerStats, Position};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// The player this client owns
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    pub pubkey: String,
    pub position: Position,
    pub profile: Option<PlayerProfile>,
    pub inventory: Vec<Item>,
    pub stats: PlayerStats,
    pub guild_id: Option<String>,
}

/// A player reconstructed from inbound events
#[derive(Debug, Clone)]
pub struct RemotePlayer {
    pub pubkey: String,
    pub position: Position,
    pub profile: Option<PlayerProfile>,
    pub stats: PlayerStats,
    /// Advisory: what the remote last declared, never authoritative
    pub inventory: Vec<Item>,
    pub guild_id: Option<String>,
    pub region_id: String,
    /// Local clock (ms) of the last event seen from this pubkey
    pub last_seen: u64,
    /// Sender clock (ms) of the last applied position, for LWW
    last_position_ts: u64,
    /// Relay timestamp (s) of the last applied stats/profile update
    last_meta_at: u64,
}

/// Outcome of one local movement step
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub position: Position,
    /// (old, new) when the step crossed a region boundary
    pub region_changed: Option<(String, String)>,
    /// Whether a position event is due (throttle elapsed or region
    /// change). Broadcasting every frame is disallowed; shared relays
    /// are not a physics channel.
    pub broadcast: bool,
}

/// A remote position that survived validation and LWW
#[derive(Debug, Clone)]
pub struct RemoteUpdate {
    pub pubkey: String,
    pub position: Position,
    pub first_seen: bool,
}

pub struct PlayerSync {
    world_size: f64,
    region_size: f64,
    move_speed: f64,
    broadcast_interval: u64,
    inactivity_timeout: u64,
    local: LocalPlayer,
    remotes: HashMap<String, RemotePlayer>,
    last_broadcast: u64,
}

impl PlayerSync {
    pub fn new(
        pubkey: String,
        world_size: f64,
        region_size: f64,
        move_speed: f64,
        broadcast_interval: u64,
        inactivity_timeout: u64,
    ) -> Self {
        Self {
            world_size,
            region_size,
            move_speed,
            broadcast_interval,
            inactivity_timeout,
            local: LocalPlayer {
                pubkey,
                position: Position::default(),
                profile: None,
                inventory: Vec::new(),
                stats: PlayerStats::default(),
                guild_id: None,
            },
            remotes: HashMap::new(),
            last_broadcast: 0,
        }
    }

    pub fn local(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn local_region(&self) -> String {
        region_for(
            self.local.position.x,
            self.local.position.y,
            self.world_size,
            self.region_size,
        )
    }

    pub fn remote(&self, pubkey: &str) -> Option<&RemotePlayer> {
        self.remotes.get(pubkey)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remotes.values()
    }

    pub fn set_profile(&mut self, profile: PlayerProfile) {
        self.local.profile = Some(profile);
    }

    pub fn set_guild(&mut self, guild_id: Option<String>) {
        self.local.guild_id = guild_id;
    }

    /// Place the local player into the world and register it in its
    /// region. Returns the region id.
    pub fn spawn_local(&mut self, regions: &mut RegionMap, x: f64, y: f64) -> String {
        self.local.position = Position::new(x, y).clamped(self.world_size);
        let region_id = self.local_region();
        regions.add_player(&region_id, &self.local.pubkey);
        region_id
    }

    /// Integrate one movement step, clamp to world bounds and detect
    /// region transitions. The caller publishes when `broadcast` is set.
    pub fn update_local_movement(
        &mut self,
        regions: &mut RegionMap,
        dx: f64,
        dy: f64,
        dt: f64,
        now: u64,
    ) -> MovementOutcome {
        let old_region = self.local_region();

        let len = (dx * dx + dy * dy).sqrt();
        if len > 0.0 {
            let step = self.move_speed * dt;
            let next = Position::new(
                self.local.position.x + dx / len * step,
                self.local.position.y + dy / len * step,
            );
            self.local.position = next.clamped(self.world_size);
        }

        let new_region = self.local_region();
        let region_changed = if new_region != old_region {
            regions.move_player(&self.local.pubkey, &old_region, &new_region);
            Some((old_region, new_region))
        } else {
            None
        };

        let due = now.saturating_sub(self.last_broadcast) >= self.broadcast_interval;
        let broadcast = region_changed.is_some() || due;
        if broadcast {
            self.last_broadcast = now;
        }

        MovementOutcome {
            position: self.local.position,
            region_changed,
            broadcast,
        }
    }

    /// Apply a remote position event.
    ///
    /// Creates the remote player on first sighting. Later events apply
    /// last-write-wins by the sender timestamp: anything at or before
    /// the last applied `ts` is discarded. Out-of-bounds payloads are
    /// dropped silently.
    pub fn on_remote_position(
        &mut self,
        regions: &mut RegionMap,
        pubkey: &str,
        x: f64,
        y: f64,
        ts: u64,
        now: u64,
    ) -> Option<RemoteUpdate> {
        let position = Position::new(x, y);
        if !position.in_bounds(self.world_size) {
            debug!("Dropped out-of-bounds position from {}", pubkey);
            return None;
        }

        let region_id = region_for(x, y, self.world_size, self.region_size);

        if let Some(remote) = self.remotes.get_mut(pubkey) {
            remote.last_seen = now;
            if ts <= remote.last_position_ts {
                return None;
            }
            remote.last_position_ts = ts;
            remote.position = position;
            if remote.region_id != region_id {
                let old = std::mem::replace(&mut remote.region_id, region_id.clone());
                regions.move_player(pubkey, &old, &region_id);
            }
            return Some(RemoteUpdate {
                pubkey: pubkey.to_string(),
                position,
                first_seen: false,
            });
        }

        regions.add_player(&region_id, pubkey);
        self.remotes.insert(
            pubkey.to_string(),
            RemotePlayer {
                pubkey: pubkey.to_string(),
                position,
                profile: None,
                stats: PlayerStats::default(),
                inventory: Vec::new(),
                guild_id: None,
                region_id,
                last_seen: now,
                last_position_ts: ts,
                last_meta_at: 0,
            },
        );
        Some(RemoteUpdate {
            pubkey: pubkey.to_string(),
            position,
            first_seen: true,
        })
    }

    /// Apply a remote stats/profile update, LWW by relay timestamp.
    pub fn on_remote_meta(
        &mut self,
        pubkey: &str,
        stats: PlayerStats,
        profile: Option<PlayerProfile>,
        created_at: u64,
        now: u64,
    ) {
        if let Some(remote) = self.remotes.get_mut(pubkey) {
            remote.last_seen = now;
            if created_at <= remote.last_meta_at {
                return;
            }
            remote.last_meta_at = created_at;
            remote.stats = stats;
            if profile.is_some() {
                remote.profile = profile;
            }
        }
    }

    /// Record a remote's declared inventory (display only).
    pub fn on_remote_inventory(&mut self, pubkey: &str, items: Vec<Item>, now: u64) {
        if let Some(remote) = self.remotes.get_mut(pubkey) {
            remote.last_seen = now;
            remote.inventory = items;
        }
    }

    /// Record a remote's guild membership as observed from guild events.
    pub fn on_remote_guild(&mut self, pubkey: &str, guild_id: Option<String>) {
        if let Some(remote) = self.remotes.get_mut(pubkey) {
            remote.guild_id = guild_id;
        }
    }

    /// Evict remote players unseen past the inactivity timeout.
    pub fn reconcile_inactivity(&mut self, regions: &mut RegionMap, now: u64) -> Vec<String> {
        let timeout = self.inactivity_timeout;
        let stale: Vec<String> = self
            .remotes
            .values()
            .filter(|r| now.saturating_sub(r.last_seen) > timeout)
            .map(|r| r.pubkey.clone())
            .collect();

        for pubkey in &stale {
            if let Some(remote) = self.remotes.remove(pubkey) {
                regions.remove_player(&remote.region_id, pubkey);
                debug!("Evicted inactive player {}", pubkey);
            }
        }
        stale
    }

    // Local inventory. Items move by remove + insert only.

    pub fn add_item(&mut self, item: Item) {
        self.local.inventory.push(item);
    }

    /// Whether every listed instance is currently held.
    pub fn holds_all(&self, items: &[Item]) -> bool {
        items.iter().all(|wanted| {
            self.local
                .inventory
                .iter()
                .any(|held| held.instance_id == wanted.instance_id)
        })
    }

    /// Remove the listed instances, returning them. None (and no
    /// change) if any instance is missing or listed twice.
    pub fn take_items(&mut self, items: &[Item]) -> Option<Vec<Item>> {
        let mut wanted = HashSet::new();
        if !items.iter().all(|i| wanted.insert(i.instance_id.as_str())) {
            return None;
        }
        if !self.holds_all(items) {
            return None;
        }
        let mut taken = Vec::with_capacity(items.len());
        for wanted in items {
            let idx = self
                .local
                .inventory
                .iter()
                .position(|held| held.instance_id == wanted.instance_id)?;
            taken.push(self.local.inventory.remove(idx));
        }
        Some(taken)
    }

    pub fn record_trade_completed(&mut self) {
        self.local.stats.trades_completed += 1;
    }

    /// Mirror the counterpart's completed-trade counter locally
    /// (advisory; overwritten by their next stats broadcast).
    pub fn record_remote_trade(&mut self, pubkey: &str) {
        if let Some(remote) = self.remotes.get_mut(pubkey) {
            remote.stats.trades_completed += 1;
        }
    }

    pub fn record_resources_gathered(&mut self, amount: u32) {
        self.local.stats.resources_gathered += amount;
    }

    pub fn record_structure_built(&mut self) {
        self.local.stats.structures_built += 1;
    }
}
