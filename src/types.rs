//! Type definitions for nostr-frontier

use crate::clock::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// World configuration
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Unique identifier for the game world (e.g., "frontier-main")
    pub game_id: String,
    /// Nostr relay URLs
    pub relays: Vec<String>,
    /// World edge length in world units (default: 10000)
    pub world_size: f64,
    /// Region cell edge length in world units (default: 500)
    pub region_size: f64,
    /// Radius around the player kept subscribed in world units (default: 750)
    pub view_radius: f64,
    /// Movement speed in world units per second (default: 120)
    pub move_speed: f64,
    /// Minimum interval between position broadcasts in ms (default: 1500)
    pub position_broadcast_interval: u64,
    /// Idle re-announce period in ms; keeps stationary players visible
    /// to remote inactivity sweeps (default: 10000)
    pub heartbeat_interval: u64,
    /// Remote players unseen for this long are evicted, in ms (default: 30000)
    pub inactivity_timeout: u64,
    /// World tick period in ms (default: 1000)
    pub tick_interval: u64,
    /// Land claim lifetime in seconds (default: 86400)
    pub claim_duration: u64,
    /// Backfill window for stored events in seconds (default: 604800)
    pub backfill_window: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            game_id: String::new(),
            relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://nos.lol".to_string(),
                "wss://relay.nostr.band".to_string(),
            ],
            world_size: 10_000.0,
            region_size: 500.0,
            view_radius: 750.0,
            move_speed: 120.0,
            position_broadcast_interval: 1500,
            heartbeat_interval: 10_000,
            inactivity_timeout: 30_000,
            tick_interval: 1000,
            claim_duration: 86_400,
            backfill_window: 604_800,
        }
    }
}

impl WorldConfig {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            ..Default::default()
        }
    }

    pub fn relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    pub fn world_size(mut self, size: f64) -> Self {
        self.world_size = size;
        self
    }

    pub fn region_size(mut self, size: f64) -> Self {
        self.region_size = size;
        self
    }

    pub fn view_radius(mut self, radius: f64) -> Self {
        self.view_radius = radius;
        self
    }

    pub fn move_speed(mut self, speed: f64) -> Self {
        self.move_speed = speed;
        self
    }

    pub fn position_broadcast_interval(mut self, ms: u64) -> Self {
        self.position_broadcast_interval = ms;
        self
    }

    pub fn heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval = ms;
        self
    }

    pub fn inactivity_timeout(mut self, ms: u64) -> Self {
        self.inactivity_timeout = ms;
        self
    }

    pub fn tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval = ms;
        self
    }

    pub fn claim_duration(mut self, secs: u64) -> Self {
        self.claim_duration = secs;
        self
    }

    pub fn backfill_window(mut self, secs: u64) -> Self {
        self.backfill_window = secs;
        self
    }
}

/// A point in the world, bounded to [0, world_size] on both axes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp both axes into the world bounds.
    pub fn clamped(self, world_size: f64) -> Self {
        Self {
            x: self.x.clamp(0.0, world_size),
            y: self.y.clamp(0.0, world_size),
        }
    }

    pub fn in_bounds(&self, world_size: f64) -> bool {
        self.x >= 0.0 && self.x <= world_size && self.y >= 0.0 && self.y <= world_size
    }
}

/// Item rarity tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// A single item instance. Immutable once minted; moves between
/// inventories by remove + insert, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub template_id: String,
    pub instance_id: String,
    pub rarity: Rarity,
    pub quantity: u32,
}

impl Item {
    /// Mint a new instance of a template. The instance id embeds the
    /// template, mint time and a random suffix so it is globally unique.
    pub fn mint(template_id: impl Into<String>, rarity: Rarity) -> Self {
        let template_id = template_id.into();
        let instance_id = format!("{}-{}-{}", template_id, now_ms(), random_suffix(6));
        Self {
            template_id,
            instance_id,
            rarity,
            quantity: 1,
        }
    }
}

/// Player display profile (advisory)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Player progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub trades_completed: u32,
    pub resources_gathered: u32,
    pub structures_built: u32,
}

impl PlayerStats {
    /// Reputation is derived from activity, never stored or synced.
    pub fn reputation(&self) -> u32 {
        self.trades_completed * 10 + self.structures_built * 5 + self.resources_gathered
    }
}

/// Who may modify a structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StructurePermissions {
    /// Only the owner
    Owner,
    /// Anyone
    Public,
    /// The owner plus listed pubkeys
    Whitelist { pubkeys: HashSet<String> },
}

impl Default for StructurePermissions {
    fn default() -> Self {
        Self::Owner
    }
}

impl StructurePermissions {
    pub fn allows(&self, pubkey: &str, owner: &str) -> bool {
        if pubkey == owner {
            return true;
        }
        match self {
            Self::Owner => false,
            Self::Public => true,
            Self::Whitelist { pubkeys } => pubkeys.contains(pubkey),
        }
    }
}

/// A player-built structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: String,
    pub owner_pubkey: String,
    pub kind: String,
    pub position: Position,
    pub width: f64,
    pub height: f64,
    pub health: u32,
    #[serde(default)]
    pub permissions: StructurePermissions,
}

impl Structure {
    /// Axis-aligned footprint overlap test.
    pub fn overlaps(&self, other: &Structure) -> bool {
        self.position.x < other.position.x + other.width
            && other.position.x < self.position.x + self.width
            && self.position.y < other.position.y + other.height
            && other.position.y < self.position.y + self.height
    }
}

/// A harvestable resource node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub kind: String,
    pub position: Position,
    pub remaining: u32,
}

/// A time-bounded ownership assertion over one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandClaim {
    pub region_id: String,
    pub owner_pubkey: String,
    pub name: String,
    pub claimed_at: u64,
    pub expires_at: u64,
}

impl LandClaim {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Trade negotiation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Offered,
    Countered,
    Accepted,
    Declined,
}

/// One trade negotiation, keyed by the id minted by the original offerer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub sender_pubkey: String,
    pub recipient_pubkey: String,
    pub offered_items: Vec<Item>,
    pub requested_items: Vec<Item>,
    pub status: TradeStatus,
    pub updated_at: u64,
}

/// Guild member rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuildRank {
    Leader,
    Officer,
    #[default]
    Member,
}

/// A guild and its membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub leader_pubkey: String,
    pub members: HashSet<String>,
    pub ranks: HashMap<String, GuildRank>,
    pub score: u64,
    #[serde(default)]
    pub allies: HashSet<String>,
}

/// Generate a short random id suffix
pub fn random_suffix(len: usize) -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Mint a trade id from the offerer's pubkey and the current time.
pub fn generate_trade_id(sender_pubkey: &str) -> String {
    let head: String = sender_pubkey.chars().take(8).collect();
    format!("{}-{}-{}", head, now_ms(), random_suffix(4))
}

/// Mint a guild id from its name and the current time.
pub fn generate_guild_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(12)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{}-{}", slug, now_ms(), random_suffix(4))
}

/// Mint a structure id.
pub fn generate_structure_id(owner_pubkey: &str) -> String {
    let head: String = owner_pubkey.chars().take(8).collect();
    format!("s-{}-{}-{}", head, now_ms(), random_suffix(4))
}

/// Mint a resource node id.
pub fn generate_node_id(spawner_pubkey: &str) -> String {
    let head: String = spawner_pubkey.chars().take(8).collect();
    format!("n-{}-{}-{}", head, now_ms(), random_suffix(4))
}
