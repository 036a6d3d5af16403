//! Event protocol layer: kind taxonomy, payload schemas and the
//! encode/decode boundary.
//!
//! Pure transform layer. Nothing here touches the network or mutates
//! state; malformed or unknown input comes back as a typed error the
//! caller treats as "ignore this event".

use crate::error::{FrontierError, Result};
use crate::types::*;
use nostr_sdk::{Alphabet, Event, SingleLetterTag, Tag, TagKind};
use serde::{Deserialize, Serialize};

/// Nostr event kinds used by the engine.
///
/// Position updates sit in the ephemeral range so relays never store
/// per-step movement. Stats and inventory summaries are replaceable
/// (latest wins at the relay). Everything persistent lives in a
/// contiguous regular block so relays store and replay it: the event
/// log doubles as the persistence layer.
pub mod kinds {
    /// Ephemeral player position
    pub const PLAYER_POSITION: u16 = 25101;
    /// Replaceable player stats summary
    pub const PLAYER_STATS: u16 = 11101;
    /// Replaceable player inventory summary (advisory)
    pub const PLAYER_INVENTORY: u16 = 11102;
    /// Structure placement / update / removal
    pub const STRUCTURE: u16 = 4101;
    /// Resource node spawn
    pub const RESOURCE_NODE: u16 = 4102;
    /// Resource collection
    pub const RESOURCE_COLLECTION: u16 = 4103;
    /// Land claim
    pub const LAND_CLAIM: u16 = 4104;
    /// Trade negotiation step
    pub const TRADE_ACTION: u16 = 4105;
    /// Guild creation
    pub const GUILD_CREATION: u16 = 4106;
    /// Guild invite (addressed)
    pub const GUILD_INVITE: u16 = 4107;
    /// Guild join
    pub const GUILD_JOIN: u16 = 4108;
    /// Guild rank update (leader only)
    pub const GUILD_RANK_UPDATE: u16 = 4109;
    /// Guild alliance proposal / acceptance
    pub const GUILD_ALLIANCE: u16 = 4110;
    /// Chat message (scope in the `t` tag)
    pub const CHAT_MESSAGE: u16 = 4111;
    /// Quest progress counter (advisory)
    pub const QUEST_PROGRESS: u16 = 4112;
}

/// Every kind the engine recognizes, for building subscription filters.
pub fn supported_kinds() -> [u16; 15] {
    [
        kinds::PLAYER_POSITION,
        kinds::PLAYER_STATS,
        kinds::PLAYER_INVENTORY,
        kinds::STRUCTURE,
        kinds::RESOURCE_NODE,
        kinds::RESOURCE_COLLECTION,
        kinds::LAND_CLAIM,
        kinds::TRADE_ACTION,
        kinds::GUILD_CREATION,
        kinds::GUILD_INVITE,
        kinds::GUILD_JOIN,
        kinds::GUILD_RANK_UPDATE,
        kinds::GUILD_ALLIANCE,
        kinds::CHAT_MESSAGE,
        kinds::QUEST_PROGRESS,
    ]
}

// Event content types, one schema per kind.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionPayload {
    pub x: f64,
    pub y: f64,
    /// Sender clock in ms, used for last-write-wins reconciliation
    pub ts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub stats: PlayerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<PlayerProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryPayload {
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StructurePayload {
    Place {
        structure: Structure,
    },
    Update {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        health: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        permissions: Option<StructurePermissions>,
    },
    /// Tombstone: removal must be observed by all participants, never
    /// applied as a silent local deletion.
    Remove {
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNodePayload {
    pub node: ResourceNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCollectionPayload {
    pub node_id: String,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandClaimPayload {
    pub region_id: String,
    pub name: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Offer,
    Counter,
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePayload {
    pub trade_id: String,
    pub recipient_pubkey: String,
    pub action: TradeAction,
    #[serde(default)]
    pub offered_items: Vec<Item>,
    #[serde(default)]
    pub requested_items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildCreationPayload {
    pub guild_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildInvitePayload {
    pub guild_id: String,
    pub invitee_pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildJoinPayload {
    pub guild_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildRankPayload {
    pub guild_id: String,
    pub member_pubkey: String,
    pub rank: GuildRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllianceAction {
    Propose,
    Accept,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildAlliancePayload {
    pub guild_id: String,
    pub other_guild_id: String,
    pub action: AllianceAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatScope {
    Local,
    Global,
    Guild,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub scope: ChatScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestProgressPayload {
    pub quest_id: String,
    pub counter: u32,
    pub target: u32,
}

/// Decoded payload, one variant per supported kind
#[derive(Debug, Clone, PartialEq)]
pub enum GamePayload {
    Position(PositionPayload),
    Stats(StatsPayload),
    Inventory(InventoryPayload),
    Structure(StructurePayload),
    ResourceNode(ResourceNodePayload),
    ResourceCollection(ResourceCollectionPayload),
    LandClaim(LandClaimPayload),
    Trade(TradePayload),
    GuildCreation(GuildCreationPayload),
    GuildInvite(GuildInvitePayload),
    GuildJoin(GuildJoinPayload),
    GuildRank(GuildRankPayload),
    GuildAlliance(GuildAlliancePayload),
    Chat(ChatPayload),
    Quest(QuestProgressPayload),
}

impl GamePayload {
    /// The kind number this payload is carried on.
    pub fn kind(&self) -> u16 {
        match self {
            Self::Position(_) => kinds::PLAYER_POSITION,
            Self::Stats(_) => kinds::PLAYER_STATS,
            Self::Inventory(_) => kinds::PLAYER_INVENTORY,
            Self::Structure(_) => kinds::STRUCTURE,
            Self::ResourceNode(_) => kinds::RESOURCE_NODE,
            Self::ResourceCollection(_) => kinds::RESOURCE_COLLECTION,
            Self::LandClaim(_) => kinds::LAND_CLAIM,
            Self::Trade(_) => kinds::TRADE_ACTION,
            Self::GuildCreation(_) => kinds::GUILD_CREATION,
            Self::GuildInvite(_) => kinds::GUILD_INVITE,
            Self::GuildJoin(_) => kinds::GUILD_JOIN,
            Self::GuildRank(_) => kinds::GUILD_RANK_UPDATE,
            Self::GuildAlliance(_) => kinds::GUILD_ALLIANCE,
            Self::Chat(_) => kinds::CHAT_MESSAGE,
            Self::Quest(_) => kinds::QUEST_PROGRESS,
        }
    }

    /// Free-text category for the `t` tag.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Position(_) => "position",
            Self::Stats(_) | Self::Inventory(_) => "player",
            Self::Structure(_) => "structure",
            Self::ResourceNode(_) | Self::ResourceCollection(_) => "resource",
            Self::LandClaim(_) => "claim",
            Self::Trade(_) => "trade",
            Self::GuildCreation(_)
            | Self::GuildInvite(_)
            | Self::GuildJoin(_)
            | Self::GuildRank(_)
            | Self::GuildAlliance(_) => "guild",
            Self::Chat(c) => match c.scope {
                ChatScope::Local => "chat:local",
                ChatScope::Global => "chat:global",
                ChatScope::Guild => "chat:guild",
            },
            Self::Quest(_) => "quest",
        }
    }
}

/// An unsigned envelope: kind, JSON content and tags, ready for the
/// relay client to sign and publish.
#[derive(Debug, Clone)]
pub struct UnsignedEnvelope {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Tag>,
}

/// A decoded inbound event.
#[derive(Debug, Clone)]
pub struct GameEvent {
    pub kind: u16,
    pub sender: String,
    pub event_id: String,
    /// Relay-visible unix seconds
    pub created_at: u64,
    pub payload: GamePayload,
    /// `g` tag (game namespace)
    pub game: Option<String>,
    /// `r` tag (region scope)
    pub region: Option<String>,
    /// `p` tag (addressed recipient)
    pub recipient: Option<String>,
}

fn letter(alphabet: Alphabet) -> TagKind<'static> {
    TagKind::SingleLetter(SingleLetterTag::lowercase(alphabet))
}

/// `["g", game_id]`, present on every event so independent worlds
/// sharing the same relays cannot cross-pollinate.
pub fn game_tag(game_id: &str) -> Tag {
    Tag::custom(letter(Alphabet::G), [game_id])
}

/// `["r", region_id]` for spatially-scoped events.
pub fn region_tag(region_id: &str) -> Tag {
    Tag::custom(letter(Alphabet::R), [region_id])
}

/// `["p", pubkey]` addressing a specific recipient.
pub fn recipient_tag(pubkey: &str) -> Tag {
    Tag::custom(letter(Alphabet::P), [pubkey])
}

/// `["t", domain]` free-text category.
pub fn domain_tag(domain: &str) -> Tag {
    Tag::custom(letter(Alphabet::T), [domain])
}

fn tag_value(event: &Event, alphabet: Alphabet) -> Option<String> {
    event.tags.iter().find_map(|tag| {
        if tag.kind() == letter(alphabet) {
            tag.content().map(|s| s.to_string())
        } else {
            None
        }
    })
}

/// Encode a payload into an unsigned envelope.
///
/// The game and domain tags are always attached; region and recipient
/// tags are attached when given. Pure: building the envelope publishes
/// nothing.
pub fn encode_event(
    payload: &GamePayload,
    game_id: &str,
    region: Option<&str>,
    recipient: Option<&str>,
) -> Result<UnsignedEnvelope> {
    let content = match payload {
        GamePayload::Position(p) => serde_json::to_string(p)?,
        GamePayload::Stats(p) => serde_json::to_string(p)?,
        GamePayload::Inventory(p) => serde_json::to_string(p)?,
        GamePayload::Structure(p) => serde_json::to_string(p)?,
        GamePayload::ResourceNode(p) => serde_json::to_string(p)?,
        GamePayload::ResourceCollection(p) => serde_json::to_string(p)?,
        GamePayload::LandClaim(p) => serde_json::to_string(p)?,
        GamePayload::Trade(p) => serde_json::to_string(p)?,
        GamePayload::GuildCreation(p) => serde_json::to_string(p)?,
        GamePayload::GuildInvite(p) => serde_json::to_string(p)?,
        GamePayload::GuildJoin(p) => serde_json::to_string(p)?,
        GamePayload::GuildRank(p) => serde_json::to_string(p)?,
        GamePayload::GuildAlliance(p) => serde_json::to_string(p)?,
        GamePayload::Chat(p) => serde_json::to_string(p)?,
        GamePayload::Quest(p) => serde_json::to_string(p)?,
    };

    let mut tags = vec![game_tag(game_id), domain_tag(payload.domain())];
    if let Some(region_id) = region {
        tags.push(region_tag(region_id));
    }
    if let Some(pubkey) = recipient {
        tags.push(recipient_tag(pubkey));
    }

    Ok(UnsignedEnvelope {
        kind: payload.kind(),
        content,
        tags,
    })
}

fn parse<'a, T>(content: &'a str) -> Result<T>
where
    T: Deserialize<'a>,
{
    serde_json::from_str(content).map_err(|e| FrontierError::Protocol(e.to_string()))
}

/// Decode a raw relay event into a [`GameEvent`].
///
/// The single kind-to-schema table of the engine: every recognized kind
/// is matched here and nowhere else. Unknown kinds and malformed JSON
/// yield [`FrontierError::Protocol`], which callers must treat as
/// "ignore", never as fatal.
pub fn decode_event(event: &Event) -> Result<GameEvent> {
    let kind = event.kind.as_u16();
    let content = event.content.as_str();

    let payload = match kind {
        kinds::PLAYER_POSITION => GamePayload::Position(parse(content)?),
        kinds::PLAYER_STATS => GamePayload::Stats(parse(content)?),
        kinds::PLAYER_INVENTORY => GamePayload::Inventory(parse(content)?),
        kinds::STRUCTURE => GamePayload::Structure(parse(content)?),
        kinds::RESOURCE_NODE => GamePayload::ResourceNode(parse(content)?),
        kinds::RESOURCE_COLLECTION => GamePayload::ResourceCollection(parse(content)?),
        kinds::LAND_CLAIM => GamePayload::LandClaim(parse(content)?),
        kinds::TRADE_ACTION => GamePayload::Trade(parse(content)?),
        kinds::GUILD_CREATION => GamePayload::GuildCreation(parse(content)?),
        kinds::GUILD_INVITE => GamePayload::GuildInvite(parse(content)?),
        kinds::GUILD_JOIN => GamePayload::GuildJoin(parse(content)?),
        kinds::GUILD_RANK_UPDATE => GamePayload::GuildRank(parse(content)?),
        kinds::GUILD_ALLIANCE => GamePayload::GuildAlliance(parse(content)?),
        kinds::CHAT_MESSAGE => GamePayload::Chat(parse(content)?),
        kinds::QUEST_PROGRESS => GamePayload::Quest(parse(content)?),
        other => {
            return Err(FrontierError::Protocol(format!("unknown kind {other}")));
        }
    };

    Ok(GameEvent {
        kind,
        sender: event.pubkey.to_hex(),
        event_id: event.id.to_hex(),
        created_at: event.created_at.as_u64(),
        payload,
        game: tag_value(event, Alphabet::G),
        region: tag_value(event, Alphabet::R),
        recipient: tag_value(event, Alphabet::P),
    })
}
