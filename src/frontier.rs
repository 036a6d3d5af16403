//! Frontier - the world engine wiring relay transport, protocol and the
//! stateful subsystems together.

use crate::client::NostrClient;
use crate::clock::{self, Duration, now_ms, now_secs};
use crate::error::{FrontierError, Result};
use crate::guild::{GuildEffect, GuildRegistry};
use crate::player::{MovementOutcome, PlayerSync};
use crate::protocol::{self, GameEvent, GamePayload, TradeAction, kinds};
use crate::quest::{QuestOutcome, QuestTracker};
use crate::region::{RegionMap, visible_regions};
use crate::trade::{TradeBook, TradeEffect};
use crate::types::*;
use crate::world::{World, WorldChange};
use nostr_sdk::{Alphabet, Event, Filter, Kind, PublicKey, SingleLetterTag, SubscriptionId, Timestamp};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Engine events emitted to the application
#[derive(Debug, Clone)]
pub enum FrontierEvent {
    /// Stored backlog replayed; the world view is caught up
    WorldSynced,
    /// A remote player was seen for the first time
    PlayerAppeared { pubkey: String, position: Position },
    /// A remote player moved
    PlayerMoved { pubkey: String, position: Position },
    /// A remote player was evicted for inactivity
    PlayerLeft(String),
    StructurePlaced { region_id: String, structure: Structure },
    StructureUpdated { region_id: String, structure_id: String },
    StructureRemoved { region_id: String, structure_id: String },
    ResourceSpawned { region_id: String, node_id: String },
    ResourceCollected { region_id: String, node_id: String, depleted: bool },
    RegionClaimed(LandClaim),
    ClaimExpired(LandClaim),
    TradeOffered(Trade),
    TradeCountered(Trade),
    TradeCompleted(Trade),
    TradeDeclined(Trade),
    GuildCreated(Guild),
    GuildInviteReceived { guild_id: String, invitee: String },
    GuildMemberJoined { guild_id: String, pubkey: String },
    GuildRankChanged { guild_id: String, member: String, rank: GuildRank },
    AllianceProposed { from_guild: String, to_guild: String },
    AllianceFormed { guild_id: String, other_guild_id: String },
    Chat { sender: String, scope: protocol::ChatScope, text: String },
    QuestProgressed { quest_id: String, counter: u32, target: u32 },
    QuestCompleted { quest_id: String },
    /// Non-fatal trouble (failed publish, rejected event)
    Notice(String),
}

/// Frontier - a shared persistent world over Nostr relays
pub struct Frontier {
    config: WorldConfig,
    client: Arc<NostrClient>,
    regions: Arc<RwLock<RegionMap>>,
    world: Arc<RwLock<World>>,
    players: Arc<RwLock<PlayerSync>>,
    trades: Arc<RwLock<TradeBook>>,
    guilds: Arc<RwLock<GuildRegistry>>,
    quests: Arc<RwLock<QuestTracker>>,
    event_tx: mpsc::Sender<FrontierEvent>,
    event_rx: Arc<RwLock<mpsc::Receiver<FrontierEvent>>>,
    subscription: Arc<RwLock<Option<SubscriptionId>>>,
    subscribed_regions: Arc<RwLock<Vec<String>>>,
    seen_events: Arc<RwLock<HashSet<String>>>,
    in_world: Arc<AtomicBool>,
    synced: Arc<AtomicBool>,
}

impl Frontier {
    /// Create a new Frontier with generated keys
    pub async fn new(config: WorldConfig) -> Result<Self> {
        let client = NostrClient::new(config.relays.clone()).await?;
        Self::with_client(config, client)
    }

    /// Create a new Frontier with a provided secret key
    pub async fn with_secret_key(config: WorldConfig, secret_key: &str) -> Result<Self> {
        let client = NostrClient::with_secret_key(secret_key, config.relays.clone()).await?;
        Self::with_client(config, client)
    }

    fn with_client(config: WorldConfig, client: NostrClient) -> Result<Self> {
        let pubkey = client.public_key();
        let (event_tx, event_rx) = mpsc::channel(256);

        Ok(Self {
            world: Arc::new(RwLock::new(World::new(config.world_size, config.region_size))),
            players: Arc::new(RwLock::new(PlayerSync::new(
                pubkey.clone(),
                config.world_size,
                config.region_size,
                config.move_speed,
                config.position_broadcast_interval,
                config.inactivity_timeout,
            ))),
            trades: Arc::new(RwLock::new(TradeBook::new(pubkey.clone()))),
            guilds: Arc::new(RwLock::new(GuildRegistry::new(pubkey))),
            quests: Arc::new(RwLock::new(QuestTracker::new())),
            regions: Arc::new(RwLock::new(RegionMap::new())),
            config,
            client: Arc::new(client),
            event_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            subscription: Arc::new(RwLock::new(None)),
            subscribed_regions: Arc::new(RwLock::new(Vec::new())),
            seen_events: Arc::new(RwLock::new(HashSet::new())),
            in_world: Arc::new(AtomicBool::new(false)),
            synced: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the public key
    pub fn public_key(&self) -> String {
        self.client.public_key()
    }

    /// Receive next event (blocking)
    pub async fn recv(&self) -> Option<FrontierEvent> {
        self.event_rx.write().await.recv().await
    }

    /// Receive next event (non-blocking)
    pub async fn try_recv(&self) -> Option<FrontierEvent> {
        self.event_rx.write().await.try_recv().ok()
    }

    /// Connect to relays
    pub async fn connect(&self) -> Result<()> {
        self.client.connect().await
    }

    /// Disconnect from relays
    pub async fn disconnect(&self) -> Result<()> {
        self.client.disconnect().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// Snapshot of the local player
    pub async fn local_player(&self) -> crate::player::LocalPlayer {
        self.players.read().await.local().clone()
    }

    /// Snapshot of the currently known remote players
    pub async fn remote_players(&self) -> Vec<crate::player::RemotePlayer> {
        self.players.read().await.remotes().cloned().collect()
    }

    /// Whether a region has a live claim right now
    pub async fn is_region_claimed(&self, region_id: &str) -> bool {
        let world = self.world.read().await;
        let regions = self.regions.read().await;
        world.is_region_claimed(&regions, region_id, now_secs())
    }

    /// Structures currently indexed in a region
    pub async fn region_structures(&self, region_id: &str) -> Vec<Structure> {
        self.regions
            .read()
            .await
            .region(region_id)
            .map(|r| r.structures.values().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // World lifecycle
    // =========================================================================

    /// Enter the world at a position: subscribe to the visible regions,
    /// replay stored state and announce the local player.
    pub async fn enter_world(&self, x: f64, y: f64) -> Result<()> {
        if !self.client.is_connected().await {
            self.client.connect().await?;
        }

        let region_id = {
            let mut regions = self.regions.write().await;
            self.players.write().await.spawn_local(&mut regions, x, y)
        };

        let visible = {
            let players = self.players.read().await;
            let p = players.local().position;
            visible_regions(
                p.x,
                p.y,
                self.config.view_radius,
                self.config.world_size,
                self.config.region_size,
            )
        };
        *self.subscribed_regions.write().await = visible.clone();

        self.in_world.store(true, Ordering::SeqCst);
        self.synced.store(false, Ordering::SeqCst);
        self.start_subscription(visible).await?;
        self.start_tick_task();
        self.start_heartbeat_task();

        self.publish_position().await;
        info!("Entered world in region {}", region_id);
        Ok(())
    }

    /// Leave the world: tear down the subscription and stop announcing.
    pub async fn leave_world(&self) -> Result<()> {
        self.in_world.store(false, Ordering::SeqCst);
        if let Some(sub_id) = self.subscription.write().await.take() {
            self.client.unsubscribe(sub_id).await?;
        }
        self.subscribed_regions.write().await.clear();
        Ok(())
    }

    /// Run one maintenance tick: expire claims, evict idle players.
    /// Idempotent; safe to call every frame.
    pub async fn tick(&self) {
        let expired = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.tick(&mut regions, now_secs())
        };
        for claim in expired {
            let _ = self.event_tx.send(FrontierEvent::ClaimExpired(claim)).await;
        }

        let evicted = {
            let mut regions = self.regions.write().await;
            self.players
                .write()
                .await
                .reconcile_inactivity(&mut regions, now_ms())
        };
        for pubkey in evicted {
            let _ = self.event_tx.send(FrontierEvent::PlayerLeft(pubkey)).await;
        }
    }

    // =========================================================================
    // Movement
    // =========================================================================

    /// Integrate local movement for one frame and broadcast the new
    /// position when the throttle allows (or immediately on a region
    /// change, which also refreshes the region subscriptions).
    pub async fn move_player(&self, dx: f64, dy: f64, dt: f64) -> Result<MovementOutcome> {
        if !self.in_world.load(Ordering::SeqCst) {
            return Err(FrontierError::NotInWorld);
        }

        let outcome = {
            let mut regions = self.regions.write().await;
            self.players
                .write()
                .await
                .update_local_movement(&mut regions, dx, dy, dt, now_ms())
        };

        if outcome.region_changed.is_some() {
            self.refresh_region_subscription().await;
        }
        if outcome.broadcast {
            self.publish_position().await;
        }
        Ok(outcome)
    }

    // =========================================================================
    // Structures & resources
    // =========================================================================

    /// Place a structure owned by the local player at a position.
    pub async fn place_structure(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        permissions: StructurePermissions,
    ) -> Result<Structure> {
        let me = self.public_key();
        let structure = Structure {
            id: generate_structure_id(&me),
            owner_pubkey: me.clone(),
            kind: kind.to_string(),
            position: Position::new(x, y),
            width,
            height,
            health: 100,
            permissions,
        };
        if !structure.position.in_bounds(self.config.world_size) {
            return Err(FrontierError::Consistency(
                "structure position out of world bounds".to_string(),
            ));
        }

        let payload = GamePayload::Structure(protocol::StructurePayload::Place {
            structure: structure.clone(),
        });
        let region_id = self.region_of(x, y);
        let event_id = self.publish(&payload, Some(&region_id), None).await?;

        let changes = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Place {
                    structure: structure.clone(),
                },
                &me,
                now_secs(),
                &event_id,
            )?
        };
        self.emit_world_changes(changes).await;
        self.players.write().await.record_structure_built();
        self.publish_stats().await;
        Ok(structure)
    }

    /// Publish a tombstone removing a structure the local player may
    /// modify.
    pub async fn remove_structure(&self, structure_id: &str) -> Result<()> {
        let me = self.public_key();
        let region_id = {
            let world = self.world.read().await;
            let regions = self.regions.read().await;
            let region_id = world
                .structure_region(structure_id)
                .ok_or_else(|| {
                    FrontierError::Consistency(format!("unknown structure {structure_id}"))
                })?
                .to_string();
            let allowed = regions
                .region(&region_id)
                .and_then(|r| r.structures.get(structure_id))
                .map(|s| s.permissions.allows(&me, &s.owner_pubkey))
                .unwrap_or(false);
            if !allowed {
                return Err(FrontierError::NotAuthorized(format!(
                    "may not remove structure {structure_id}"
                )));
            }
            region_id
        };

        let payload = GamePayload::Structure(protocol::StructurePayload::Remove {
            id: structure_id.to_string(),
        });
        let event_id = self.publish(&payload, Some(&region_id), None).await?;

        let changes = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.apply_structure_event(
                &mut regions,
                protocol::StructurePayload::Remove {
                    id: structure_id.to_string(),
                },
                &me,
                now_secs(),
                &event_id,
            )?
        };
        self.emit_world_changes(changes).await;
        Ok(())
    }

    /// Seed a resource node into the world.
    pub async fn spawn_resource(&self, kind: &str, x: f64, y: f64, remaining: u32) -> Result<ResourceNode> {
        let me = self.public_key();
        let node = ResourceNode {
            id: generate_node_id(&me),
            kind: kind.to_string(),
            position: Position::new(x, y),
            remaining,
        };
        let payload = GamePayload::ResourceNode(protocol::ResourceNodePayload { node: node.clone() });
        let region_id = self.region_of(x, y);
        self.publish(&payload, Some(&region_id), None).await?;

        let changes = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.apply_resource_event(
                &mut regions,
                protocol::ResourceNodePayload { node: node.clone() },
            )?
        };
        self.emit_world_changes(changes).await;
        Ok(node)
    }

    /// Collect from a resource node: publishes the collection, applies
    /// it locally and mints the yielded item into the inventory.
    pub async fn collect_resource(&self, node_id: &str, amount: u32) -> Result<Item> {
        let (region_id, node_kind) = {
            let world = self.world.read().await;
            let regions = self.regions.read().await;
            let region_id = world
                .resource_region(node_id)
                .ok_or_else(|| FrontierError::Consistency(format!("unknown resource node {node_id}")))?
                .to_string();
            let kind = regions
                .region(&region_id)
                .and_then(|r| r.resources.get(node_id))
                .map(|n| n.kind.clone())
                .ok_or_else(|| FrontierError::Consistency(format!("unknown resource node {node_id}")))?;
            (region_id, kind)
        };

        let payload = GamePayload::ResourceCollection(protocol::ResourceCollectionPayload {
            node_id: node_id.to_string(),
            amount,
        });
        self.publish(&payload, Some(&region_id), None).await?;

        let changes = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.apply_collection_event(
                &mut regions,
                protocol::ResourceCollectionPayload {
                    node_id: node_id.to_string(),
                    amount,
                },
            )?
        };
        self.emit_world_changes(changes).await;

        let item = Item::mint(node_kind, Rarity::Common);
        {
            let mut players = self.players.write().await;
            players.add_item(item.clone());
            players.record_resources_gathered(amount);
        }
        self.publish_stats().await;
        self.publish_inventory().await;
        Ok(item)
    }

    // =========================================================================
    // Land claims
    // =========================================================================

    /// Claim the region the local player is standing in.
    pub async fn claim_region(&self, name: &str) -> Result<LandClaim> {
        let me = self.public_key();
        let region_id = self.players.read().await.local_region();
        let now = now_secs();

        {
            let regions = self.regions.read().await;
            if let Some(existing) = regions.claim(&region_id) {
                if !existing.is_expired(now) && existing.owner_pubkey != me {
                    return Err(FrontierError::Consistency(format!(
                        "region {region_id} already claimed by {}",
                        existing.owner_pubkey
                    )));
                }
            }
        }

        let payload_inner = protocol::LandClaimPayload {
            region_id: region_id.clone(),
            name: name.to_string(),
            expires_at: now + self.config.claim_duration,
        };
        let payload = GamePayload::LandClaim(payload_inner.clone());
        let event_id = self.publish(&payload, Some(&region_id), None).await?;

        let changes = {
            let mut world = self.world.write().await;
            let mut regions = self.regions.write().await;
            world.apply_land_claim_event(&mut regions, payload_inner, &me, now, &event_id, now)?
        };
        let claim = changes
            .iter()
            .find_map(|c| match c {
                WorldChange::RegionClaimed { claim } => Some(claim.clone()),
                _ => None,
            })
            .ok_or_else(|| FrontierError::Consistency("claim was not applied".to_string()))?;
        self.emit_world_changes(changes).await;
        Ok(claim)
    }

    // =========================================================================
    // Trades
    // =========================================================================

    /// Offer a trade to another player. The offered items must be held
    /// locally; the requested list is taken on trust from their last
    /// declared inventory.
    pub async fn offer_trade(
        &self,
        recipient_pubkey: &str,
        offered: Vec<Item>,
        requested: Vec<Item>,
    ) -> Result<Trade> {
        if !self.players.read().await.holds_all(&offered) {
            return Err(FrontierError::Consistency(
                "offered items are not all held".to_string(),
            ));
        }
        let trade = self
            .trades
            .write()
            .await
            .create_offer(recipient_pubkey, offered, requested);
        let payload = GamePayload::Trade(protocol::TradePayload {
            trade_id: trade.trade_id.clone(),
            recipient_pubkey: recipient_pubkey.to_string(),
            action: TradeAction::Offer,
            offered_items: trade.offered_items.clone(),
            requested_items: trade.requested_items.clone(),
        });
        self.publish(&payload, None, Some(recipient_pubkey)).await?;
        Ok(trade)
    }

    /// Counter an offer made to the local player with revised terms.
    pub async fn counter_trade(
        &self,
        trade_id: &str,
        offered: Vec<Item>,
        requested: Vec<Item>,
    ) -> Result<()> {
        // The requested list is what the local player would give away.
        if !self.players.read().await.holds_all(&requested) {
            return Err(FrontierError::Consistency(
                "countered items are not all held".to_string(),
            ));
        }
        let payload_inner = self
            .trades
            .write()
            .await
            .create_counter(trade_id, offered, requested)?;
        let counterpart = payload_inner.recipient_pubkey.clone();
        self.publish(&GamePayload::Trade(payload_inner), None, Some(&counterpart))
            .await?;
        Ok(())
    }

    /// Accept a countered trade and finalize it locally.
    pub async fn accept_trade(&self, trade_id: &str) -> Result<Trade> {
        {
            let trades = self.trades.read().await;
            let trade = trades
                .get(trade_id)
                .ok_or_else(|| FrontierError::UnknownTrade(trade_id.to_string()))?;
            let obligation = trades.local_obligation(trade);
            if !self.players.read().await.holds_all(obligation) {
                return Err(FrontierError::Consistency(
                    "obligated items are no longer held".to_string(),
                ));
            }
        }

        let (trade, payload_inner) = self.trades.write().await.create_accept(trade_id)?;
        let counterpart = payload_inner.recipient_pubkey.clone();
        self.publish(&GamePayload::Trade(payload_inner), None, Some(&counterpart))
            .await?;

        self.finalize_trade(&trade).await?;
        let _ = self
            .event_tx
            .send(FrontierEvent::TradeCompleted(trade.clone()))
            .await;
        Ok(trade)
    }

    /// Decline an open trade.
    pub async fn decline_trade(&self, trade_id: &str) -> Result<()> {
        let payload_inner = self.trades.write().await.create_decline(trade_id)?;
        let counterpart = payload_inner.recipient_pubkey.clone();
        self.publish(&GamePayload::Trade(payload_inner), None, Some(&counterpart))
            .await?;
        Ok(())
    }

    /// Move the settled items through the local inventory and bump both
    /// completed-trade counters. Validates only the local side.
    async fn finalize_trade(&self, trade: &Trade) -> Result<()> {
        let (obligation, entitlement, counterpart) = {
            let trades = self.trades.read().await;
            let me = self.public_key();
            let counterpart = if trade.sender_pubkey == me {
                trade.recipient_pubkey.clone()
            } else {
                trade.sender_pubkey.clone()
            };
            (
                trades.local_obligation(trade).to_vec(),
                trades.local_entitlement(trade).to_vec(),
                counterpart,
            )
        };

        let mut players = self.players.write().await;
        if players.take_items(&obligation).is_none() {
            return Err(FrontierError::Consistency(format!(
                "trade {}: obligated items not held",
                trade.trade_id
            )));
        }
        for item in entitlement {
            players.add_item(item);
        }
        players.record_trade_completed();
        players.record_remote_trade(&counterpart);
        drop(players);

        self.publish_stats().await;
        self.publish_inventory().await;
        info!("Trade completed: {}", trade.trade_id);
        Ok(())
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    /// Found a guild and return its id.
    pub async fn create_guild(&self, name: &str) -> Result<String> {
        let (guild, payload_inner) = self.guilds.write().await.create_guild(name);
        self.publish(&GamePayload::GuildCreation(payload_inner), None, None)
            .await?;
        self.players.write().await.set_guild(Some(guild.id.clone()));
        Ok(guild.id)
    }

    /// Invite a player to a guild the local player may invite for.
    pub async fn invite_to_guild(&self, guild_id: &str, pubkey: &str) -> Result<()> {
        let payload_inner = self.guilds.write().await.create_invite(guild_id, pubkey)?;
        self.publish(&GamePayload::GuildInvite(payload_inner), None, Some(pubkey))
            .await?;
        Ok(())
    }

    /// Join a guild; rejected locally without an observed invite.
    pub async fn join_guild(&self, guild_id: &str) -> Result<()> {
        let payload_inner = self.guilds.write().await.create_join(guild_id)?;
        self.publish(&GamePayload::GuildJoin(payload_inner), None, None)
            .await?;
        self.players.write().await.set_guild(Some(guild_id.to_string()));
        Ok(())
    }

    /// Change a member's rank (leader only).
    pub async fn set_guild_rank(&self, guild_id: &str, member: &str, rank: GuildRank) -> Result<()> {
        let payload_inner = self
            .guilds
            .write()
            .await
            .create_rank_update(guild_id, member, rank)?;
        self.publish(&GamePayload::GuildRank(payload_inner), None, Some(member))
            .await?;
        Ok(())
    }

    /// Propose an alliance between two guilds (leader only).
    pub async fn propose_alliance(&self, guild_id: &str, other_guild_id: &str) -> Result<()> {
        let leader = self.guild_leader(other_guild_id).await;
        let payload_inner = self
            .guilds
            .write()
            .await
            .create_alliance_proposal(guild_id, other_guild_id)?;
        self.publish(
            &GamePayload::GuildAlliance(payload_inner),
            None,
            leader.as_deref(),
        )
        .await?;
        Ok(())
    }

    /// Accept an alliance proposed to a guild the local player leads.
    pub async fn accept_alliance(&self, guild_id: &str, proposer_guild_id: &str) -> Result<()> {
        let leader = self.guild_leader(proposer_guild_id).await;
        let payload_inner = self
            .guilds
            .write()
            .await
            .create_alliance_accept(guild_id, proposer_guild_id)?;
        self.publish(
            &GamePayload::GuildAlliance(payload_inner),
            None,
            leader.as_deref(),
        )
        .await?;
        let _ = self
            .event_tx
            .send(FrontierEvent::AllianceFormed {
                guild_id: guild_id.to_string(),
                other_guild_id: proposer_guild_id.to_string(),
            })
            .await;
        Ok(())
    }

    async fn guild_leader(&self, guild_id: &str) -> Option<String> {
        self.guilds
            .read()
            .await
            .guild(guild_id)
            .map(|g| g.leader_pubkey.clone())
    }

    // =========================================================================
    // Chat & quests
    // =========================================================================

    /// Send a chat message. Local chat is scoped to the current region;
    /// guild chat requires membership.
    pub async fn send_chat(&self, scope: protocol::ChatScope, text: &str) -> Result<()> {
        let guild_id = match scope {
            protocol::ChatScope::Guild => {
                let guild_id = self
                    .players
                    .read()
                    .await
                    .local()
                    .guild_id
                    .clone()
                    .ok_or_else(|| {
                        FrontierError::Consistency("not a member of any guild".to_string())
                    })?;
                Some(guild_id)
            }
            _ => None,
        };
        let region = match scope {
            protocol::ChatScope::Local => Some(self.players.read().await.local_region()),
            _ => None,
        };
        let payload = GamePayload::Chat(protocol::ChatPayload {
            scope,
            guild_id,
            text: text.to_string(),
        });
        self.publish(&payload, region.as_deref(), None).await?;
        Ok(())
    }

    /// Start tracking a quest locally.
    pub async fn track_quest(&self, quest_id: &str, target: u32) {
        self.quests.write().await.track(quest_id, target);
    }

    /// Advance a quest counter and broadcast the new value.
    pub async fn advance_quest(&self, quest_id: &str, by: u32) -> Result<()> {
        let (outcome, payload_inner) = self.quests.write().await.advance(quest_id, by);
        self.publish(&GamePayload::Quest(payload_inner.clone()), None, None)
            .await?;
        match outcome {
            QuestOutcome::Completed => {
                let _ = self
                    .event_tx
                    .send(FrontierEvent::QuestCompleted {
                        quest_id: quest_id.to_string(),
                    })
                    .await;
            }
            _ => {
                let _ = self
                    .event_tx
                    .send(FrontierEvent::QuestProgressed {
                        quest_id: payload_inner.quest_id,
                        counter: payload_inner.counter,
                        target: payload_inner.target,
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Fetch a player's latest declared stats and inventory on demand.
    pub async fn inspect_player(&self, pubkey: &str) -> Result<()> {
        let author = PublicKey::parse(pubkey).map_err(|e| FrontierError::Protocol(e.to_string()))?;
        let filter = Filter::new()
            .kinds([
                Kind::Custom(kinds::PLAYER_STATS),
                Kind::Custom(kinds::PLAYER_INVENTORY),
            ])
            .author(author)
            .custom_tag(
                SingleLetterTag::lowercase(Alphabet::G),
                [self.config.game_id.clone()],
            );
        let events = self
            .client
            .fetch_stored(vec![filter], std::time::Duration::from_secs(5))
            .await?;
        for event in events {
            self.dispatch(event).await;
        }
        Ok(())
    }

    // =========================================================================
    // Private: publishing
    // =========================================================================

    fn region_of(&self, x: f64, y: f64) -> String {
        crate::region::region_for(x, y, self.config.world_size, self.config.region_size)
    }

    async fn publish(
        &self,
        payload: &GamePayload,
        region: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<String> {
        let envelope = protocol::encode_event(payload, &self.config.game_id, region, recipient)?;
        let event_id = self.client.publish(envelope).await?;
        Ok(event_id.to_hex())
    }

    /// Broadcast the local position; failures become a Notice rather
    /// than an error, movement itself already happened.
    async fn publish_position(&self) {
        let (position, region_id) = {
            let players = self.players.read().await;
            (players.local().position, players.local_region())
        };
        let payload = GamePayload::Position(protocol::PositionPayload {
            x: position.x,
            y: position.y,
            ts: now_ms(),
        });
        if let Err(e) = self.publish(&payload, Some(&region_id), None).await {
            warn!("Failed to broadcast position: {}", e);
            let _ = self
                .event_tx
                .send(FrontierEvent::Notice(format!("position broadcast failed: {e}")))
                .await;
        }
    }

    async fn publish_stats(&self) {
        let (stats, profile) = {
            let players = self.players.read().await;
            (players.local().stats, players.local().profile.clone())
        };
        let payload = GamePayload::Stats(protocol::StatsPayload { stats, profile });
        if let Err(e) = self.publish(&payload, None, None).await {
            warn!("Failed to publish stats: {}", e);
        }
    }

    async fn publish_inventory(&self) {
        let items = self.players.read().await.local().inventory.clone();
        let payload = GamePayload::Inventory(protocol::InventoryPayload { items });
        if let Err(e) = self.publish(&payload, None, None).await {
            warn!("Failed to publish inventory: {}", e);
        }
    }

    /// Announce the local profile and current stats.
    pub async fn set_profile(&self, profile: PlayerProfile) -> Result<()> {
        self.players.write().await.set_profile(profile);
        self.publish_stats().await;
        Ok(())
    }

    // =========================================================================
    // Private: subscription & dispatch
    // =========================================================================

    fn build_filters(&self, regions: &[String], since: u64) -> Vec<Filter> {
        let g = SingleLetterTag::lowercase(Alphabet::G);
        let r = SingleLetterTag::lowercase(Alphabet::R);
        let p = SingleLetterTag::lowercase(Alphabet::P);
        let game = self.config.game_id.clone();
        let region_values: Vec<String> = regions.to_vec();

        // Region-scoped stored state: structures, resources, claims and
        // local chat, replayed from the backfill window.
        let stored = Filter::new()
            .kinds([
                Kind::Custom(kinds::STRUCTURE),
                Kind::Custom(kinds::RESOURCE_NODE),
                Kind::Custom(kinds::RESOURCE_COLLECTION),
                Kind::Custom(kinds::LAND_CLAIM),
                Kind::Custom(kinds::CHAT_MESSAGE),
            ])
            .custom_tag(g, [game.clone()])
            .custom_tag(r, region_values.clone())
            .since(Timestamp::from(since));

        // Region-scoped live positions (ephemeral, never stored).
        let positions = Filter::new()
            .kind(Kind::Custom(kinds::PLAYER_POSITION))
            .custom_tag(g, [game.clone()])
            .custom_tag(r, region_values);

        // Events addressed to the local player regardless of region.
        let addressed = Filter::new()
            .kinds([
                Kind::Custom(kinds::TRADE_ACTION),
                Kind::Custom(kinds::GUILD_INVITE),
                Kind::Custom(kinds::GUILD_RANK_UPDATE),
                Kind::Custom(kinds::GUILD_ALLIANCE),
            ])
            .custom_tag(g, [game.clone()])
            .custom_tag(p, [self.public_key()])
            .since(Timestamp::from(since));

        // World-wide kinds: guild lifecycle, quest counters, player
        // metadata and global chat.
        let global = Filter::new()
            .kinds([
                Kind::Custom(kinds::GUILD_CREATION),
                Kind::Custom(kinds::GUILD_JOIN),
                Kind::Custom(kinds::GUILD_RANK_UPDATE),
                Kind::Custom(kinds::GUILD_ALLIANCE),
                Kind::Custom(kinds::QUEST_PROGRESS),
                Kind::Custom(kinds::PLAYER_STATS),
                Kind::Custom(kinds::PLAYER_INVENTORY),
                Kind::Custom(kinds::CHAT_MESSAGE),
            ])
            .custom_tag(g, [game])
            .since(Timestamp::from(since));

        vec![stored, positions, addressed, global]
    }

    async fn start_subscription(&self, regions: Vec<String>) -> Result<()> {
        let since = now_secs().saturating_sub(self.config.backfill_window);
        let filters = self.build_filters(&regions, since);

        let my_pubkey = self.public_key();
        let this = self.clone_refs();
        let synced = self.synced.clone();
        let event_tx = self.event_tx.clone();

        let sub_id = self
            .client
            .subscribe(
                filters,
                move |event| {
                    // Skip own events; local state already applied them.
                    if event.pubkey.to_hex() == my_pubkey {
                        return;
                    }
                    let this = this.clone_refs();
                    clock::spawn(async move {
                        this.dispatch(event).await;
                    });
                },
                move || {
                    if !synced.swap(true, Ordering::SeqCst) {
                        let tx = event_tx.clone();
                        clock::spawn(async move {
                            let _ = tx.send(FrontierEvent::WorldSynced).await;
                        });
                    }
                },
            )
            .await?;

        *self.subscription.write().await = Some(sub_id);
        Ok(())
    }

    /// Re-issue the subscription when the visible-region set changed.
    async fn refresh_region_subscription(&self) {
        let visible = {
            let players = self.players.read().await;
            let pos = players.local().position;
            visible_regions(
                pos.x,
                pos.y,
                self.config.view_radius,
                self.config.world_size,
                self.config.region_size,
            )
        };

        {
            let mut current = self.subscribed_regions.write().await;
            if *current == visible {
                return;
            }
            *current = visible.clone();
        }

        let since = now_secs().saturating_sub(self.config.backfill_window);
        let filters = self.build_filters(&visible, since);
        let sub_id = self.subscription.read().await.clone();
        if let Some(sub_id) = sub_id {
            if let Err(e) = self.client.resubscribe(&sub_id, filters).await {
                warn!("Failed to refresh region subscription: {}", e);
                let _ = self
                    .event_tx
                    .send(FrontierEvent::Notice(format!("resubscribe failed: {e}")))
                    .await;
            }
        }
    }

    fn start_tick_task(&self) {
        let this = self.clone_refs();
        let period = Duration::from_millis(self.config.tick_interval);
        clock::spawn(async move {
            let mut ticker = clock::interval(period);
            loop {
                ticker.tick().await;
                if !this.in_world.load(Ordering::SeqCst) {
                    break;
                }
                this.tick().await;
            }
        });
    }

    /// Re-announce the position periodically so stationary players
    /// survive remote inactivity sweeps.
    fn start_heartbeat_task(&self) {
        let this = self.clone_refs();
        let period = Duration::from_millis(self.config.heartbeat_interval);
        clock::spawn(async move {
            let mut ticker = clock::interval(period);
            loop {
                ticker.tick().await;
                if !this.in_world.load(Ordering::SeqCst) {
                    break;
                }
                this.publish_position().await;
            }
        });
    }

    /// Cheap handle sharing the same state, for background tasks.
    fn clone_refs(&self) -> Self {
        Self {
            config: self.config.clone(),
            client: self.client.clone(),
            regions: self.regions.clone(),
            world: self.world.clone(),
            players: self.players.clone(),
            trades: self.trades.clone(),
            guilds: self.guilds.clone(),
            quests: self.quests.clone(),
            event_tx: self.event_tx.clone(),
            event_rx: self.event_rx.clone(),
            subscription: self.subscription.clone(),
            subscribed_regions: self.subscribed_regions.clone(),
            seen_events: self.seen_events.clone(),
            in_world: self.in_world.clone(),
            synced: self.synced.clone(),
        }
    }

    async fn emit_world_changes(&self, changes: Vec<WorldChange>) {
        for change in changes {
            let event = match change {
                WorldChange::StructurePlaced { region_id, structure } => {
                    FrontierEvent::StructurePlaced { region_id, structure }
                }
                WorldChange::StructureEvicted { region_id, structure_id }
                | WorldChange::StructureRemoved { region_id, structure_id } => {
                    FrontierEvent::StructureRemoved { region_id, structure_id }
                }
                WorldChange::StructureUpdated { region_id, structure_id } => {
                    FrontierEvent::StructureUpdated { region_id, structure_id }
                }
                WorldChange::ResourceSpawned { region_id, node_id } => {
                    FrontierEvent::ResourceSpawned { region_id, node_id }
                }
                WorldChange::ResourceCollected { region_id, node_id, depleted, .. } => {
                    FrontierEvent::ResourceCollected { region_id, node_id, depleted }
                }
                WorldChange::RegionClaimed { claim } => FrontierEvent::RegionClaimed(claim),
            };
            let _ = self.event_tx.send(event).await;
        }
    }

    /// Decode and route one inbound event. Every failure path degrades
    /// to a logged ignore; nothing may escape into the main loop.
    async fn dispatch(&self, raw: Event) {
        let decoded = match protocol::decode_event(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Ignoring undecodable event {}: {}", raw.id, e);
                return;
            }
        };

        // Namespace check: never mix state with other game instances.
        if decoded.game.as_deref() != Some(self.config.game_id.as_str()) {
            return;
        }

        // Stored kinds can be replayed after a resubscribe; apply once.
        if decoded.kind != kinds::PLAYER_POSITION {
            let mut seen = self.seen_events.write().await;
            if !seen.insert(decoded.event_id.clone()) {
                return;
            }
        }

        if let Err(e) = self.route(decoded).await {
            match e {
                FrontierError::NotAuthorized(msg) => warn!("Rejected event: {}", msg),
                FrontierError::Consistency(msg) => debug!("Dropped event: {}", msg),
                FrontierError::UnknownTrade(id) => debug!("Trade event before offer: {}", id),
                FrontierError::UnknownGuild(id) => debug!("Guild event before creation: {}", id),
                other => warn!("Failed to apply event: {}", other),
            }
        }
    }

    async fn route(&self, ev: GameEvent) -> Result<()> {
        match ev.payload {
            GamePayload::Position(p) => {
                let update = {
                    let mut regions = self.regions.write().await;
                    self.players.write().await.on_remote_position(
                        &mut regions,
                        &ev.sender,
                        p.x,
                        p.y,
                        p.ts,
                        now_ms(),
                    )
                };
                if let Some(update) = update {
                    let event = if update.first_seen {
                        FrontierEvent::PlayerAppeared {
                            pubkey: update.pubkey,
                            position: update.position,
                        }
                    } else {
                        FrontierEvent::PlayerMoved {
                            pubkey: update.pubkey,
                            position: update.position,
                        }
                    };
                    let _ = self.event_tx.send(event).await;
                }
                Ok(())
            }

            GamePayload::Stats(p) => {
                self.players.write().await.on_remote_meta(
                    &ev.sender,
                    p.stats,
                    p.profile,
                    ev.created_at,
                    now_ms(),
                );
                Ok(())
            }

            GamePayload::Inventory(p) => {
                self.players
                    .write()
                    .await
                    .on_remote_inventory(&ev.sender, p.items, now_ms());
                Ok(())
            }

            GamePayload::Structure(p) => {
                let changes = {
                    let mut world = self.world.write().await;
                    let mut regions = self.regions.write().await;
                    world.apply_structure_event(
                        &mut regions,
                        p,
                        &ev.sender,
                        ev.created_at,
                        &ev.event_id,
                    )?
                };
                self.emit_world_changes(changes).await;
                Ok(())
            }

            GamePayload::ResourceNode(p) => {
                let changes = {
                    let mut world = self.world.write().await;
                    let mut regions = self.regions.write().await;
                    world.apply_resource_event(&mut regions, p)?
                };
                self.emit_world_changes(changes).await;
                Ok(())
            }

            GamePayload::ResourceCollection(p) => {
                let changes = {
                    let mut world = self.world.write().await;
                    let mut regions = self.regions.write().await;
                    world.apply_collection_event(&mut regions, p)?
                };
                self.emit_world_changes(changes).await;
                Ok(())
            }

            GamePayload::LandClaim(p) => {
                let changes = {
                    let mut world = self.world.write().await;
                    let mut regions = self.regions.write().await;
                    world.apply_land_claim_event(
                        &mut regions,
                        p,
                        &ev.sender,
                        ev.created_at,
                        &ev.event_id,
                        now_secs(),
                    )?
                };
                self.emit_world_changes(changes).await;
                Ok(())
            }

            GamePayload::Trade(p) => self.route_trade(p, &ev.sender, ev.created_at).await,

            GamePayload::GuildCreation(p) => {
                let effect = self.guilds.write().await.apply_creation(&p, &ev.sender);
                self.emit_guild_effect(effect).await;
                Ok(())
            }

            GamePayload::GuildInvite(p) => {
                let effect = self.guilds.write().await.apply_invite(&p, &ev.sender)?;
                self.emit_guild_effect(effect).await;
                Ok(())
            }

            GamePayload::GuildJoin(p) => {
                let effect = self.guilds.write().await.apply_join(&p, &ev.sender)?;
                if effect.is_some() {
                    self.players
                        .write()
                        .await
                        .on_remote_guild(&ev.sender, Some(p.guild_id.clone()));
                }
                self.emit_guild_effect(effect).await;
                Ok(())
            }

            GamePayload::GuildRank(p) => {
                let effect = self.guilds.write().await.apply_rank_update(&p, &ev.sender)?;
                self.emit_guild_effect(effect).await;
                Ok(())
            }

            GamePayload::GuildAlliance(p) => {
                let effect = self.guilds.write().await.apply_alliance(&p, &ev.sender)?;
                self.emit_guild_effect(effect).await;
                Ok(())
            }

            GamePayload::Chat(p) => {
                match p.scope {
                    protocol::ChatScope::Guild => {
                        let local_guild = self.players.read().await.local().guild_id.clone();
                        if p.guild_id.is_none() || p.guild_id != local_guild {
                            return Ok(());
                        }
                    }
                    protocol::ChatScope::Local => {
                        // The world-wide chat filter also matches local
                        // chat; keep only messages from a visible region.
                        let visible = self.subscribed_regions.read().await;
                        match ev.region.as_deref() {
                            Some(region) if visible.iter().any(|r| r == region) => {}
                            _ => return Ok(()),
                        }
                    }
                    protocol::ChatScope::Global => {}
                }
                let _ = self
                    .event_tx
                    .send(FrontierEvent::Chat {
                        sender: ev.sender,
                        scope: p.scope,
                        text: p.text,
                    })
                    .await;
                Ok(())
            }

            GamePayload::Quest(p) => {
                let outcome = self.quests.write().await.apply_progress(&p);
                match outcome {
                    QuestOutcome::Ignored => {}
                    QuestOutcome::Progressed => {
                        let _ = self
                            .event_tx
                            .send(FrontierEvent::QuestProgressed {
                                quest_id: p.quest_id,
                                counter: p.counter,
                                target: p.target,
                            })
                            .await;
                    }
                    QuestOutcome::Completed => {
                        let _ = self
                            .event_tx
                            .send(FrontierEvent::QuestCompleted { quest_id: p.quest_id })
                            .await;
                    }
                }
                Ok(())
            }
        }
    }

    async fn route_trade(
        &self,
        payload: protocol::TradePayload,
        sender: &str,
        created_at: u64,
    ) -> Result<()> {
        // Before applying a remote Accept, check that the local side can
        // actually fulfil its half. Only local holdings are validated;
        // the counterpart's declared list is taken on trust.
        if payload.action == TradeAction::Accept {
            let fulfillable = {
                let trades = self.trades.read().await;
                match trades.get(&payload.trade_id) {
                    Some(trade) => {
                        let me = self.public_key();
                        let involved =
                            trade.sender_pubkey == me || trade.recipient_pubkey == me;
                        !involved
                            || self
                                .players
                                .read()
                                .await
                                .holds_all(trades.local_obligation(trade))
                    }
                    None => true,
                }
            };
            if !fulfillable {
                let _ = self
                    .event_tx
                    .send(FrontierEvent::Notice(format!(
                        "trade {} accepted but obligated items are missing",
                        payload.trade_id
                    )))
                    .await;
                return Err(FrontierError::Consistency(format!(
                    "trade {}: cannot fulfil local obligation",
                    payload.trade_id
                )));
            }
        }

        let effect = self
            .trades
            .write()
            .await
            .apply_event(&payload, sender, created_at)?;

        match effect {
            Some(TradeEffect::Offered(trade)) => {
                let _ = self.event_tx.send(FrontierEvent::TradeOffered(trade)).await;
            }
            Some(TradeEffect::Countered(trade)) => {
                let _ = self.event_tx.send(FrontierEvent::TradeCountered(trade)).await;
            }
            Some(TradeEffect::Finalized(trade)) => {
                let me = self.public_key();
                if trade.sender_pubkey == me || trade.recipient_pubkey == me {
                    self.finalize_trade(&trade).await?;
                }
                let _ = self.event_tx.send(FrontierEvent::TradeCompleted(trade)).await;
            }
            Some(TradeEffect::Declined(trade)) => {
                let _ = self.event_tx.send(FrontierEvent::TradeDeclined(trade)).await;
            }
            None => {}
        }
        Ok(())
    }

    async fn emit_guild_effect(&self, effect: Option<GuildEffect>) {
        let Some(effect) = effect else {
            return;
        };
        let event = match effect {
            GuildEffect::Created(guild) => FrontierEvent::GuildCreated(guild),
            GuildEffect::InviteRecorded { guild_id, invitee } => {
                FrontierEvent::GuildInviteReceived { guild_id, invitee }
            }
            GuildEffect::MemberJoined { guild_id, pubkey } => {
                FrontierEvent::GuildMemberJoined { guild_id, pubkey }
            }
            GuildEffect::RankChanged { guild_id, member, rank } => {
                FrontierEvent::GuildRankChanged { guild_id, member, rank }
            }
            GuildEffect::AllianceProposed { from_guild, to_guild } => {
                FrontierEvent::AllianceProposed { from_guild, to_guild }
            }
            GuildEffect::AllianceFormed { guild_id, other_guild_id } => {
                FrontierEvent::AllianceFormed { guild_id, other_guild_id }
            }
        };
        let _ = self.event_tx.send(event).await;
    }
}
