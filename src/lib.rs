//! # nostr-frontier
//!
//! Nostr-based persistent shared-world engine. No server required.
//!
//! ## Features
//!
//! - **Spatial Partitioning**: Fixed-size regions bound subscription volume
//! - **Player Sync**: Throttled position broadcasts, last-write-wins reconciliation
//! - **Structures & Resources**: Player-built structures and harvestable nodes
//! - **Land Claims**: Time-bounded region ownership, expiring without revoke events
//! - **Trades**: Offer / counter / accept negotiation with local-only validation
//! - **Guilds**: Invite-gated membership, leader-controlled ranks and alliances
//!
//! ## Example
//!
//! ```rust,ignore
//! use nostr_frontier::{Frontier, FrontierEvent, WorldConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorldConfig::new("frontier-main")
//!         .region_size(500.0)
//!         .view_radius(750.0);
//!
//!     let frontier = Frontier::new(config).await?;
//!     frontier.connect().await?;
//!     frontier.enter_world(4200.0, 1337.0).await?;
//!
//!     while let Some(event) = frontier.recv().await {
//!         match event {
//!             FrontierEvent::WorldSynced => {
//!                 println!("World state replayed");
//!             }
//!             FrontierEvent::PlayerAppeared { pubkey, position } => {
//!                 println!("{} appeared at ({}, {})", pubkey, position.x, position.y);
//!             }
//!             FrontierEvent::TradeOffered(trade) => {
//!                 println!("Trade offer: {}", trade.trade_id);
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod clock;
pub mod error;
pub mod frontier;
pub mod guild;
pub mod player;
pub mod protocol;
pub mod quest;
pub mod region;
pub mod trade;
pub mod types;
pub mod world;

#[cfg(test)]
mod tests;

pub use client::NostrClient;
pub use error::{FrontierError, Result};
pub use frontier::{Frontier, FrontierEvent};
pub use guild::{GuildEffect, GuildRegistry};
pub use player::{LocalPlayer, MovementOutcome, PlayerSync, RemotePlayer};
pub use protocol::{GameEvent, GamePayload, decode_event, encode_event, kinds, supported_kinds};
pub use quest::{QuestOutcome, QuestState, QuestTracker};
pub use region::{Region, RegionMap, region_for, visible_regions};
pub use trade::{TradeBook, TradeEffect};
pub use types::*;
pub use world::{World, WorldChange};
