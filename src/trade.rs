//! Trade negotiation state machine.
//!
//! All events of one negotiation share the trade id minted by the
//! original offerer. Transitions are Offered→Countered→Accepted, with
//! Declined reachable from Offered or Countered; anything else is
//! rejected. There is no cross-client atomic transaction; the
//! guarantee is that two clients observing the same event sequence
//! reach the same final inventories.

use crate::clock::now_secs;
use crate::error::{FrontierError, Result};
use crate::protocol::{TradeAction, TradePayload};
use crate::types::{Item, Trade, TradeStatus, generate_trade_id};
use std::collections::HashMap;
use tracing::debug;

/// What an applied trade event changed
#[derive(Debug, Clone)]
pub enum TradeEffect {
    Offered(Trade),
    Countered(Trade),
    /// Terms settled; the engine moves items and bumps counters.
    Finalized(Trade),
    Declined(Trade),
}

pub struct TradeBook {
    local_pubkey: String,
    trades: HashMap<String, Trade>,
}

impl TradeBook {
    pub fn new(local_pubkey: String) -> Self {
        Self {
            local_pubkey,
            trades: HashMap::new(),
        }
    }

    pub fn get(&self, trade_id: &str) -> Option<&Trade> {
        self.trades.get(trade_id)
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    /// Mint and record a new offer from the local player. The caller
    /// has already checked it holds the offered items.
    pub fn create_offer(
        &mut self,
        recipient_pubkey: &str,
        offered_items: Vec<Item>,
        requested_items: Vec<Item>,
    ) -> Trade {
        let trade = Trade {
            trade_id: generate_trade_id(&self.local_pubkey),
            sender_pubkey: self.local_pubkey.clone(),
            recipient_pubkey: recipient_pubkey.to_string(),
            offered_items,
            requested_items,
            status: TradeStatus::Offered,
            updated_at: now_secs(),
        };
        self.trades.insert(trade.trade_id.clone(), trade.clone());
        trade
    }

    /// Record a local counter-offer and return the wire payload.
    pub fn create_counter(
        &mut self,
        trade_id: &str,
        offered_items: Vec<Item>,
        requested_items: Vec<Item>,
    ) -> Result<TradePayload> {
        let trade = self
            .trades
            .get_mut(trade_id)
            .ok_or_else(|| FrontierError::UnknownTrade(trade_id.to_string()))?;
        if trade.status != TradeStatus::Offered {
            return Err(FrontierError::Consistency(format!(
                "trade {trade_id} is not open for countering"
            )));
        }
        if trade.recipient_pubkey != self.local_pubkey {
            return Err(FrontierError::NotAuthorized(
                "only the offer recipient may counter".to_string(),
            ));
        }
        trade.offered_items = offered_items;
        trade.requested_items = requested_items;
        trade.status = TradeStatus::Countered;
        trade.updated_at = now_secs();
        Ok(TradePayload {
            trade_id: trade.trade_id.clone(),
            recipient_pubkey: trade.sender_pubkey.clone(),
            action: TradeAction::Counter,
            offered_items: trade.offered_items.clone(),
            requested_items: trade.requested_items.clone(),
        })
    }

    /// Mark a countered trade accepted by the local player (the
    /// original offerer) and return the wire payload. The caller
    /// validates its own holdings first.
    pub fn create_accept(&mut self, trade_id: &str) -> Result<(Trade, TradePayload)> {
        let trade = self
            .trades
            .get_mut(trade_id)
            .ok_or_else(|| FrontierError::UnknownTrade(trade_id.to_string()))?;
        if trade.status != TradeStatus::Countered {
            return Err(FrontierError::Consistency(format!(
                "trade {trade_id} cannot be accepted from {:?}",
                trade.status
            )));
        }
        if trade.sender_pubkey != self.local_pubkey {
            return Err(FrontierError::NotAuthorized(
                "only the original offerer may accept a counter".to_string(),
            ));
        }
        trade.status = TradeStatus::Accepted;
        trade.updated_at = now_secs();
        let payload = TradePayload {
            trade_id: trade.trade_id.clone(),
            recipient_pubkey: trade.recipient_pubkey.clone(),
            action: TradeAction::Accept,
            offered_items: vec![],
            requested_items: vec![],
        };
        Ok((trade.clone(), payload))
    }

    /// Decline an open trade locally and return the wire payload.
    pub fn create_decline(&mut self, trade_id: &str) -> Result<TradePayload> {
        let trade = self
            .trades
            .get_mut(trade_id)
            .ok_or_else(|| FrontierError::UnknownTrade(trade_id.to_string()))?;
        if !matches!(trade.status, TradeStatus::Offered | TradeStatus::Countered) {
            return Err(FrontierError::Consistency(format!(
                "trade {trade_id} is already settled"
            )));
        }
        let counterpart = if trade.sender_pubkey == self.local_pubkey {
            trade.recipient_pubkey.clone()
        } else {
            trade.sender_pubkey.clone()
        };
        trade.status = TradeStatus::Declined;
        trade.updated_at = now_secs();
        Ok(TradePayload {
            trade_id: trade.trade_id.clone(),
            recipient_pubkey: counterpart,
            action: TradeAction::Decline,
            offered_items: vec![],
            requested_items: vec![],
        })
    }

    /// Apply a trade event from the network.
    ///
    /// Invalid transitions and events from non-participants are
    /// rejected; duplicates of already-applied steps are no-ops.
    pub fn apply_event(
        &mut self,
        payload: &TradePayload,
        sender: &str,
        created_at: u64,
    ) -> Result<Option<TradeEffect>> {
        match payload.action {
            TradeAction::Offer => {
                if self.trades.contains_key(&payload.trade_id) {
                    return Ok(None);
                }
                let trade = Trade {
                    trade_id: payload.trade_id.clone(),
                    sender_pubkey: sender.to_string(),
                    recipient_pubkey: payload.recipient_pubkey.clone(),
                    offered_items: payload.offered_items.clone(),
                    requested_items: payload.requested_items.clone(),
                    status: TradeStatus::Offered,
                    updated_at: created_at,
                };
                self.trades.insert(trade.trade_id.clone(), trade.clone());
                debug!("Trade offered: {}", trade.trade_id);
                Ok(Some(TradeEffect::Offered(trade)))
            }

            TradeAction::Counter => {
                let trade = self
                    .trades
                    .get_mut(&payload.trade_id)
                    .ok_or_else(|| FrontierError::UnknownTrade(payload.trade_id.clone()))?;
                if trade.status != TradeStatus::Offered {
                    return Ok(None);
                }
                if sender != trade.recipient_pubkey {
                    return Err(FrontierError::NotAuthorized(
                        "counter must come from the offer recipient".to_string(),
                    ));
                }
                trade.offered_items = payload.offered_items.clone();
                trade.requested_items = payload.requested_items.clone();
                trade.status = TradeStatus::Countered;
                trade.updated_at = created_at;
                Ok(Some(TradeEffect::Countered(trade.clone())))
            }

            TradeAction::Accept => {
                let trade = self
                    .trades
                    .get_mut(&payload.trade_id)
                    .ok_or_else(|| FrontierError::UnknownTrade(payload.trade_id.clone()))?;
                if trade.status == TradeStatus::Accepted {
                    return Ok(None);
                }
                if trade.status != TradeStatus::Countered {
                    return Err(FrontierError::Consistency(format!(
                        "trade {} cannot be accepted from {:?}",
                        payload.trade_id, trade.status
                    )));
                }
                if sender != trade.sender_pubkey {
                    return Err(FrontierError::NotAuthorized(
                        "accept must come from the original offerer".to_string(),
                    ));
                }
                trade.status = TradeStatus::Accepted;
                trade.updated_at = created_at;
                debug!("Trade accepted: {}", trade.trade_id);
                Ok(Some(TradeEffect::Finalized(trade.clone())))
            }

            TradeAction::Decline => {
                let trade = self
                    .trades
                    .get_mut(&payload.trade_id)
                    .ok_or_else(|| FrontierError::UnknownTrade(payload.trade_id.clone()))?;
                if !matches!(trade.status, TradeStatus::Offered | TradeStatus::Countered) {
                    return Ok(None);
                }
                if sender != trade.sender_pubkey && sender != trade.recipient_pubkey {
                    return Err(FrontierError::NotAuthorized(
                        "decline must come from a participant".to_string(),
                    ));
                }
                trade.status = TradeStatus::Declined;
                trade.updated_at = created_at;
                Ok(Some(TradeEffect::Declined(trade.clone())))
            }
        }
    }

    /// The items the local player is obligated to give if this trade
    /// finalizes, from its own perspective only.
    pub fn local_obligation<'a>(&self, trade: &'a Trade) -> &'a [Item] {
        if trade.sender_pubkey == self.local_pubkey {
            &trade.offered_items
        } else {
            &trade.requested_items
        }
    }

    /// The items the local player receives if this trade finalizes.
    pub fn local_entitlement<'a>(&self, trade: &'a Trade) -> &'a [Item] {
        if trade.sender_pubkey == self.local_pubkey {
            &trade.requested_items
        } else {
            &trade.offered_items
        }
    }
}
