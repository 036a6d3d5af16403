//! Guild registry: membership, ranks and alliances.
//!
//! Joins are invite-gated: a join is honored only after an invite
//! addressed to the joining pubkey has been observed for that guild.
//! Rank updates must be authored by the recorded leader; an alliance
//! needs matching leader pubkeys on the proposal and its acceptance.
//! The relay accepts anything; all enforcement happens here.

use crate::error::{FrontierError, Result};
use crate::protocol::{
    AllianceAction, GuildAlliancePayload, GuildCreationPayload, GuildInvitePayload,
    GuildJoinPayload, GuildRankPayload,
};
use crate::types::{Guild, GuildRank, generate_guild_id};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// What an applied guild event changed
#[derive(Debug, Clone)]
pub enum GuildEffect {
    Created(Guild),
    InviteRecorded { guild_id: String, invitee: String },
    MemberJoined { guild_id: String, pubkey: String },
    RankChanged { guild_id: String, member: String, rank: GuildRank },
    AllianceProposed { from_guild: String, to_guild: String },
    AllianceFormed { guild_id: String, other_guild_id: String },
}

pub struct GuildRegistry {
    local_pubkey: String,
    guilds: HashMap<String, Guild>,
    /// Invites observed so far: guild id → invitee → inviting pubkey
    invites: HashMap<String, HashMap<String, String>>,
    /// Pending alliance proposals: (proposing, target) → proposing
    /// leader at proposal time
    pending_alliances: HashMap<(String, String), String>,
}

impl GuildRegistry {
    pub fn new(local_pubkey: String) -> Self {
        Self {
            local_pubkey,
            guilds: HashMap::new(),
            invites: HashMap::new(),
            pending_alliances: HashMap::new(),
        }
    }

    pub fn guild(&self, guild_id: &str) -> Option<&Guild> {
        self.guilds.get(guild_id)
    }

    pub fn guilds(&self) -> impl Iterator<Item = &Guild> {
        self.guilds.values()
    }

    /// Whether an invite for this pubkey has been observed.
    pub fn has_invite(&self, guild_id: &str, pubkey: &str) -> bool {
        self.invites
            .get(guild_id)
            .map(|m| m.contains_key(pubkey))
            .unwrap_or(false)
    }

    /// An invite counts only if its author may invite for the guild at
    /// the time the join is applied.
    fn invite_authorized(&self, guild_id: &str, invitee: &str) -> Result<bool> {
        let inviter = match self.invites.get(guild_id).and_then(|m| m.get(invitee)) {
            Some(inviter) => inviter.clone(),
            None => return Ok(false),
        };
        self.may_invite(guild_id, &inviter)
    }

    fn expect_guild(&self, guild_id: &str) -> Result<&Guild> {
        self.guilds
            .get(guild_id)
            .ok_or_else(|| FrontierError::UnknownGuild(guild_id.to_string()))
    }

    fn is_leader(&self, guild_id: &str, pubkey: &str) -> Result<bool> {
        Ok(self.expect_guild(guild_id)?.leader_pubkey == pubkey)
    }

    fn may_invite(&self, guild_id: &str, pubkey: &str) -> Result<bool> {
        let guild = self.expect_guild(guild_id)?;
        Ok(guild.leader_pubkey == pubkey
            || matches!(guild.ranks.get(pubkey), Some(GuildRank::Officer)))
    }

    // Local actions: mutate the registry and return the wire payload.

    /// Found a guild led by the local player.
    pub fn create_guild(&mut self, name: &str) -> (Guild, GuildCreationPayload) {
        let guild_id = generate_guild_id(name);
        let mut ranks = HashMap::new();
        ranks.insert(self.local_pubkey.clone(), GuildRank::Leader);
        let guild = Guild {
            id: guild_id.clone(),
            name: name.to_string(),
            leader_pubkey: self.local_pubkey.clone(),
            members: HashSet::from([self.local_pubkey.clone()]),
            ranks,
            score: 0,
            allies: HashSet::new(),
        };
        self.guilds.insert(guild_id.clone(), guild.clone());
        info!("Created guild {} ({})", name, guild_id);
        let payload = GuildCreationPayload {
            guild_id,
            name: name.to_string(),
        };
        (guild, payload)
    }

    /// Invite a player (leader or officer only).
    pub fn create_invite(&mut self, guild_id: &str, invitee: &str) -> Result<GuildInvitePayload> {
        if !self.may_invite(guild_id, &self.local_pubkey)? {
            return Err(FrontierError::NotAuthorized(
                "only the leader or an officer may invite".to_string(),
            ));
        }
        self.invites
            .entry(guild_id.to_string())
            .or_default()
            .insert(invitee.to_string(), self.local_pubkey.clone());
        Ok(GuildInvitePayload {
            guild_id: guild_id.to_string(),
            invitee_pubkey: invitee.to_string(),
        })
    }

    /// Join a guild the local player was invited to. Rejected unless an
    /// invite addressed to the local pubkey was observed first.
    pub fn create_join(&mut self, guild_id: &str) -> Result<GuildJoinPayload> {
        self.expect_guild(guild_id)?;
        if !self.invite_authorized(guild_id, &self.local_pubkey)? {
            return Err(FrontierError::NotAuthorized(format!(
                "no invite observed for guild {guild_id}"
            )));
        }
        let local = self.local_pubkey.clone();
        self.admit(guild_id, &local);
        Ok(GuildJoinPayload {
            guild_id: guild_id.to_string(),
        })
    }

    /// Change a member's rank (leader only).
    pub fn create_rank_update(
        &mut self,
        guild_id: &str,
        member: &str,
        rank: GuildRank,
    ) -> Result<GuildRankPayload> {
        if !self.is_leader(guild_id, &self.local_pubkey)? {
            return Err(FrontierError::NotAuthorized(
                "only the leader may change ranks".to_string(),
            ));
        }
        self.set_rank(guild_id, member, rank)?;
        Ok(GuildRankPayload {
            guild_id: guild_id.to_string(),
            member_pubkey: member.to_string(),
            rank,
        })
    }

    /// Propose an alliance to another guild (leader only).
    pub fn create_alliance_proposal(
        &mut self,
        guild_id: &str,
        other_guild_id: &str,
    ) -> Result<GuildAlliancePayload> {
        if !self.is_leader(guild_id, &self.local_pubkey)? {
            return Err(FrontierError::NotAuthorized(
                "only the leader may propose an alliance".to_string(),
            ));
        }
        self.pending_alliances.insert(
            (guild_id.to_string(), other_guild_id.to_string()),
            self.local_pubkey.clone(),
        );
        Ok(GuildAlliancePayload {
            guild_id: guild_id.to_string(),
            other_guild_id: other_guild_id.to_string(),
            action: AllianceAction::Propose,
        })
    }

    /// Accept a proposal addressed to a guild the local player leads.
    pub fn create_alliance_accept(
        &mut self,
        guild_id: &str,
        proposer_guild_id: &str,
    ) -> Result<GuildAlliancePayload> {
        if !self.is_leader(guild_id, &self.local_pubkey)? {
            return Err(FrontierError::NotAuthorized(
                "only the leader may accept an alliance".to_string(),
            ));
        }
        self.settle_alliance(proposer_guild_id, guild_id)?;
        Ok(GuildAlliancePayload {
            guild_id: guild_id.to_string(),
            other_guild_id: proposer_guild_id.to_string(),
            action: AllianceAction::Accept,
        })
    }

    // Inbound events.

    pub fn apply_creation(
        &mut self,
        payload: &GuildCreationPayload,
        sender: &str,
    ) -> Option<GuildEffect> {
        if self.guilds.contains_key(&payload.guild_id) {
            return None;
        }
        let mut ranks = HashMap::new();
        ranks.insert(sender.to_string(), GuildRank::Leader);
        let guild = Guild {
            id: payload.guild_id.clone(),
            name: payload.name.clone(),
            leader_pubkey: sender.to_string(),
            members: HashSet::from([sender.to_string()]),
            ranks,
            score: 0,
            allies: HashSet::new(),
        };
        self.guilds.insert(guild.id.clone(), guild.clone());
        debug!("Observed guild creation: {}", guild.id);
        Some(GuildEffect::Created(guild))
    }

    /// Record an invite. Invites may arrive before the creation event;
    /// they are held either way and only honored once the guild and its
    /// authorship can be checked at join time.
    pub fn apply_invite(
        &mut self,
        payload: &GuildInvitePayload,
        sender: &str,
    ) -> Result<Option<GuildEffect>> {
        if let Ok(authorized) = self.may_invite(&payload.guild_id, sender) {
            if !authorized {
                return Err(FrontierError::NotAuthorized(format!(
                    "{sender} may not invite for guild {}",
                    payload.guild_id
                )));
            }
        }
        let previous = self
            .invites
            .entry(payload.guild_id.clone())
            .or_default()
            .insert(payload.invitee_pubkey.clone(), sender.to_string());
        if previous.is_some() {
            return Ok(None);
        }
        Ok(Some(GuildEffect::InviteRecorded {
            guild_id: payload.guild_id.clone(),
            invitee: payload.invitee_pubkey.clone(),
        }))
    }

    /// Honor a join only when a matching invite was observed first.
    pub fn apply_join(
        &mut self,
        payload: &GuildJoinPayload,
        sender: &str,
    ) -> Result<Option<GuildEffect>> {
        self.expect_guild(&payload.guild_id)?;
        if !self.invite_authorized(&payload.guild_id, sender)? {
            return Err(FrontierError::NotAuthorized(format!(
                "join without observed invite: {} -> {}",
                sender, payload.guild_id
            )));
        }
        if self
            .guilds
            .get(&payload.guild_id)
            .map(|g| g.members.contains(sender))
            .unwrap_or(false)
        {
            return Ok(None);
        }
        self.admit(&payload.guild_id, sender);
        Ok(Some(GuildEffect::MemberJoined {
            guild_id: payload.guild_id.clone(),
            pubkey: sender.to_string(),
        }))
    }

    /// Apply a rank update only if authored by the recorded leader.
    pub fn apply_rank_update(
        &mut self,
        payload: &GuildRankPayload,
        sender: &str,
    ) -> Result<Option<GuildEffect>> {
        if !self.is_leader(&payload.guild_id, sender)? {
            return Err(FrontierError::NotAuthorized(format!(
                "rank update from non-leader {sender}"
            )));
        }
        self.set_rank(&payload.guild_id, &payload.member_pubkey, payload.rank)?;
        Ok(Some(GuildEffect::RankChanged {
            guild_id: payload.guild_id.clone(),
            member: payload.member_pubkey.clone(),
            rank: payload.rank,
        }))
    }

    pub fn apply_alliance(
        &mut self,
        payload: &GuildAlliancePayload,
        sender: &str,
    ) -> Result<Option<GuildEffect>> {
        match payload.action {
            AllianceAction::Propose => {
                if !self.is_leader(&payload.guild_id, sender)? {
                    return Err(FrontierError::NotAuthorized(format!(
                        "alliance proposal from non-leader {sender}"
                    )));
                }
                self.pending_alliances.insert(
                    (payload.guild_id.clone(), payload.other_guild_id.clone()),
                    sender.to_string(),
                );
                Ok(Some(GuildEffect::AllianceProposed {
                    from_guild: payload.guild_id.clone(),
                    to_guild: payload.other_guild_id.clone(),
                }))
            }
            AllianceAction::Accept => {
                // guild_id is the accepting guild, other_guild_id the proposer
                if !self.is_leader(&payload.guild_id, sender)? {
                    return Err(FrontierError::NotAuthorized(format!(
                        "alliance acceptance from non-leader {sender}"
                    )));
                }
                self.settle_alliance(&payload.other_guild_id, &payload.guild_id)?;
                Ok(Some(GuildEffect::AllianceFormed {
                    guild_id: payload.guild_id.clone(),
                    other_guild_id: payload.other_guild_id.clone(),
                }))
            }
        }
    }

    fn admit(&mut self, guild_id: &str, pubkey: &str) {
        if let Some(guild) = self.guilds.get_mut(guild_id) {
            guild.members.insert(pubkey.to_string());
            guild.ranks.insert(pubkey.to_string(), GuildRank::Member);
        }
        if let Some(invited) = self.invites.get_mut(guild_id) {
            invited.remove(pubkey);
        }
    }

    fn set_rank(&mut self, guild_id: &str, member: &str, rank: GuildRank) -> Result<()> {
        let guild = self
            .guilds
            .get_mut(guild_id)
            .ok_or_else(|| FrontierError::UnknownGuild(guild_id.to_string()))?;
        if !guild.members.contains(member) {
            return Err(FrontierError::Consistency(format!(
                "{member} is not a member of {guild_id}"
            )));
        }
        if rank == GuildRank::Leader && guild.leader_pubkey != member {
            // Leadership transfer: the old leader steps down to officer.
            let old = std::mem::replace(&mut guild.leader_pubkey, member.to_string());
            guild.ranks.insert(old, GuildRank::Officer);
        }
        guild.ranks.insert(member.to_string(), rank);
        Ok(())
    }

    /// Require a pending proposal whose author still matches the
    /// proposing guild's recorded leader, then link both guilds.
    fn settle_alliance(&mut self, proposer_guild: &str, accepting_guild: &str) -> Result<()> {
        let key = (proposer_guild.to_string(), accepting_guild.to_string());
        let proposer = self.pending_alliances.get(&key).cloned().ok_or_else(|| {
            FrontierError::Consistency(format!(
                "no alliance proposal from {proposer_guild} to {accepting_guild}"
            ))
        })?;
        if !self.is_leader(proposer_guild, &proposer)? {
            return Err(FrontierError::NotAuthorized(
                "alliance proposal no longer matches the proposing leader".to_string(),
            ));
        }
        self.pending_alliances.remove(&key);
        if let Some(guild) = self.guilds.get_mut(proposer_guild) {
            guild.allies.insert(accepting_guild.to_string());
        }
        if let Some(guild) = self.guilds.get_mut(accepting_guild) {
            guild.allies.insert(proposer_guild.to_string());
        }
        info!("Alliance formed: {} <-> {}", proposer_guild, accepting_guild);
        Ok(())
    }
}
