//! Quest progress tracker.
//!
//! Ephemeral and advisory: counters are broadcast but never
//! authoritative. A quest completes locally the moment its counter
//! reaches the target, regardless of remote confirmation.

use crate::protocol::QuestProgressPayload;
use std::collections::HashMap;

/// Local view of one quest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestState {
    pub quest_id: String,
    pub counter: u32,
    pub target: u32,
    pub completed: bool,
}

#[derive(Debug, Default)]
pub struct QuestTracker {
    quests: HashMap<String, QuestState>,
}

/// Result of applying progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestOutcome {
    Ignored,
    Progressed,
    Completed,
}

impl QuestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quest(&self, quest_id: &str) -> Option<&QuestState> {
        self.quests.get(quest_id)
    }

    pub fn quests(&self) -> impl Iterator<Item = &QuestState> {
        self.quests.values()
    }

    /// Start tracking a quest at zero. No-op if already tracked.
    pub fn track(&mut self, quest_id: &str, target: u32) -> &QuestState {
        self.quests
            .entry(quest_id.to_string())
            .or_insert_with(|| QuestState {
                quest_id: quest_id.to_string(),
                counter: 0,
                target,
                completed: false,
            })
    }

    /// Advance the local counter and return the payload to broadcast.
    pub fn advance(&mut self, quest_id: &str, by: u32) -> (QuestOutcome, QuestProgressPayload) {
        let state = self.quests.entry(quest_id.to_string()).or_insert_with(|| QuestState {
            quest_id: quest_id.to_string(),
            counter: 0,
            target: u32::MAX,
            completed: false,
        });
        state.counter = state.counter.saturating_add(by);
        let outcome = Self::settle(state);
        let payload = QuestProgressPayload {
            quest_id: state.quest_id.clone(),
            counter: state.counter,
            target: state.target,
        };
        (outcome, payload)
    }

    /// Apply a broadcast progress counter.
    ///
    /// Idempotent: a counter at or below the recorded value is ignored,
    /// so duplicated or reordered delivery cannot regress progress.
    pub fn apply_progress(&mut self, payload: &QuestProgressPayload) -> QuestOutcome {
        let state = self
            .quests
            .entry(payload.quest_id.clone())
            .or_insert_with(|| QuestState {
                quest_id: payload.quest_id.clone(),
                counter: 0,
                target: payload.target,
                completed: false,
            });
        if payload.counter <= state.counter {
            return QuestOutcome::Ignored;
        }
        state.counter = payload.counter;
        Self::settle(state)
    }

    fn settle(state: &mut QuestState) -> QuestOutcome {
        if !state.completed && state.counter >= state.target {
            state.completed = true;
            QuestOutcome::Completed
        } else {
            QuestOutcome::Progressed
        }
    }
}
