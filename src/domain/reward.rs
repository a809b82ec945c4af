//! Reward asset slots, fighter records and trait sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named trait values of a collectible, keyed by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitSet(pub BTreeMap<String, String>);

impl TraitSet {
    pub fn new() -> Self {
        TraitSet(BTreeMap::new())
    }

    pub fn with(mut self, category: &str, value: &str) -> Self {
        self.insert(category, value);
        self
    }

    pub fn insert(&mut self, category: &str, value: &str) {
        self.0.insert(category.to_string(), value.to_string());
    }

    pub fn get(&self, category: &str) -> Option<&str> {
        self.0.get(category).map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A pre-provisioned auxiliary collectible awaiting assignment to a fight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSlot {
    /// Sequential identifier; slots are claimed lowest-first.
    pub id: i64,
    /// On-chain asset name, e.g. `Reward00042`.
    pub asset_name: String,
    /// Human readable name used in metadata and announcements.
    pub display_name: String,
    pub traits: TraitSet,
    pub fight_id: Option<i64>,
    pub content_hash: Option<String>,
}

/// Aggregate win/loss counters of a named fighter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterRecord {
    pub name: String,
    pub wins: i64,
    pub losses: i64,
}

impl FighterRecord {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            wins: 0,
            losses: 0,
        }
    }

    /// Record string after this fighter wins one more fight.
    pub fn after_win(&self) -> String {
        format_record(self.wins + 1, self.losses)
    }

    /// Record string after this fighter loses one more fight.
    pub fn after_loss(&self) -> String {
        format_record(self.wins, self.losses + 1)
    }
}

fn format_record(wins: i64, losses: i64) -> String {
    format!("{:03}-{:03}", wins, losses)
}
