//! Asset metadata attached to the settlement mint (CIP-25 label 721).

use crate::domain::{Corner, Fight, RewardSlot};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Ledger limit for a single metadata string.
pub const MAX_FIELD_BYTES: usize = 64;

pub const METADATA_LABEL: &str = "721";

const MEDIA_TYPE_PNG: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata field {field} is {len} bytes, limit is 64")]
    FieldTooLarge { field: String, len: usize },
    #[error("fight {0} has no outcome")]
    MissingOutcome(i64),
    #[error("fight {0} has no artifact hash")]
    MissingArtifact(i64),
    #[error("metadata serialization failed: {0}")]
    Serialize(String),
}

/// Split `value` into pieces of at most `max` bytes, on char boundaries.
pub fn chunk(value: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in value.chars() {
        if current.len() + ch.len_utf8() > max {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn ipfs_uri(cid: &str) -> Vec<String> {
    chunk(&format!("ipfs://{}", cid), MAX_FIELD_BYTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub src: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetMetadata {
    pub name: String,
    pub image: Vec<String>,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub traits: BTreeMap<String, String>,
    pub files: Vec<FileEntry>,
}

impl AssetMetadata {
    fn png(name: String, file_name: &str, cid: &str) -> Self {
        Self {
            name,
            image: ipfs_uri(cid),
            media_type: MEDIA_TYPE_PNG.to_string(),
            traits: BTreeMap::new(),
            files: vec![FileEntry {
                name: file_name.to_string(),
                media_type: MEDIA_TYPE_PNG.to_string(),
                src: ipfs_uri(cid),
            }],
        }
    }
}

/// On-chain asset name of the fight-result collectible bound to a slot.
pub fn fight_asset_name(slot: &RewardSlot) -> String {
    format!("Fight{}", slot.id)
}

/// Metadata for the fight-result asset of a staged fight.
pub fn fight_metadata(fight: &Fight, slot: &RewardSlot) -> Result<AssetMetadata, MetadataError> {
    let outcome = fight
        .outcome
        .as_ref()
        .ok_or(MetadataError::MissingOutcome(fight.id))?;
    let cid = fight
        .fight_hash
        .as_deref()
        .ok_or(MetadataError::MissingArtifact(fight.id))?;

    let mut meta = AssetMetadata::png(format!("Fight #{}", slot.id), "Fight", cid);
    let traits = &mut meta.traits;
    traits.insert("Red Fighter".to_string(), fight.red_fighter.clone());
    traits.insert("Blue Fighter".to_string(), fight.blue_fighter.clone());
    if let Some(background) = &fight.background {
        traits.insert("Background".to_string(), background.replace('-', ""));
    }
    traits.insert("Red Life Bar".to_string(), outcome.red_life.to_string());
    traits.insert("Blue Life Bar".to_string(), outcome.blue_life.to_string());
    traits.insert("Red Record".to_string(), outcome.red_record.clone());
    traits.insert("Blue Record".to_string(), outcome.blue_record.clone());
    traits.insert("Red KO".to_string(), outcome.red_ko.to_string());
    traits.insert("Blue KO".to_string(), outcome.blue_ko.to_string());
    let winner = match outcome.winner {
        Corner::Red => "Red",
        Corner::Blue => "Blue",
    };
    traits.insert("Fight Winner".to_string(), winner.to_string());
    Ok(meta)
}

/// Metadata for the reward asset rendered for `slot`.
pub fn reward_metadata(slot: &RewardSlot) -> Result<AssetMetadata, MetadataError> {
    let cid = slot
        .content_hash
        .as_deref()
        .ok_or(MetadataError::MissingArtifact(slot.fight_id.unwrap_or_default()))?;
    let mut meta = AssetMetadata::png(slot.display_name.clone(), "Reward", cid);
    for (category, value) in slot.traits.iter() {
        meta.traits.insert(category.to_string(), value.replace('-', ""));
    }
    Ok(meta)
}

/// The full attachment, grouped by policy then asset name.
#[derive(Debug, Clone, Default)]
pub struct MintMetadata {
    entries: BTreeMap<String, BTreeMap<String, AssetMetadata>>,
}

impl MintMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, policy_id: &str, asset_name: &str, meta: AssetMetadata) {
        self.entries
            .entry(policy_id.to_string())
            .or_default()
            .insert(asset_name.to_string(), meta);
    }

    /// Serialize and check every key and string leaf against the field limit.
    pub fn to_json(&self) -> Result<Value, MetadataError> {
        let body =
            serde_json::to_value(&self.entries).map_err(|e| MetadataError::Serialize(e.to_string()))?;
        check_fields("", &body)?;
        Ok(json!({ (METADATA_LABEL): body }))
    }
}

fn check_fields(path: &str, value: &Value) -> Result<(), MetadataError> {
    let too_large = |field: String, len: usize| MetadataError::FieldTooLarge { field, len };
    match value {
        Value::String(s) if s.len() > MAX_FIELD_BYTES => Err(too_large(path.to_string(), s.len())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_fields(&format!("{}[{}]", path, i), item)),
        Value::Object(map) => map.iter().try_for_each(|(key, item)| {
            let child = format!("{}/{}", path, key);
            if key.len() > MAX_FIELD_BYTES {
                return Err(too_large(child, key.len()));
            }
            check_fields(&child, item)
        }),
        _ => Ok(()),
    }
}
