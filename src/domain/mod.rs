//! Domain types for the fight lifecycle.
//!
//! This module provides:
//! - Primitives: TimeMs, Address, Lovelace, OutputRef
//! - The Fight entity and its forward-only status machine
//! - Reward slots, fighter records and trait sets
//! - Ledger output shapes consumed by the payment matcher

pub mod fight;
pub mod primitives;
pub mod reward;
pub mod utxo;

pub use fight::{Corner, DisplayStatus, Fight, FightOutcome, FightStatus, EXPIRY_MINUTES};
pub use primitives::{Address, Lovelace, OutputRef, TimeMs};
pub use reward::{FighterRecord, RewardSlot, TraitSet};
pub use utxo::{AssetAmount, TxIo, TxUtxos, UnspentOutput, BASE_UNIT};
