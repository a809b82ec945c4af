//! Domain primitives: TimeMs, Address, Lovelace, OutputRef.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn minus_minutes(&self, minutes: i64) -> Self {
        TimeMs(self.0.saturating_sub(minutes.saturating_mul(60_000)))
    }

    pub fn plus_minutes(&self, minutes: i64) -> Self {
        TimeMs(self.0.saturating_add(minutes.saturating_mul(60_000)))
    }
}

/// Ledger address (bech32 string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Create an Address from a string.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into())
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount in the ledger's smallest unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lovelace(pub u64);

impl Lovelace {
    pub const PER_UNIT: u64 = 1_000_000;

    pub fn new(amount: u64) -> Self {
        Lovelace(amount)
    }

    pub fn from_whole_units(units: u64) -> Self {
        Lovelace(units.saturating_mul(Self::PER_UNIT))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// SQLite integers are signed; amounts never approach i64::MAX.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn checked_add(self, other: Lovelace) -> Option<Lovelace> {
        self.0.checked_add(other.0).map(Lovelace)
    }

    pub fn checked_sub(self, other: Lovelace) -> Option<Lovelace> {
        self.0.checked_sub(other.0).map(Lovelace)
    }

    /// Whole units with six fractional digits, e.g. `125370000` -> `125.370000`.
    pub fn to_unit_string(&self) -> String {
        let mut value = Decimal::from(self.0);
        value.set_scale(6).ok();
        format!("{:.6}", value)
    }
}

impl fmt::Display for Lovelace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a ledger output: transaction id + output index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub tx_hash: String,
    pub index: u32,
}

impl OutputRef {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

impl FromStr for OutputRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once('#')
            .ok_or_else(|| format!("missing '#' in output ref: {}", s))?;
        if hash.is_empty() {
            return Err(format!("empty tx hash in output ref: {}", s));
        }
        let index = index
            .parse::<u32>()
            .map_err(|_| format!("invalid output index in: {}", s))?;
        Ok(OutputRef::new(hash, index))
    }
}
