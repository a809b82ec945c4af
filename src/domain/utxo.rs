//! Ledger outputs as seen by the orchestrator.

use crate::domain::{Address, Lovelace, OutputRef};
use serde::{Deserialize, Serialize};

/// Unit name of the ledger's base currency.
pub const BASE_UNIT: &str = "lovelace";

/// One asset entry of an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub unit: String,
    pub quantity: u64,
}

impl AssetAmount {
    pub fn lovelace(quantity: u64) -> Self {
        Self {
            unit: BASE_UNIT.to_string(),
            quantity,
        }
    }
}

/// An unspent output sitting at the service's receiving address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub output_ref: OutputRef,
    pub amounts: Vec<AssetAmount>,
}

impl UnspentOutput {
    /// Convenience constructor for a plain base-currency output.
    pub fn lovelace_only(tx_hash: impl Into<String>, index: u32, quantity: u64) -> Self {
        Self {
            output_ref: OutputRef::new(tx_hash, index),
            amounts: vec![AssetAmount::lovelace(quantity)],
        }
    }

    /// The base-currency amount when this output carries nothing else.
    pub fn pure_lovelace(&self) -> Option<Lovelace> {
        match self.amounts.as_slice() {
            [only] if only.unit == BASE_UNIT => Some(Lovelace::new(only.quantity)),
            _ => None,
        }
    }
}

/// One side of a transaction as returned by the ledger query service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIo {
    pub address: Address,
    pub amounts: Vec<AssetAmount>,
}

/// Inputs and outputs of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxUtxos {
    pub hash: String,
    pub inputs: Vec<TxIo>,
    pub outputs: Vec<TxIo>,
}

impl TxUtxos {
    /// Address that funded the transaction; refunds and fight assets go back here.
    pub fn origin_address(&self) -> Option<&Address> {
        self.inputs.first().map(|i| &i.address)
    }
}
