//! Ledger query/submission client for a Blockfrost-compatible REST API.

use super::{classify_status, DataSourceError, LedgerSource};
use crate::domain::{Address, AssetAmount, OutputRef, TxIo, TxUtxos, UnspentOutput};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Outputs per page when listing unspent outputs.
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct BlockfrostLedger {
    client: Client,
    base_url: String,
    project_id: String,
    retry_window: Duration,
}

#[derive(Debug, Deserialize)]
struct AmountJson {
    unit: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct AddressUtxoJson {
    tx_hash: String,
    output_index: u32,
    amount: Vec<AmountJson>,
}

#[derive(Debug, Deserialize)]
struct TxIoJson {
    address: String,
    amount: Vec<AmountJson>,
}

#[derive(Debug, Deserialize)]
struct TxUtxosJson {
    hash: String,
    inputs: Vec<TxIoJson>,
    outputs: Vec<TxIoJson>,
}

#[derive(Debug, Deserialize)]
struct BlockJson {
    slot: Option<u64>,
}

fn parse_amounts(amounts: Vec<AmountJson>) -> Result<Vec<AssetAmount>, DataSourceError> {
    amounts
        .into_iter()
        .map(|a| {
            let quantity = a.quantity.parse::<u64>().map_err(|_| {
                DataSourceError::ParseError(format!("Invalid quantity: {}", a.quantity))
            })?;
            Ok(AssetAmount {
                unit: a.unit,
                quantity,
            })
        })
        .collect()
}

fn parse_tx_io(io: Vec<TxIoJson>) -> Result<Vec<TxIo>, DataSourceError> {
    io.into_iter()
        .map(|i| {
            Ok(TxIo {
                address: Address::new(i.address),
                amounts: parse_amounts(i.amount)?,
            })
        })
        .collect()
}

impl BlockfrostLedger {
    pub fn new(base_url: String, project_id: String, timeout: Duration) -> Result<Self, DataSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            retry_window: Duration::from_secs(30),
        })
    }

    /// GET `path`, retrying transient failures. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned + Send>(&self, path: &str) -> Result<Option<T>, DataSourceError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .header("project_id", &self.project_id)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, body));
            }

            response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl LedgerSource for BlockfrostLedger {
    async fn list_unspent(&self, address: &str) -> Result<Vec<UnspentOutput>, DataSourceError> {
        let mut outputs = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "/addresses/{}/utxos?page={}&count={}&order=asc",
                address, page, PAGE_SIZE
            );
            // An address with no history answers 404.
            let batch: Vec<AddressUtxoJson> = self.get_json(&path).await?.unwrap_or_default();
            let fetched = batch.len();
            for utxo in batch {
                outputs.push(UnspentOutput {
                    output_ref: OutputRef::new(utxo.tx_hash, utxo.output_index),
                    amounts: parse_amounts(utxo.amount)?,
                });
            }
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        debug!(address, count = outputs.len(), "Listed unspent outputs");
        Ok(outputs)
    }

    async fn tx_utxos(&self, tx_hash: &str) -> Result<TxUtxos, DataSourceError> {
        let parsed: TxUtxosJson = self
            .get_json(&format!("/txs/{}/utxos", tx_hash))
            .await?
            .ok_or_else(|| DataSourceError::NotFound(format!("transaction {}", tx_hash)))?;
        Ok(TxUtxos {
            hash: parsed.hash,
            inputs: parse_tx_io(parsed.inputs)?,
            outputs: parse_tx_io(parsed.outputs)?,
        })
    }

    async fn latest_slot(&self) -> Result<u64, DataSourceError> {
        let block: BlockJson = self
            .get_json("/blocks/latest")
            .await?
            .ok_or_else(|| DataSourceError::ParseError("No latest block".to_string()))?;
        block
            .slot
            .ok_or_else(|| DataSourceError::ParseError("Latest block has no slot".to_string()))
    }

    async fn transaction_exists(&self, tx_hash: &str) -> Result<bool, DataSourceError> {
        let found: Option<serde_json::Value> = self.get_json(&format!("/txs/{}", tx_hash)).await?;
        Ok(found.is_some())
    }

    async fn submit_tx(&self, cbor: &[u8]) -> Result<String, DataSourceError> {
        // Not retried here; a failed submission is retried on the next pass.
        let response = self
            .client
            .post(format!("{}/tx/submit", self.base_url))
            .header("project_id", &self.project_id)
            .header("Content-Type", "application/cbor")
            .body(cbor.to_vec())
            .send()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DataSourceError::NetworkError(e.to_string()))?;
        if status == StatusCode::BAD_REQUEST {
            return Err(DataSourceError::Rejected(body));
        }
        if !status.is_success() {
            return Err(DataSourceError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }
        let tx_id = parse_submit_response(&body)?;
        info!(tx_id = %tx_id, "Submitted transaction");
        Ok(tx_id)
    }
}

/// The submit endpoint answers with the transaction id as a JSON string.
fn parse_submit_response(body: &str) -> Result<String, DataSourceError> {
    serde_json::from_str::<String>(body)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid submit response: {}", e)))
}
