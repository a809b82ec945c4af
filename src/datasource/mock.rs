//! Mock collaborators for testing without network calls.

use super::{
    Announcement, Announcer, ContentStore, DataSourceError, FightImageRequest, ImageRenderer,
    LedgerSource, RenderedFight, RewardImageRequest,
};
use crate::domain::{OutputRef, TxUtxos, UnspentOutput};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

fn lock_err() -> DataSourceError {
    DataSourceError::NetworkError("mock state poisoned".to_string())
}

#[derive(Debug, Default)]
struct LedgerState {
    unspent: Vec<UnspentOutput>,
    txs: HashMap<String, TxUtxos>,
    confirmed: HashSet<String>,
    submitted: Vec<Vec<u8>>,
    slot: u64,
    offline: bool,
}

/// In-memory ledger. Submitted transactions get the sha256 of their bytes as id.
#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(self, slot: u64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.slot = slot;
        }
        self
    }

    /// Add an output at the service address and the transaction that created it.
    pub fn add_payment(&self, output: UnspentOutput, tx: TxUtxos) {
        if let Ok(mut state) = self.state.lock() {
            state.txs.insert(output.output_ref.tx_hash.clone(), tx);
            state.unspent.push(output);
        }
    }

    pub fn add_unspent(&self, output: UnspentOutput) {
        if let Ok(mut state) = self.state.lock() {
            state.unspent.push(output);
        }
    }

    /// Drop an output from the unspent set, as if spent elsewhere.
    pub fn remove_unspent(&self, output_ref: &OutputRef) {
        if let Ok(mut state) = self.state.lock() {
            state.unspent.retain(|o| &o.output_ref != output_ref);
        }
    }

    /// Mark a submitted transaction as accepted by the ledger.
    pub fn confirm(&self, tx_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.confirmed.insert(tx_id.to_string());
        }
    }

    /// Make every call fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|s| s.submitted.clone())
            .unwrap_or_default()
    }

    pub fn tx_id_for(cbor: &[u8]) -> String {
        hex::encode(Sha256::digest(cbor))
    }

    fn check_online(state: &LedgerState) -> Result<(), DataSourceError> {
        if state.offline {
            return Err(DataSourceError::NetworkError("mock ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerSource for MockLedger {
    async fn list_unspent(&self, _address: &str) -> Result<Vec<UnspentOutput>, DataSourceError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Self::check_online(&state)?;
        Ok(state.unspent.clone())
    }

    async fn tx_utxos(&self, tx_hash: &str) -> Result<TxUtxos, DataSourceError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Self::check_online(&state)?;
        state
            .txs
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| DataSourceError::NotFound(format!("transaction {}", tx_hash)))
    }

    async fn latest_slot(&self) -> Result<u64, DataSourceError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Self::check_online(&state)?;
        Ok(state.slot)
    }

    async fn transaction_exists(&self, tx_hash: &str) -> Result<bool, DataSourceError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Self::check_online(&state)?;
        Ok(state.confirmed.contains(tx_hash))
    }

    async fn submit_tx(&self, cbor: &[u8]) -> Result<String, DataSourceError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        Self::check_online(&state)?;
        state.submitted.push(cbor.to_vec());
        Ok(Self::tx_id_for(cbor))
    }
}

/// Renders fixed bytes and a fixed background.
#[derive(Debug)]
pub struct MockImageRenderer {
    background: String,
    fail: bool,
    calls: Mutex<usize>,
}

impl MockImageRenderer {
    pub fn new() -> Self {
        Self {
            background: "night-alley".to_string(),
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or_default()
    }

    fn record(&self) -> Result<(), DataSourceError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        if self.fail {
            return Err(DataSourceError::HttpError {
                status: 503,
                message: "renderer unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MockImageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageRenderer for MockImageRenderer {
    async fn render_reward(&self, request: &RewardImageRequest) -> Result<Vec<u8>, DataSourceError> {
        self.record()?;
        let body = serde_json::to_vec(request).map_err(|e| DataSourceError::ParseError(e.to_string()))?;
        Ok(body)
    }

    async fn render_fight(&self, request: &FightImageRequest) -> Result<RenderedFight, DataSourceError> {
        self.record()?;
        let bytes = serde_json::to_vec(request).map_err(|e| DataSourceError::ParseError(e.to_string()))?;
        Ok(RenderedFight {
            bytes,
            background: self.background.clone(),
        })
    }
}

/// Pins by hashing file contents.
#[derive(Debug, Default)]
pub struct MockContentStore {
    pinned: Mutex<Vec<String>>,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pinned(&self) -> Vec<String> {
        self.pinned.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn pin(&self, path: &Path) -> Result<String, DataSourceError> {
        let bytes = tokio::fs::read(path).await?;
        let cid = format!("bafy{}", hex::encode(Sha256::digest(&bytes)));
        if let Ok(mut pinned) = self.pinned.lock() {
            pinned.push(cid.clone());
        }
        Ok(cid)
    }
}

/// Records posts; optionally fails every one of them.
#[derive(Debug, Default)]
pub struct MockAnnouncer {
    fail: bool,
    posts: Mutex<Vec<Announcement>>,
}

impl MockAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn posts(&self) -> Vec<Announcement> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Announcer for MockAnnouncer {
    async fn announce(&self, post: &Announcement) -> Result<String, DataSourceError> {
        if self.fail {
            return Err(DataSourceError::HttpError {
                status: 500,
                message: "announcement service down".to_string(),
            });
        }
        let mut posts = self.posts.lock().map_err(|_| lock_err())?;
        posts.push(post.clone());
        Ok(format!("post-{}", posts.len()))
    }
}
