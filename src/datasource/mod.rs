//! Collaborators the orchestrator talks to: the ledger, the image renderer,
//! content-addressed storage and the announcement service.

use crate::domain::{TraitSet, TxUtxos, UnspentOutput};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub mod announce;
pub mod blockfrost;
pub mod image;
pub mod mock;
pub mod storage;

pub use announce::{fight_caption, HttpAnnouncer};
pub use blockfrost::BlockfrostLedger;
pub use image::HttpImageRenderer;
pub use mock::{MockAnnouncer, MockContentStore, MockImageRenderer, MockLedger};
pub use storage::PinningStore;

/// Ledger query and submission service.
///
/// Implementations must handle pagination and retry idempotent reads.
#[async_trait]
pub trait LedgerSource: Send + Sync + fmt::Debug {
    /// All unspent outputs at `address`, oldest page first.
    async fn list_unspent(&self, address: &str) -> Result<Vec<UnspentOutput>, DataSourceError>;

    /// Inputs and outputs of a transaction.
    async fn tx_utxos(&self, tx_hash: &str) -> Result<TxUtxos, DataSourceError>;

    /// Slot number of the latest block.
    async fn latest_slot(&self) -> Result<u64, DataSourceError>;

    /// Whether the ledger has accepted the transaction.
    async fn transaction_exists(&self, tx_hash: &str) -> Result<bool, DataSourceError>;

    /// Submit signed transaction bytes, returning the transaction id.
    async fn submit_tx(&self, cbor: &[u8]) -> Result<String, DataSourceError>;
}

/// Attributes of the reward collectible to draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardImageRequest {
    pub traits: TraitSet,
    pub width: u32,
    pub height: u32,
}

/// Attributes of the fight-result image to draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FightImageRequest {
    pub red_fighter: String,
    pub blue_fighter: String,
    pub red_life_bar: u8,
    pub blue_life_bar: u8,
    pub red_record: String,
    pub blue_record: String,
    pub red_ko: bool,
    pub blue_ko: bool,
    pub red_beatup: bool,
    pub blue_beatup: bool,
    pub width: u32,
    pub height: u32,
}

/// A rendered fight image and the background the renderer chose for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFight {
    pub bytes: Vec<u8>,
    pub background: String,
}

#[async_trait]
pub trait ImageRenderer: Send + Sync + fmt::Debug {
    async fn render_reward(&self, request: &RewardImageRequest) -> Result<Vec<u8>, DataSourceError>;

    async fn render_fight(&self, request: &FightImageRequest) -> Result<RenderedFight, DataSourceError>;
}

/// Content-addressed storage that pins a local file and returns its identifier.
#[async_trait]
pub trait ContentStore: Send + Sync + fmt::Debug {
    async fn pin(&self, path: &Path) -> Result<String, DataSourceError>;
}

/// A post with a caption and attached images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub caption: String,
    pub images: Vec<PathBuf>,
}

/// Best-effort announcement channel; callers never fail on its errors.
#[async_trait]
pub trait Announcer: Send + Sync + fmt::Debug {
    async fn announce(&self, post: &Announcement) -> Result<String, DataSourceError>;
}

/// Error type for collaborator calls.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// The ledger refused a submitted transaction
    Rejected(String),
    /// Local file error while preparing a request
    Io(String),
    /// Referenced output or transaction does not exist
    NotFound(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Rejected(msg) => write!(f, "Transaction rejected: {}", msg),
            DataSourceError::Io(msg) => write!(f, "IO error: {}", msg),
            DataSourceError::NotFound(what) => write!(f, "Not found: {}", what),
        }
    }
}

impl std::error::Error for DataSourceError {}

impl From<std::io::Error> for DataSourceError {
    fn from(err: std::io::Error) -> Self {
        DataSourceError::Io(err.to_string())
    }
}

/// Error for a non-success HTTP status.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> DataSourceError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return DataSourceError::RateLimited;
    }
    DataSourceError::HttpError {
        status: status.as_u16(),
        message: body,
    }
}

/// Classify an HTTP status for `backoff`: 429 and 5xx are transient.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    body: String,
) -> backoff::Error<DataSourceError> {
    let err = status_error(status, body);
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}
