//! External transaction toolchain: draft, fee estimation and signing.
//!
//! The core only ever sees typed [`DraftTx`] / [`SignedTx`] values. Which files
//! back them is an adapter detail; every unit of work gets its own [`WorkDir`].

use crate::domain::Lovelace;
use crate::engine::TxPlan;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod cardano_cli;
pub mod mock;
pub mod workdir;

pub use cardano_cli::{CardanoCli, Network};
pub use mock::MockToolchain;
pub use workdir::WorkDir;

/// Key a transaction must be signed with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signer {
    Payment,
    Policy(String),
}

/// A built transaction body, opaque to the core apart from its plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTx {
    pub body_file: PathBuf,
    pub plan: TxPlan,
    pub ttl: u64,
}

/// Signed transaction bytes ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub cbor: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("toolchain io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("{command} did not finish within {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("unexpected toolchain output: {0}")]
    Parse(String),
    #[error("no policy script configured for {0}")]
    UnknownPolicy(String),
}

#[async_trait]
pub trait TxToolchain: Send + Sync + fmt::Debug {
    /// Build a raw transaction body for `plan` (its fee included) expiring at `ttl`.
    async fn build(
        &self,
        work: &WorkDir,
        name: &str,
        plan: &TxPlan,
        ttl: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<DraftTx, ToolchainError>;

    /// Minimum fee for the exact input/output/witness shape of `draft`.
    async fn min_fee(&self, draft: &DraftTx) -> Result<Lovelace, ToolchainError>;

    async fn sign(
        &self,
        work: &WorkDir,
        draft: &DraftTx,
        signers: &[Signer],
    ) -> Result<SignedTx, ToolchainError>;
}
