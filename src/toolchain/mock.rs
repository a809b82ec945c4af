//! In-memory toolchain for tests.

use super::{DraftTx, SignedTx, Signer, ToolchainError, TxToolchain, WorkDir};
use crate::domain::Lovelace;
use crate::engine::TxPlan;
use async_trait::async_trait;
use std::sync::Mutex;

/// Returns a fixed fee and records every built plan and signature request.
#[derive(Debug)]
pub struct MockToolchain {
    fee: Lovelace,
    fail_sign: bool,
    built: Mutex<Vec<(TxPlan, u64, Option<serde_json::Value>)>>,
    signed: Mutex<Vec<Vec<Signer>>>,
}

impl MockToolchain {
    pub fn new(fee: u64) -> Self {
        Self {
            fee: Lovelace::new(fee),
            fail_sign: false,
            built: Mutex::new(Vec::new()),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_sign(mut self) -> Self {
        self.fail_sign = true;
        self
    }

    /// Every plan passed to `build`, with its expiry and metadata.
    pub fn built(&self) -> Vec<(TxPlan, u64, Option<serde_json::Value>)> {
        self.built.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn signatures(&self) -> Vec<Vec<Signer>> {
        self.signed.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TxToolchain for MockToolchain {
    async fn build(
        &self,
        work: &WorkDir,
        name: &str,
        plan: &TxPlan,
        ttl: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<DraftTx, ToolchainError> {
        if let Ok(mut built) = self.built.lock() {
            built.push((plan.clone(), ttl, metadata.cloned()));
        }
        Ok(DraftTx {
            body_file: work.file(name),
            plan: plan.clone(),
            ttl,
        })
    }

    async fn min_fee(&self, _draft: &DraftTx) -> Result<Lovelace, ToolchainError> {
        Ok(self.fee)
    }

    async fn sign(
        &self,
        _work: &WorkDir,
        draft: &DraftTx,
        signers: &[Signer],
    ) -> Result<SignedTx, ToolchainError> {
        if self.fail_sign {
            return Err(ToolchainError::CommandFailed {
                command: "transaction sign".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "mock signing failure".to_string(),
            });
        }
        if let Ok(mut signed) = self.signed.lock() {
            signed.push(signers.to_vec());
        }
        // Deterministic bytes per body so submissions can be told apart.
        let cbor = draft
            .plan
            .inputs
            .iter()
            .flat_map(|i| i.output_ref.to_string().into_bytes())
            .collect();
        Ok(SignedTx { cbor })
    }
}
