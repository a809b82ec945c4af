//! Transaction Builder: two-pass fee-exact settlement of mints and refunds.
//!
//! Both cases share one pipeline:
//! 1. build a draft with fee 0
//! 2. ask the toolchain for the minimum fee of that exact shape
//! 3. take the fee out of the change output and rebuild with an expiry of tip + N
//! 4. sign and submit
//!
//! Nothing is persisted here. A failed attempt leaves no trace besides its
//! scratch directory, so the same work is retried on the next pass.

use crate::datasource::{DataSourceError, LedgerSource};
use crate::domain::{Address, Corner, Fight, Lovelace, RewardSlot};
use crate::engine::metadata::{fight_asset_name, fight_metadata, reward_metadata};
use crate::engine::{
    MetadataError, MintMetadata, MintRequest, MintedAsset, PlanError, RefundCandidate, RefundItem,
    TxInput, TxPlan,
};
use crate::toolchain::{Signer, ToolchainError, TxToolchain, WorkDir};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error(transparent)]
    Ledger(#[from] DataSourceError),
    #[error("fight {0} has no bound payment")]
    MissingPayment(i64),
    #[error("cannot determine sender of {0}")]
    MissingOrigin(String),
}

impl BuildError {
    /// Invariant violations that would fail identically on every retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BuildError::Plan(_)
                | BuildError::Metadata(_)
                | BuildError::MissingPayment(_)
                | BuildError::MissingOrigin(_)
        )
    }
}

/// Addresses, policies and amounts that shape every settlement.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub fight_policy_id: String,
    pub reward_policy_id: String,
    pub royalty_address: Address,
    pub partner_address: Address,
    pub partner_split: Lovelace,
    pub min_asset_output: Lovelace,
    pub mint_ttl_slots: u64,
    pub refund_ttl_slots: u64,
}

/// A submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub tx_id: String,
    pub plan: TxPlan,
    pub ttl: u64,
}

#[derive(Debug, Clone)]
pub struct TxBuilder {
    toolchain: Arc<dyn TxToolchain>,
    ledger: Arc<dyn LedgerSource>,
    work_root: PathBuf,
    policy: SettlementPolicy,
}

impl TxBuilder {
    pub fn new(
        toolchain: Arc<dyn TxToolchain>,
        ledger: Arc<dyn LedgerSource>,
        work_root: PathBuf,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            toolchain,
            ledger,
            work_root,
            policy,
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Dual-mint settlement for a STAGED fight and its reward slot.
    pub async fn build_mint(
        &self,
        fight: &Fight,
        slot: &RewardSlot,
    ) -> Result<Settlement, BuildError> {
        let incoming = fight
            .incoming
            .clone()
            .ok_or(BuildError::MissingPayment(fight.id))?;
        let paying_tx = self.ledger.tx_utxos(&incoming.tx_hash).await?;
        let payer = paying_tx
            .origin_address()
            .cloned()
            .ok_or_else(|| BuildError::MissingOrigin(incoming.tx_hash.clone()))?;

        let winner_corner = fight
            .outcome
            .as_ref()
            .map(|o| o.winner)
            .ok_or(MetadataError::MissingOutcome(fight.id))?;
        let winner = winner_address(fight, winner_corner, &payer);

        let fight_asset_name = fight_asset_name(slot);
        let mut metadata = MintMetadata::new();
        metadata.insert(
            &self.policy.fight_policy_id,
            &fight_asset_name,
            fight_metadata(fight, slot)?,
        );
        metadata.insert(
            &self.policy.reward_policy_id,
            &slot.asset_name,
            reward_metadata(slot)?,
        );
        let metadata = metadata.to_json()?;

        let plan = TxPlan::mint(MintRequest {
            input: TxInput {
                output_ref: incoming,
                amount: fight.payment_amount,
            },
            payer,
            winner,
            partner: self.policy.partner_address.clone(),
            royalty: self.policy.royalty_address.clone(),
            partner_split: self.policy.partner_split,
            min_asset_output: self.policy.min_asset_output,
            fight_asset: MintedAsset::single(&self.policy.fight_policy_id, &fight_asset_name),
            reward_asset: MintedAsset::single(&self.policy.reward_policy_id, &slot.asset_name),
        })?;

        let signers = vec![
            Signer::Payment,
            Signer::Policy(self.policy.fight_policy_id.clone()),
            Signer::Policy(self.policy.reward_policy_id.clone()),
        ];
        let settlement = self
            .settle(plan, self.policy.mint_ttl_slots, Some(&metadata), &signers)
            .await?;
        info!(fight_id = fight.id, tx_id = %settlement.tx_id, fee = %settlement.plan.fee, "Mint submitted");
        Ok(settlement)
    }

    /// Batch refund of unmatched payments, each returned to its sender.
    ///
    /// Candidates below the minimum output, or whose sender cannot be resolved,
    /// are skipped. The largest input pays the fee. Returns `None` when nothing
    /// is left to refund.
    pub async fn build_refund(
        &self,
        candidates: &[RefundCandidate],
    ) -> Result<Option<Settlement>, BuildError> {
        let mut items = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.amount < self.policy.min_asset_output {
                warn!(
                    output = %candidate.output_ref,
                    amount = %candidate.amount,
                    "Refund below minimum output, skipping"
                );
                continue;
            }
            let tx = match self.ledger.tx_utxos(&candidate.output_ref.tx_hash).await {
                Ok(tx) => tx,
                Err(DataSourceError::NotFound(_)) => {
                    warn!(output = %candidate.output_ref, "Refund source transaction not found, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match tx.origin_address() {
                Some(origin) => items.push(RefundItem {
                    input: TxInput {
                        output_ref: candidate.output_ref.clone(),
                        amount: candidate.amount,
                    },
                    origin: origin.clone(),
                }),
                None => {
                    warn!(output = %candidate.output_ref, "Refund has no sender, skipping");
                }
            }
        }
        if items.is_empty() {
            return Ok(None);
        }

        items.sort_by(|a, b| b.input.amount.cmp(&a.input.amount));
        let count = items.len();
        let plan = TxPlan::refund(items)?;
        let settlement = self
            .settle(plan, self.policy.refund_ttl_slots, None, &[Signer::Payment])
            .await?;
        info!(count, tx_id = %settlement.tx_id, fee = %settlement.plan.fee, "Refund submitted");
        Ok(Some(settlement))
    }

    async fn settle(
        &self,
        draft_plan: TxPlan,
        ttl_slots: u64,
        metadata: Option<&serde_json::Value>,
        signers: &[Signer],
    ) -> Result<Settlement, BuildError> {
        let work = WorkDir::create(&self.work_root)
            .await
            .map_err(ToolchainError::from)?;
        let result = self
            .settle_in(&work, draft_plan, ttl_slots, metadata, signers)
            .await;
        let path = work.path().to_path_buf();
        if let Err(e) = work.remove().await {
            warn!(path = %path.display(), error = %e, "Failed to remove work directory");
        }
        result
    }

    async fn settle_in(
        &self,
        work: &WorkDir,
        draft_plan: TxPlan,
        ttl_slots: u64,
        metadata: Option<&serde_json::Value>,
        signers: &[Signer],
    ) -> Result<Settlement, BuildError> {
        let draft = self
            .toolchain
            .build(work, "tx.draft", &draft_plan, 0, metadata)
            .await?;
        let fee = self.toolchain.min_fee(&draft).await?;

        let plan = draft_plan.with_fee(fee)?;
        plan.verify_balance()?;

        let tip = self.ledger.latest_slot().await?;
        let ttl = tip.saturating_add(ttl_slots);
        debug!(%fee, tip, ttl, "Rebuilding with fee");

        let body = self
            .toolchain
            .build(work, "tx.raw", &plan, ttl, metadata)
            .await?;
        let signed = self.toolchain.sign(work, &body, signers).await?;
        let tx_id = self.ledger.submit_tx(&signed.cbor).await?;

        Ok(Settlement { tx_id, plan, ttl })
    }
}

/// The reward goes to the winner's owner; without a send address it goes to the payer.
fn winner_address(fight: &Fight, winner: Corner, payer: &Address) -> Address {
    fight
        .send_address(winner)
        .cloned()
        .unwrap_or_else(|| payer.clone())
}
