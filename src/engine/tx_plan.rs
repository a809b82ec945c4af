//! Fee-exact output arithmetic for settlement transactions.
//!
//! A [`TxPlan`] is built twice: once with a zero fee so the toolchain can size
//! the draft, then again via [`TxPlan::with_fee`] which moves the fee out of the
//! designated change output. Every plan satisfies
//! `sum(inputs) == sum(outputs) + fee`; [`TxPlan::verify_balance`] checks it.

use crate::domain::{Address, Lovelace, OutputRef};
use thiserror::Error;

/// Invariant violations while laying out a transaction. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("unbalanced transaction: inputs {inputs} != outputs {outputs} + fee {fee}")]
    Imbalanced { inputs: u64, outputs: u64, fee: u64 },
    #[error("amount overflow")]
    Overflow,
}

/// An input consumed by the transaction, with the value it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub output_ref: OutputRef,
    pub amount: Lovelace,
}

/// One native asset minted and carried by an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedAsset {
    pub policy_id: String,
    pub asset_name: String,
    pub quantity: u64,
}

impl MintedAsset {
    pub fn single(policy_id: &str, asset_name: &str) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            asset_name: asset_name.to_string(),
            quantity: 1,
        }
    }

    /// `<policy>.<hex asset name>` as the toolchain expects it.
    pub fn unit(&self) -> String {
        format!("{}.{}", self.policy_id, hex::encode(self.asset_name.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub lovelace: Lovelace,
    pub assets: Vec<MintedAsset>,
}

impl TxOutput {
    pub fn plain(address: Address, lovelace: Lovelace) -> Self {
        Self {
            address,
            lovelace,
            assets: Vec::new(),
        }
    }
}

/// Which kind of settlement a plan describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Mint,
    Refund,
}

/// Parameters of the dual-mint settlement for one fight.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub input: TxInput,
    /// Receives the fight-result asset.
    pub payer: Address,
    /// Receives the reward asset.
    pub winner: Address,
    pub partner: Address,
    pub royalty: Address,
    pub partner_split: Lovelace,
    pub min_asset_output: Lovelace,
    pub fight_asset: MintedAsset,
    pub reward_asset: MintedAsset,
}

/// A refund returns one input whole to its origin, minus its share of the fee.
#[derive(Debug, Clone)]
pub struct RefundItem {
    pub input: TxInput,
    pub origin: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPlan {
    pub kind: PlanKind,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Index of the output the fee is taken from.
    pub change_index: usize,
    pub mints: Vec<MintedAsset>,
    pub fee: Lovelace,
    pub witness_count: u32,
}

impl TxPlan {
    /// Dual-mint draft: partner split, fight asset to the payer, reward asset to
    /// the winner, remainder to the royalty address.
    pub fn mint(req: MintRequest) -> Result<Self, PlanError> {
        let committed = req
            .min_asset_output
            .checked_add(req.min_asset_output)
            .and_then(|v| v.checked_add(req.partner_split))
            .ok_or(PlanError::Overflow)?;
        let change = req
            .input
            .amount
            .checked_sub(committed)
            .ok_or(PlanError::InsufficientFunds {
                needed: committed.as_u64(),
                available: req.input.amount.as_u64(),
            })?;

        let outputs = vec![
            TxOutput::plain(req.partner, req.partner_split),
            TxOutput {
                address: req.payer,
                lovelace: req.min_asset_output,
                assets: vec![req.fight_asset.clone()],
            },
            TxOutput {
                address: req.winner,
                lovelace: req.min_asset_output,
                assets: vec![req.reward_asset.clone()],
            },
            TxOutput::plain(req.royalty, change),
        ];

        let plan = TxPlan {
            kind: PlanKind::Mint,
            inputs: vec![req.input],
            outputs,
            change_index: 3,
            mints: vec![req.fight_asset, req.reward_asset],
            fee: Lovelace::new(0),
            // payment key plus both policy keys
            witness_count: 3,
        };
        plan.verify_balance()?;
        Ok(plan)
    }

    /// Batch refund draft; the fee comes out of the first output.
    pub fn refund(items: Vec<RefundItem>) -> Result<Self, PlanError> {
        if items.is_empty() {
            return Err(PlanError::NoInputs);
        }
        let outputs = items
            .iter()
            .map(|item| TxOutput::plain(item.origin.clone(), item.input.amount))
            .collect();
        let plan = TxPlan {
            kind: PlanKind::Refund,
            inputs: items.into_iter().map(|item| item.input).collect(),
            outputs,
            change_index: 0,
            mints: Vec::new(),
            fee: Lovelace::new(0),
            witness_count: 1,
        };
        plan.verify_balance()?;
        Ok(plan)
    }

    /// Final layout with `fee` taken from the change output.
    pub fn with_fee(&self, fee: Lovelace) -> Result<Self, PlanError> {
        let mut next = self.clone();
        let change = next
            .outputs
            .get_mut(self.change_index)
            .ok_or(PlanError::NoInputs)?;
        change.lovelace = change
            .lovelace
            .checked_add(self.fee)
            .and_then(|restored| restored.checked_sub(fee))
            .ok_or(PlanError::InsufficientFunds {
                needed: fee.as_u64(),
                available: change.lovelace.as_u64(),
            })?;
        next.fee = fee;
        next.verify_balance()?;
        Ok(next)
    }

    pub fn total_inputs(&self) -> Result<Lovelace, PlanError> {
        self.inputs
            .iter()
            .try_fold(Lovelace::new(0), |acc, i| acc.checked_add(i.amount))
            .ok_or(PlanError::Overflow)
    }

    pub fn total_outputs(&self) -> Result<Lovelace, PlanError> {
        self.outputs
            .iter()
            .try_fold(Lovelace::new(0), |acc, o| acc.checked_add(o.lovelace))
            .ok_or(PlanError::Overflow)
    }

    pub fn verify_balance(&self) -> Result<(), PlanError> {
        if self.inputs.is_empty() {
            return Err(PlanError::NoInputs);
        }
        let inputs = self.total_inputs()?;
        let outputs = self.total_outputs()?;
        let spent = outputs.checked_add(self.fee).ok_or(PlanError::Overflow)?;
        if spent != inputs {
            return Err(PlanError::Imbalanced {
                inputs: inputs.as_u64(),
                outputs: outputs.as_u64(),
                fee: self.fee.as_u64(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_request(amount: u64) -> MintRequest {
        MintRequest {
            input: TxInput {
                output_ref: OutputRef::new("paytx", 0),
                amount: Lovelace::new(amount),
            },
            payer: Address::new("addr_payer"),
            winner: Address::new("addr_winner"),
            partner: Address::new("addr_partner"),
            royalty: Address::new("addr_royalty"),
            partner_split: Lovelace::new(5_000_000),
            min_asset_output: Lovelace::new(1_250_000),
            fight_asset: MintedAsset::single("fightpolicy", "Fight00001"),
            reward_asset: MintedAsset::single("rewardpolicy", "Reward00001"),
        }
    }

    #[test]
    fn test_mint_layout_sends_change_to_royalty() {
        let draft = TxPlan::mint(mint_request(125_370_000)).unwrap();
        assert_eq!(draft.outputs.len(), 4);
        assert_eq!(draft.outputs[0].lovelace, Lovelace::new(5_000_000));
        assert_eq!(draft.outputs[1].assets[0].asset_name, "Fight00001");
        assert_eq!(draft.outputs[2].address, Address::new("addr_winner"));
        assert_eq!(draft.outputs[3].lovelace, Lovelace::new(117_870_000));
        assert_eq!(draft.witness_count, 3);
        assert_eq!(draft.mints.len(), 2);
    }

    #[test]
    fn test_with_fee_is_exact_for_mint() {
        let draft = TxPlan::mint(mint_request(125_370_000)).unwrap();
        let fin = draft.with_fee(Lovelace::new(201_733)).unwrap();
        assert_eq!(fin.fee, Lovelace::new(201_733));
        assert_eq!(fin.outputs[3].lovelace, Lovelace::new(117_870_000 - 201_733));
        assert_eq!(
            fin.total_outputs().unwrap().as_u64() + fin.fee.as_u64(),
            fin.total_inputs().unwrap().as_u64()
        );

        // Re-applying a different fee starts from the restored change.
        let refit = fin.with_fee(Lovelace::new(180_000)).unwrap();
        assert_eq!(refit.outputs[3].lovelace, Lovelace::new(117_870_000 - 180_000));
    }

    #[test]
    fn test_mint_rejects_underfunded_input() {
        let err = TxPlan::mint(mint_request(7_000_000)).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientFunds {
                needed: 7_500_000,
                available: 7_000_000
            }
        );
    }

    #[test]
    fn test_refund_fee_comes_from_first_output() {
        let items = vec![
            RefundItem {
                input: TxInput {
                    output_ref: OutputRef::new("a", 0),
                    amount: Lovelace::new(3_000_000),
                },
                origin: Address::new("addr_a"),
            },
            RefundItem {
                input: TxInput {
                    output_ref: OutputRef::new("b", 1),
                    amount: Lovelace::new(9_000_000),
                },
                origin: Address::new("addr_b"),
            },
        ];
        let draft = TxPlan::refund(items).unwrap();
        assert_eq!(draft.witness_count, 1);
        let fin = draft.with_fee(Lovelace::new(170_000)).unwrap();
        assert_eq!(fin.outputs[0].lovelace, Lovelace::new(2_830_000));
        assert_eq!(fin.outputs[1].lovelace, Lovelace::new(9_000_000));
        fin.verify_balance().unwrap();
    }

    #[test]
    fn test_fee_larger_than_change_is_fatal() {
        let items = vec![RefundItem {
            input: TxInput {
                output_ref: OutputRef::new("a", 0),
                amount: Lovelace::new(100_000),
            },
            origin: Address::new("addr_a"),
        }];
        let draft = TxPlan::refund(items).unwrap();
        assert!(matches!(
            draft.with_fee(Lovelace::new(170_000)),
            Err(PlanError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_tampered_plan_fails_balance_check() {
        let mut plan = TxPlan::mint(mint_request(125_370_000)).unwrap();
        plan.outputs[0].lovelace = Lovelace::new(5_000_001);
        assert!(matches!(
            plan.verify_balance(),
            Err(PlanError::Imbalanced { .. })
        ));
        assert_eq!(TxPlan::refund(Vec::new()), Err(PlanError::NoInputs));
    }

    #[test]
    fn test_asset_unit_hex_encodes_name() {
        let asset = MintedAsset::single("abc", "Fight1");
        assert_eq!(asset.unit(), "abc.466967687431");
    }
}
