//! Reconciling unspent outputs against PENDING fights.
//!
//! Planning is pure: the orchestrator reads a [`MatchSnapshot`] from the store,
//! asks the matcher for a [`MatchPlan`] and then executes each claim through the
//! store's conditional transition. Running the plan twice over unchanged inputs
//! yields no claims the second time, because every claimed output is then bound.

use crate::domain::{Fight, FightStatus, Lovelace, OutputRef, TimeMs, UnspentOutput, BASE_UNIT};
use std::collections::{HashMap, HashSet};

/// Minutes after creation during which a PENDING fight accepts its payment.
pub const MATCH_WINDOW_MINUTES: i64 = 20;

/// Why an output can never pay for a fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    MultiAsset,
    NotBaseCurrency,
}

/// Assign the output to the fight and advance it to QUEUED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentClaim {
    pub fight_id: i64,
    pub output_ref: OutputRef,
    pub amount: Lovelace,
}

/// An unmatched payment that should be returned to its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundCandidate {
    pub output_ref: OutputRef,
    pub amount: Lovelace,
}

/// Store state the matcher needs, read once per pass.
#[derive(Debug, Clone, Default)]
pub struct MatchSnapshot {
    pub now: TimeMs,
    /// Outputs already recorded against some fight.
    pub bound: HashMap<OutputRef, i64>,
    /// Fights still awaiting payment, any age.
    pub pending: Vec<Fight>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    pub claims: Vec<PaymentClaim>,
    pub refunds: Vec<RefundCandidate>,
    pub already_bound: usize,
    pub rejected: usize,
    /// Unmatched outputs left for a later pass because the refund batch was full.
    pub deferred_refunds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentMatcher {
    window_minutes: i64,
    refund_limit: usize,
}

impl PaymentMatcher {
    pub fn new(refund_limit: usize) -> Self {
        Self {
            window_minutes: MATCH_WINDOW_MINUTES,
            refund_limit,
        }
    }

    /// Only single-asset base-currency outputs can pay for a fight.
    pub fn classify(&self, output: &UnspentOutput) -> Result<Lovelace, RejectReason> {
        match output.amounts.as_slice() {
            [] => Err(RejectReason::Empty),
            [only] if only.unit == BASE_UNIT => Ok(Lovelace::new(only.quantity)),
            [_] => Err(RejectReason::NotBaseCurrency),
            _ => Err(RejectReason::MultiAsset),
        }
    }

    pub fn plan(&self, outputs: &[UnspentOutput], snapshot: &MatchSnapshot) -> MatchPlan {
        let window_start = snapshot.now.minus_minutes(self.window_minutes);

        // Newest first, so the most recent request wins an amount collision.
        let mut candidates: Vec<&Fight> = snapshot
            .pending
            .iter()
            .filter(|f| {
                f.status == FightStatus::Pending
                    && f.incoming.is_none()
                    && f.created_at > window_start
            })
            .collect();
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let mut taken: HashSet<i64> = HashSet::new();
        let mut plan = MatchPlan::default();

        for output in outputs {
            if let Some(fight_id) = snapshot.bound.get(&output.output_ref) {
                tracing::debug!(output = %output.output_ref, fight_id, "Output already bound, nothing to do");
                plan.already_bound += 1;
                continue;
            }

            let amount = match self.classify(output) {
                Ok(amount) => amount,
                Err(reason) => {
                    tracing::warn!(output = %output.output_ref, ?reason, "Ignoring output");
                    plan.rejected += 1;
                    continue;
                }
            };

            let matched = candidates
                .iter()
                .find(|f| f.payment_amount == amount && !taken.contains(&f.id));

            match matched {
                Some(fight) => {
                    taken.insert(fight.id);
                    plan.claims.push(PaymentClaim {
                        fight_id: fight.id,
                        output_ref: output.output_ref.clone(),
                        amount,
                    });
                }
                None if plan.refunds.len() < self.refund_limit => {
                    tracing::warn!(output = %output.output_ref, %amount, "No matching fight, queueing for return");
                    plan.refunds.push(RefundCandidate {
                        output_ref: output.output_ref.clone(),
                        amount,
                    });
                }
                None => plan.deferred_refunds += 1,
            }
        }

        plan
    }
}
