//! Pure computation: combat, payment matching, transaction layout and metadata.
//!
//! Nothing in here performs I/O. Randomness is always injected by the caller.

pub mod combat;
pub mod metadata;
pub mod payment_matcher;
pub mod tx_plan;

pub use combat::{
    determine_life_bar, CombatResolver, CombatResult, Contender, LifeBar, StrengthTable,
};
pub use metadata::{MetadataError, MintMetadata};
pub use payment_matcher::{
    MatchPlan, MatchSnapshot, PaymentClaim, PaymentMatcher, RefundCandidate,
    MATCH_WINDOW_MINUTES,
};
pub use tx_plan::{
    MintRequest, MintedAsset, PlanError, PlanKind, RefundItem, TxInput, TxOutput, TxPlan,
};
