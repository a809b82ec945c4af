//! Orchestration: fight intake, settlement and the lifecycle loop.

pub mod intake;
pub mod lifecycle;
pub mod settlement;

pub use intake::{FightIntake, FightRequest, IntakeError};
pub use lifecycle::{Collaborators, LifecycleSettings, Orchestrator, PassError, PassReport};
pub use settlement::{BuildError, Settlement, SettlementPolicy, TxBuilder};
