pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod roster;
pub mod toolchain;

pub use config::Config;
pub use datasource::{
    Announcer, ContentStore, DataSourceError, ImageRenderer, LedgerSource, MockAnnouncer,
    MockContentStore, MockImageRenderer, MockLedger,
};
pub use db::{init_db, Repository};
pub use domain::{
    Address, Corner, DisplayStatus, Fight, FightOutcome, FightStatus, Lovelace, OutputRef,
    RewardSlot, TimeMs, TraitSet,
};
pub use error::AppError;
pub use roster::{Roster, Rosters};
pub use toolchain::{MockToolchain, TxToolchain};
