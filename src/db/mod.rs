//! Fight record store on SQLite.
//!
//! This module provides:
//! - Database initialization, pragmas and schema
//! - Repository layer with compare-and-swap status transitions

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{ClaimOutcome, NewFight, Repository, StageRecord, Transition};
