//! Repository layer for the fight record store.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `fights.rs` - fight creation, reads and lifecycle transitions
//! - `slots.rs` - reward slots and fighter records
//!
//! Every status change goes through [`transition`], a compare-and-swap on the
//! `status` column checked by affected-row count. Zero rows means a peer already
//! advanced the fight; callers treat that as a no-op, never as an error.

mod fights;
mod slots;

use crate::domain::{
    Address, Corner, Fight, FightOutcome, FightStatus, Lovelace, OutputRef, TimeMs,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;

pub use fights::{NewFight, StageRecord};

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Current status was not the expected one; someone else got there first.
    AlreadyHandled,
}

/// Result of binding a payment to a PENDING fight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { slot_id: i64 },
    AlreadyHandled,
    /// The reward pool is empty; nothing was written.
    NoSlotAvailable,
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Advance `fight_id` from `from` to `to` iff it is still in `from`.
///
/// Rejects anything but a single forward step without touching the row.
pub(crate) async fn transition(
    conn: &mut SqliteConnection,
    fight_id: i64,
    from: FightStatus,
    to: FightStatus,
) -> Result<Transition, sqlx::Error> {
    if !from.can_advance_to(to) {
        tracing::warn!(fight_id, %from, %to, "Refusing non-forward transition");
        return Ok(Transition::AlreadyHandled);
    }
    let result = sqlx::query("UPDATE fights SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(fight_id)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        tracing::debug!(fight_id, %from, %to, "Transition already handled");
        return Ok(Transition::AlreadyHandled);
    }
    tracing::info!(fight_id, %from, %to, "Fight advanced");
    Ok(Transition::Applied)
}

pub(crate) const FIGHT_COLUMNS: &str = r#"
    id, red_fighter, blue_fighter, red_send_address, blue_send_address,
    payment_amount, payment_address, status, created_at, minted_at,
    incoming_tx, incoming_index, reward_hash, fight_hash, background,
    winner, red_life, blue_life, red_record, blue_record,
    red_ko, blue_ko, red_beatup, blue_beatup, settlement_tx, announcement_ref
"#;

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

pub(crate) fn fight_from_row(row: &SqliteRow) -> Result<Fight, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<FightStatus>().map_err(decode_err)?;

    let incoming_tx: Option<String> = row.try_get("incoming_tx")?;
    let incoming_index: Option<i64> = row.try_get("incoming_index")?;
    let incoming = match (incoming_tx, incoming_index) {
        (Some(tx), Some(index)) => Some(OutputRef::new(
            tx,
            u32::try_from(index).map_err(|_| decode_err(format!("bad output index {}", index)))?,
        )),
        _ => None,
    };

    let winner: Option<String> = row.try_get("winner")?;
    let outcome = match winner {
        Some(winner) => {
            let life = |col: &str| -> Result<u8, sqlx::Error> {
                let v: Option<i64> = row.try_get(col)?;
                u8::try_from(v.unwrap_or_default())
                    .map_err(|_| decode_err(format!("bad life bar in {}", col)))
            };
            let flag = |col: &str| -> Result<bool, sqlx::Error> {
                let v: Option<bool> = row.try_get(col)?;
                Ok(v.unwrap_or(false))
            };
            Some(FightOutcome {
                winner: winner.parse::<Corner>().map_err(decode_err)?,
                red_life: life("red_life")?,
                blue_life: life("blue_life")?,
                red_record: row.try_get::<Option<String>, _>("red_record")?.unwrap_or_default(),
                blue_record: row.try_get::<Option<String>, _>("blue_record")?.unwrap_or_default(),
                red_ko: flag("red_ko")?,
                blue_ko: flag("blue_ko")?,
                red_beatup: flag("red_beatup")?,
                blue_beatup: flag("blue_beatup")?,
            })
        }
        None => None,
    };

    let amount: i64 = row.try_get("payment_amount")?;
    let amount = u64::try_from(amount).map_err(|_| decode_err(format!("bad amount {}", amount)))?;

    Ok(Fight {
        id: row.try_get("id")?,
        red_fighter: row.try_get("red_fighter")?,
        blue_fighter: row.try_get("blue_fighter")?,
        red_send_address: row
            .try_get::<Option<String>, _>("red_send_address")?
            .map(Address::new),
        blue_send_address: row
            .try_get::<Option<String>, _>("blue_send_address")?
            .map(Address::new),
        payment_amount: Lovelace::new(amount),
        payment_address: Address::new(row.try_get::<String, _>("payment_address")?),
        status,
        created_at: TimeMs::new(row.try_get("created_at")?),
        minted_at: row.try_get::<Option<i64>, _>("minted_at")?.map(TimeMs::new),
        incoming,
        reward_hash: row.try_get("reward_hash")?,
        fight_hash: row.try_get("fight_hash")?,
        background: row.try_get("background")?,
        outcome,
        settlement_tx: row.try_get("settlement_tx")?,
        announcement_ref: row.try_get("announcement_ref")?,
    })
}
