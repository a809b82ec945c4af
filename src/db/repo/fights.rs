//! Fight creation, reads and lifecycle transitions.

use crate::domain::{Address, Fight, FightOutcome, FightStatus, Lovelace, OutputRef, TimeMs};
use std::collections::HashMap;

use super::{fight_from_row, transition, ClaimOutcome, Repository, Transition, FIGHT_COLUMNS};

/// A fight request as accepted by intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFight {
    pub red_fighter: String,
    pub blue_fighter: String,
    pub red_send_address: Option<Address>,
    pub blue_send_address: Option<Address>,
    pub payment_amount: Lovelace,
    pub payment_address: Address,
    pub created_at: TimeMs,
}

/// Everything written when a QUEUED fight becomes STAGED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub outcome: FightOutcome,
    pub reward_hash: String,
    pub fight_hash: String,
    pub background: String,
}

impl Repository {
    /// Insert a PENDING fight unconditionally.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn create_fight(&self, fight: &NewFight) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO fights (red_fighter, blue_fighter, red_send_address, blue_send_address,
                                payment_amount, payment_address, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'PENDING', ?)
            "#,
        )
        .bind(&fight.red_fighter)
        .bind(&fight.blue_fighter)
        .bind(fight.red_send_address.as_ref().map(|a| a.as_str()))
        .bind(fight.blue_send_address.as_ref().map(|a| a.as_str()))
        .bind(fight.payment_amount.as_i64())
        .bind(fight.payment_address.as_str())
        .bind(fight.created_at.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert a PENDING fight only if no fight created after `window_start`
    /// requests the same amount. The check and insert are one statement.
    pub async fn create_fight_if_amount_free(
        &self,
        fight: &NewFight,
        window_start: TimeMs,
    ) -> Result<Option<i64>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO fights (red_fighter, blue_fighter, red_send_address, blue_send_address,
                                payment_amount, payment_address, status, created_at)
            SELECT ?, ?, ?, ?, ?, ?, 'PENDING', ?
            WHERE NOT EXISTS (
                SELECT 1 FROM fights WHERE payment_amount = ? AND created_at > ?
            )
            "#,
        )
        .bind(&fight.red_fighter)
        .bind(&fight.blue_fighter)
        .bind(fight.red_send_address.as_ref().map(|a| a.as_str()))
        .bind(fight.blue_send_address.as_ref().map(|a| a.as_str()))
        .bind(fight.payment_amount.as_i64())
        .bind(fight.payment_address.as_str())
        .bind(fight.created_at.as_i64())
        .bind(fight.payment_amount.as_i64())
        .bind(window_start.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Whether any fight created after `since` requests `amount`.
    pub async fn amount_in_use_since(
        &self,
        amount: Lovelace,
        since: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fights WHERE payment_amount = ? AND created_at > ?")
                .bind(amount.as_i64())
                .bind(since.as_i64())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    pub async fn get_fight(&self, id: i64) -> Result<Option<Fight>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM fights WHERE id = ?", FIGHT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(fight_from_row).transpose()
    }

    /// PENDING fights without a bound payment created after `since`, newest first.
    pub async fn pending_fights_since(&self, since: TimeMs) -> Result<Vec<Fight>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM fights
            WHERE status = 'PENDING' AND incoming_tx IS NULL AND created_at > ?
            ORDER BY created_at DESC, id DESC
            "#,
            FIGHT_COLUMNS
        ))
        .bind(since.as_i64())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fight_from_row).collect()
    }

    /// Which of `refs` are already recorded against a fight.
    pub async fn bound_outputs(
        &self,
        refs: &[OutputRef],
    ) -> Result<HashMap<OutputRef, i64>, sqlx::Error> {
        let mut bound = HashMap::new();
        for output_ref in refs {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM fights WHERE incoming_tx = ? AND incoming_index = ?")
                    .bind(&output_ref.tx_hash)
                    .bind(i64::from(output_ref.index))
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some((fight_id,)) = row {
                bound.insert(output_ref.clone(), fight_id);
            }
        }
        Ok(bound)
    }

    /// Up to `limit` fights in `status`, oldest created first.
    pub async fn fights_in_status(
        &self,
        status: FightStatus,
        limit: i64,
    ) -> Result<Vec<Fight>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fights WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT ?",
            FIGHT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(fight_from_row).collect()
    }

    /// PENDING -> QUEUED: bind the payment and claim the oldest free reward slot.
    ///
    /// All three writes commit together or not at all.
    pub async fn claim_payment(
        &self,
        fight_id: i64,
        output_ref: &OutputRef,
    ) -> Result<ClaimOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if transition(&mut *tx, fight_id, FightStatus::Pending, FightStatus::Queued).await?
            == Transition::AlreadyHandled
        {
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyHandled);
        }

        let bound = sqlx::query("UPDATE fights SET incoming_tx = ?, incoming_index = ? WHERE id = ?")
            .bind(&output_ref.tx_hash)
            .bind(i64::from(output_ref.index))
            .bind(fight_id)
            .execute(&mut *tx)
            .await;
        if let Err(err) = bound {
            let unique = err
                .as_database_error()
                .map(|e| e.is_unique_violation())
                .unwrap_or(false);
            tx.rollback().await?;
            if unique {
                tracing::warn!(fight_id, output = %output_ref, "Output already bound to another fight");
                return Ok(ClaimOutcome::AlreadyHandled);
            }
            return Err(err);
        }

        let slot: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM reward_slots WHERE fight_id IS NULL ORDER BY id ASC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let Some((slot_id,)) = slot else {
            tx.rollback().await?;
            return Ok(ClaimOutcome::NoSlotAvailable);
        };

        let claimed = sqlx::query("UPDATE reward_slots SET fight_id = ? WHERE id = ? AND fight_id IS NULL")
            .bind(fight_id)
            .bind(slot_id)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ClaimOutcome::AlreadyHandled);
        }

        tx.commit().await?;
        tracing::info!(fight_id, slot_id, output = %output_ref, "Payment matched");
        Ok(ClaimOutcome::Claimed { slot_id })
    }

    /// QUEUED -> STAGED: outcome, artifact hashes and both fighter records.
    pub async fn stage_fight(
        &self,
        fight: &Fight,
        slot_id: i64,
        record: &StageRecord,
    ) -> Result<Transition, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if transition(&mut *tx, fight.id, FightStatus::Queued, FightStatus::Staged).await?
            == Transition::AlreadyHandled
        {
            tx.rollback().await?;
            return Ok(Transition::AlreadyHandled);
        }

        let o = &record.outcome;
        sqlx::query(
            r#"
            UPDATE fights SET
                reward_hash = ?, fight_hash = ?, background = ?, winner = ?,
                red_life = ?, blue_life = ?, red_record = ?, blue_record = ?,
                red_ko = ?, blue_ko = ?, red_beatup = ?, blue_beatup = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.reward_hash)
        .bind(&record.fight_hash)
        .bind(&record.background)
        .bind(o.winner.as_str())
        .bind(i64::from(o.red_life))
        .bind(i64::from(o.blue_life))
        .bind(&o.red_record)
        .bind(&o.blue_record)
        .bind(o.red_ko)
        .bind(o.blue_ko)
        .bind(o.red_beatup)
        .bind(o.blue_beatup)
        .bind(fight.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE reward_slots SET content_hash = ? WHERE id = ? AND fight_id = ?")
            .bind(&record.reward_hash)
            .bind(slot_id)
            .bind(fight.id)
            .execute(&mut *tx)
            .await?;

        let winner = fight.fighter(o.winner);
        let loser = fight.fighter(o.winner.opponent());
        for (name, won) in [(winner, true), (loser, false)] {
            sqlx::query(
                r#"
                INSERT INTO fighter_records (name, wins, losses) VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    wins = wins + excluded.wins,
                    losses = losses + excluded.losses
                "#,
            )
            .bind(name)
            .bind(i64::from(won))
            .bind(i64::from(!won))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Transition::Applied)
    }

    /// Persist the announcement post id. Not a status change.
    pub async fn set_announcement(&self, fight_id: i64, post_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE fights SET announcement_ref = ? WHERE id = ?")
            .bind(post_id)
            .bind(fight_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// STAGED -> MINTED once the settlement transaction has been submitted.
    pub async fn mark_minted(
        &self,
        fight_id: i64,
        settlement_tx: &str,
        at: TimeMs,
    ) -> Result<Transition, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let outcome = transition(&mut *tx, fight_id, FightStatus::Staged, FightStatus::Minted).await?;
        if outcome == Transition::Applied {
            sqlx::query("UPDATE fights SET settlement_tx = ?, minted_at = ? WHERE id = ?")
                .bind(settlement_tx)
                .bind(at.as_i64())
                .bind(fight_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(outcome)
    }

    /// MINTED -> CONFIRMED once the ledger reports the settlement transaction.
    pub async fn mark_confirmed(&self, fight_id: i64) -> Result<Transition, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        transition(&mut conn, fight_id, FightStatus::Minted, FightStatus::Confirmed).await
    }
}
