//! Reward slot pool and fighter records.

use crate::domain::{FighterRecord, RewardSlot, TraitSet};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Repository;

fn slot_from_row(row: &SqliteRow) -> Result<RewardSlot, sqlx::Error> {
    let traits: String = row.try_get("traits")?;
    let traits: TraitSet =
        serde_json::from_str(&traits).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(RewardSlot {
        id: row.try_get("id")?,
        asset_name: row.try_get("asset_name")?,
        display_name: row.try_get("display_name")?,
        traits,
        fight_id: row.try_get("fight_id")?,
        content_hash: row.try_get("content_hash")?,
    })
}

impl Repository {
    /// Provision a reward slot. Re-inserting an existing id is a no-op.
    ///
    /// Returns true if the slot was newly inserted.
    pub async fn insert_reward_slot(&self, slot: &RewardSlot) -> Result<bool, sqlx::Error> {
        let traits = serde_json::to_string(&slot.traits)
            .map_err(|e| sqlx::Error::Protocol(format!("encode traits: {}", e)))?;
        let result = sqlx::query(
            r#"
            INSERT INTO reward_slots (id, asset_name, display_name, traits)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(slot.id)
        .bind(&slot.asset_name)
        .bind(&slot.display_name)
        .bind(traits)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn reward_slot_for_fight(
        &self,
        fight_id: i64,
    ) -> Result<Option<RewardSlot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, asset_name, display_name, traits, fight_id, content_hash
            FROM reward_slots WHERE fight_id = ?
            "#,
        )
        .bind(fight_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(slot_from_row).transpose()
    }

    pub async fn unclaimed_slot_count(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reward_slots WHERE fight_id IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Win/loss counters for `name`; a fighter that never fought reads as 0-0.
    pub async fn fighter_record(&self, name: &str) -> Result<FighterRecord, sqlx::Error> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT wins, losses FROM fighter_records WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(match row {
            Some((wins, losses)) => FighterRecord {
                name: name.to_string(),
                wins,
                losses,
            },
            None => FighterRecord::empty(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;

    #[tokio::test]
    async fn test_slot_provisioning_is_idempotent() {
        let (repo, _dir) = repo().await;
        assert!(repo.insert_reward_slot(&slot(1)).await.unwrap());
        assert!(!repo.insert_reward_slot(&slot(1)).await.unwrap());
        assert!(repo.insert_reward_slot(&slot(2)).await.unwrap());
        assert_eq!(repo.unclaimed_slot_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_slot_traits_survive_storage() {
        let (repo, _dir) = repo().await;
        repo.insert_reward_slot(&slot(7)).await.unwrap();
        let fight_id = repo.create_fight(&new_fight(2_000_000, 0)).await.unwrap();
        repo.claim_payment(fight_id, &crate::domain::OutputRef::new("tx", 1))
            .await
            .unwrap();

        let stored = repo.reward_slot_for_fight(fight_id).await.unwrap().unwrap();
        assert_eq!(stored.asset_name, "Reward00007");
        assert_eq!(stored.traits.get("Skin"), Some("green"));
        assert_eq!(stored.fight_id, Some(fight_id));
        assert_eq!(repo.unclaimed_slot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_fighter_has_empty_record() {
        let (repo, _dir) = repo().await;
        let record = repo.fighter_record("Nobody").await.unwrap();
        assert_eq!((record.wins, record.losses), (0, 0));
        assert_eq!(record.after_win(), "001-000");
    }
}
