//! Fight creation and the randomized dust allocator.
//!
//! Each fight asks for `base cost + dust` so that a ledger payment can be
//! traced back to exactly one request. An amount is only handed out if no
//! fight created in the last 15 minutes asks for the same one.

use crate::db::{NewFight, Repository};
use crate::domain::{Address, Corner, Fight, Lovelace, TimeMs};
use crate::roster::Rosters;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

/// Dust is drawn uniformly from `[0, DUST_RANGE)` in the smallest unit.
pub const DUST_RANGE: u64 = 500_000;

pub const MAX_DUST_ATTEMPTS: usize = 5;

/// Two live fights never share an amount inside this window.
pub const UNIQUENESS_WINDOW_MINUTES: i64 = 15;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("unknown {corner} fighter: {name}")]
    UnknownFighter { corner: &'static str, name: String },
    #[error("no unique payment amount after {0} attempts")]
    NoUniqueAmount(usize),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// A customer's request for a fight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FightRequest {
    pub red_fighter: String,
    pub blue_fighter: String,
    pub red_send_address: Option<Address>,
    pub blue_send_address: Option<Address>,
}

#[derive(Debug)]
pub struct FightIntake {
    repo: Arc<Repository>,
    rosters: Arc<Rosters>,
    payment_address: Address,
    base_cost: Lovelace,
    rng: Mutex<StdRng>,
}

impl FightIntake {
    pub fn new(
        repo: Arc<Repository>,
        rosters: Arc<Rosters>,
        payment_address: Address,
        base_cost_units: u64,
    ) -> Self {
        Self::with_rng(
            repo,
            rosters,
            payment_address,
            base_cost_units,
            StdRng::from_entropy(),
        )
    }

    pub fn with_rng(
        repo: Arc<Repository>,
        rosters: Arc<Rosters>,
        payment_address: Address,
        base_cost_units: u64,
        rng: StdRng,
    ) -> Self {
        Self {
            repo,
            rosters,
            payment_address,
            base_cost: Lovelace::from_whole_units(base_cost_units),
            rng: Mutex::new(rng),
        }
    }

    fn draw_amount(&self) -> Lovelace {
        let dust = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..DUST_RANGE),
            Err(poisoned) => poisoned.into_inner().gen_range(0..DUST_RANGE),
        };
        Lovelace::new(self.base_cost.as_u64().saturating_add(dust))
    }

    fn check_fighter(&self, corner: Corner, name: &str) -> Result<(), IntakeError> {
        if self.rosters.roster(corner).contains(name) {
            return Ok(());
        }
        Err(IntakeError::UnknownFighter {
            corner: corner.as_str(),
            name: name.to_string(),
        })
    }

    /// Validate both fighters and persist a PENDING fight with a unique amount.
    pub async fn create_fight(
        &self,
        request: &FightRequest,
        now: TimeMs,
    ) -> Result<Fight, IntakeError> {
        self.check_fighter(Corner::Red, &request.red_fighter)?;
        self.check_fighter(Corner::Blue, &request.blue_fighter)?;

        let window_start = now.minus_minutes(UNIQUENESS_WINDOW_MINUTES);
        for attempt in 1..=MAX_DUST_ATTEMPTS {
            let amount = self.draw_amount();
            let new_fight = NewFight {
                red_fighter: request.red_fighter.clone(),
                blue_fighter: request.blue_fighter.clone(),
                red_send_address: request.red_send_address.clone(),
                blue_send_address: request.blue_send_address.clone(),
                payment_amount: amount,
                payment_address: self.payment_address.clone(),
                created_at: now,
            };

            match self
                .repo
                .create_fight_if_amount_free(&new_fight, window_start)
                .await?
            {
                Some(id) => {
                    info!(fight_id = id, amount = %amount, attempt, "Fight created");
                    return self
                        .repo
                        .get_fight(id)
                        .await?
                        .ok_or(IntakeError::Store(sqlx::Error::RowNotFound));
                }
                None => warn!(amount = %amount, attempt, "Payment amount in use, redrawing"),
            }
        }
        Err(IntakeError::NoUniqueAmount(MAX_DUST_ATTEMPTS))
    }
}
