use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{Address, DisplayStatus, Fight, TimeMs};
use crate::error::AppError;
use crate::orchestration::FightRequest;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFightBody {
    pub red_fighter: String,
    pub blue_fighter: String,
    pub red_send_address: Option<String>,
    pub blue_send_address: Option<String>,
}

/// A fight as shown to the customer who requested it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FightView {
    pub id: i64,
    pub red_fighter: String,
    pub blue_fighter: String,
    pub status: DisplayStatus,
    /// Whole units with six decimals, e.g. `125.370000`.
    pub payment_amount: String,
    pub payment_address: String,
    pub created_at: i64,
    pub minutes_until_expired: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minted_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub red_life_bar: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blue_life_bar: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_tx: Option<String>,
}

impl FightView {
    pub fn from_fight(fight: &Fight, now: TimeMs) -> Self {
        let (winner, loser) = match fight.winner_and_loser() {
            Some((w, l)) => (Some(w.to_string()), Some(l.to_string())),
            None => (None, None),
        };
        Self {
            id: fight.id,
            red_fighter: fight.red_fighter.clone(),
            blue_fighter: fight.blue_fighter.clone(),
            status: fight.display_status(now),
            payment_amount: fight.payment_amount.to_unit_string(),
            payment_address: fight.payment_address.to_string(),
            created_at: fight.created_at.as_i64(),
            minutes_until_expired: fight.minutes_until_expired(now),
            minted_at: fight.minted_at.map(|t| t.as_i64()),
            winner,
            loser,
            red_life_bar: fight.outcome.as_ref().map(|o| o.red_life),
            blue_life_bar: fight.outcome.as_ref().map(|o| o.blue_life),
            settlement_tx: fight.settlement_tx.clone(),
        }
    }
}

fn optional_address(raw: Option<String>) -> Option<Address> {
    raw.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Address::new)
}

pub async fn create_fight(
    State(state): State<AppState>,
    Json(body): Json<CreateFightBody>,
) -> Result<(StatusCode, Json<FightView>), AppError> {
    if body.red_fighter.trim().is_empty() || body.blue_fighter.trim().is_empty() {
        return Err(AppError::BadRequest(
            "redFighter and blueFighter are required".to_string(),
        ));
    }

    let request = FightRequest {
        red_fighter: body.red_fighter.trim().to_string(),
        blue_fighter: body.blue_fighter.trim().to_string(),
        red_send_address: optional_address(body.red_send_address),
        blue_send_address: optional_address(body.blue_send_address),
    };
    let now = TimeMs::now();
    let fight = state.intake.create_fight(&request, now).await?;
    Ok((StatusCode::CREATED, Json(FightView::from_fight(&fight, now))))
}

pub async fn get_fight(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<FightView>, AppError> {
    let fight = state
        .repo
        .get_fight(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("fight {}", id)))?;
    Ok(Json(FightView::from_fight(&fight, TimeMs::now())))
}
