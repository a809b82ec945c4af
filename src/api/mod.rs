pub mod fights;
pub mod health;

use crate::db::Repository;
use crate::orchestration::FightIntake;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub intake: Arc<FightIntake>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, intake: Arc<FightIntake>) -> Self {
        Self { repo, intake }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/fights", post(fights::create_fight))
        .route("/v1/fights/:id", get(fights::get_fight))
        .layer(cors)
        .with_state(state)
}
