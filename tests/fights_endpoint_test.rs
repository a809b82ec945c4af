use axum::http::StatusCode;
use fightmint::api;
use fightmint::db::init_db;
use fightmint::domain::{Address, FightStatus, OutputRef, TraitSet};
use fightmint::orchestration::FightIntake;
use fightmint::roster::{Roster, Rosters};
use fightmint::Repository;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    _temp: TempDir,
}

async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let rosters = Rosters {
        red: Roster::new().with("Red001", TraitSet::new().with("Skin", "green")),
        blue: Roster::new().with("Blue001", TraitSet::new().with("Skin", "blue")),
        ..Rosters::default()
    };
    let intake = Arc::new(FightIntake::with_rng(
        repo.clone(),
        Arc::new(rosters),
        Address::new("addr_service"),
        125,
        StdRng::seed_from_u64(7),
    ));
    let app = api::create_router(api::AppState::new(repo.clone(), intake));

    TestApp {
        app,
        repo,
        _temp: temp_dir,
    }
}

async fn request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app().await;
    let (status, body) = request(test_app.app.clone(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = request(test_app.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_fight_returns_payment_instructions() {
    let test_app = setup_test_app().await;
    let (status, body) = request(
        test_app.app.clone(),
        "POST",
        "/v1/fights",
        Some(serde_json::json!({
            "redFighter": "Red001",
            "blueFighter": "Blue001",
            "redSendAddress": "addr_red_owner",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "AWAITING_PAYMENT");
    assert_eq!(body["paymentAddress"], "addr_service");
    assert_eq!(body["minutesUntilExpired"], 15);
    let amount = body["paymentAmount"].as_str().unwrap();
    assert!(amount.starts_with("125."), "amount was {}", amount);
    assert_eq!(amount.split('.').nth(1).map(str::len), Some(6));
    assert!(body.get("winner").is_none());

    let id = body["id"].as_i64().unwrap();
    let stored = test_app.repo.get_fight(id).await.unwrap().unwrap();
    assert_eq!(stored.status, FightStatus::Pending);
    assert_eq!(stored.red_send_address, Some(Address::new("addr_red_owner")));
    assert_eq!(stored.blue_send_address, None);
    assert_eq!(stored.payment_amount.to_unit_string(), amount);

    let (status, fetched) =
        request(test_app.app, "GET", &format!("/v1/fights/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["paymentAmount"], body["paymentAmount"]);
    assert_eq!(fetched["redFighter"], "Red001");
}

#[tokio::test]
async fn test_unknown_fighter_is_bad_request() {
    let test_app = setup_test_app().await;
    let (status, body) = request(
        test_app.app,
        "POST",
        "/v1/fights",
        Some(serde_json::json!({
            "redFighter": "Nobody",
            "blueFighter": "Blue001",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Nobody"));
}

#[tokio::test]
async fn test_missing_fight_is_not_found() {
    let test_app = setup_test_app().await;
    let (status, body) = request(test_app.app, "GET", "/v1/fights/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_paid_fight_reads_as_payment_received() {
    let test_app = setup_test_app().await;
    let (_, body) = request(
        test_app.app.clone(),
        "POST",
        "/v1/fights",
        Some(serde_json::json!({
            "redFighter": "Red001",
            "blueFighter": "Blue001",
        })),
    )
    .await;
    let id = body["id"].as_i64().unwrap();

    test_app
        .repo
        .insert_reward_slot(&fightmint::domain::RewardSlot {
            id: 1,
            asset_name: "Reward00001".to_string(),
            display_name: "Reward #1".to_string(),
            traits: TraitSet::new(),
            fight_id: None,
            content_hash: None,
        })
        .await
        .unwrap();
    test_app
        .repo
        .claim_payment(id, &OutputRef::new("paytx", 0))
        .await
        .unwrap();

    let (status, fetched) =
        request(test_app.app, "GET", &format!("/v1/fights/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "PAYMENT_RECEIVED");
}
