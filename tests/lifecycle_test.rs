//! End-to-end passes of the lifecycle orchestrator against in-memory collaborators.

use fightmint::datasource::{Announcer, MockAnnouncer, MockContentStore, MockImageRenderer, MockLedger};
use fightmint::db::{init_db, NewFight};
use fightmint::domain::{
    Address, AssetAmount, FightStatus, Lovelace, OutputRef, RewardSlot, TimeMs, TraitSet, TxIo,
    TxUtxos, UnspentOutput,
};
use fightmint::engine::StrengthTable;
use fightmint::orchestration::{
    Collaborators, LifecycleSettings, Orchestrator, PassError, SettlementPolicy, TxBuilder,
};
use fightmint::roster::{Roster, Rosters};
use fightmint::toolchain::MockToolchain;
use fightmint::Repository;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FEE: u64 = 210_000;
const MINUTE: i64 = 60_000;
const AMOUNT: u64 = 125_370_000;

struct Harness {
    orchestrator: Orchestrator,
    repo: Arc<Repository>,
    ledger: Arc<MockLedger>,
    toolchain: Arc<MockToolchain>,
    renderer: Arc<MockImageRenderer>,
    store: Arc<MockContentStore>,
    temp: TempDir,
}

struct Options {
    announcer: Option<Arc<MockAnnouncer>>,
    renderer: MockImageRenderer,
    toolchain: MockToolchain,
    refund_every_n_passes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            announcer: Some(Arc::new(MockAnnouncer::new())),
            renderer: MockImageRenderer::new(),
            toolchain: MockToolchain::new(FEE),
            refund_every_n_passes: 1,
        }
    }
}

fn rosters() -> Rosters {
    Rosters {
        red: Roster::new().with("Red001", TraitSet::new().with("Skin", "green").with("Hat", "cap")),
        blue: Roster::new().with("Blue001", TraitSet::new().with("Skin", "blue").with("Hat", "none")),
        red_strength: StrengthTable::new().with("Skin", "green", 40).with("Hat", "cap", 20),
        blue_strength: StrengthTable::new().with("Skin", "blue", 30).with("Hat", "none", 0),
    }
}

async fn setup(options: Options) -> Harness {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let ledger = Arc::new(MockLedger::new().with_slot(5_000));
    let toolchain = Arc::new(options.toolchain);
    let renderer = Arc::new(options.renderer);
    let store = Arc::new(MockContentStore::new());
    let work_root = temp.path().join("work");

    let builder = TxBuilder::new(
        toolchain.clone(),
        ledger.clone(),
        work_root.clone(),
        SettlementPolicy {
            fight_policy_id: "fightpolicy".to_string(),
            reward_policy_id: "rewardpolicy".to_string(),
            royalty_address: Address::new("addr_royalty"),
            partner_address: Address::new("addr_partner"),
            partner_split: Lovelace::new(5_000_000),
            min_asset_output: Lovelace::new(1_250_000),
            mint_ttl_slots: 1_000,
            refund_ttl_slots: 10_800,
        },
    );
    let collaborators = Collaborators {
        ledger: ledger.clone(),
        renderer: renderer.clone(),
        store: store.clone(),
        announcer: options.announcer.map(|a| a as Arc<dyn Announcer>),
    };
    let settings = LifecycleSettings {
        payment_address: Address::new("addr_service"),
        tier_batch_limit: 10,
        process_refunds: true,
        refund_every_n_passes: options.refund_every_n_passes,
        refund_batch_limit: 10,
        strength_jitter: 0,
        work_root,
        image_archive_dir: Some(temp.path().join("archive")),
        poll_interval: Duration::from_secs(1),
        error_backoff: Duration::from_secs(1),
    };
    let orchestrator = Orchestrator::new(
        repo.clone(),
        Arc::new(rosters()),
        collaborators,
        builder,
        settings,
        StdRng::seed_from_u64(42),
    );

    Harness {
        orchestrator,
        repo,
        ledger,
        toolchain,
        renderer,
        store,
        temp,
    }
}

fn paying_tx(hash: &str, from: &str) -> TxUtxos {
    TxUtxos {
        hash: hash.to_string(),
        inputs: vec![TxIo {
            address: Address::new(from),
            amounts: vec![AssetAmount::lovelace(300_000_000)],
        }],
        outputs: vec![],
    }
}

fn pay(ledger: &MockLedger, hash: &str, amount: u64, from: &str) {
    ledger.add_payment(
        UnspentOutput::lovelace_only(hash, 0, amount),
        paying_tx(hash, from),
    );
}

async fn add_fight(repo: &Repository, amount: u64, created_ms: i64) -> i64 {
    repo.create_fight(&NewFight {
        red_fighter: "Red001".to_string(),
        blue_fighter: "Blue001".to_string(),
        red_send_address: Some(Address::new("addr_red_owner")),
        blue_send_address: None,
        payment_amount: Lovelace::new(amount),
        payment_address: Address::new("addr_service"),
        created_at: TimeMs::new(created_ms),
    })
    .await
    .unwrap()
}

async fn add_slots(repo: &Repository, count: i64) {
    for id in 1..=count {
        repo.insert_reward_slot(&RewardSlot {
            id,
            asset_name: format!("Reward{:05}", id),
            display_name: format!("Reward #{}", id),
            traits: TraitSet::new().with("Background", "dojo"),
            fight_id: None,
            content_hash: None,
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_paid_fight_runs_through_to_confirmed() {
    let mut h = setup(Options::default()).await;
    add_slots(&h.repo, 3).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.staged, 1);
    assert_eq!(report.minted, 1);
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.refund_candidates, 0);

    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Minted);
    assert_eq!(fight.incoming, Some(OutputRef::new("paytx", 0)));
    assert_eq!(fight.minted_at, Some(TimeMs::new(MINUTE)));
    assert_eq!(fight.background.as_deref(), Some("night-alley"));
    assert_eq!(fight.announcement_ref.as_deref(), Some("post-1"));
    assert_eq!(h.store.pinned().len(), 2);
    assert_eq!(h.renderer.calls(), 2);

    let outcome = fight.outcome.clone().unwrap();
    let (winner_record, loser_record) = match outcome.winner {
        fightmint::Corner::Red => (&outcome.red_record, &outcome.blue_record),
        fightmint::Corner::Blue => (&outcome.blue_record, &outcome.red_record),
    };
    assert_eq!(winner_record, "001-000");
    assert_eq!(loser_record, "000-001");

    // The reward slot is bound and carries the pinned reward image.
    let slot = h.repo.reward_slot_for_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(slot.id, 1);
    assert_eq!(slot.content_hash, fight.reward_hash);
    assert!(h.temp.path().join("archive/rewards/Reward00001.png").exists());
    assert!(h.temp.path().join("archive/fights/fight1.png").exists());

    // One fee-exact mint was submitted.
    let submitted = h.ledger.submitted();
    assert_eq!(submitted.len(), 1);
    let tx_id = MockLedger::tx_id_for(&submitted[0]);
    assert_eq!(fight.settlement_tx.as_deref(), Some(tx_id.as_str()));
    let built = h.toolchain.built();
    let final_plan = &built.last().unwrap().0;
    assert_eq!(final_plan.fee, Lovelace::new(FEE));
    assert_eq!(final_plan.total_outputs().unwrap().as_u64() + FEE, AMOUNT);

    // Not on the ledger yet: stays MINTED.
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.minted, 0);

    h.ledger.confirm(&tx_id);
    let report = h.orchestrator.run_pass(TimeMs::new(3 * MINUTE)).await.unwrap();
    assert_eq!(report.confirmed, 1);
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Confirmed);

    // Nothing further happens to a confirmed fight.
    let report = h.orchestrator.run_pass(TimeMs::new(4 * MINUTE)).await.unwrap();
    assert_eq!(report, fightmint::orchestration::PassReport { pass: 4, ..Default::default() });
    assert_eq!(h.ledger.submitted().len(), 1);
    let red = h.repo.fighter_record("Red001").await.unwrap();
    let blue = h.repo.fighter_record("Blue001").await.unwrap();
    assert_eq!(red.wins + blue.wins, 1);
    assert_eq!(red.losses + blue.losses, 1);
}

#[tokio::test]
async fn test_second_identical_payment_becomes_refund() {
    let mut h = setup(Options::default()).await;
    add_slots(&h.repo, 3).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx1", AMOUNT, "addr_payer");
    pay(&h.ledger, "paytx2", AMOUNT, "addr_second_payer");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.refund_candidates, 1);
    assert_eq!(report.refunded, 1);

    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.incoming, Some(OutputRef::new("paytx1", 0)));

    // One mint and one refund.
    assert_eq!(h.ledger.submitted().len(), 2);
    let refund_plan = h
        .toolchain
        .built()
        .into_iter()
        .map(|(plan, _, _)| plan)
        .filter(|plan| plan.kind == fightmint::engine::PlanKind::Refund)
        .last()
        .unwrap();
    assert_eq!(refund_plan.outputs[0].address, Address::new("addr_second_payer"));
    assert_eq!(refund_plan.outputs[0].lovelace, Lovelace::new(AMOUNT - FEE));

    // The refunded output is not refunded again while the ledger still lists it.
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.refund_candidates, 0);
    assert_eq!(report.refunded, 0);
    assert_eq!(h.ledger.submitted().len(), 2);
}

#[tokio::test]
async fn test_matching_is_idempotent_across_passes() {
    let mut h = setup(Options {
        renderer: MockImageRenderer::failing(),
        ..Options::default()
    })
    .await;
    add_slots(&h.repo, 3).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    // Rendering is down, so the fight stops at QUEUED and the pass is abandoned.
    let err = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap_err();
    assert!(matches!(err, PassError::Collaborator(_)));
    assert!(!err.is_fatal());
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Queued);

    let _ = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await;
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Queued);
    assert_eq!(fight.incoming, Some(OutputRef::new("paytx", 0)));
    assert_eq!(h.repo.unclaimed_slot_count().await.unwrap(), 2);
    assert!(h.ledger.submitted().is_empty());
}

#[tokio::test]
async fn test_payment_outside_window_is_refunded_not_matched() {
    let mut h = setup(Options::default()).await;
    add_slots(&h.repo, 1).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "latepay", AMOUNT, "addr_late_payer");

    let report = h
        .orchestrator
        .run_pass(TimeMs::new(25 * MINUTE))
        .await
        .unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(report.refunded, 1);
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Pending);
}

#[tokio::test]
async fn test_underpaid_fight_is_quarantined() {
    let mut h = setup(Options::default()).await;
    add_slots(&h.repo, 3).await;
    let small = add_fight(&h.repo, 6_000_000, 0).await;
    let normal = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "smallpay", 6_000_000, "addr_small_payer");
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.staged, 2);
    assert_eq!(report.minted, 1);
    assert_eq!(report.quarantined, 1);
    assert!(h.orchestrator.is_quarantined(small));
    assert!(!h.orchestrator.is_quarantined(normal));

    let stuck = h.repo.get_fight(small).await.unwrap().unwrap();
    assert_eq!(stuck.status, FightStatus::Staged);
    let minted = h.repo.get_fight(normal).await.unwrap().unwrap();
    assert_eq!(minted.status, FightStatus::Minted);

    // Quarantined fights are not retried.
    let built = h.toolchain.built().len();
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.minted, 0);
    assert_eq!(h.toolchain.built().len(), built);
}

#[tokio::test]
async fn test_failed_announcement_does_not_block_staging() {
    let mut h = setup(Options {
        announcer: Some(Arc::new(MockAnnouncer::failing())),
        ..Options::default()
    })
    .await;
    add_slots(&h.repo, 1).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.staged, 1);
    assert_eq!(report.minted, 1);
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.announcement_ref, None);
}

#[tokio::test]
async fn test_announcement_names_winner_and_reward() {
    let announcer = Arc::new(MockAnnouncer::new());
    let mut h = setup(Options {
        announcer: Some(announcer.clone()),
        ..Options::default()
    })
    .await;
    add_slots(&h.repo, 1).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");
    h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();

    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    let (winner, loser) = fight.winner_and_loser().unwrap();
    let posts = announcer.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(
        posts[0].caption,
        format!("{} defeated {} and revealed Reward #1!", winner, loser)
    );
    assert_eq!(posts[0].images.len(), 2);
}

#[tokio::test]
async fn test_ledger_outage_abandons_pass_without_changes() {
    let mut h = setup(Options {
        announcer: None,
        ..Options::default()
    })
    .await;
    add_slots(&h.repo, 1).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    h.ledger.set_offline(true);
    let err = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap_err();
    assert!(matches!(err, PassError::Collaborator(_)));
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Pending);

    h.ledger.set_offline(false);
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.pass, 2);
    assert_eq!(report.minted, 1);
}

#[tokio::test]
async fn test_running_out_of_slots_aborts_the_pass() {
    let mut h = setup(Options::default()).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    let err = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap_err();
    assert!(matches!(err, PassError::SlotsExhausted(id) if id == fight_id));
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Pending);
    assert_eq!(fight.incoming, None);
}

#[tokio::test]
async fn test_refunds_run_every_nth_pass() {
    let mut h = setup(Options {
        refund_every_n_passes: 3,
        ..Options::default()
    })
    .await;
    pay(&h.ledger, "stray", 42_000_000, "addr_stranger");

    for pass in 1..=2 {
        let report = h
            .orchestrator
            .run_pass(TimeMs::new(pass * MINUTE))
            .await
            .unwrap();
        assert_eq!(report.refund_candidates, 1);
        assert_eq!(report.refunded, 0);
    }
    assert!(h.ledger.submitted().is_empty());

    let report = h.orchestrator.run_pass(TimeMs::new(3 * MINUTE)).await.unwrap();
    assert_eq!(report.refunded, 1);
    assert_eq!(h.ledger.submitted().len(), 1);
    assert_eq!(h.orchestrator.passes(), 3);
}

#[tokio::test]
async fn test_pass_that_fails_early_does_not_count_toward_refunds() {
    let mut h = setup(Options {
        refund_every_n_passes: 2,
        ..Options::default()
    })
    .await;
    pay(&h.ledger, "stray", 42_000_000, "addr_stranger");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.refunded, 0);

    h.ledger.set_offline(true);
    assert!(h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.is_err());
    h.ledger.set_offline(false);

    let report = h.orchestrator.run_pass(TimeMs::new(3 * MINUTE)).await.unwrap();
    assert_eq!(report.pass, 3);
    assert_eq!(report.refunded, 1);
    assert_eq!(h.ledger.submitted().len(), 1);
}

#[tokio::test]
async fn test_dust_output_does_not_block_other_refunds() {
    let mut h = setup(Options::default()).await;
    pay(&h.ledger, "dust", 100_000, "addr_dust");
    pay(&h.ledger, "stray", 42_000_000, "addr_stranger");

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.refund_candidates, 2);
    assert_eq!(report.refunded, 1);
    let submitted = h.ledger.submitted();
    assert_eq!(submitted.len(), 1);

    let refund_plan = h.toolchain.built().last().unwrap().0.clone();
    assert_eq!(refund_plan.inputs.len(), 1);
    assert_eq!(refund_plan.inputs[0].output_ref, OutputRef::new("stray", 0));
    assert_eq!(refund_plan.outputs[0].address, Address::new("addr_stranger"));
    assert_eq!(refund_plan.outputs[0].lovelace, Lovelace::new(42_000_000 - FEE));

    // Neither output is offered again.
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.refund_candidates, 0);
    assert_eq!(report.refunded, 0);
    assert_eq!(h.ledger.submitted().len(), 1);
}

#[tokio::test]
async fn test_unbuildable_refund_batch_is_not_retried() {
    let mut h = setup(Options {
        toolchain: MockToolchain::new(50_000_000),
        ..Options::default()
    })
    .await;
    pay(&h.ledger, "stray", 42_000_000, "addr_stranger");

    // The fee exceeds the only input: the batch cannot be built.
    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.refund_candidates, 1);
    assert_eq!(report.refunded, 0);
    let built = h.toolchain.built().len();
    assert_eq!(built, 1);

    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.refund_candidates, 0);
    assert_eq!(h.toolchain.built().len(), built);
    assert!(h.ledger.submitted().is_empty());
}

#[tokio::test]
async fn test_staged_fight_with_spent_payment_is_never_minted() {
    let mut h = setup(Options {
        toolchain: MockToolchain::new(FEE).failing_sign(),
        ..Options::default()
    })
    .await;
    add_slots(&h.repo, 1).await;
    let fight_id = add_fight(&h.repo, AMOUNT, 0).await;
    pay(&h.ledger, "paytx", AMOUNT, "addr_payer");

    // Signing fails, so the fight is staged but not minted.
    let err = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap_err();
    assert!(!err.is_fatal());
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Staged);
    let built = h.toolchain.built().len();

    // The payment disappears from the ledger before the next attempt.
    h.ledger.remove_unspent(&OutputRef::new("paytx", 0));
    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.minted, 0);
    assert_eq!(report.quarantined, 1);
    assert!(h.orchestrator.is_quarantined(fight_id));
    assert_eq!(h.toolchain.built().len(), built);
    assert!(h.ledger.submitted().is_empty());
    let fight = h.repo.get_fight(fight_id).await.unwrap().unwrap();
    assert_eq!(fight.status, FightStatus::Staged);
    assert_eq!(fight.settlement_tx, None);
}

#[tokio::test]
async fn test_each_tier_takes_oldest_fights_up_to_the_cap() {
    let mut h = setup(Options::default()).await;
    add_slots(&h.repo, 12).await;
    let mut ids = Vec::new();
    for i in 0..12u64 {
        let amount = AMOUNT + i * 10_000;
        ids.push(add_fight(&h.repo, amount, i as i64 * 1_000).await);
        pay(&h.ledger, &format!("paytx{}", i), amount, &format!("addr_payer{}", i));
    }

    let report = h.orchestrator.run_pass(TimeMs::new(MINUTE)).await.unwrap();
    assert_eq!(report.matched, 12);
    assert_eq!(report.staged, 10);
    assert_eq!(report.minted, 10);

    for (i, id) in ids.iter().enumerate() {
        let fight = h.repo.get_fight(*id).await.unwrap().unwrap();
        let expected = if i < 10 {
            FightStatus::Minted
        } else {
            FightStatus::Queued
        };
        assert_eq!(fight.status, expected, "fight {} created at {}s", id, i);
    }

    let report = h.orchestrator.run_pass(TimeMs::new(2 * MINUTE)).await.unwrap();
    assert_eq!(report.staged, 2);
    assert_eq!(report.minted, 2);
}
