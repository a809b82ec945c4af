use anyhow::Context;
use fightmint::datasource::{
    Announcer, BlockfrostLedger, HttpAnnouncer, HttpImageRenderer, LedgerSource, PinningStore,
};
use fightmint::orchestration::{
    Collaborators, FightIntake, LifecycleSettings, Orchestrator, SettlementPolicy, TxBuilder,
};
use fightmint::toolchain::{CardanoCli, TxToolchain};
use fightmint::{api, config::Config, db::init_db, Repository, Rosters};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));
    let rosters = Arc::new(Rosters::load(&config.roster_dir).context("failed to load rosters")?);

    // External collaborators
    let ledger: Arc<dyn LedgerSource> = Arc::new(BlockfrostLedger::new(
        config.ledger_api_url.clone(),
        config.ledger_project_id.clone(),
        config.http_timeout,
    )?);
    let renderer = Arc::new(HttpImageRenderer::new(
        config.image_builder_url.clone(),
        config.http_timeout,
    )?);
    let store = Arc::new(PinningStore::new(
        config.storage_url.clone(),
        config.storage_api_key.clone(),
        config.http_timeout,
    )?);
    let announcer: Option<Arc<dyn Announcer>> = match &config.announce {
        Some(announce) => Some(Arc::new(HttpAnnouncer::new(
            announce.url.clone(),
            announce.token.clone(),
            config.http_timeout,
        )?)),
        None => {
            tracing::info!("No announcement endpoint configured, announcements disabled");
            None
        }
    };

    let toolchain: Arc<dyn TxToolchain> = Arc::new(
        CardanoCli::new(config.cli_path.clone(), config.keys_dir.clone(), config.network())
            .with_policy(&config.fight_policy_id, "fight")
            .with_policy(&config.reward_policy_id, "reward")
            .with_timeout(config.cli_timeout),
    );
    let builder = TxBuilder::new(
        toolchain,
        ledger.clone(),
        config.work_dir.clone(),
        SettlementPolicy {
            fight_policy_id: config.fight_policy_id.clone(),
            reward_policy_id: config.reward_policy_id.clone(),
            royalty_address: config.royalty_address.clone(),
            partner_address: config.partner_address.clone(),
            partner_split: config.partner_split,
            min_asset_output: config.min_asset_output,
            mint_ttl_slots: config.mint_ttl_slots,
            refund_ttl_slots: config.refund_ttl_slots,
        },
    );

    let orchestrator = Orchestrator::new(
        repo.clone(),
        rosters.clone(),
        Collaborators {
            ledger,
            renderer,
            store,
            announcer,
        },
        builder,
        LifecycleSettings {
            payment_address: config.payment_address.clone(),
            tier_batch_limit: config.tier_batch_limit,
            process_refunds: config.process_refunds,
            refund_every_n_passes: config.refund_every_n_passes,
            refund_batch_limit: config.refund_batch_limit,
            strength_jitter: config.strength_jitter,
            work_root: config.work_dir.clone(),
            image_archive_dir: config.image_archive_dir.clone(),
            poll_interval: config.poll_interval,
            error_backoff: config.error_backoff,
        },
        StdRng::from_entropy(),
    );
    tokio::spawn(orchestrator.run_forever());

    let intake = Arc::new(FightIntake::new(
        repo.clone(),
        rosters,
        config.payment_address.clone(),
        config.base_cost,
    ));
    let app = api::create_router(api::AppState::new(repo, intake));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
