//! Lifecycle Orchestrator: the polling reconciliation loop.
//!
//! One pass runs, in order:
//! 1. match unspent payments to PENDING fights (PENDING -> QUEUED)
//! 2. stage QUEUED fights: render, pin, resolve combat, update records (-> STAGED)
//! 3. mint STAGED fights through the transaction builder (-> MINTED)
//! 4. on every Nth pass that gets this far, refund unmatched payments when enabled
//! 5. confirm MINTED fights seen on the ledger (-> CONFIRMED)
//!
//! Every persisted change goes through a conditional transition, so a pass that
//! is abandoned halfway, or raced by another instance, is simply picked up again.

use crate::datasource::{
    fight_caption, Announcement, Announcer, ContentStore, DataSourceError, FightImageRequest,
    ImageRenderer, LedgerSource, RewardImageRequest,
};
use crate::db::{ClaimOutcome, Repository, StageRecord, Transition};
use crate::domain::{
    Address, Corner, Fight, FightOutcome, FighterRecord, FightStatus, OutputRef, RewardSlot,
    TimeMs,
};
use crate::engine::{
    CombatResolver, Contender, MatchSnapshot, PaymentMatcher, RefundCandidate, MATCH_WINDOW_MINUTES,
};
use crate::orchestration::settlement::{BuildError, TxBuilder};
use crate::roster::Rosters;
use crate::toolchain::WorkDir;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const REWARD_IMAGE_SIZE: (u32, u32) = (640, 640);
const FIGHT_IMAGE_SIZE: (u32, u32) = (1200, 675);
const REWARD_IMAGE_FILE: &str = "reward.png";
const FIGHT_IMAGE_FILE: &str = "fight.png";

#[derive(Debug, Error)]
pub enum PassError {
    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] DataSourceError),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
    #[error("settlement of fight {fight_id} failed: {source}")]
    Build {
        fight_id: i64,
        #[source]
        source: BuildError,
    },
    #[error("refund batch failed: {0}")]
    Refund(#[source] BuildError),
    #[error("no reward slot left for fight {0}")]
    SlotsExhausted(i64),
    #[error("fight {0} has no reward slot")]
    MissingSlot(i64),
    #[error("fight {fight_id} names unknown fighter {name}")]
    UnknownFighter { fight_id: i64, name: String },
    #[error("payment of fight {0} is no longer unspent")]
    PaymentSpent(i64),
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
}

impl PassError {
    /// Errors that retrying the same fight cannot fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            PassError::Build { source, .. } => source.is_fatal(),
            PassError::MissingSlot(_)
            | PassError::UnknownFighter { .. }
            | PassError::PaymentSpent(_) => true,
            _ => false,
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub pass: u64,
    pub matched: usize,
    pub staged: usize,
    pub minted: usize,
    pub refunded: usize,
    pub confirmed: usize,
    /// Conditional transitions that found the fight already advanced.
    pub already_handled: usize,
    /// Unmatched payments seen this pass.
    pub refund_candidates: usize,
    pub quarantined: usize,
}

/// External services the orchestrator drives.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerSource>,
    pub renderer: Arc<dyn ImageRenderer>,
    pub store: Arc<dyn ContentStore>,
    pub announcer: Option<Arc<dyn Announcer>>,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub payment_address: Address,
    pub tier_batch_limit: i64,
    pub process_refunds: bool,
    pub refund_every_n_passes: u64,
    pub refund_batch_limit: usize,
    pub strength_jitter: u32,
    pub work_root: PathBuf,
    pub image_archive_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
}

pub struct Orchestrator {
    repo: Arc<Repository>,
    rosters: Arc<Rosters>,
    collaborators: Collaborators,
    builder: TxBuilder,
    settings: LifecycleSettings,
    matcher: PaymentMatcher,
    resolver: CombatResolver,
    rng: StdRng,
    passes: u64,
    /// Passes that got as far as the refund step.
    refund_checks: u64,
    /// Fights that hit a fatal error; left untouched for manual inspection.
    quarantined: HashSet<i64>,
    /// Outputs spent by a submitted refund that the ledger may still list.
    refunded: HashSet<OutputRef>,
    /// Outputs of a refund batch that could not be built; never offered again.
    unrefundable: HashSet<OutputRef>,
}

/// Staging artifacts written to a fight's work directory.
struct StagedArtifacts {
    reward_image: PathBuf,
    fight_image: PathBuf,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<Repository>,
        rosters: Arc<Rosters>,
        collaborators: Collaborators,
        builder: TxBuilder,
        settings: LifecycleSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            matcher: PaymentMatcher::new(settings.refund_batch_limit),
            resolver: CombatResolver::new(settings.strength_jitter),
            repo,
            rosters,
            collaborators,
            builder,
            settings,
            rng,
            passes: 0,
            refund_checks: 0,
            quarantined: HashSet::new(),
            refunded: HashSet::new(),
            unrefundable: HashSet::new(),
        }
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn is_quarantined(&self, fight_id: i64) -> bool {
        self.quarantined.contains(&fight_id)
    }

    /// Run passes forever, sleeping between them and backing off after errors.
    pub async fn run_forever(mut self) {
        loop {
            let wait = match self.run_pass(TimeMs::now()).await {
                Ok(report) => {
                    info!(
                        pass = report.pass,
                        matched = report.matched,
                        staged = report.staged,
                        minted = report.minted,
                        refunded = report.refunded,
                        confirmed = report.confirmed,
                        "Pass complete"
                    );
                    self.settings.poll_interval
                }
                Err(e) => {
                    error!(pass = self.passes, error = %e, "Pass abandoned");
                    self.settings.error_backoff
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// One full reconciliation pass as of `now`.
    pub async fn run_pass(&mut self, now: TimeMs) -> Result<PassReport, PassError> {
        self.passes += 1;
        let mut report = PassReport {
            pass: self.passes,
            ..PassReport::default()
        };

        let (unspent, refunds) = self.match_payments(now, &mut report).await?;
        self.stage_queued(&mut report).await?;
        self.mint_staged(now, &unspent, &mut report).await?;
        self.process_refunds(&refunds, &mut report).await?;
        self.confirm_minted(&mut report).await?;

        report.quarantined = self.quarantined.len();
        Ok(report)
    }

    /// Up to one tier's worth of fights in `status`, skipping quarantined ones.
    async fn tier(&self, status: FightStatus) -> Result<Vec<Fight>, sqlx::Error> {
        let limit = self.settings.tier_batch_limit;
        let fetch = limit.saturating_add(self.quarantined.len() as i64);
        let fights = self.repo.fights_in_status(status, fetch).await?;
        Ok(fights
            .into_iter()
            .filter(|f| !self.quarantined.contains(&f.id))
            .take(limit as usize)
            .collect())
    }

    fn quarantine(&mut self, fight_id: i64, err: &PassError) {
        error!(fight_id, error = %err, "Fatal error, fight left for manual inspection");
        self.quarantined.insert(fight_id);
    }

    async fn match_payments(
        &mut self,
        now: TimeMs,
        report: &mut PassReport,
    ) -> Result<(HashSet<OutputRef>, Vec<RefundCandidate>), PassError> {
        let outputs = self
            .collaborators
            .ledger
            .list_unspent(self.settings.payment_address.as_str())
            .await?;
        let refs: Vec<OutputRef> = outputs.iter().map(|o| o.output_ref.clone()).collect();

        let snapshot = MatchSnapshot {
            now,
            bound: self.repo.bound_outputs(&refs).await?,
            pending: self
                .repo
                .pending_fights_since(now.minus_minutes(MATCH_WINDOW_MINUTES))
                .await?,
        };
        let offered: Vec<_> = outputs
            .iter()
            .filter(|o| {
                !self.refunded.contains(&o.output_ref) && !self.unrefundable.contains(&o.output_ref)
            })
            .cloned()
            .collect();
        let plan = self.matcher.plan(&offered, &snapshot);
        debug!(
            outputs = outputs.len(),
            claims = plan.claims.len(),
            already_bound = plan.already_bound,
            rejected = plan.rejected,
            deferred_refunds = plan.deferred_refunds,
            "Matched payments"
        );

        for claim in &plan.claims {
            match self.repo.claim_payment(claim.fight_id, &claim.output_ref).await? {
                ClaimOutcome::Claimed { .. } => report.matched += 1,
                ClaimOutcome::AlreadyHandled => report.already_handled += 1,
                ClaimOutcome::NoSlotAvailable => {
                    return Err(PassError::SlotsExhausted(claim.fight_id))
                }
            }
        }

        report.refund_candidates = plan.refunds.len();
        Ok((refs.into_iter().collect(), plan.refunds))
    }

    async fn stage_queued(&mut self, report: &mut PassReport) -> Result<(), PassError> {
        for fight in self.tier(FightStatus::Queued).await? {
            match self.stage_fight(&fight).await {
                Ok(Transition::Applied) => report.staged += 1,
                Ok(Transition::AlreadyHandled) => report.already_handled += 1,
                Err(e) if e.is_fatal() => self.quarantine(fight.id, &e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn stage_fight(&mut self, fight: &Fight) -> Result<Transition, PassError> {
        let work = WorkDir::create(&self.settings.work_root).await?;
        let result = self.stage_in(&work, fight).await;
        let path = work.path().to_path_buf();
        if let Err(e) = work.remove().await {
            warn!(path = %path.display(), error = %e, "Failed to remove work directory");
        }
        result
    }

    async fn stage_in(&mut self, work: &WorkDir, fight: &Fight) -> Result<Transition, PassError> {
        let slot = self
            .repo
            .reward_slot_for_fight(fight.id)
            .await?
            .ok_or(PassError::MissingSlot(fight.id))?;
        let rosters = self.rosters.clone();
        let traits = |corner: Corner| {
            let name = fight.fighter(corner);
            rosters
                .roster(corner)
                .traits(name)
                .ok_or_else(|| PassError::UnknownFighter {
                    fight_id: fight.id,
                    name: name.to_string(),
                })
        };
        let red_traits = traits(Corner::Red)?;
        let blue_traits = traits(Corner::Blue)?;

        // Reward artifact
        let (width, height) = REWARD_IMAGE_SIZE;
        let reward_bytes = self
            .collaborators
            .renderer
            .render_reward(&RewardImageRequest {
                traits: slot.traits.clone(),
                width,
                height,
            })
            .await?;
        let reward_image = work.file(REWARD_IMAGE_FILE);
        tokio::fs::write(&reward_image, &reward_bytes).await?;
        let reward_hash = self.collaborators.store.pin(&reward_image).await?;
        debug!(fight_id = fight.id, slot_id = slot.id, cid = %reward_hash, "Pinned reward image");

        // Combat
        let result = self.resolver.resolve(
            Contender {
                name: &fight.red_fighter,
                traits: red_traits,
                table: &rosters.red_strength,
            },
            Contender {
                name: &fight.blue_fighter,
                traits: blue_traits,
                table: &rosters.blue_strength,
            },
            &mut self.rng,
        );
        let record_after = |record: FighterRecord, corner: Corner| {
            if corner == result.winner {
                record.after_win()
            } else {
                record.after_loss()
            }
        };
        let red_record = record_after(self.repo.fighter_record(&fight.red_fighter).await?, Corner::Red);
        let blue_record =
            record_after(self.repo.fighter_record(&fight.blue_fighter).await?, Corner::Blue);
        let outcome = FightOutcome {
            winner: result.winner,
            red_life: result.life(Corner::Red),
            blue_life: result.life(Corner::Blue),
            red_record,
            blue_record,
            red_ko: result.knocked_out(Corner::Red),
            blue_ko: result.knocked_out(Corner::Blue),
            red_beatup: result.beaten_up(Corner::Red),
            blue_beatup: result.beaten_up(Corner::Blue),
        };

        // Fight artifact
        let (width, height) = FIGHT_IMAGE_SIZE;
        let rendered = self
            .collaborators
            .renderer
            .render_fight(&FightImageRequest {
                red_fighter: fight.red_fighter.clone(),
                blue_fighter: fight.blue_fighter.clone(),
                red_life_bar: outcome.red_life,
                blue_life_bar: outcome.blue_life,
                red_record: outcome.red_record.clone(),
                blue_record: outcome.blue_record.clone(),
                red_ko: outcome.red_ko,
                blue_ko: outcome.blue_ko,
                red_beatup: outcome.red_beatup,
                blue_beatup: outcome.blue_beatup,
                width,
                height,
            })
            .await?;
        let fight_image = work.file(FIGHT_IMAGE_FILE);
        tokio::fs::write(&fight_image, &rendered.bytes).await?;
        let fight_hash = self.collaborators.store.pin(&fight_image).await?;
        debug!(fight_id = fight.id, cid = %fight_hash, background = %rendered.background, "Pinned fight image");

        let record = StageRecord {
            outcome,
            reward_hash,
            fight_hash,
            background: rendered.background,
        };
        let transition = self.repo.stage_fight(fight, slot.id, &record).await?;
        if transition == Transition::AlreadyHandled {
            return Ok(transition);
        }

        let artifacts = StagedArtifacts {
            reward_image,
            fight_image,
        };
        self.announce(fight, &record.outcome, &slot, &artifacts).await;
        if let Some(archive) = &self.settings.image_archive_dir {
            archive_images(archive, &slot, &artifacts).await?;
        }
        Ok(transition)
    }

    /// Best effort: failures are logged and never undo staging.
    async fn announce(
        &self,
        fight: &Fight,
        outcome: &FightOutcome,
        slot: &RewardSlot,
        artifacts: &StagedArtifacts,
    ) {
        let Some(announcer) = &self.collaborators.announcer else {
            return;
        };
        let winner = fight.fighter(outcome.winner);
        let loser = fight.fighter(outcome.winner.opponent());
        let post = Announcement {
            caption: fight_caption(winner, loser, &slot.display_name),
            images: vec![artifacts.reward_image.clone(), artifacts.fight_image.clone()],
        };
        match announcer.announce(&post).await {
            Ok(post_id) => {
                if let Err(e) = self.repo.set_announcement(fight.id, &post_id).await {
                    warn!(fight_id = fight.id, error = %e, "Failed to record announcement");
                }
            }
            Err(e) => warn!(fight_id = fight.id, error = %e, "Announcement failed"),
        }
    }

    async fn mint_staged(
        &mut self,
        now: TimeMs,
        unspent: &HashSet<OutputRef>,
        report: &mut PassReport,
    ) -> Result<(), PassError> {
        for fight in self.tier(FightStatus::Staged).await? {
            match self.mint_fight(&fight, now, unspent).await {
                Ok(Transition::Applied) => report.minted += 1,
                Ok(Transition::AlreadyHandled) => report.already_handled += 1,
                Err(e) if e.is_fatal() => self.quarantine(fight.id, &e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn mint_fight(
        &self,
        fight: &Fight,
        now: TimeMs,
        unspent: &HashSet<OutputRef>,
    ) -> Result<Transition, PassError> {
        let slot = self
            .repo
            .reward_slot_for_fight(fight.id)
            .await?
            .ok_or(PassError::MissingSlot(fight.id))?;
        // A spent payment on a STAGED fight means an earlier submission may have
        // landed; minting again must never be attempted.
        if let Some(incoming) = &fight.incoming {
            if !unspent.contains(incoming) {
                return Err(PassError::PaymentSpent(fight.id));
            }
        }

        let settlement = self
            .builder
            .build_mint(fight, &slot)
            .await
            .map_err(|source| PassError::Build {
                fight_id: fight.id,
                source,
            })?;
        let transition = self
            .repo
            .mark_minted(fight.id, &settlement.tx_id, now)
            .await?;
        if transition == Transition::AlreadyHandled {
            warn!(fight_id = fight.id, tx_id = %settlement.tx_id, "Fight was minted by another instance");
        }
        Ok(transition)
    }

    async fn process_refunds(
        &mut self,
        refunds: &[RefundCandidate],
        report: &mut PassReport,
    ) -> Result<(), PassError> {
        self.refund_checks += 1;
        if !self.settings.process_refunds
            || refunds.is_empty()
            || self.refund_checks % self.settings.refund_every_n_passes.max(1) != 0
        {
            return Ok(());
        }

        let min_output = self.builder.policy().min_asset_output;
        let (dust, refunds): (Vec<_>, Vec<_>) =
            refunds.iter().cloned().partition(|r| r.amount < min_output);
        for r in dust {
            warn!(output = %r.output_ref, amount = %r.amount, "Payment too small to return, left for manual inspection");
            self.unrefundable.insert(r.output_ref);
        }
        if refunds.is_empty() {
            return Ok(());
        }

        match self.builder.build_refund(&refunds).await {
            Ok(Some(settlement)) => {
                report.refunded = settlement.plan.inputs.len();
                self.refunded
                    .extend(settlement.plan.inputs.into_iter().map(|i| i.output_ref));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(error = %e, count = refunds.len(), "Refund batch cannot be built, outputs left for manual inspection");
                self.unrefundable
                    .extend(refunds.iter().map(|r| r.output_ref.clone()));
                Ok(())
            }
            Err(e) => Err(PassError::Refund(e)),
        }
    }

    async fn confirm_minted(&mut self, report: &mut PassReport) -> Result<(), PassError> {
        for fight in self.tier(FightStatus::Minted).await? {
            let Some(tx_id) = fight.settlement_tx.as_deref() else {
                warn!(fight_id = fight.id, "MINTED fight has no settlement transaction");
                continue;
            };
            if !self
                .collaborators
                .ledger
                .transaction_exists(tx_id)
                .await?
            {
                debug!(fight_id = fight.id, tx_id, "Settlement not yet on ledger");
                continue;
            }
            match self.repo.mark_confirmed(fight.id).await? {
                Transition::Applied => report.confirmed += 1,
                Transition::AlreadyHandled => report.already_handled += 1,
            }
        }
        Ok(())
    }
}

/// Copy both images to `rewards/<slot>.png` and `fights/fight<slot id>.png`.
async fn archive_images(
    archive: &Path,
    slot: &RewardSlot,
    artifacts: &StagedArtifacts,
) -> Result<(), std::io::Error> {
    let rewards = archive.join("rewards");
    let fights = archive.join("fights");
    tokio::fs::create_dir_all(&rewards).await?;
    tokio::fs::create_dir_all(&fights).await?;
    tokio::fs::copy(
        &artifacts.reward_image,
        rewards.join(format!("{}.png", slot.asset_name)),
    )
    .await?;
    tokio::fs::copy(
        &artifacts.fight_image,
        fights.join(format!("fight{}.png", slot.id)),
    )
    .await?;
    Ok(())
}
