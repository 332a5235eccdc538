//! Campaign wizard: the end-to-end pipeline orchestrator.
//!
//! A run moves through fixed stages (signals, futurist, draft, debate,
//! revise, localize) and either assembles a [`CampaignPack`] or fails. Signal,
//! futurist, QA, variant, debate and localization problems degrade the run and
//! are kept as warnings; a draft that cannot be produced, a rejected draft that
//! cannot be revised, invalid input and cancellation fail it. Every transition
//! is appended to the run ledger.

use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    audience::{DebateEngine, DebatePanel, DebateTranscript, Recommendation, Verdict},
    brief::GoalBrief,
    config::PortalConfig,
    creative::{CreativeAsset, CreativeGenerator, QaReport},
    futurist::{FuturistScanner, Theme},
    gateway::ProviderGateway,
    signals::{Opportunity, SignalAggregator, TrendSource},
    store::{CacheStats, PersistenceStore},
    PortalError, Result,
};

mod pack;
mod types;

pub use pack::{CampaignPack, PackLookup, RunEvent};
pub use types::{
    CampaignRun, FailureKind, FailureReason, PipelineStage, RunStatus, RunWarning, StageRecord,
    StageStatus, WizardState,
};

type StageResult<T> = std::result::Result<T, FailureReason>;

/// Outputs carried from one stage to the next.
#[derive(Default)]
struct Progress {
    opportunities: Vec<Opportunity>,
    themes: Vec<Theme>,
    qa: Option<QaReport>,
    final_asset: Option<CreativeAsset>,
    variants: Vec<CreativeAsset>,
    variant_verdicts: Vec<Verdict>,
    localized: Vec<CreativeAsset>,
    verdicts: Vec<Verdict>,
    aborted_transcripts: Vec<DebateTranscript>,
}

pub struct CampaignWizard {
    aggregator: SignalAggregator,
    futurist: FuturistScanner,
    creative: CreativeGenerator,
    debate: DebateEngine,
    store: Arc<PersistenceStore>,
    config: Arc<PortalConfig>,
    active: RwLock<HashMap<Uuid, CancellationToken>>,
    events: broadcast::Sender<RunEvent>,
}

impl CampaignWizard {
    pub fn new(
        config: Arc<PortalConfig>,
        gateway: Arc<ProviderGateway>,
        source: Arc<dyn TrendSource>,
        store: Arc<PersistenceStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            aggregator: SignalAggregator::new(source, config.clone()),
            futurist: FuturistScanner::new(gateway.clone(), store.clone(), config.clone()),
            creative: CreativeGenerator::new(gateway.clone(), store.clone(), config.clone()),
            debate: DebateEngine::new(gateway, store.clone(), config.clone()),
            store,
            config,
            active: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Validate `brief`, record a pending run and execute it in the background.
    pub async fn start_run(self: &Arc<Self>, brief: GoalBrief) -> Result<Uuid> {
        let (run, cancel) = self.open_run(brief, CancellationToken::new()).await?;
        let run_id = run.id;

        let wizard = Arc::clone(self);
        tokio::spawn(async move {
            wizard.execute(run, cancel).await;
        });
        Ok(run_id)
    }

    /// Execute a run to completion and return its settled state.
    pub async fn run(&self, brief: GoalBrief) -> Result<CampaignRun> {
        self.run_with_cancel(brief, &CancellationToken::new()).await
    }

    /// As [`run`](Self::run), settling as cancelled once `cancel` fires.
    pub async fn run_with_cancel(&self, brief: GoalBrief, cancel: &CancellationToken) -> Result<CampaignRun> {
        let (run, token) = self.open_run(brief, cancel.child_token()).await?;
        Ok(self.execute(run, token).await)
    }

    pub async fn get_run_status(&self, run_id: Uuid) -> Result<CampaignRun> {
        self.store.load_run(run_id).await
    }

    /// Every recorded revision of a run, oldest first.
    pub async fn get_run_history(&self, run_id: Uuid) -> Result<Vec<CampaignRun>> {
        self.store.run_history(run_id).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub async fn get_pack(&self, run_id: Uuid) -> Result<PackLookup> {
        let run = self.store.load_run(run_id).await?;
        Ok(match run.pack {
            Some(pack) => PackLookup::Ready { pack: Box::new(pack) },
            None => PackLookup::NotReady {
                status: run.status,
                stage: run.current_stage,
            },
        })
    }

    /// Raise the cancellation signal for a run.
    ///
    /// A run left unsettled without an executor (e.g. after a restart) is
    /// settled as cancelled directly. Once this returns `Ok` for a run that is
    /// still executing, that run settles as cancelled.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<()> {
        if let Some(token) = self.active.read().await.get(&run_id) {
            tracing::info!("[WIZARD] Cancelling run {}", run_id);
            token.cancel();
            return Ok(());
        }

        let mut run = self.store.load_run(run_id).await?;
        if run.is_settled() {
            return Err(PortalError::RunSettled(run_id));
        }
        let stage = match run.current_stage {
            WizardState::Running(stage) => Some(stage),
            _ => None,
        };
        tracing::warn!("[WIZARD] Run {} has no executor, settling as cancelled", run_id);
        run.fail(FailureReason::cancelled(stage));
        self.store.record_run(&run).await?;
        self.emit(RunEvent::RunSettled {
            run_id,
            status: run.status,
        });
        Ok(())
    }

    async fn open_run(
        &self,
        brief: GoalBrief,
        cancel: CancellationToken,
    ) -> Result<(CampaignRun, CancellationToken)> {
        brief.validate()?;
        self.debate
            .panel(brief.believer.as_deref(), brief.skeptic.as_deref())?;
        let run = CampaignRun::new(brief);
        self.store.record_run(&run).await?;

        self.active.write().await.insert(run.id, cancel.clone());

        tracing::info!("[WIZARD] Run {} started: {}", run.id, run.brief.goal.trim());
        self.emit(RunEvent::RunStarted { run_id: run.id });
        Ok((run, cancel))
    }

    async fn execute(&self, mut run: CampaignRun, cancel: CancellationToken) -> CampaignRun {
        let outcome = self.drive(&mut run, &cancel).await;

        // Decide, settle and unregister under one lock so `cancel_run` never sees a
        // registered run that is already settled, or an unregistered one that is not,
        // and a cancel it acknowledged is never lost.
        {
            let mut active = self.active.write().await;
            let outcome = match outcome {
                Ok(_) if cancel.is_cancelled() => Err(FailureReason::cancelled(None)),
                other => other,
            };
            match outcome {
                Ok(pack) => {
                    if let Err(err) = run.assemble(pack) {
                        run.fail(FailureReason {
                            stage: None,
                            kind: FailureKind::Internal,
                            message: err.to_string(),
                        });
                    }
                }
                Err(reason) => run.fail(reason),
            }
            if let Err(err) = self.store.record_run(&run).await {
                tracing::error!("[WIZARD] Failed to record settled run {}: {}", run.id, err);
            }
            active.remove(&run.id);
        }

        match &run.failure {
            Some(reason) => tracing::warn!(
                "[WIZARD] Run {} failed at {}: {}",
                run.id,
                reason.stage.map(|s| s.as_str()).unwrap_or("start"),
                reason.message
            ),
            None => tracing::info!(
                "[WIZARD] Run {} assembled ({}, {} warning(s))",
                run.id,
                run.status.as_str(),
                run.warnings.len()
            ),
        }
        self.emit(RunEvent::RunSettled {
            run_id: run.id,
            status: run.status,
        });
        run
    }

    async fn drive(&self, run: &mut CampaignRun, cancel: &CancellationToken) -> StageResult<CampaignPack> {
        let now = Utc::now();
        let window = run
            .brief
            .lookback_window(now, self.config.signals.default_lookback_hours);
        let mut progress = Progress::default();

        // Signals
        self.begin(run, cancel, PipelineStage::Signals).await?;
        let collected = guarded(cancel, PipelineStage::Signals, self.aggregator.collect_at(&run.brief, now)).await?;
        match collected {
            Ok(opportunities) => {
                progress.opportunities = opportunities;
                if let Err(err) = self.store.record_signal_samples(&progress.opportunities).await {
                    tracing::warn!("[WIZARD] Run {} could not record signal history: {}", run.id, err);
                }
                let detail = format!("{} opportunity(ies)", progress.opportunities.len());
                self.settle(run, PipelineStage::Signals, StageStatus::Succeeded, Some(detail))
                    .await?;
            }
            Err(err) => {
                run.warn(PipelineStage::Signals, err.to_string());
                self.settle(run, PipelineStage::Signals, StageStatus::Degraded, Some(err.to_string()))
                    .await?;
            }
        }

        // Futurist
        if progress.opportunities.is_empty() {
            self.settle(run, PipelineStage::Futurist, StageStatus::Skipped, None)
                .await?;
        } else {
            self.begin(run, cancel, PipelineStage::Futurist).await?;
            progress.themes = guarded(
                cancel,
                PipelineStage::Futurist,
                self.futurist.scan(&progress.opportunities, window),
            )
            .await?;
            let unnamed = progress.themes.iter().filter(|t| !t.named).count();
            if unnamed > 0 {
                run.warn(
                    PipelineStage::Futurist,
                    format!("{unnamed} theme(s) could not be named"),
                );
                self.settle(run, PipelineStage::Futurist, StageStatus::Degraded, None)
                    .await?;
            } else {
                self.settle(run, PipelineStage::Futurist, StageStatus::Succeeded, None)
                    .await?;
            }
        }

        // Draft, QA and variants
        self.begin(run, cancel, PipelineStage::Draft).await?;
        let mut draft = self.draft(run, cancel, &mut progress).await?;

        // Debate
        self.begin(run, cancel, PipelineStage::Debate).await?;
        let panel = self
            .debate
            .panel(run.brief.believer.as_deref(), run.brief.skeptic.as_deref())
            .map_err(|err| FailureReason::from_error(PipelineStage::Debate, &err))?;
        let verdict = self
            .debate_candidates(run, cancel, &panel, &mut draft, &mut progress)
            .await?;
        progress.final_asset = Some(draft.clone());

        // Revise: at most one pass, whatever the re-check says.
        match verdict {
            Some(verdict) if verdict.recommendation.needs_revision() => {
                self.begin(run, cancel, PipelineStage::Revise).await?;
                self.revise(run, cancel, &panel, &draft, &verdict, &mut progress)
                    .await?;
            }
            _ => {
                self.settle(run, PipelineStage::Revise, StageStatus::Skipped, None)
                    .await?;
            }
        }

        // Localize
        let final_asset = progress.final_asset.clone().unwrap_or_else(|| draft.clone());
        let targets = localization_targets(&run.brief, &final_asset);
        if targets.is_empty() {
            self.settle(run, PipelineStage::Localize, StageStatus::Skipped, None)
                .await?;
        } else {
            self.begin(run, cancel, PipelineStage::Localize).await?;
            let results = guarded(
                cancel,
                PipelineStage::Localize,
                futures::future::join_all(
                    targets
                        .iter()
                        .map(|locale| self.creative.localize(&final_asset, locale)),
                ),
            )
            .await?;
            let mut failed = 0;
            for (locale, result) in targets.iter().zip(results) {
                match result {
                    Ok(asset) => progress.localized.push(asset),
                    Err(err) => {
                        failed += 1;
                        run.warn(PipelineStage::Localize, format!("{locale}: {err}"));
                    }
                }
            }
            let status = if failed == 0 {
                StageStatus::Succeeded
            } else {
                StageStatus::Degraded
            };
            self.settle(run, PipelineStage::Localize, status, None).await?;
        }

        Ok(CampaignPack {
            run_id: run.id,
            goal: run.brief.goal.trim().to_string(),
            opportunities: progress.opportunities,
            themes: progress.themes,
            draft,
            qa: progress.qa,
            variants: progress.variants,
            variant_verdicts: progress.variant_verdicts,
            final_asset,
            localized: progress.localized,
            verdicts: progress.verdicts,
            aborted_transcripts: progress.aborted_transcripts,
            degraded: !run.warnings.is_empty(),
            warnings: run.warnings.clone(),
            assembled_at: Utc::now(),
        })
    }

    /// First draft, the optional QA patch and any competing variants.
    async fn draft(
        &self,
        run: &mut CampaignRun,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> StageResult<CreativeAsset> {
        let stage = PipelineStage::Draft;
        let warnings_before = run.warnings.len();

        let mut draft = guarded(cancel, stage, self.creative.draft(&run.brief, &progress.opportunities))
            .await?
            .map_err(|err| FailureReason::from_error(stage, &err))?;

        if self.config.creative.qa_pass {
            match guarded(cancel, stage, self.creative.qa_and_patch(&draft)).await? {
                Ok(report) => {
                    draft = report.asset.clone();
                    progress.qa = Some(report);
                }
                Err(err) => run.warn(stage, format!("QA pass failed: {err}; keeping the unchecked draft")),
            }
        }

        let extra = run.brief.variants().saturating_sub(1);
        if extra > 0 {
            match guarded(cancel, stage, self.creative.variants(&draft, extra)).await? {
                Ok(variants) => progress.variants = variants,
                Err(err) => run.warn(stage, format!("variants unavailable: {err}")),
            }
        }

        let status = if run.warnings.len() > warnings_before {
            StageStatus::Degraded
        } else {
            StageStatus::Succeeded
        };
        self.settle(run, stage, status, Some(draft.id.to_string())).await?;
        Ok(draft)
    }

    /// Debate the draft and every variant. The best verdict wins and its asset
    /// replaces `draft`; the others are kept as losing variants.
    async fn debate_candidates(
        &self,
        run: &mut CampaignRun,
        cancel: &CancellationToken,
        panel: &DebatePanel,
        draft: &mut CreativeAsset,
        progress: &mut Progress,
    ) -> StageResult<Option<Verdict>> {
        let stage = PipelineStage::Debate;
        let mut candidates = vec![draft.clone()];
        candidates.append(&mut progress.variants);

        let results = self
            .debate
            .pressure_test_all(&candidates, self.config.debate.max_rounds, panel, cancel)
            .await;

        let mut verdicts = Vec::new();
        let mut failures = Vec::new();
        for (asset, result) in candidates.iter().zip(results) {
            match result {
                Ok(verdict) => verdicts.push(verdict),
                Err(PortalError::Cancelled) => return Err(FailureReason::cancelled(Some(stage))),
                Err(err) => {
                    if let PortalError::DebateAborted { transcript, .. } = &err {
                        progress.aborted_transcripts.push((**transcript).clone());
                    }
                    failures.push((asset.id, err));
                }
            }
        }

        let Some(best) = best_verdict(&verdicts) else {
            for (_, err) in &failures {
                run.warn(stage, format!("{err}; keeping the unrevised draft"));
            }
            let detail = failures.first().map(|(_, err)| err.to_string());
            progress.variants = candidates.split_off(1);
            self.settle(run, stage, StageStatus::Degraded, detail).await?;
            return Ok(None);
        };

        let verdict = verdicts.remove(best);
        for (asset_id, err) in &failures {
            run.warn(stage, format!("debate of asset {asset_id} failed: {err}"));
        }
        if let Some(position) = candidates.iter().position(|c| c.id == verdict.asset_id) {
            *draft = candidates.remove(position);
        }
        if !candidates.is_empty() {
            tracing::info!(
                "[WIZARD] Run {} picked asset {} over {} variant(s)",
                run.id,
                draft.id,
                candidates.len()
            );
        }
        progress.variants = candidates;
        progress.variant_verdicts = verdicts;
        progress.verdicts.push(verdict.clone());

        let status = if failures.is_empty() {
            StageStatus::Succeeded
        } else {
            StageStatus::Degraded
        };
        let detail = verdict.recommendation.as_str().to_string();
        self.settle(run, stage, status, Some(detail)).await?;
        Ok(Some(verdict))
    }

    /// The single revision pass, optionally followed by one re-check debate.
    async fn revise(
        &self,
        run: &mut CampaignRun,
        cancel: &CancellationToken,
        panel: &DebatePanel,
        draft: &CreativeAsset,
        verdict: &Verdict,
        progress: &mut Progress,
    ) -> StageResult<()> {
        let stage = PipelineStage::Revise;
        let revised = match guarded(cancel, stage, self.creative.revise(draft, verdict)).await? {
            Ok(revised) => revised,
            Err(err) if verdict.recommendation == Recommendation::Reject => {
                return Err(FailureReason::from_error(stage, &err));
            }
            Err(err) => {
                run.warn(stage, format!("{err}; keeping the unrevised draft"));
                return self
                    .settle(run, stage, StageStatus::Degraded, Some(err.to_string()))
                    .await;
            }
        };
        progress.final_asset = Some(revised.clone());

        if !self.config.debate.recheck_revision {
            return self
                .settle(run, stage, StageStatus::Succeeded, Some(revised.id.to_string()))
                .await;
        }

        match self
            .debate
            .pressure_test_with(&revised, self.config.debate.max_rounds, panel, cancel)
            .await
        {
            Ok(recheck) => {
                progress.verdicts.push(recheck);
                self.settle(run, stage, StageStatus::Succeeded, Some(revised.id.to_string()))
                    .await
            }
            Err(PortalError::Cancelled) => Err(FailureReason::cancelled(Some(stage))),
            Err(err) => {
                if let PortalError::DebateAborted { transcript, .. } = &err {
                    progress.aborted_transcripts.push((**transcript).clone());
                }
                run.warn(stage, format!("re-check of the revision failed: {err}"));
                self.settle(run, stage, StageStatus::Degraded, Some(err.to_string()))
                    .await
            }
        }
    }

    /// Check for cancellation, then mark `stage` running.
    async fn begin(&self, run: &mut CampaignRun, cancel: &CancellationToken, stage: PipelineStage) -> StageResult<()> {
        if cancel.is_cancelled() {
            return Err(FailureReason::cancelled(Some(stage)));
        }
        run.begin_stage(stage)
            .map_err(|err| FailureReason::from_error(stage, &err))?;
        tracing::info!("[WIZARD] Run {} entering {}", run.id, stage);
        self.persist(run, stage).await?;
        self.emit(RunEvent::StageStarted { run_id: run.id, stage });
        Ok(())
    }

    async fn settle(
        &self,
        run: &mut CampaignRun,
        stage: PipelineStage,
        status: StageStatus,
        detail: Option<String>,
    ) -> StageResult<()> {
        run.settle_stage(stage, status, detail)
            .map_err(|err| FailureReason::from_error(stage, &err))?;
        self.persist(run, stage).await?;
        self.emit(RunEvent::StageSettled {
            run_id: run.id,
            stage,
            status,
        });
        Ok(())
    }

    async fn persist(&self, run: &CampaignRun, stage: PipelineStage) -> StageResult<()> {
        self.store.record_run(run).await.map(|_| ()).map_err(|err| FailureReason {
            stage: Some(stage),
            kind: FailureKind::Internal,
            message: err.to_string(),
        })
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Drive `work` unless `cancel` fires first.
async fn guarded<T>(cancel: &CancellationToken, stage: PipelineStage, work: impl Future<Output = T>) -> StageResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureReason::cancelled(Some(stage))),
        output = work => Ok(output),
    }
}

/// Index of the strongest verdict: best recommendation, then highest
/// confidence, then earliest.
fn best_verdict(verdicts: &[Verdict]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, verdict) in verdicts.iter().enumerate() {
        let better = match best {
            None => true,
            Some(b) => {
                let current = &verdicts[b];
                (verdict.recommendation.rank(), verdict.confidence)
                    > (current.recommendation.rank(), current.confidence)
            }
        };
        if better {
            best = Some(i);
        }
    }
    best
}

/// Extra locales to localize into, minus the asset's own locale and duplicates.
fn localization_targets(brief: &GoalBrief, asset: &CreativeAsset) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for locale in &brief.extra_locales {
        if *locale != asset.locale && !targets.contains(locale) {
            targets.push(locale.clone());
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        gateway::{roles, ProviderError, ProviderPrompt, ProviderReply},
        signals::SourceError,
        test_support::{
            gateway_with, memory_store, raw_signal, test_config, HangingSource, ScriptedProvider, StaticSource,
        },
    };

    const DRAFT: &str = r#"{"plan": "Lead with savings", "copy": "Fare drops to Bali, sent the moment they land."}"#;
    const REVISED: &str = r#"{"copy": "Fares to Bali from $199, checked every hour."}"#;
    const QA_PATCHED: &str = r#"{"copy": "Fare drops to Bali from 40 airlines, sent the moment they land."}"#;

    fn script(recommendation: &'static str) -> impl Fn(&str, &ProviderPrompt) -> std::result::Result<ProviderReply, ProviderError> {
        move |role, prompt| {
            let body = match role {
                roles::COPYWRITER if prompt.user.contains("focus group reviewed") => REVISED.to_string(),
                roles::COPYWRITER if prompt.user.contains("alternative subject-line") => {
                    r#"{"headlines": ["Bali for less"], "ctas": ["Set my alert"]}"#.to_string()
                }
                roles::COPYWRITER if prompt.user.contains("Apply the fixes") => QA_PATCHED.to_string(),
                roles::COPYWRITER if prompt.system.contains("QA reviewer") => "PASS".to_string(),
                roles::COPYWRITER if prompt.user.contains("Adapt this") => {
                    r#"{"copy": "Fare drops to Bali, sent the moment they land. Cheers!"}"#.to_string()
                }
                roles::COPYWRITER => DRAFT.to_string(),
                roles::FUTURIST => r#"{"name": "Budget travel"}"#.to_string(),
                roles::BELIEVER => r#"{"reply": "I would sign up today.", "agrees": false}"#.to_string(),
                roles::SKEPTIC => r#"{"reply": "Which routes and what prices?", "agrees": false}"#.to_string(),
                roles::MODERATOR => format!(
                    r#"{{"recommendation": "{recommendation}", "rationale": "Needs proof", "confidence": 0.7}}"#
                ),
                other => return Err(ProviderError::Permanent(format!("unexpected role {other}"))),
            };
            Ok(ProviderReply::text(body))
        }
    }

    async fn wizard_with(provider: Arc<ScriptedProvider>, source: Arc<dyn TrendSource>) -> Arc<CampaignWizard> {
        wizard_over(test_config(), provider, source).await
    }

    async fn wizard_over(
        config: PortalConfig,
        provider: Arc<ScriptedProvider>,
        source: Arc<dyn TrendSource>,
    ) -> Arc<CampaignWizard> {
        let config = Arc::new(config);
        let gateway = gateway_with(&config, provider);
        let store = memory_store(&config).await;
        Arc::new(CampaignWizard::new(config, gateway, source, store))
    }

    fn signals() -> Arc<StaticSource> {
        let now = Utc::now();
        StaticSource::returning(vec![
            raw_signal("news", "Cheap flights to Bali", now - chrono::Duration::hours(3), 50.0),
            raw_signal("trends", "budget airline fare alerts", now - chrono::Duration::hours(1), 80.0),
        ])
    }

    #[tokio::test]
    async fn test_accept_skips_revision() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.current_stage, WizardState::Assembled);
        assert_eq!(run.stage(PipelineStage::Revise).unwrap().status, StageStatus::Skipped);
        let pack = run.pack.unwrap();
        assert_eq!(pack.final_asset.id, pack.draft.id);
        assert_eq!(pack.verdicts.len(), 1);
        assert!(!pack.themes.is_empty());
    }

    #[tokio::test]
    async fn test_revise_runs_once_and_rechecks() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("revise")), signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        let pack = run.pack.unwrap();
        assert_eq!(pack.final_asset.parent_id, Some(pack.draft.id));
        assert_eq!(pack.final_asset.revision, 2);
        // The re-check still says revise, but no second revision happens.
        assert_eq!(pack.verdicts.len(), 2);
        assert_eq!(pack.assets().len(), 2);
    }

    #[tokio::test]
    async fn test_signal_outage_degrades_run() {
        let source = StaticSource::failing(SourceError::Unavailable("down".into()));
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), source).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Degraded);
        assert_eq!(run.stage(PipelineStage::Signals).unwrap().status, StageStatus::Degraded);
        assert_eq!(run.stage(PipelineStage::Futurist).unwrap().status, StageStatus::Skipped);
        assert_eq!(run.warnings[0].stage, PipelineStage::Signals);
        let pack = run.pack.unwrap();
        assert!(pack.degraded);
        assert!(pack.opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_draft_failure_fails_run() {
        let provider = ScriptedProvider::new("primary", |role, prompt| match role {
            roles::COPYWRITER => Err(ProviderError::Transient("503".into())),
            other => script("accept")(other, prompt),
        });
        let wizard = wizard_with(provider, signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.pack.is_none());
        let failure = run.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::DraftFailed);
        assert_eq!(failure.stage, Some(PipelineStage::Draft));
        assert!(matches!(
            wizard.get_pack(run.id).await.unwrap(),
            PackLookup::NotReady { status: RunStatus::Failed, .. }
        ));
    }

    #[tokio::test]
    async fn test_debate_abort_keeps_draft() {
        let provider = ScriptedProvider::new("primary", |role, prompt| match role {
            roles::SKEPTIC => Err(ProviderError::Timeout(Duration::from_millis(1))),
            other => script("revise")(other, prompt),
        });
        let wizard = wizard_with(provider, signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Degraded);
        assert_eq!(run.stage(PipelineStage::Debate).unwrap().status, StageStatus::Degraded);
        assert_eq!(run.stage(PipelineStage::Revise).unwrap().status, StageStatus::Skipped);
        let pack = run.pack.unwrap();
        assert_eq!(pack.final_asset.id, pack.draft.id);
        assert!(pack.verdicts.is_empty());
        assert_eq!(pack.aborted_transcripts.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_draft_that_cannot_be_revised_fails() {
        let provider = ScriptedProvider::new("primary", |role, prompt| {
            if role == roles::COPYWRITER && prompt.user.contains("focus group reviewed") {
                return Err(ProviderError::Permanent("400 bad request".into()));
            }
            script("reject")(role, prompt)
        });
        let wizard = wizard_with(provider, signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure.unwrap().kind, FailureKind::RevisionFailed);
    }

    #[tokio::test]
    async fn test_extra_locales_are_localized() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;
        let brief = GoalBrief::new("Launch a budget airline fare alert")
            .with_locale("en-AU")
            .with_extra_locales(&["en-GB", "en-AU", "en-GB"]);

        let run = wizard.run(brief).await.unwrap();

        let pack = run.pack.unwrap();
        assert_eq!(pack.localized.len(), 1);
        assert_eq!(pack.localized[0].locale, "en-GB");
        assert_eq!(pack.localized[0].parent_id, Some(pack.final_asset.id));
    }

    #[tokio::test]
    async fn test_invalid_brief_is_rejected_before_recording() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;
        let err = wizard.start_run(GoalBrief::new("   ")).await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));

        let err = wizard
            .run(GoalBrief::new("Fare alerts").with_extra_locales(&["british"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_started_run_settles_and_events_are_broadcast() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;
        let mut events = wizard.subscribe();

        let run_id = wizard
            .start_run(GoalBrief::new("Launch a budget airline fare alert"))
            .await
            .unwrap();

        let settled = loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(RunEvent::RunSettled { run_id: id, status })) if id == run_id => break status,
                Ok(Ok(_)) => continue,
                other => panic!("no settlement event: {other:?}"),
            }
        };
        assert_eq!(settled, RunStatus::Succeeded);

        let status = wizard.get_run_status(run_id).await.unwrap();
        assert_eq!(status.status, RunStatus::Succeeded);
        assert!(matches!(wizard.get_pack(run_id).await.unwrap(), PackLookup::Ready { .. }));
        assert!(matches!(wizard.cancel_run(run_id).await, Err(PortalError::RunSettled(_))));
    }

    #[tokio::test]
    async fn test_unknown_run_lookups() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;
        let missing = Uuid::new_v4();
        assert!(matches!(wizard.get_run_status(missing).await, Err(PortalError::RunNotFound(_))));
        assert!(matches!(wizard.get_pack(missing).await, Err(PortalError::RunNotFound(_))));
        assert!(matches!(wizard.cancel_run(missing).await, Err(PortalError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelling_one_run_leaves_a_run_sharing_its_debate_alone() {
        let cancel_a = CancellationToken::new();
        let hook = cancel_a.clone();
        let provider = ScriptedProvider::new("primary", move |role, prompt| {
            if role == roles::BELIEVER {
                hook.cancel();
            }
            script("accept")(role, prompt)
        })
        .with_delay(Duration::from_millis(10));
        let wizard = wizard_with(provider, signals()).await;
        let brief = GoalBrief::new("Launch a budget airline fare alert");

        let (run_a, run_b) = tokio::join!(
            wizard.run_with_cancel(brief.clone(), &cancel_a),
            wizard.run(brief.clone())
        );

        let run_a = run_a.unwrap();
        assert_eq!(run_a.status, RunStatus::Failed);
        let failure = run_a.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.stage, Some(PipelineStage::Debate));

        let run_b = run_b.unwrap();
        assert_eq!(run_b.status, RunStatus::Succeeded);
        let pack = run_b.pack.unwrap();
        assert_eq!(pack.verdicts.len(), 1);
        assert_eq!(pack.verdicts[0].recommendation, Recommendation::Accept);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_hanging_signal_fetch() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), HangingSource::new()).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let run = tokio::time::timeout(
            Duration::from_secs(5),
            wizard.run_with_cancel(GoalBrief::new("Launch a budget airline fare alert"), &cancel),
        )
        .await
        .expect("run settles")
        .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.stage, Some(PipelineStage::Signals));
    }

    #[tokio::test]
    async fn test_cancel_during_last_stage_never_assembles() {
        let cancel = CancellationToken::new();
        let hook = cancel.clone();
        let provider = ScriptedProvider::new("primary", move |role, prompt| {
            if prompt.user.contains("Adapt this") {
                hook.cancel();
            }
            script("accept")(role, prompt)
        });
        let wizard = wizard_with(provider, signals()).await;
        let brief = GoalBrief::new("Launch a budget airline fare alert")
            .with_locale("en-AU")
            .with_extra_locales(&["en-GB"]);

        let run = wizard.run_with_cancel(brief, &cancel).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure.unwrap().kind, FailureKind::Cancelled);
        assert!(run.pack.is_none());
        let stored = wizard.get_run_status(run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_best_variant_wins_the_debate() {
        let provider = ScriptedProvider::new("primary", |role, prompt| {
            if role == roles::MODERATOR && prompt.user.contains("Bali for less") {
                return Ok(ProviderReply::text(
                    r#"{"recommendation": "accept", "rationale": "Clear promise", "confidence": 0.9}"#,
                ));
            }
            script("revise")(role, prompt)
        });
        let wizard = wizard_with(provider, signals()).await;
        let brief = GoalBrief::new("Launch a budget airline fare alert").with_variants(2);

        let run = wizard.run(brief).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.stage(PipelineStage::Revise).unwrap().status, StageStatus::Skipped);
        let pack = run.pack.unwrap();
        assert!(pack.draft.variant_text.starts_with("Bali for less"));
        assert_eq!(pack.final_asset.id, pack.draft.id);
        assert_eq!(pack.verdicts[0].asset_id, pack.draft.id);
        assert_eq!(pack.variants.len(), 1);
        assert_eq!(pack.variant_verdicts.len(), 1);
        assert_eq!(pack.variant_verdicts[0].recommendation, Recommendation::Revise);
        assert_eq!(pack.draft.parent_id, Some(pack.variants[0].id));
    }

    #[tokio::test]
    async fn test_qa_pass_patches_the_draft_before_debate() {
        let mut config = test_config();
        config.creative.qa_pass = true;
        let wizard = wizard_over(config, ScriptedProvider::new("primary", script("accept")), signals()).await;

        let run = wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        let pack = run.pack.unwrap();
        let qa = pack.qa.unwrap();
        assert_eq!(qa.status, crate::creative::QaStatus::Patched);
        assert_eq!(pack.draft.id, qa.asset.id);
        assert_eq!(pack.draft.revision, 2);
        assert!(pack.draft.variant_text.contains("40 airlines"));
        assert_eq!(pack.verdicts[0].asset_id, pack.draft.id);
    }

    #[tokio::test]
    async fn test_brief_panel_is_seated_and_unknown_personas_rejected() {
        let provider = ScriptedProvider::new("primary", |role, prompt| {
            if role == roles::BELIEVER {
                assert!(prompt.system.contains("You are Priya"));
            }
            if role == roles::SKEPTIC {
                assert!(prompt.system.contains("You are Graham"));
            }
            script("accept")(role, prompt)
        });
        let wizard = wizard_with(provider, signals()).await;

        let run = wizard
            .run(GoalBrief::new("Launch a budget airline fare alert").with_panel("priya", "graham"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        let turns = &run.pack.unwrap().verdicts[0].transcript.turns;
        assert_eq!(turns[0].speaker, "Priya");

        let err = wizard
            .run(GoalBrief::new("Launch a budget airline fare alert").with_panel("nobody", "graham"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_collected_samples_are_remembered() {
        let wizard = wizard_with(ScriptedProvider::new("primary", script("accept")), signals()).await;

        wizard.run(GoalBrief::new("Launch a budget airline fare alert")).await.unwrap();

        let window = crate::brief::LookbackWindow::ending_at(Utc::now(), 24);
        let history = wizard.store.signal_history(window).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_best_verdict_prefers_recommendation_then_confidence() {
        let asset = crate::test_support::sample_asset("Copy");
        let verdict = |recommendation, confidence| Verdict {
            id: Uuid::new_v4(),
            asset_id: asset.id,
            recommendation,
            rationale: String::new(),
            confidence,
            key_objections: vec![],
            proof_needed: vec![],
            actionable_fixes: vec![],
            risk_notes: vec![],
            risk_flags: vec![],
            moderator: "primary".into(),
            transcript: DebateTranscript::open(asset.id, 1, 1),
            created_at: Utc::now(),
        };
        let verdicts = vec![
            verdict(Recommendation::Revise, 0.9),
            verdict(Recommendation::Accept, 0.6),
            verdict(Recommendation::Accept, 0.6),
            verdict(Recommendation::Reject, 1.0),
        ];
        assert_eq!(best_verdict(&verdicts), Some(1));
        assert_eq!(best_verdict(&[]), None);
    }
}
