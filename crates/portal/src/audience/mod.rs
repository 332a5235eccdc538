//! Audience debate engine.
//!
//! Two personas, seated as Believer and Skeptic, take strictly alternating
//! turns over a creative asset until they converge or the round cap is hit;
//! a moderator then synthesizes the exchange into a [`Verdict`]. An analyst
//! may first extract a structured brief of the creative that both sides and
//! the moderator see. Each debate is independent, so several assets can be
//! pressure-tested concurrently.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    brief::CopyType,
    compliance::claim_risk_flags,
    config::PortalConfig,
    creative::CreativeAsset,
    gateway::{roles, InvokeOptions, ProviderGateway, ProviderPrompt},
    store::{Computed, PersistenceStore},
    text::{similarity, string_field, truncate_words},
    PortalError, Result,
};

mod extraction;
mod persona;
mod transcript;
mod verdict;

pub use extraction::CreativeBrief;
pub use persona::{default_personas, DebatePanel, Persona};
pub use transcript::{DebateRole, DebateState, DebateTranscript, DebateTurn, Termination};
pub use verdict::{Recommendation, Verdict};

const STAGE_KEY: &str = "audience.pressure_test";

const BASE_INSTRUCTION: &str = "This is a marketing research simulation. You are roleplaying one member \
of a focus group. Sound like a real person, not an assistant. React to the marketing itself: \
credibility, clarity and what would make you act. Be specific and do not repeat yourself.";

const BELIEVER_STANCE: &str = "STANCE: Believer. You want the message to be true. You focus on the \
upside and the emotional pull, and you defend the message against skepticism.";

const SKEPTIC_STANCE: &str = "STANCE: Skeptic. You are allergic to hype. You look for missing \
specifics, credibility gaps and implied claims, and you call out anything too good to be true.";

const TURN_FORMAT: &str = "Reply as JSON: {\"reply\": \"<what you say>\", \"agrees\": <true only if \
you now broadly agree with the other participant>}";

#[derive(Debug, Serialize)]
struct DebateRequest<'a> {
    asset_id: Uuid,
    revision: u32,
    copy_type: CopyType,
    variant_text: &'a str,
    max_rounds: usize,
    believer: &'a str,
    skeptic: &'a str,
    extract_brief: bool,
}

pub struct DebateEngine {
    gateway: Arc<ProviderGateway>,
    store: Arc<PersistenceStore>,
    config: Arc<PortalConfig>,
}

impl DebateEngine {
    pub fn new(gateway: Arc<ProviderGateway>, store: Arc<PersistenceStore>, config: Arc<PortalConfig>) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// Seat a Believer and a Skeptic, defaulting to the configured personas.
    pub fn panel(&self, believer: Option<&str>, skeptic: Option<&str>) -> Result<DebatePanel> {
        self.config.debate.panel(believer, skeptic)
    }

    /// Debate `asset` for at most `max_rounds` rounds and return the moderator's verdict.
    pub async fn pressure_test(&self, asset: &CreativeAsset, max_rounds: usize) -> Result<Verdict> {
        self.pressure_test_with_cancel(asset, max_rounds, &CancellationToken::new())
            .await
    }

    /// As [`pressure_test`](Self::pressure_test) with the default panel, giving up once `cancel` fires.
    pub async fn pressure_test_with_cancel(
        &self,
        asset: &CreativeAsset,
        max_rounds: usize,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let panel = self.panel(None, None)?;
        self.pressure_test_with(asset, max_rounds, &panel, cancel).await
    }

    /// Debate `asset` in front of `panel`.
    ///
    /// Identical debates are shared between callers, so the debate itself never
    /// watches a caller's token. Each caller races it against its own `cancel`
    /// instead; a cancelled caller stops waiting and the others carry on.
    pub async fn pressure_test_with(
        &self,
        asset: &CreativeAsset,
        max_rounds: usize,
        panel: &DebatePanel,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        if max_rounds == 0 {
            return Err(PortalError::Validation("max_rounds must be at least 1".into()));
        }
        if asset.variant_text.trim().is_empty() {
            return Err(PortalError::Validation("asset has no copy to debate".into()));
        }
        if cancel.is_cancelled() {
            return Err(PortalError::Cancelled);
        }

        let request = DebateRequest {
            asset_id: asset.id,
            revision: asset.revision,
            copy_type: asset.copy_type,
            variant_text: &asset.variant_text,
            max_rounds,
            believer: &panel.believer.id,
            skeptic: &panel.skeptic.id,
            extract_brief: self.config.debate.extract_brief,
        };
        let debate = self.store.get_or_compute(STAGE_KEY, &request, || async {
            self.run_debate(asset, max_rounds, panel).await.map(Computed::new)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("[DEBATE] Stopped waiting on the debate of asset {}: cancelled", asset.id);
                Err(PortalError::Cancelled)
            }
            result = debate => result,
        }
    }

    /// Pressure-test several assets concurrently. Results keep the input order.
    pub async fn pressure_test_all(
        &self,
        assets: &[CreativeAsset],
        max_rounds: usize,
        panel: &DebatePanel,
        cancel: &CancellationToken,
    ) -> Vec<Result<Verdict>> {
        let debates = assets
            .iter()
            .map(|asset| self.pressure_test_with(asset, max_rounds, panel, cancel));
        futures::future::join_all(debates).await
    }

    async fn run_debate(&self, asset: &CreativeAsset, max_rounds: usize, panel: &DebatePanel) -> Result<Verdict> {
        let settings = &self.config.debate;
        let excerpt = truncate_words(&asset.variant_text, settings.participant_word_cap);
        let mut transcript = DebateTranscript::open(asset.id, asset.revision, max_rounds);
        let mut termination = None;

        tracing::info!(
            "[DEBATE] Debate {} opened for asset {} rev {} (max {} round(s), {} vs {})",
            transcript.id,
            asset.id,
            asset.revision,
            max_rounds,
            panel.believer.name,
            panel.skeptic.name
        );

        if settings.extract_brief {
            transcript.brief = self.extract_brief(asset).await;
        }
        let brief_summary = transcript
            .brief
            .as_ref()
            .map(CreativeBrief::summary)
            .unwrap_or_default();

        for round in 1..=max_rounds {
            transcript.state = if round == 1 {
                DebateState::Opening
            } else {
                DebateState::Rebuttal { round }
            };

            let mut skeptic_agrees = false;
            for role in [DebateRole::Believer, DebateRole::Skeptic] {
                // Lets callers racing this debate observe their cancellation before the next call.
                tokio::task::yield_now().await;

                let persona = panel.persona(role);
                let prompt = participant_prompt(
                    role,
                    persona,
                    round,
                    asset.copy_type,
                    &excerpt,
                    &brief_summary,
                    &transcript,
                );
                let response = match self
                    .gateway
                    .invoke(role_key(role), &prompt, &InvokeOptions::default())
                    .await
                {
                    Ok(response) => response,
                    Err(err) => return Err(abort(transcript, round, err)),
                };

                let fields = response.reply.structured();
                let text = fields
                    .as_ref()
                    .and_then(|f| string_field(f, "reply"))
                    .unwrap_or_else(|| response.reply.text.trim().to_string());
                let agrees = fields
                    .as_ref()
                    .and_then(|f| f.get("agrees"))
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if role == DebateRole::Skeptic {
                    skeptic_agrees = agrees;
                }

                transcript.push_turn(DebateTurn {
                    role,
                    round,
                    speaker: persona.name.clone(),
                    text: truncate_words(&text, settings.participant_word_cap),
                    provider: response.provider,
                    at: Utc::now(),
                })?;
            }

            if skeptic_agrees || self.positions_converged(&transcript) {
                tracing::info!("[DEBATE] Debate {} converged in round {}", transcript.id, round);
                termination = Some(Termination::Converged { round });
                break;
            }
        }

        let termination = termination.unwrap_or(Termination::RoundLimit { rounds: max_rounds });
        transcript.termination = Some(termination);
        transcript.state = DebateState::Synthesis;
        tokio::task::yield_now().await;

        let prompt = moderator_prompt(asset, &transcript, settings.moderator_word_cap);
        let response = match self
            .gateway
            .invoke(roles::MODERATOR, &prompt, &InvokeOptions::default())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let rounds = transcript.rounds_completed();
                return Err(abort(transcript, rounds, err));
            }
        };
        transcript.state = DebateState::Done;

        let verdict = verdict::parse_verdict(
            response.reply.structured(),
            &response.reply.text,
            &response.provider,
            claim_risk_flags(&asset.variant_text),
            transcript,
        );
        tracing::info!(
            "[DEBATE] Verdict for asset {}: {} ({:.2})",
            asset.id,
            verdict.recommendation.as_str(),
            verdict.confidence
        );
        Ok(verdict)
    }

    /// Best-effort: a debate without a brief still runs.
    async fn extract_brief(&self, asset: &CreativeAsset) -> Option<CreativeBrief> {
        let creative = truncate_words(&asset.variant_text, self.config.debate.moderator_word_cap);
        let prompt = extraction::extraction_prompt(asset.copy_type, &creative);
        match self
            .gateway
            .invoke(roles::ANALYST, &prompt, &InvokeOptions::default())
            .await
        {
            Ok(response) => {
                let brief = response
                    .reply
                    .structured()
                    .and_then(|fields| CreativeBrief::from_fields(&fields));
                if brief.is_none() {
                    tracing::warn!("[DEBATE] Analyst reply for asset {} held no brief", asset.id);
                }
                brief
            }
            Err(err) => {
                tracing::warn!("[DEBATE] Brief extraction for asset {} failed: {}", asset.id, err);
                None
            }
        }
    }

    fn positions_converged(&self, transcript: &DebateTranscript) -> bool {
        match (
            transcript.latest(DebateRole::Believer),
            transcript.latest(DebateRole::Skeptic),
        ) {
            (Some(believer), Some(skeptic)) => {
                similarity(&believer.text, &skeptic.text) >= self.config.debate.convergence_threshold
            }
            _ => false,
        }
    }
}

fn role_key(role: DebateRole) -> &'static str {
    match role {
        DebateRole::Believer => roles::BELIEVER,
        DebateRole::Skeptic => roles::SKEPTIC,
    }
}

/// Provider failures end the debate with its partial transcript; anything else passes through.
fn abort(mut transcript: DebateTranscript, round: usize, err: PortalError) -> PortalError {
    if !err.is_provider_failure() {
        return err;
    }
    let reason = err.to_string();
    tracing::warn!("[DEBATE] Debate {} aborted in round {}: {}", transcript.id, round, reason);
    transcript.finish(Termination::Aborted {
        round,
        reason: reason.clone(),
    });
    PortalError::DebateAborted {
        reason,
        transcript: Box::new(transcript),
    }
}

fn participant_prompt(
    role: DebateRole,
    persona: &Persona,
    round: usize,
    copy_type: CopyType,
    excerpt: &str,
    brief_summary: &str,
    transcript: &DebateTranscript,
) -> ProviderPrompt {
    let stance = match role {
        DebateRole::Believer => BELIEVER_STANCE,
        DebateRole::Skeptic => SKEPTIC_STANCE,
    };
    let system = format!("{BASE_INSTRUCTION}\n\n{}\n\n{stance}", persona.profile());
    let opponent_said = transcript
        .latest(role.opponent())
        .map(|turn| turn.text.as_str())
        .unwrap_or_default();
    let context = if brief_summary.is_empty() {
        String::new()
    } else {
        format!("\n\nBRIEF SUMMARY (for context):\n{brief_summary}")
    };

    let user = match (role, round) {
        (DebateRole::Believer, 1) => format!(
            "You are reacting to {} creative.\n\nCREATIVE (excerpt):\n{}{}\n\nTASK:\n{}",
            copy_type.display_name(),
            excerpt,
            context,
            copy_type.reaction_task()
        ),
        (DebateRole::Skeptic, 1) => format!(
            "You are reacting to the same {} creative.\n\nCREATIVE (excerpt):\n{}{}\n\n\
             The Believer said:\n{}\n\nRespond directly to their points and call out what feels \
             manipulative or unclear.\n\nTASK:\n{}",
            copy_type.display_name(),
            excerpt,
            context,
            opponent_said,
            copy_type.reaction_task()
        ),
        (DebateRole::Believer, _) => format!(
            "Reply to the Skeptic in at most six sentences: concede one fair critique, defend one \
             element that still excites you, and suggest one change that keeps the upside while \
             building trust.\n\nThe Skeptic said:\n{opponent_said}"
        ),
        (DebateRole::Skeptic, _) => format!(
            "Counter the Believer in at most six sentences: name the proof that would convert you, \
             the single most damaging phrase in the creative, and one rewrite principle.\n\n\
             The Believer said:\n{opponent_said}"
        ),
    };

    ProviderPrompt::new(system, format!("{user}\n\n{TURN_FORMAT}")).json()
}

fn moderator_prompt(asset: &CreativeAsset, transcript: &DebateTranscript, word_cap: usize) -> ProviderPrompt {
    let system = "You moderate a marketing focus group. You are strict, practical and \
                  credibility-first. Return only a single JSON object.";
    let brief = transcript
        .brief
        .as_ref()
        .and_then(|brief| serde_json::to_string(brief).ok())
        .map(|json| format!("\n\nEXTRACTED BRIEF (JSON):\n{json}"))
        .unwrap_or_default();
    let user = format!(
        "GOAL: {goal}\nCOPY TYPE: {copy_type}\n\nTRANSCRIPT:\n{transcript}\n\nCREATIVE:\n{creative}{brief}\n\n\
         Return JSON with these fields:\n\
         {{\n  \"recommendation\": \"accept\" | \"revise\" | \"reject\",\n  \"rationale\": \"...\",\n  \
         \"confidence\": <0..1>,\n  \"key_objections\": [\"...\"],\n  \"proof_needed\": [\"...\"],\n  \
         \"risk_flags\": [\"...\"],\n  \"actionable_fixes\": [\"...\"]\n}}\n\n\
         Avoid recommending guarantees or performance promises.",
        goal = asset.goal,
        copy_type = asset.copy_type.display_name(),
        transcript = transcript.render(),
        creative = truncate_words(&asset.variant_text, word_cap),
    );
    ProviderPrompt::new(system, user).json()
}
