use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::types::{PipelineStage, RunStatus, RunWarning, StageStatus, WizardState};
use crate::{
    audience::{DebateTranscript, Verdict},
    creative::{CreativeAsset, QaReport},
    futurist::Theme,
    signals::Opportunity,
};

const MARKDOWN_OPPORTUNITIES: usize = 5;

/// The assembled output of a run. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPack {
    pub run_id: Uuid,
    pub goal: String,
    pub opportunities: Vec<Opportunity>,
    pub themes: Vec<Theme>,
    /// The winning candidate: the draft, or the variant the focus group preferred.
    pub draft: CreativeAsset,
    /// Editorial QA over the first draft, when the pass ran.
    #[serde(default)]
    pub qa: Option<QaReport>,
    /// Alternatives that were debated and lost, with their verdicts.
    #[serde(default)]
    pub variants: Vec<CreativeAsset>,
    #[serde(default)]
    pub variant_verdicts: Vec<Verdict>,
    /// The asset the pack recommends: the revision when one was made, else the draft.
    pub final_asset: CreativeAsset,
    pub localized: Vec<CreativeAsset>,
    pub verdicts: Vec<Verdict>,
    /// Partial transcripts of debates that aborted.
    pub aborted_transcripts: Vec<DebateTranscript>,
    pub warnings: Vec<RunWarning>,
    pub degraded: bool,
    pub assembled_at: DateTime<Utc>,
}

impl CampaignPack {
    /// Every distinct asset version in the pack, draft first.
    pub fn assets(&self) -> Vec<&CreativeAsset> {
        let mut assets = vec![&self.draft];
        if self.final_asset.id != self.draft.id {
            assets.push(&self.final_asset);
        }
        assets.extend(self.localized.iter());
        assets.extend(self.variants.iter());
        assets
    }

    /// Most recent verdict, which concerns the final asset when a re-check ran.
    pub fn latest_verdict(&self) -> Option<&Verdict> {
        self.verdicts.last()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Campaign Pack\n");
        let _ = writeln!(md, "**Goal:** {}\n", self.goal);

        let _ = writeln!(md, "## Insight");
        if self.opportunities.is_empty() {
            let _ = writeln!(md, "(No trend signals)");
        }
        for opportunity in self.opportunities.iter().take(MARKDOWN_OPPORTUNITIES) {
            let _ = writeln!(md, "- {} (score {:.2})", opportunity.topic, opportunity.score);
        }

        if !self.themes.is_empty() {
            let _ = writeln!(md, "\n## Emerging themes");
            for theme in &self.themes {
                let _ = writeln!(
                    md,
                    "- **{}** ({}): {}",
                    theme.name,
                    theme.direction.as_str(),
                    theme.topics.join(", ")
                );
            }
        }

        let _ = writeln!(md, "\n## Draft");
        let _ = writeln!(md, "{}", self.final_asset.variant_text);
        if !self.final_asset.risk_flags.is_empty() {
            let flags: Vec<&str> = self.final_asset.risk_flags.iter().map(|f| f.label()).collect();
            let _ = writeln!(md, "\n_Compliance flags: {}_", flags.join(", "));
        }

        for asset in &self.localized {
            let _ = writeln!(md, "\n### {}", asset.locale);
            let _ = writeln!(md, "{}", asset.variant_text);
        }

        let _ = writeln!(md, "\n## Focus group");
        match self.verdicts.first() {
            Some(verdict) => {
                let _ = writeln!(
                    md,
                    "**Recommendation:** {} (confidence {:.2})",
                    verdict.recommendation.as_str(),
                    verdict.confidence
                );
                let _ = writeln!(md, "**Executive summary:** {}", verdict.rationale);
                for (title, items) in [
                    ("Key objections", &verdict.key_objections),
                    ("Proof needed", &verdict.proof_needed),
                    ("Actionable fixes", &verdict.actionable_fixes),
                ] {
                    if items.is_empty() {
                        continue;
                    }
                    let _ = writeln!(md, "**{title}:**");
                    for item in items {
                        let _ = writeln!(md, "- {item}");
                    }
                }
                if self.verdicts.len() > 1 {
                    if let Some(recheck) = self.latest_verdict() {
                        let _ = writeln!(
                            md,
                            "\n**After revision:** {} (confidence {:.2})",
                            recheck.recommendation.as_str(),
                            recheck.confidence
                        );
                    }
                }
            }
            None => {
                let _ = writeln!(md, "(No focus group verdict)");
            }
        }

        if !self.variants.is_empty() {
            let _ = writeln!(md, "\n## Variants considered");
            for variant in &self.variants {
                let opening = variant.variant_text.lines().next().unwrap_or_default();
                match self.variant_verdicts.iter().find(|v| v.asset_id == variant.id) {
                    Some(verdict) => {
                        let _ = writeln!(
                            md,
                            "- {opening} ({}, confidence {:.2})",
                            verdict.recommendation.as_str(),
                            verdict.confidence
                        );
                    }
                    None => {
                        let _ = writeln!(md, "- {opening} (not debated)");
                    }
                }
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(md, "\n## Warnings");
            for warning in &self.warnings {
                let _ = writeln!(md, "- {}: {}", warning.stage, warning.message);
            }
        }
        md
    }
}

/// Answer to `get_pack`: the pack, or where the run currently is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackLookup {
    Ready { pack: Box<CampaignPack> },
    NotReady { status: RunStatus, stage: WizardState },
}

/// Lifecycle notifications broadcast by the wizard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
    },
    StageStarted {
        run_id: Uuid,
        stage: PipelineStage,
    },
    StageSettled {
        run_id: Uuid,
        stage: PipelineStage,
        status: StageStatus,
    },
    RunSettled {
        run_id: Uuid,
        status: RunStatus,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id }
            | RunEvent::StageStarted { run_id, .. }
            | RunEvent::StageSettled { run_id, .. }
            | RunEvent::RunSettled { run_id, .. } => *run_id,
        }
    }
}
