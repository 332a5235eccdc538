use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::extraction::CreativeBrief;
use crate::{PortalError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum DebateRole {
    Believer,
    Skeptic,
}

impl DebateRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            DebateRole::Believer => "Believer",
            DebateRole::Skeptic => "Skeptic",
        }
    }

    pub fn opponent(&self) -> DebateRole {
        match self {
            DebateRole::Believer => DebateRole::Skeptic,
            DebateRole::Skeptic => DebateRole::Believer,
        }
    }
}

/// Debate progress: Opening, then Rebuttal rounds, then Synthesis, then Done.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DebateState {
    Opening,
    Rebuttal { round: usize },
    Synthesis,
    Done,
}

/// Why the debate stopped exchanging turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Converged { round: usize },
    RoundLimit { rounds: usize },
    Aborted { round: usize, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DebateTurn {
    pub role: DebateRole,
    /// 1-based round number.
    pub round: usize,
    /// Name of the persona who spoke.
    #[serde(default)]
    pub speaker: String,
    pub text: String,
    pub provider: String,
    pub at: DateTime<Utc>,
}

/// Ordered Believer/Skeptic exchange over one creative asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct DebateTranscript {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub asset_revision: u32,
    pub max_rounds: usize,
    pub state: DebateState,
    pub turns: Vec<DebateTurn>,
    pub termination: Option<Termination>,
    /// Strategist's reading of the creative, when one was extracted.
    #[serde(default)]
    pub brief: Option<CreativeBrief>,
}

impl DebateTranscript {
    pub fn open(asset_id: Uuid, asset_revision: u32, max_rounds: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            asset_revision,
            max_rounds,
            state: DebateState::Opening,
            turns: Vec::new(),
            termination: None,
            brief: None,
        }
    }

    /// Role expected to speak next. Rounds open with the Believer.
    pub fn next_role(&self) -> DebateRole {
        self.turns
            .last()
            .map(|turn| turn.role.opponent())
            .unwrap_or(DebateRole::Believer)
    }

    /// Round the next turn belongs to.
    pub fn next_round(&self) -> usize {
        self.turns.len() / 2 + 1
    }

    pub fn rounds_completed(&self) -> usize {
        self.turns.len() / 2
    }

    /// Append a turn, enforcing strict alternation and the round cap.
    pub fn push_turn(&mut self, turn: DebateTurn) -> Result<()> {
        if self.is_done() || self.state == DebateState::Synthesis {
            return Err(PortalError::InvalidTransition(
                "debate is no longer accepting turns".into(),
            ));
        }
        if turn.role != self.next_role() || turn.round != self.next_round() {
            return Err(PortalError::InvalidTransition(format!(
                "expected {} in round {}, got {} in round {}",
                self.next_role().display_name(),
                self.next_round(),
                turn.role.display_name(),
                turn.round
            )));
        }
        if turn.round > self.max_rounds {
            return Err(PortalError::InvalidTransition(format!(
                "round {} exceeds the cap of {}",
                turn.round, self.max_rounds
            )));
        }
        self.turns.push(turn);
        Ok(())
    }

    pub fn latest(&self, role: DebateRole) -> Option<&DebateTurn> {
        self.turns.iter().rev().find(|turn| turn.role == role)
    }

    pub fn is_done(&self) -> bool {
        self.state == DebateState::Done
    }

    pub fn finish(&mut self, termination: Termination) {
        self.termination = Some(termination);
        self.state = DebateState::Done;
    }

    /// Plain-text rendering for prompts and reports.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|turn| {
                let speaker = if turn.speaker.is_empty() {
                    turn.role.display_name().to_string()
                } else {
                    format!("{} ({})", turn.speaker, turn.role.display_name())
                };
                format!("{speaker}, round {}: {}", turn.round, turn.text.trim())
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
