use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;
use uuid::Uuid;

use super::transcript::DebateTranscript;
use crate::{
    compliance::RiskFlag,
    text::{string_field, string_list},
};

const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Revise,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Accept => "accept",
            Recommendation::Revise => "revise",
            Recommendation::Reject => "reject",
        }
    }

    /// Higher is better: accept over revise over reject.
    pub fn rank(&self) -> u8 {
        match self {
            Recommendation::Accept => 2,
            Recommendation::Revise => 1,
            Recommendation::Reject => 0,
        }
    }

    pub fn needs_revision(&self) -> bool {
        !matches!(self, Recommendation::Accept)
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "approve" | "ship" | "go" => Ok(Recommendation::Accept),
            "revise" | "iterate" | "rework" => Ok(Recommendation::Revise),
            "reject" | "kill" | "no-go" | "no go" => Ok(Recommendation::Reject),
            other => Err(format!("unknown recommendation '{other}'")),
        }
    }
}

/// Moderator synthesis of a terminated debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub recommendation: Recommendation,
    pub rationale: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub key_objections: Vec<String>,
    pub proof_needed: Vec<String>,
    pub actionable_fixes: Vec<String>,
    /// Moderator-reported risks plus the claim scan of the asset.
    pub risk_notes: Vec<String>,
    pub risk_flags: Vec<RiskFlag>,
    pub moderator: String,
    pub transcript: DebateTranscript,
    pub created_at: DateTime<Utc>,
}

impl Verdict {
    pub fn transcript_id(&self) -> Uuid {
        self.transcript.id
    }
}

/// Turn the moderator reply into a verdict, tolerating missing or malformed fields.
pub(super) fn parse_verdict(
    fields: Option<Map<String, Value>>,
    raw_text: &str,
    moderator: &str,
    risk_flags: Vec<RiskFlag>,
    transcript: DebateTranscript,
) -> Verdict {
    let fields = fields.unwrap_or_default();

    let recommendation = match string_field(&fields, "recommendation").map(|r| r.parse::<Recommendation>()) {
        Some(Ok(recommendation)) => recommendation,
        Some(Err(err)) => {
            tracing::warn!("[DEBATE] {} - defaulting to revise", err);
            Recommendation::Revise
        }
        None => {
            tracing::warn!("[DEBATE] Moderator gave no recommendation - defaulting to revise");
            Recommendation::Revise
        }
    };

    let rationale = string_field(&fields, "rationale")
        .or_else(|| string_field(&fields, "executive_summary"))
        .unwrap_or_else(|| raw_text.trim().to_string());

    Verdict {
        id: Uuid::new_v4(),
        asset_id: transcript.asset_id,
        recommendation,
        rationale,
        confidence: parse_confidence(fields.get("confidence")),
        key_objections: string_list(&fields, "key_objections"),
        proof_needed: string_list(&fields, "proof_needed"),
        actionable_fixes: string_list(&fields, "actionable_fixes"),
        risk_notes: string_list(&fields, "risk_flags"),
        risk_flags,
        moderator: moderator.to_string(),
        transcript,
        created_at: Utc::now(),
    }
}

fn parse_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|p| p / 100.0),
                None => s.parse::<f64>().ok(),
            }
        }
        _ => None,
    };
    match raw {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => DEFAULT_CONFIDENCE,
    }
}
