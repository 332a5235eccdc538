//! Structured brief pulled out of a creative before the focus group sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::{
    brief::CopyType,
    gateway::ProviderPrompt,
    text::{string_field, string_list},
};

const CLIP_LINE: usize = 140;
const CLIP_ITEM: usize = 90;
const SUMMARY_CLAIMS: usize = 4;
const SUMMARY_MISSING_PROOF: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(default, rename_all = "camelCase")]
pub struct CreativeBrief {
    pub audience_assumed: String,
    pub primary_promise: String,
    pub mechanism_or_angle: String,
    pub offer_summary: String,
    pub cta: String,
    pub price_or_discount: String,
    pub key_claims: Vec<String>,
    pub proof_elements_present: Vec<String>,
    pub missing_proof: Vec<String>,
    pub tone: Vec<String>,
    pub confusing_or_unanswered: Vec<String>,
    pub risk_flags: Vec<String>,
    pub quick_fixes: Vec<String>,
}

impl CreativeBrief {
    /// Read the strategist's reply. `None` when nothing usable came back.
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| string_field(fields, key).unwrap_or_default();
        let brief = Self {
            audience_assumed: text("audience_assumed"),
            primary_promise: text("primary_promise"),
            mechanism_or_angle: text("mechanism_or_angle"),
            offer_summary: text("offer_summary"),
            cta: text("cta"),
            price_or_discount: text("price_or_discount"),
            key_claims: string_list(fields, "key_claims"),
            proof_elements_present: string_list(fields, "proof_elements_present"),
            missing_proof: string_list(fields, "missing_proof"),
            tone: string_list(fields, "tone"),
            confusing_or_unanswered: string_list(fields, "confusing_or_unanswered"),
            risk_flags: string_list(fields, "risk_flags"),
            quick_fixes: string_list(fields, "quick_fixes"),
        };
        (brief != Self::default()).then_some(brief)
    }

    /// Compact bullet summary shown to the personas.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for (label, value) in [
            ("Promise", &self.primary_promise),
            ("Angle", &self.mechanism_or_angle),
            ("Offer", &self.offer_summary),
            ("CTA", &self.cta),
        ] {
            if !value.is_empty() {
                lines.push(format!("{label}: {}", clip(value, CLIP_LINE)));
            }
        }
        for (label, items, limit) in [
            ("Claims", &self.key_claims, SUMMARY_CLAIMS),
            ("Missing proof", &self.missing_proof, SUMMARY_MISSING_PROOF),
        ] {
            if !items.is_empty() {
                let joined: Vec<String> = items.iter().take(limit).map(|i| clip(i, CLIP_ITEM)).collect();
                lines.push(format!("{label}: {}", joined.join("; ")));
            }
        }
        lines.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n")
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}...", kept.trim_end())
}

pub(super) fn extraction_prompt(copy_type: CopyType, creative: &str) -> ProviderPrompt {
    ProviderPrompt::new(
        "You are a senior conversion strategist. Extract a structured brief from the marketing \
         creative. Return only a single JSON object.",
        format!(
            "COPY TYPE: {copy_type}\n\nCREATIVE (verbatim):\n{creative}\n\n\
             Return JSON with these fields:\n\
             {{\n  \"audience_assumed\": \"...\",\n  \"primary_promise\": \"...\",\n  \
             \"mechanism_or_angle\": \"...\",\n  \"offer_summary\": \"...\",\n  \"cta\": \"...\",\n  \
             \"price_or_discount\": \"...\",\n  \"key_claims\": [\"...\"],\n  \
             \"proof_elements_present\": [\"...\"],\n  \"missing_proof\": [\"...\"],\n  \
             \"tone\": [\"...\"],\n  \"confusing_or_unanswered\": [\"...\"],\n  \
             \"risk_flags\": [\"...\"],\n  \"quick_fixes\": [\"...\"]\n}}\n\n\
             Use an empty string or empty list for anything unknown. Keep strings concise.",
            copy_type = copy_type.display_name(),
        ),
    )
    .json()
}
