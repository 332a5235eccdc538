use serde::{Deserialize, Serialize};
use ts_rs::TS;

const PROFILE_VALUES: usize = 5;
const PROFILE_GOALS: usize = 4;
const PROFILE_CONCERNS: usize = 4;

/// A focus-group member the debate participants roleplay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub occupation: String,
    /// Audience segment the persona belongs to.
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub risk_tolerance: Option<String>,
}

impl Persona {
    /// Short label for listings, e.g. `Maya (Deal hunters) - Risk: Medium`.
    pub fn label(&self) -> String {
        format!(
            "{} ({}) - Risk: {}",
            self.name,
            self.segment,
            self.risk_tolerance.as_deref().unwrap_or("Unknown")
        )
    }

    /// Roleplay profile placed in the participant's system prompt.
    pub fn profile(&self) -> String {
        let take = |items: &[String], n: usize, sep: &str| {
            items.iter().take(n).map(String::as_str).collect::<Vec<_>>().join(sep)
        };
        format!(
            "ROLE: You are {name}, a {age}-year-old {occupation}.\nBIO: {bio}\nVALUES: {values}\n\
             GOALS: {goals}\nCONCERNS: {concerns}\nRISK TOLERANCE: {risk}",
            name = self.name,
            age = self.age,
            occupation = self.occupation,
            bio = self.bio,
            values = take(&self.values, PROFILE_VALUES, ", "),
            goals = take(&self.goals, PROFILE_GOALS, "; "),
            concerns = take(&self.concerns, PROFILE_CONCERNS, "; "),
            risk = self.risk_tolerance.as_deref().unwrap_or("Unknown"),
        )
    }
}

/// The two personas that argue over an asset.
#[derive(Debug, Clone, PartialEq)]
pub struct DebatePanel {
    pub believer: Persona,
    pub skeptic: Persona,
}

impl DebatePanel {
    pub fn persona(&self, role: super::DebateRole) -> &Persona {
        match role {
            super::DebateRole::Believer => &self.believer,
            super::DebateRole::Skeptic => &self.skeptic,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn persona(
    id: &str,
    name: &str,
    age: u32,
    occupation: &str,
    segment: &str,
    bio: &str,
    lists: [&[&str]; 3],
    risk: &str,
) -> Persona {
    let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        age,
        occupation: occupation.to_string(),
        segment: segment.to_string(),
        bio: bio.to_string(),
        values: owned(lists[0]),
        goals: owned(lists[1]),
        concerns: owned(lists[2]),
        risk_tolerance: Some(risk.to_string()),
    }
}

/// Built-in focus group, used until the configuration supplies its own.
pub fn default_personas() -> Vec<Persona> {
    vec![
        persona(
            "maya",
            "Maya",
            29,
            "emergency nurse",
            "Deal hunters",
            "Works rotating shifts and books trips on short notice whenever a good price shows up.",
            [
                &["spontaneity", "value for money", "time with friends"],
                &["take two overseas trips a year", "stop overpaying for last-minute bookings"],
                &["hidden fees", "spam", "deals that vanish at checkout"],
            ],
            "Medium",
        ),
        persona(
            "graham",
            "Graham",
            54,
            "chartered accountant",
            "Careful planners",
            "Reads the fine print, compares every offer against two others and distrusts urgency.",
            [
                &["accuracy", "transparency", "reliability"],
                &["plan the family holiday a year ahead", "keep subscriptions to a minimum"],
                &["exaggerated claims", "auto-renewals", "sharing personal data"],
            ],
            "Low",
        ),
        persona(
            "priya",
            "Priya",
            38,
            "small business owner",
            "Busy professionals",
            "Runs a design studio and wants anything she signs up for to save time, not create it.",
            [
                &["efficiency", "quality", "independence"],
                &["cut time spent on admin", "travel for work without surprises"],
                &["vague promises", "clunky apps", "support that never answers"],
            ],
            "Medium",
        ),
    ]
}
