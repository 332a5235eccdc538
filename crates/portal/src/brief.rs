//! The marketer's goal brief and the time window it covers.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{PortalError, Result};

const MAX_GOAL_CHARS: usize = 2_000;
const MAX_LOOKBACK_HOURS: i64 = 24 * 30;
const MAX_VARIANTS: usize = 5;

static LOCALE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Z]{2})?$").unwrap());

/// `en`, `en-AU` style tags.
pub fn is_valid_locale(locale: &str) -> bool {
    LOCALE_RE.is_match(locale)
}

/// Creative format requested by the marketer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum CopyType {
    #[default]
    Email,
    Ad,
    SalesPage,
    Headline,
}

impl CopyType {
    pub fn display_name(&self) -> &'static str {
        match self {
            CopyType::Email => "Email",
            CopyType::Ad => "Ad",
            CopyType::SalesPage => "Sales Page",
            CopyType::Headline => "Headline",
        }
    }

    /// Section outline the copywriter is asked to follow.
    pub fn structure(&self) -> &'static str {
        match self {
            CopyType::Email => "Subject line, greeting, body (benefits and proof), call-to-action, sign-off",
            CopyType::Ad => "Ad headline, primary text, call-to-action",
            CopyType::SalesPage => "Headline, introduction, key benefit paragraphs, detailed body, call-to-action",
            CopyType::Headline => "A single headline of at most 14 words",
        }
    }

    /// Expected word count as `(min, max)`.
    pub fn word_bounds(&self) -> (usize, usize) {
        match self {
            CopyType::Email => (100, 550),
            CopyType::Ad => (10, 150),
            CopyType::SalesPage => (500, 3200),
            CopyType::Headline => (2, 14),
        }
    }

    /// What each debate participant is asked to cover when reacting.
    pub fn reaction_task(&self) -> &'static str {
        match self {
            CopyType::Email => {
                "Answer in 4 short bullets: open or ignore and why; how credible it feels; \
                 the biggest question holding you back; one change that improves it."
            }
            CopyType::Ad => {
                "Answer in 4 short bullets: what grabs you; what feels unclear; \
                 what proof you need; one improvement."
            }
            CopyType::SalesPage => {
                "Answer in 5 short bullets: where you would stop reading; the strongest section; \
                 the weakest section; the proof you need; one concrete fix."
            }
            CopyType::Headline => {
                "Answer in 4 short bullets: click or ignore and why; the promise you hear; \
                 what feels credible; one rewrite of at most 12 words."
            }
        }
    }
}

/// Closed time window `[start, end]` a brief looks back over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
pub struct LookbackWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LookbackWindow {
    pub fn ending_at(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - Duration::hours(hours),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}

/// What the marketer wants to achieve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct GoalBrief {
    pub goal: String,
    /// Search topic for signal collection. Falls back to the goal.
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub copy_type: CopyType,
    #[serde(default)]
    pub locale: Option<String>,
    /// Markets to localize the final asset into after assembly.
    #[serde(default)]
    pub extra_locales: Vec<String>,
    #[serde(default)]
    pub lookback_hours: Option<i64>,
    /// How many competing variants to draft and debate. One when absent.
    #[serde(default)]
    pub variant_count: Option<usize>,
    /// Persona id seated as the Believer; the configured default when absent.
    #[serde(default)]
    pub believer: Option<String>,
    #[serde(default)]
    pub skeptic: Option<String>,
}

impl GoalBrief {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            topic: None,
            copy_type: CopyType::default(),
            locale: None,
            extra_locales: Vec::new(),
            lookback_hours: None,
            variant_count: None,
            believer: None,
            skeptic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_extra_locales(mut self, locales: &[&str]) -> Self {
        self.extra_locales = locales.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_copy_type(mut self, copy_type: CopyType) -> Self {
        self.copy_type = copy_type;
        self
    }

    pub fn with_lookback_hours(mut self, hours: i64) -> Self {
        self.lookback_hours = Some(hours);
        self
    }

    pub fn with_variants(mut self, count: usize) -> Self {
        self.variant_count = Some(count);
        self
    }

    pub fn with_panel(mut self, believer: impl Into<String>, skeptic: impl Into<String>) -> Self {
        self.believer = Some(believer.into());
        self.skeptic = Some(skeptic.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let goal = self.goal.trim();
        if goal.is_empty() {
            return Err(PortalError::Validation("goal must not be empty".into()));
        }
        if goal.chars().count() > MAX_GOAL_CHARS {
            return Err(PortalError::Validation(format!(
                "goal must be at most {MAX_GOAL_CHARS} characters"
            )));
        }
        if let Some(topic) = &self.topic {
            if topic.trim().is_empty() {
                return Err(PortalError::Validation("topic must not be blank".into()));
            }
        }
        if let Some(hours) = self.lookback_hours {
            if !(1..=MAX_LOOKBACK_HOURS).contains(&hours) {
                return Err(PortalError::Validation(format!(
                    "lookback_hours must be between 1 and {MAX_LOOKBACK_HOURS}"
                )));
            }
        }
        if let Some(count) = self.variant_count {
            if !(1..=MAX_VARIANTS).contains(&count) {
                return Err(PortalError::Validation(format!(
                    "variant_count must be between 1 and {MAX_VARIANTS}"
                )));
            }
        }
        for persona in self.believer.iter().chain(self.skeptic.iter()) {
            if persona.trim().is_empty() {
                return Err(PortalError::Validation("persona id must not be blank".into()));
            }
        }
        for locale in self.locale.iter().chain(self.extra_locales.iter()) {
            if !is_valid_locale(locale) {
                return Err(PortalError::Validation(format!("invalid locale '{locale}'")));
            }
        }
        Ok(())
    }

    pub fn search_topic(&self) -> &str {
        self.topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.goal.trim())
    }

    pub fn locale_or<'a>(&'a self, default_locale: &'a str) -> &'a str {
        self.locale.as_deref().unwrap_or(default_locale)
    }

    pub fn variants(&self) -> usize {
        self.variant_count.unwrap_or(1)
    }

    pub fn lookback_window(&self, now: DateTime<Utc>, default_hours: i64) -> LookbackWindow {
        LookbackWindow::ending_at(now, self.lookback_hours.unwrap_or(default_hours))
    }
}
