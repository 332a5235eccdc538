//! Configuration for the portal engine.
//!
//! Built once at startup and shared read-only as `Arc<PortalConfig>`. Values come
//! from built-in defaults, an optional TOML file and `PORTAL__*` environment
//! variables, in that order of precedence.

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    audience::{default_personas, DebatePanel, Persona},
    gateway::roles,
    PortalError, Result,
};

/// Role routing and retry policy for the provider gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ordered candidate providers per role. The first entry is primary.
    pub roles: BTreeMap<String, Vec<String>>,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Retries per candidate on transient failures.
    pub max_retries: usize,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let both = |first: &str, second: &str| vec![first.to_string(), second.to_string()];
        let roles = BTreeMap::from([
            (roles::COPYWRITER.to_string(), both("primary", "secondary")),
            (roles::BELIEVER.to_string(), both("primary", "secondary")),
            (roles::SKEPTIC.to_string(), both("primary", "secondary")),
            (roles::MODERATOR.to_string(), both("secondary", "primary")),
            (roles::FUTURIST.to_string(), both("primary", "secondary")),
            (roles::ANALYST.to_string(), both("primary", "secondary")),
        ]);

        Self {
            roles,
            timeout_ms: 60_000,
            max_retries: 2,
            backoff_min_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_providers() -> BTreeMap<String, ProviderEndpointConfig> {
    BTreeMap::from([
        (
            "primary".to_string(),
            ProviderEndpointConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4.1".to_string(),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            },
        ),
        (
            "secondary".to_string(),
            ProviderEndpointConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                model: "gemini-2.5-pro".to_string(),
                api_key_env: Some("GEMINI_API_KEY".to_string()),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            },
        ),
    ])
}

/// Signal collection, de-duplication and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Maximum number of opportunities kept after ranking.
    pub top_k: usize,
    /// Sørensen–Dice similarity at or above which two topics are duplicates.
    pub dedup_threshold: f64,
    pub recency_half_life_hours: f64,
    pub recency_weight: f64,
    pub volume_weight: f64,
    pub velocity_weight: f64,
    pub default_lookback_hours: i64,
    pub fetch_retries: usize,
    pub fetch_backoff_ms: u64,
    /// Upper bound on a single source query, per attempt.
    pub fetch_timeout_ms: u64,
    pub serpapi_base_url: String,
    pub serpapi_key_env: String,
    /// Google country code passed to the trends source.
    pub country: String,
    pub language: String,
}

impl SignalsConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            dedup_threshold: 0.82,
            recency_half_life_hours: 24.0,
            recency_weight: 0.4,
            volume_weight: 0.4,
            velocity_weight: 0.2,
            default_lookback_hours: 72,
            fetch_retries: 3,
            fetch_backoff_ms: 1_000,
            fetch_timeout_ms: 15_000,
            serpapi_base_url: "https://serpapi.com/search.json".to_string(),
            serpapi_key_env: "SERPAPI_API_KEY".to_string(),
            country: "au".to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturistConfig {
    /// Single-link similarity needed to join an existing cluster.
    pub cluster_threshold: f64,
    /// Relative slope per hour inside which a theme is considered stable.
    pub trend_band: f64,
}

impl Default for FuturistConfig {
    fn default() -> Self {
        Self {
            cluster_threshold: 0.45,
            trend_band: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    pub max_rounds: usize,
    /// Believer/Skeptic similarity treated as convergence.
    pub convergence_threshold: f64,
    pub participant_word_cap: usize,
    pub moderator_word_cap: usize,
    /// Pressure-test the revised asset once more before assembly.
    pub recheck_revision: bool,
    /// Ask the analyst for a structured brief of the creative before the first turn.
    pub extract_brief: bool,
    pub personas: Vec<Persona>,
    /// Persona ids seated when a brief does not pick its own.
    pub default_believer: String,
    pub default_skeptic: String,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            convergence_threshold: 0.72,
            participant_word_cap: 1_500,
            moderator_word_cap: 4_500,
            recheck_revision: true,
            extract_brief: true,
            personas: default_personas(),
            default_believer: "maya".to_string(),
            default_skeptic: "graham".to_string(),
        }
    }
}

impl DebateConfig {
    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Seat the requested personas, falling back to the configured defaults.
    pub fn panel(&self, believer: Option<&str>, skeptic: Option<&str>) -> Result<DebatePanel> {
        let seat = |id: &str| {
            self.persona(id)
                .cloned()
                .ok_or_else(|| PortalError::Validation(format!("unknown persona '{id}'")))
        };
        Ok(DebatePanel {
            believer: seat(believer.unwrap_or(self.default_believer.as_str()))?,
            skeptic: seat(skeptic.unwrap_or(self.default_skeptic.as_str()))?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are superseded on the next computation.
    pub ttl_secs: u64,
    pub hot_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 12 * 60 * 60,
            hot_capacity: 1_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreativeConfig {
    pub default_locale: String,
    /// Spelling and currency guidance per locale.
    pub locale_rules: BTreeMap<String, String>,
    /// Appended to every draft when set.
    pub disclaimer: Option<String>,
    /// Run the editorial QA pass over each draft before it is debated.
    pub qa_pass: bool,
    /// Ask the copywriter for a critique when the cheap QA checks find nothing.
    pub qa_model_review: bool,
}

impl Default for CreativeConfig {
    fn default() -> Self {
        let locale_rules = [
            ("en-AU", "Use Australian English spelling and AUD ($) pricing."),
            ("en-GB", "Use British English spelling and GBP (£) pricing."),
            ("en-CA", "Use Canadian English spelling and CAD ($) pricing."),
            ("en-US", "Use American English spelling and USD ($) pricing."),
            ("en-NZ", "Use New Zealand English spelling and NZD ($) pricing."),
        ]
        .into_iter()
        .map(|(locale, rule)| (locale.to_string(), rule.to_string()))
        .collect();

        Self {
            default_locale: "en-AU".to_string(),
            locale_rules,
            disclaimer: None,
            qa_pass: true,
            qa_model_review: true,
        }
    }
}

impl CreativeConfig {
    pub fn rule_for(&self, locale: &str) -> String {
        self.locale_rules
            .get(locale)
            .cloned()
            .unwrap_or_else(|| format!("Write natively for the {locale} market."))
    }
}

/// Core configuration for the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub database_path: String,
    pub gateway: GatewayConfig,
    pub providers: BTreeMap<String, ProviderEndpointConfig>,
    pub signals: SignalsConfig,
    pub futurist: FuturistConfig,
    pub debate: DebateConfig,
    pub cache: CacheConfig,
    pub creative: CreativeConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            database_path: "data/portal.db".to_string(),
            gateway: GatewayConfig::default(),
            providers: default_providers(),
            signals: SignalsConfig::default(),
            futurist: FuturistConfig::default(),
            debate: DebateConfig::default(),
            cache: CacheConfig::default(),
            creative: CreativeConfig::default(),
        }
    }
}

impl PortalConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (role, candidates) in &self.gateway.roles {
            if candidates.is_empty() {
                return Err(PortalError::ConfigError(format!(
                    "role '{role}' has no candidate providers"
                )));
            }
            if let Some(missing) = candidates.iter().find(|c| !self.providers.contains_key(*c)) {
                return Err(PortalError::ConfigError(format!(
                    "role '{role}' routes to unknown provider '{missing}'"
                )));
            }
        }
        for role in roles::ALL {
            if !self.gateway.roles.contains_key(role) {
                return Err(PortalError::ConfigError(format!("role '{role}' is not routed")));
            }
        }
        if self.gateway.timeout_ms == 0 {
            return Err(PortalError::ConfigError("gateway.timeout_ms must be positive".into()));
        }
        if self.signals.fetch_timeout_ms == 0 {
            return Err(PortalError::ConfigError("signals.fetch_timeout_ms must be positive".into()));
        }
        if self.signals.top_k == 0 {
            return Err(PortalError::ConfigError("signals.top_k must be at least 1".into()));
        }
        if self.signals.recency_half_life_hours <= 0.0 {
            return Err(PortalError::ConfigError(
                "signals.recency_half_life_hours must be positive".into(),
            ));
        }
        if self.signals.default_lookback_hours <= 0 {
            return Err(PortalError::ConfigError(
                "signals.default_lookback_hours must be positive".into(),
            ));
        }
        for (name, value) in [
            ("signals.dedup_threshold", self.signals.dedup_threshold),
            ("futurist.cluster_threshold", self.futurist.cluster_threshold),
            ("debate.convergence_threshold", self.debate.convergence_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(PortalError::ConfigError(format!("{name} must be in (0, 1]")));
            }
        }
        if self.debate.max_rounds == 0 {
            return Err(PortalError::ConfigError("debate.max_rounds must be at least 1".into()));
        }
        let mut ids = std::collections::BTreeSet::new();
        if let Some(dup) = self.debate.personas.iter().find(|p| !ids.insert(p.id.as_str())) {
            return Err(PortalError::ConfigError(format!("persona '{}' is defined twice", dup.id)));
        }
        self.debate
            .panel(None, None)
            .map_err(|err| PortalError::ConfigError(format!("debate default panel: {err}")))?;
        Ok(())
    }
}

/// Load a configuration struct from defaults, an optional file and the environment.
///
/// Environment keys use `PORTAL__` as prefix and `__` as separator, e.g.
/// `PORTAL__DEBATE__MAX_ROUNDS=3`.
pub fn load_config<T: DeserializeOwned>(file: Option<&Path>) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix("PORTAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
