//! Creative generation: draft, revise and localize campaign copy, plus
//! headline/CTA variants and an editorial QA pass.
//!
//! Assets are immutable. Every revision or localization is a new asset that
//! points at its parent and shares the lineage of the original draft.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    audience::{Recommendation, Verdict},
    brief::{is_valid_locale, CopyType, GoalBrief},
    compliance::{claim_risk_flags, RiskFlag},
    config::PortalConfig,
    gateway::{roles, GatewayResponse, InvokeOptions, ProviderGateway, ProviderPrompt},
    signals::Opportunity,
    store::{Computed, PersistenceStore},
    text::{string_field, string_list, strip_code_fence},
    PortalError, Result,
};

const DRAFT_STAGE: &str = "creative.draft";
const REVISE_STAGE: &str = "creative.revise";
const LOCALIZE_STAGE: &str = "creative.localize";
const VARIANTS_STAGE: &str = "creative.variants";
const QA_STAGE: &str = "creative.qa";
const MAX_QA_FIXES: usize = 8;
const PROMPT_OPPORTUNITIES: usize = 5;

const COPY_CHIEF: &str = "You are a senior direct-response copy chief. Voice: plain English, \
optimistic, expert. Never promise guaranteed results and keep compliance in mind.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreativeAsset {
    pub id: Uuid,
    /// Shared by a draft and every version derived from it.
    pub lineage_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub revision: u32,
    pub goal: String,
    pub copy_type: CopyType,
    pub locale: String,
    pub variant_text: String,
    /// The copywriter's plan, when one was returned.
    pub plan: Option<String>,
    pub risk_flags: Vec<RiskFlag>,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreativeAsset {
    fn first(goal: &str, copy_type: CopyType, locale: &str, text: String, plan: Option<String>, provider: String) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            lineage_id: id,
            parent_id: None,
            revision: 1,
            goal: goal.to_string(),
            copy_type,
            locale: locale.to_string(),
            risk_flags: claim_risk_flags(&text),
            variant_text: text,
            plan,
            provider: Some(provider),
            created_at: Utc::now(),
        }
    }

    /// An alternative to `self`: a fresh lineage that records where it came from.
    fn sibling(&self, text: String, provider: String) -> Self {
        let mut asset = Self::first(&self.goal, self.copy_type, &self.locale, text, self.plan.clone(), provider);
        asset.parent_id = Some(self.id);
        asset
    }

    /// A new version of `self` with different copy.
    fn derive(&self, text: String, locale: &str, provider: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            lineage_id: self.lineage_id,
            parent_id: Some(self.id),
            revision: self.revision + 1,
            goal: self.goal.clone(),
            copy_type: self.copy_type,
            locale: locale.to_string(),
            risk_flags: claim_risk_flags(&text),
            variant_text: text,
            plan: None,
            provider: Some(provider),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Pass,
    Patched,
}

/// Outcome of the editorial QA pass over one asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
pub struct QaReport {
    pub status: QaStatus,
    /// `PASS`, or the bullet list of fixes that was applied.
    pub critique: String,
    /// The checked asset, or its patched child.
    pub asset: CreativeAsset,
}

#[derive(Debug, Serialize)]
struct DraftRequest<'a> {
    goal: &'a str,
    copy_type: CopyType,
    locale: &'a str,
    topics: Vec<&'a str>,
    disclaimer: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ReviseRequest<'a> {
    asset_id: Uuid,
    revision: u32,
    variant_text: &'a str,
    recommendation: Recommendation,
    rationale: &'a str,
    key_objections: &'a [String],
    proof_needed: &'a [String],
    actionable_fixes: &'a [String],
}

#[derive(Debug, Serialize)]
struct VariantsRequest<'a> {
    asset_id: Uuid,
    revision: u32,
    variant_text: &'a str,
    count: usize,
}

#[derive(Debug, Serialize)]
struct QaRequest<'a> {
    asset_id: Uuid,
    revision: u32,
    variant_text: &'a str,
    disclaimer: Option<&'a str>,
    model_review: bool,
}

#[derive(Debug, Serialize)]
struct LocalizeRequest<'a> {
    asset_id: Uuid,
    revision: u32,
    variant_text: &'a str,
    target: &'a str,
}

pub struct CreativeGenerator {
    gateway: Arc<ProviderGateway>,
    store: Arc<PersistenceStore>,
    config: Arc<PortalConfig>,
}

impl CreativeGenerator {
    pub fn new(gateway: Arc<ProviderGateway>, store: Arc<PersistenceStore>, config: Arc<PortalConfig>) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// First draft for `brief`, informed by the top-ranked opportunities.
    pub async fn draft(&self, brief: &GoalBrief, opportunities: &[Opportunity]) -> Result<CreativeAsset> {
        brief.validate()?;
        let settings = &self.config.creative;
        let locale = brief.locale_or(&settings.default_locale);
        let request = DraftRequest {
            goal: brief.goal.trim(),
            copy_type: brief.copy_type,
            locale,
            topics: opportunities
                .iter()
                .take(PROMPT_OPPORTUNITIES)
                .map(|o| o.topic.as_str())
                .collect(),
            disclaimer: settings.disclaimer.as_deref(),
        };

        self.store
            .get_or_compute(DRAFT_STAGE, &request, || async {
                let trends = if request.topics.is_empty() {
                    "(no trend signals available)".to_string()
                } else {
                    request
                        .topics
                        .iter()
                        .map(|t| format!("- {t}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let prompt = ProviderPrompt::new(
                    format!("{COPY_CHIEF}\n\n{}", settings.rule_for(locale)),
                    format!(
                        "GOAL: {goal}\nFORMAT: {format}\nSTRUCTURE: {structure}\n\n\
                         WHAT PEOPLE ARE TALKING ABOUT:\n{trends}\n\n\
                         Plan the angle first, then write the copy. Reply as JSON: \
                         {{\"plan\": \"<angle, audience and proof in 2-3 sentences>\", \"copy\": \"<the finished copy>\"}}",
                        goal = request.goal,
                        format = brief.copy_type.display_name(),
                        structure = brief.copy_type.structure(),
                    ),
                )
                .json();

                let response = self.invoke(&prompt).await?;
                let fields = response.reply.structured();
                let copy = extract_copy(fields.as_ref().and_then(|f| string_field(f, "copy")), &response.reply.text)?;
                let copy = with_disclaimer(copy, request.disclaimer);
                let plan = fields.as_ref().and_then(|f| string_field(f, "plan"));

                let asset = CreativeAsset::first(
                    request.goal,
                    brief.copy_type,
                    locale,
                    copy,
                    plan,
                    response.provider.clone(),
                );
                tracing::info!("[CREATIVE] Drafted asset {} ({})", asset.id, locale);
                Ok(Computed::from_provider(asset, response.provider))
            })
            .await
    }

    /// New version of `asset` addressing the verdict's objections.
    pub async fn revise(&self, asset: &CreativeAsset, verdict: &Verdict) -> Result<CreativeAsset> {
        if verdict.asset_id != asset.id {
            return Err(PortalError::Validation(format!(
                "verdict {} is about asset {}, not {}",
                verdict.id, verdict.asset_id, asset.id
            )));
        }

        let request = ReviseRequest {
            asset_id: asset.id,
            revision: asset.revision,
            variant_text: &asset.variant_text,
            recommendation: verdict.recommendation,
            rationale: &verdict.rationale,
            key_objections: &verdict.key_objections,
            proof_needed: &verdict.proof_needed,
            actionable_fixes: &verdict.actionable_fixes,
        };

        self.store
            .get_or_compute(REVISE_STAGE, &request, || async {
                let bullets = |items: &[String]| {
                    if items.is_empty() {
                        "- (none given)".to_string()
                    } else {
                        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
                    }
                };
                let prompt = ProviderPrompt::new(
                    format!("{COPY_CHIEF}\n\n{}", self.config.creative.rule_for(&asset.locale)),
                    format!(
                        "A focus group reviewed this {format} and recommended: {recommendation}.\n\
                         WHY: {rationale}\n\nOBJECTIONS:\n{objections}\n\nPROOF NEEDED:\n{proof}\n\n\
                         FIXES:\n{fixes}\n\nCOPY:\n{copy}\n\n\
                         Rewrite the copy so it answers the objections without losing its energy. \
                         Keep the same structure. Reply as JSON: {{\"copy\": \"<the revised copy>\"}}",
                        format = asset.copy_type.display_name(),
                        recommendation = verdict.recommendation.as_str(),
                        rationale = verdict.rationale,
                        objections = bullets(&verdict.key_objections),
                        proof = bullets(&verdict.proof_needed),
                        fixes = bullets(&verdict.actionable_fixes),
                        copy = asset.variant_text,
                    ),
                )
                .json();

                let response = self.invoke(&prompt).await?;
                let fields = response.reply.structured();
                let copy = extract_copy(fields.as_ref().and_then(|f| string_field(f, "copy")), &response.reply.text)?;
                let revised = asset.derive(copy, &asset.locale, response.provider.clone());
                tracing::info!(
                    "[CREATIVE] Revised asset {} -> {} (rev {})",
                    asset.id,
                    revised.id,
                    revised.revision
                );
                Ok(Computed::from_provider(revised, response.provider))
            })
            .await
    }

    /// Adapt `asset` to `locale`. Localizing into the asset's own locale is a no-op.
    pub async fn localize(&self, asset: &CreativeAsset, locale: &str) -> Result<CreativeAsset> {
        if !is_valid_locale(locale) {
            return Err(PortalError::Validation(format!("invalid locale '{locale}'")));
        }
        if locale == asset.locale {
            return Ok(asset.clone());
        }

        let request = LocalizeRequest {
            asset_id: asset.id,
            revision: asset.revision,
            variant_text: &asset.variant_text,
            target: locale,
        };

        self.store
            .get_or_compute(LOCALIZE_STAGE, &request, || async {
                let prompt = ProviderPrompt::new(
                    format!("{COPY_CHIEF}\n\n{}", self.config.creative.rule_for(locale)),
                    format!(
                        "Adapt this {format} from {from} to {to}. Keep the meaning, structure and \
                         claims; change spelling, currency, idiom and references so it reads as \
                         native.\n\nCOPY:\n{copy}\n\nReply as JSON: {{\"copy\": \"<the localized copy>\"}}",
                        format = asset.copy_type.display_name(),
                        from = asset.locale,
                        to = locale,
                        copy = asset.variant_text,
                    ),
                )
                .json();

                let response = self.invoke(&prompt).await?;
                let fields = response.reply.structured();
                let copy = extract_copy(fields.as_ref().and_then(|f| string_field(f, "copy")), &response.reply.text)?;
                let localized = asset.derive(copy, locale, response.provider.clone());
                tracing::info!("[CREATIVE] Localized asset {} into {} as {}", asset.id, locale, localized.id);
                Ok(Computed::from_provider(localized, response.provider))
            })
            .await
    }

    /// Up to `count` alternatives to `base`, each with a new headline and call-to-action.
    pub async fn variants(&self, base: &CreativeAsset, count: usize) -> Result<Vec<CreativeAsset>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let request = VariantsRequest {
            asset_id: base.id,
            revision: base.revision,
            variant_text: &base.variant_text,
            count,
        };
        let disclaimer = self.config.creative.disclaimer.as_deref();

        self.store
            .get_or_compute(VARIANTS_STAGE, &request, || async {
                let prompt = ProviderPrompt::new(
                    "You are a world-class direct-response copywriter.",
                    format!(
                        "Write {count} alternative subject-line/headline ideas AND {count} alternative \
                         CTA button labels for the copy below, preserving tone and urgency.\n\n\
                         Rules:\n- Keep headlines short and punchy (ideally <= 12 words)\n\
                         - Keep CTAs short (ideally <= 6 words)\n\
                         - Avoid guaranteed outcomes and financial advice phrasing\n\n\
                         Reply as JSON: {{\"headlines\": [\"...\"], \"ctas\": [\"...\"]}}\n\n\
                         COPY:\n{copy}",
                        copy = base.variant_text,
                    ),
                )
                .json();

                let response = self.invoke(&prompt).await?;
                let fields = response.reply.structured().unwrap_or_default();
                let headlines = string_list(&fields, "headlines");
                let ctas = string_list(&fields, "ctas");
                if headlines.is_empty() {
                    return Err(PortalError::ProviderPermanent("copywriter returned no headlines".into()));
                }

                let siblings: Vec<CreativeAsset> = headlines
                    .iter()
                    .take(count)
                    .enumerate()
                    .map(|(i, headline)| {
                        let cta = ctas.get(i).map(String::as_str).filter(|_| base.copy_type != CopyType::Headline);
                        let text = with_headline_and_cta(&base.variant_text, headline, cta, disclaimer);
                        base.sibling(text, response.provider.clone())
                    })
                    .collect();
                tracing::info!("[CREATIVE] Wrote {} variants of asset {}", siblings.len(), base.id);
                Ok(Computed::from_provider(siblings, response.provider))
            })
            .await
    }

    /// Editorial QA: cheap checks first, then an optional model review, and a
    /// patched child asset when anything needs fixing.
    pub async fn qa_and_patch(&self, asset: &CreativeAsset) -> Result<QaReport> {
        let settings = &self.config.creative;
        let request = QaRequest {
            asset_id: asset.id,
            revision: asset.revision,
            variant_text: &asset.variant_text,
            disclaimer: settings.disclaimer.as_deref(),
            model_review: settings.qa_model_review,
        };

        self.store
            .get_or_compute(QA_STAGE, &request, || async {
                let issues = quick_checks(&asset.variant_text, asset.copy_type, request.disclaimer);
                let critique = if !issues.is_empty() {
                    issues.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
                } else if request.model_review {
                    let response = self.invoke(&review_prompt(asset, request.disclaimer)).await?;
                    strip_code_fence(&response.reply.text).trim().to_string()
                } else {
                    String::new()
                };

                if critique.is_empty() || is_pass(&critique) {
                    tracing::info!("[CREATIVE] QA passed asset {}", asset.id);
                    return Ok(Computed::new(QaReport {
                        status: QaStatus::Pass,
                        critique: "PASS".to_string(),
                        asset: asset.clone(),
                    }));
                }

                let critique: String = critique.lines().take(MAX_QA_FIXES).collect::<Vec<_>>().join("\n");
                let prompt = ProviderPrompt::new(
                    format!("{COPY_CHIEF}\n\n{}", settings.rule_for(&asset.locale)),
                    format!(
                        "Apply the fixes below while preserving the overall intent.\n\
                         - Keep compliance in mind.\n- Do not invent performance numbers.\n\n\
                         FIXES:\n{critique}\n\nORIGINAL:\n{copy}\n\n\
                         Reply as JSON: {{\"copy\": \"<the full revised copy>\"}}",
                        copy = asset.variant_text,
                    ),
                )
                .json();
                let response = self.invoke(&prompt).await?;
                let fields = response.reply.structured();
                let copy = extract_copy(fields.as_ref().and_then(|f| string_field(f, "copy")), &response.reply.text)?;
                let patched = asset.derive(with_disclaimer(copy, request.disclaimer), &asset.locale, response.provider.clone());
                tracing::info!("[CREATIVE] QA patched asset {} -> {}", asset.id, patched.id);
                Ok(Computed::from_provider(
                    QaReport {
                        status: QaStatus::Patched,
                        critique,
                        asset: patched,
                    },
                    response.provider,
                ))
            })
            .await
    }

    async fn invoke(&self, prompt: &ProviderPrompt) -> Result<GatewayResponse> {
        self.gateway
            .invoke(roles::COPYWRITER, prompt, &InvokeOptions::default())
            .await
    }
}

/// Prefer the structured `copy` field; otherwise use the reply text minus any fence.
fn extract_copy(structured: Option<String>, raw_text: &str) -> Result<String> {
    let copy = structured.unwrap_or_else(|| strip_code_fence(raw_text).to_string());
    // Some models double-escape newlines inside JSON strings.
    let copy = if !copy.contains('\n') && copy.contains("\\n") {
        copy.replace("\\n", "\n")
    } else {
        copy
    };
    let copy = copy.trim().to_string();
    if copy.is_empty() {
        return Err(PortalError::ProviderPermanent("copywriter returned no copy".into()));
    }
    Ok(copy)
}

/// Problems worth fixing without asking a model.
fn quick_checks(text: &str, copy_type: CopyType, disclaimer: Option<&str>) -> Vec<String> {
    let (min, max) = copy_type.word_bounds();
    let words = text.split_whitespace().count();
    let mut issues = Vec::new();
    if words < min / 2 {
        issues.push(format!("Draft is only {words} words (target min: {min}). Expand significantly."));
    }
    if words > max + max / 4 {
        issues.push(format!("Draft is {words} words (target max: {max}). Tighten to fit."));
    }
    if let Some(line) = disclaimer.map(str::trim).filter(|d| !d.is_empty()) {
        if !text.contains(line) {
            issues.push(format!("Disclaimer line is missing. Append it exactly: {line}"));
        }
    }
    issues
}

fn review_prompt(asset: &CreativeAsset, disclaimer: Option<&str>) -> ProviderPrompt {
    let (min, max) = asset.copy_type.word_bounds();
    ProviderPrompt::new(
        "You are an obsessive editorial QA reviewer for direct-response copy.",
        format!(
            "Check the copy for:\n- Structure matches: {structure}\n- Length fits {min}-{max} words\n\
             - Disclaimer present exactly: {disclaimer}\n\
             - Compliance: no guaranteed outcomes, no invented performance numbers\n\n\
             TARGET MARKET: {locale}\n\n\
             Return ONLY \"PASS\" if everything is acceptable, otherwise a short bullet list of \
             fixes (no more than {MAX_QA_FIXES} bullets).\n\nCOPY:\n{copy}",
            structure = asset.copy_type.structure(),
            disclaimer = disclaimer.unwrap_or("(none required)"),
            locale = asset.locale,
            copy = asset.variant_text,
        ),
    )
}

fn is_pass(critique: &str) -> bool {
    critique
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_uppercase()
        .starts_with("PASS")
}

/// `base` with its opening line replaced by `headline` and an optional call-to-action added.
/// A leading label such as `Subject:` is kept.
fn with_headline_and_cta(base: &str, headline: &str, cta: Option<&str>, disclaimer: Option<&str>) -> String {
    let disclaimer = disclaimer.map(str::trim).filter(|d| !d.is_empty());
    let mut body = base.trim();
    if let Some(stripped) = disclaimer.and_then(|line| body.strip_suffix(line)) {
        body = stripped.trim_end();
    }

    let mut lines = body.lines();
    let opening = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();
    let opening = match opening.split_once(':') {
        Some((label, _)) if !label.trim().is_empty() && label.split_whitespace().count() <= 2 => {
            format!("{}: {headline}", label.trim())
        }
        _ => headline.to_string(),
    };

    let mut text = opening;
    if !rest.is_empty() {
        text.push('\n');
        text.push_str(&rest.join("\n"));
    }
    if let Some(cta) = cta {
        text.push_str(&format!("\n\nCTA: {cta}"));
    }
    with_disclaimer(text, disclaimer)
}

fn with_disclaimer(copy: String, disclaimer: Option<&str>) -> String {
    match disclaimer.map(str::trim).filter(|d| !d.is_empty()) {
        Some(line) if !copy.contains(line) => format!("{copy}\n\n{line}"),
        _ => copy,
    }
}
