//! Claim-risk scan for marketing copy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Categories of risky marketing claims.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    CertaintyLanguage,
    UrgencyPressure,
    ImpliedPerformance,
    AbsoluteClaims,
}

impl RiskFlag {
    pub fn label(&self) -> &'static str {
        match self {
            RiskFlag::CertaintyLanguage => "Guaranteed / certainty language",
            RiskFlag::UrgencyPressure => "Urgency pressure",
            RiskFlag::ImpliedPerformance => "Implied future performance",
            RiskFlag::AbsoluteClaims => "Overly absolute claims",
        }
    }
}

static PATTERNS: Lazy<Vec<(RiskFlag, Regex)>> = Lazy::new(|| {
    let table: [(RiskFlag, &str); 4] = [
        (
            RiskFlag::CertaintyLanguage,
            r"\bguaranteed?\b|\bcan'?t lose\b|\bsure thing\b|\bno risk\b|\brisk-free\b|100%",
        ),
        (
            RiskFlag::UrgencyPressure,
            r"\burgent\b|\bact now\b|\blimited time\b|\btoday only\b|\blast chance\b|\bends tonight\b|\bflash sale\b|\bexpires?\b",
        ),
        (
            RiskFlag::ImpliedPerformance,
            r"\bwill (double|triple)\b|\bcan'?t miss\b|\bnext nvidia\b|\btake off explosively\b",
        ),
        (
            RiskFlag::AbsoluteClaims,
            r"\balways\b|\bnever\b|\beveryone\b|\bno one\b",
        ),
    ];
    table
        .into_iter()
        .map(|(flag, pattern)| {
            let re = Regex::new(&format!("(?i){pattern}")).expect("static risk pattern");
            (flag, re)
        })
        .collect()
});

/// Flag risky claim categories present in `text`, in a stable order.
pub fn claim_risk_flags(text: &str) -> Vec<RiskFlag> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let normalized = text.replace('\u{2019}', "'");
    PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(&normalized))
        .map(|(flag, _)| *flag)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_copy_has_no_flags() {
        assert!(claim_risk_flags("Fares to Bali from $199 this spring.").is_empty());
        assert!(claim_risk_flags("   ").is_empty());
    }

    #[test]
    fn test_flags_in_stable_order() {
        let flags = claim_risk_flags("Act NOW - everyone gets a guaranteed seat!");
        assert_eq!(
            flags,
            vec![
                RiskFlag::CertaintyLanguage,
                RiskFlag::UrgencyPressure,
                RiskFlag::AbsoluteClaims
            ]
        );
    }

    #[test]
    fn test_word_boundaries_and_curly_quotes() {
        assert!(claim_risk_flags("Forever young").is_empty());
        assert_eq!(
            claim_risk_flags("You can\u{2019}t miss this"),
            vec![RiskFlag::ImpliedPerformance]
        );
    }
}
