//! Threat scoring over sanitisable categories.

use std::collections::BTreeSet;

use serde::Serialize;

use super::Guard;

/// Fixed score contribution per matched category.
pub const RISK_PER_TAG: f32 = 0.3;
/// Scores above this block the request; two distinct categories suffice.
pub const BLOCK_THRESHOLD: f32 = 0.5;

const RECOMMEND_BLOCK: &str = "Reject the request and review the submitting caller";
const RECOMMEND_ALLOW: &str = "Proceed with analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatTag {
    DestructiveShell,
    PrivilegeEscalation,
    CodeEvaluation,
    ScriptInjection,
}

impl ThreatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatTag::DestructiveShell => "destructive_shell",
            ThreatTag::PrivilegeEscalation => "privilege_escalation",
            ThreatTag::CodeEvaluation => "code_evaluation",
            ThreatTag::ScriptInjection => "script_injection",
        }
    }
}

/// Computed fresh per request, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatAssessment {
    pub threats: BTreeSet<ThreatTag>,
    pub risk_score: f32,
    pub blocked: bool,
    pub recommendation: &'static str,
}

impl ThreatAssessment {
    /// Comma-joined tag list for error messages and audit lines.
    pub fn tag_list(&self) -> String {
        self.threats
            .iter()
            .map(ThreatTag::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Guard {
    /// Score `text` against the rule list.  Each matched category
    /// contributes exactly one tag and a fixed increment; multiple hits
    /// within one category still count once.
    pub fn assess(&self, text: &str) -> ThreatAssessment {
        let mut threats = BTreeSet::new();
        if !self.definitely_clean(text) {
            for rule in self.rules() {
                if rule.pattern.is_match(text) {
                    threats.insert(rule.tag);
                }
            }
        }
        let risk_score = (threats.len() as f32 * RISK_PER_TAG).min(1.0);
        let blocked = risk_score > BLOCK_THRESHOLD;
        ThreatAssessment {
            threats,
            risk_score,
            blocked,
            recommendation: if blocked {
                RECOMMEND_BLOCK
            } else {
                RECOMMEND_ALLOW
            },
        }
    }
}
