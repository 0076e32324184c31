//! Input guard: sanitisation and threat assessment over free-text input.
//!
//! The guard is a list of pattern→action rules.  Each rule names a threat
//! category, carries a case-insensitive regex and a neutral placeholder
//! used during sanitisation, and contributes literal hints to a shared
//! Aho-Corasick prefilter so clean text skips the regex passes entirely.
//! The rule list is the substitution seam: stronger detection plugs in via
//! `Guard::with_rules` without touching the orchestrator contract.
//!
//! These checks are deliberately simple heuristics.  False negatives
//! (novel attack strings) and false positives (benign text matching a
//! pattern) are both possible and accepted; callers must not treat the
//! guard as a complete security boundary.

pub mod assess;
pub mod sanitize;

pub use assess::{ThreatAssessment, ThreatTag, BLOCK_THRESHOLD, RISK_PER_TAG};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use regex::Regex;

/// One pattern→action rule.  `hints` are literal substrings that must
/// occur (case-insensitively) for the rule to possibly match; they feed
/// the prefilter, never the decision itself.
pub struct GuardRule {
    pub tag: ThreatTag,
    pub pattern: Regex,
    pub placeholder: &'static str,
    pub hints: Vec<String>,
}

pub struct Guard {
    rules: Vec<GuardRule>,
    prefilter: Option<AhoCorasick>,
}

impl Guard {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    /// Build a guard over a caller-supplied rule list.  The prefilter is
    /// only constructed when every rule contributes at least one hint;
    /// otherwise each pattern runs unconditionally.
    pub fn with_rules(rules: Vec<GuardRule>) -> Self {
        let all_hinted = !rules.is_empty() && rules.iter().all(|r| !r.hints.is_empty());
        let prefilter = if all_hinted {
            let hints: Vec<&str> = rules
                .iter()
                .flat_map(|r| r.hints.iter().map(String::as_str))
                .collect();
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(&hints)
            {
                Ok(ac) => Some(ac),
                Err(err) => {
                    tracing::warn!(error = ?err, "failed to build guard prefilter, falling back to per-rule scan");
                    None
                }
            }
        } else {
            None
        };
        Self { rules, prefilter }
    }

    pub fn rules(&self) -> &[GuardRule] {
        &self.rules
    }

    /// True when the prefilter proves no rule can match.
    pub(crate) fn definitely_clean(&self, text: &str) -> bool {
        match &self.prefilter {
            Some(ac) => !ac.is_match(text),
            None => false,
        }
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in rule set: destructive shell commands, privilege
/// escalation, code evaluation and embedded script tags.  Placeholders are
/// inert markers no rule can re-match, which is what makes sanitisation
/// idempotent.
fn default_rules() -> Vec<GuardRule> {
    vec![
        GuardRule {
            tag: ThreatTag::DestructiveShell,
            pattern: Regex::new(r"(?i)\brm\s+-[a-z]*f[a-z]*\s*[^\s;|&]*")
                .expect("destructive shell pattern"),
            placeholder: "[filtered command]",
            hints: vec!["rm -".into()],
        },
        GuardRule {
            tag: ThreatTag::PrivilegeEscalation,
            pattern: Regex::new(r"(?i)\bsudo\s+[^\s;|&]*").expect("privilege escalation pattern"),
            placeholder: "[filtered command]",
            hints: vec!["sudo".into()],
        },
        GuardRule {
            tag: ThreatTag::CodeEvaluation,
            pattern: Regex::new(r"(?i)\b(?:eval|exec)\s*\(").expect("code evaluation pattern"),
            placeholder: "[filtered call]",
            hints: vec!["eval".into(), "exec".into()],
        },
        GuardRule {
            tag: ThreatTag::ScriptInjection,
            pattern: Regex::new(r"(?i)<\s*/?\s*script[^>]*>").expect("script tag pattern"),
            placeholder: "[filtered markup]",
            hints: vec!["script".into()],
        },
    ]
}
