//! Analysis orchestration.
//!
//! Each request walks a fixed progression: rate gate, validation, threat
//! gate, cache lookup, then on a miss the enrichment collaborators and a
//! cache store.  Gate failures terminate the request immediately with the
//! matching status; collaborator failures propagate, never get swallowed.
//! Output formatting is a pure presentation transform applied after the
//! business result is fixed.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::cache_key;
use crate::error::ApiError;
use crate::guard::sanitize::validate_description;
use crate::store::ItemRecord;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Markdown,
    Csv,
}

impl ReportFormat {
    /// Unknown strings fall back to plain text.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => ReportFormat::Json,
            "markdown" => ReportFormat::Markdown,
            "csv" => ReportFormat::Csv,
            _ => ReportFormat::Text,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Text => "text/plain; charset=utf-8",
            ReportFormat::Json => "application/json",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
            ReportFormat::Csv => "text/csv",
        }
    }
}

/// One submitted analysis request.  Constructed per request, validated
/// once, discarded after the response; nothing here persists inside this
/// subsystem.
#[derive(Debug, Clone, Default)]
pub struct AnalysisTask {
    pub description: String,
    pub url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub images: Vec<Bytes>,
    pub format: ReportFormat,
}

impl AnalysisTask {
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_description(&self.description)
    }
}

/// The business result held behind every output format.  This is also the
/// cached payload (serialised), so a hit replays the exact prior result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub description: String,
    pub item_url: Option<String>,
    pub image_descriptions: Vec<String>,
    pub research: String,
    pub report: String,
    #[serde(default)]
    pub cached: bool,
}

impl AnalysisReport {
    /// Render for the requested format.  Never alters the report itself.
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.report.clone(),
            ReportFormat::Json => serde_json::json!({
                "description": self.description,
                "itemUrl": self.item_url,
                "imageDescriptions": self.image_descriptions,
                "research": self.research,
                "report": self.report,
                "cached": self.cached,
            })
            .to_string(),
            ReportFormat::Markdown => format!(
                "# Item Analysis\n\n**Description:** {}\n\n**URL:** {}\n\n**Images:** {}\n\n**Research:** {}\n\n**Report:** {}",
                self.description,
                self.item_url.as_deref().unwrap_or("none"),
                self.image_descriptions.join(", "),
                self.research,
                self.report
            ),
            ReportFormat::Csv => format!(
                "Description,URL,Images,Research,Report\n\"{}\",\"{}\",\"{}\",\"{}\",\"{}\"",
                csv_escape(&self.description),
                csv_escape(self.item_url.as_deref().unwrap_or("")),
                csv_escape(&self.image_descriptions.join("; ")),
                csv_escape(&self.research),
                csv_escape(&self.report)
            ),
        }
    }
}

fn csv_escape(field: &str) -> String {
    field.replace('"', "\"\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    RateChecked,
    Validated,
    ThreatChecked,
    CacheLookup,
    Enriching,
    CacheStore,
    Responding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RateChecked => "rate_checked",
            Stage::Validated => "validated",
            Stage::ThreatChecked => "threat_checked",
            Stage::CacheLookup => "cache_lookup",
            Stage::Enriching => "enriching",
            Stage::CacheStore => "cache_store",
            Stage::Responding => "responding",
        };
        f.write_str(name)
    }
}

/// Drive one analysis request through the gates and, on a cache miss, the
/// enrichment collaborators.
pub async fn run(
    state: &AppState,
    caller: &str,
    task: &AnalysisTask,
) -> Result<AnalysisReport, ApiError> {
    let decision = state.limiter.check(
        &format!("user_{}", caller),
        state.config.rate_limit,
        state.config.rate_window(),
    );
    if !decision.allowed {
        tracing::info!(caller, "analysis denied by rate limiter");
        return Err(ApiError::RateLimited {
            retry_after_ms: decision.retry_after.as_millis() as u64,
        });
    }
    tracing::trace!(caller, stage = %Stage::RateChecked, remaining = decision.remaining, "stage complete");

    task.validate()?;
    tracing::trace!(caller, stage = %Stage::Validated, "stage complete");

    let assessment = state.guard.assess(&task.description);
    if assessment.blocked {
        tracing::info!(
            caller,
            threats = %assessment.tag_list(),
            risk_score = assessment.risk_score,
            "analysis blocked by threat policy"
        );
        return Err(ApiError::PolicyBlock(assessment.tag_list()));
    }
    tracing::trace!(caller, stage = %Stage::ThreatChecked, risk_score = assessment.risk_score, "stage complete");

    let clean = state.guard.sanitize(&task.description);
    let key = cache_key(caller, &clean);
    if let Some(hit) = state.cache.get(&key) {
        match serde_json::from_str::<AnalysisReport>(&hit) {
            Ok(mut report) => {
                tracing::debug!(caller, stage = %Stage::CacheLookup, "cache hit");
                state.metrics.cache_hit();
                report.cached = true;
                return Ok(report);
            }
            Err(err) => {
                // Treat an undecodable entry as a miss and re-enrich.
                tracing::warn!(caller, error = %err, "discarding undecodable cache entry");
            }
        }
    }
    state.metrics.cache_miss();
    tracing::debug!(caller, stage = %Stage::Enriching, "cache miss, enriching");

    let mut image_descriptions = Vec::with_capacity(task.images.len());
    for image in &task.images {
        image_descriptions.push(state.enricher.describe_image(image).await?);
    }
    let research = state.enricher.research(&clean, task.url.as_deref()).await?;
    let report_text = state
        .enricher
        .generate_report(&clean, task.url.as_deref(), &image_descriptions, &research)
        .await?;

    let report = AnalysisReport {
        description: clean,
        item_url: task.url.clone(),
        image_descriptions,
        research,
        report: report_text,
        cached: false,
    };

    let stored = state
        .items
        .insert_item(&ItemRecord {
            description: report.description.clone(),
            url: report.item_url.clone(),
            email: task.email.clone(),
            phone: task.phone.clone(),
            report: report.report.clone(),
        })
        .await?;

    match serde_json::to_string(&report) {
        Ok(payload) => state.cache.put(key, payload),
        Err(err) => tracing::warn!(error = %err, "failed to encode report for cache"),
    }
    tracing::trace!(caller, stage = %Stage::CacheStore, item_id = %stored.id, "stage complete");

    state.audit_record(
        task.email.as_deref(),
        "analyze",
        serde_json::json!({ "itemId": stored.id }),
    );
    tracing::trace!(caller, stage = %Stage::Responding, "stage complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> AnalysisReport {
        AnalysisReport {
            description: "vintage watch".into(),
            item_url: Some("http://example.com".into()),
            image_descriptions: vec!["uncaptioned image (10 bytes)".into()],
            research: "eBay: 2 similar items".into(),
            report: "A solid \"flipper\" candidate".into(),
            cached: false,
        }
    }

    #[test]
    fn format_parsing_is_lenient() {
        assert_eq!(ReportFormat::parse_lenient("json"), ReportFormat::Json);
        assert_eq!(ReportFormat::parse_lenient("CSV"), ReportFormat::Csv);
        assert_eq!(ReportFormat::parse_lenient("markdown"), ReportFormat::Markdown);
        assert_eq!(ReportFormat::parse_lenient("yaml"), ReportFormat::Text);
        assert_eq!(ReportFormat::parse_lenient(""), ReportFormat::Text);
    }

    #[test]
    fn text_render_is_the_report_body() {
        let report = sample_report();
        assert_eq!(report.render(ReportFormat::Text), report.report);
    }

    #[test]
    fn json_render_round_trips() {
        let report = sample_report();
        let value: serde_json::Value =
            serde_json::from_str(&report.render(ReportFormat::Json)).unwrap();
        assert_eq!(value["description"], "vintage watch");
        assert_eq!(value["research"], "eBay: 2 similar items");
        assert_eq!(value["cached"], false);
    }

    #[test]
    fn csv_render_escapes_quotes() {
        let report = sample_report();
        let csv = report.render(ReportFormat::Csv);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Description,URL,Images,Research,Report"
        );
        assert!(lines.next().unwrap().contains("\"\"flipper\"\""));
    }

    #[test]
    fn markdown_render_has_all_sections() {
        let md = sample_report().render(ReportFormat::Markdown);
        for section in ["# Item Analysis", "**Description:**", "**URL:**", "**Images:**", "**Research:**", "**Report:**"] {
            assert!(md.contains(section), "missing {}", section);
        }
    }
}
