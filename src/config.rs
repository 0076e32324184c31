use std::env;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::providers::{Provider, ProviderEndpoints};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Analyze-route sliding window (per `user_<caller>` key).
    pub rate_limit: u32,
    pub rate_window_ms: u64,
    /// AI-proxy sliding window (independent `ai_<caller>` namespace).
    pub ai_rate_limit: u32,
    pub ai_rate_window_ms: u64,
    /// TTL applied to memoised enrichment results.
    pub cache_ttl_ms: u64,
    pub max_request_bytes: Option<usize>,
    /// Provider used for report generation on the analyze path.
    pub report_provider: Provider,
    pub report_model: Option<String>,
    pub providers: ProviderEndpoints,
    pub store_url: Option<String>,
    pub store_key: String,
    pub ebay_app_id: Option<String>,
    pub ebay_token: Option<String>,
    pub audit_log_file: Option<String>,
    pub rotation: RotationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            rate_window_ms: 60_000,
            ai_rate_limit: 30,
            ai_rate_window_ms: 60_000,
            cache_ttl_ms: 3_600_000,
            max_request_bytes: None,
            report_provider: Provider::Ollama,
            report_model: None,
            providers: ProviderEndpoints::default(),
            store_url: None,
            store_key: String::new(),
            ebay_app_id: None,
            ebay_token: None,
            audit_log_file: None,
            rotation: RotationConfig {
                max_bytes: None,
                keep: 1,
                compress: false,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let report_provider = match env::var("FLIPSCOPE_REPORT_PROVIDER") {
            Ok(name) if !name.trim().is_empty() => Provider::parse(&name)
                .map_err(|_| anyhow!("FLIPSCOPE_REPORT_PROVIDER names an unknown provider"))?,
            _ => defaults.report_provider,
        };

        let providers = ProviderEndpoints {
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            ollama_url: env::var("OLLAMA_URL").ok(),
            localai_url: env::var("LOCALAI_URL").ok(),
            openwebui_url: env::var("OPENWEBUI_URL").ok(),
            n8n_webhook_url: env::var("N8N_WEBHOOK_URL").ok(),
        };

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            rate_limit: parse_optional_u64("FLIPSCOPE_RATE_LIMIT")?
                .map(|v| v as u32)
                .unwrap_or(defaults.rate_limit),
            rate_window_ms: parse_optional_u64("FLIPSCOPE_RATE_WINDOW_MS")?
                .unwrap_or(defaults.rate_window_ms),
            ai_rate_limit: parse_optional_u64("FLIPSCOPE_AI_RATE_LIMIT")?
                .map(|v| v as u32)
                .unwrap_or(defaults.ai_rate_limit),
            ai_rate_window_ms: parse_optional_u64("FLIPSCOPE_AI_RATE_WINDOW_MS")?
                .unwrap_or(defaults.ai_rate_window_ms),
            cache_ttl_ms: parse_optional_u64("FLIPSCOPE_CACHE_TTL_MS")?
                .unwrap_or(defaults.cache_ttl_ms),
            max_request_bytes: parse_optional_u64("FLIPSCOPE_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
            report_provider,
            report_model: env::var("FLIPSCOPE_REPORT_MODEL").ok(),
            providers,
            store_url: env::var("FLIPSCOPE_STORE_URL").ok(),
            store_key: env::var("FLIPSCOPE_STORE_KEY").unwrap_or_default(),
            ebay_app_id: env::var("EBAY_APP_ID").ok(),
            ebay_token: env::var("EBAY_TOKEN").ok(),
            audit_log_file: env::var("AUDIT_LOG_FILE").ok(),
            rotation,
        })
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn ai_rate_window(&self) -> Duration {
        Duration::from_millis(self.ai_rate_window_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
