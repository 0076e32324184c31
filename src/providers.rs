//! Closed dispatch table for the AI proxy.
//!
//! Each provider maps to an endpoint builder and a response extractor;
//! unknown names are rejected with a typed error instead of being
//! string-branched at call sites.

use serde_json::Value;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenRouter,
    Ollama,
    LocalAi,
    OpenWebUi,
    N8n,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, ApiError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Provider::OpenRouter),
            "ollama" => Ok(Provider::Ollama),
            "localai" => Ok(Provider::LocalAi),
            "openwebui" => Ok(Provider::OpenWebUi),
            "n8n" => Ok(Provider::N8n),
            _ => Err(ApiError::UnknownProvider(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
            Provider::LocalAi => "localai",
            Provider::OpenWebUi => "openwebui",
            Provider::N8n => "n8n",
        }
    }
}

/// Endpoint material loaded from the environment.  Absent entries make
/// the corresponding provider unusable; dispatch reports the missing
/// variable instead of guessing.
#[derive(Debug, Clone, Default)]
pub struct ProviderEndpoints {
    pub openrouter_api_key: Option<String>,
    pub ollama_url: Option<String>,
    pub localai_url: Option<String>,
    pub openwebui_url: Option<String>,
    pub n8n_webhook_url: Option<String>,
}

/// A fully built outbound request: URL, optional bearer and JSON body.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub bearer: Option<String>,
    pub body: Value,
}

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "meta-llama/llama-3.1-8b-instruct";
const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";

impl ProviderEndpoints {
    pub fn request_for(
        &self,
        provider: Provider,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<ProviderRequest, ApiError> {
        match provider {
            Provider::OpenRouter => {
                let key = self.openrouter_api_key.as_deref().ok_or_else(|| {
                    ApiError::Collaborator("OPENROUTER_API_KEY not configured".into())
                })?;
                Ok(ProviderRequest {
                    url: OPENROUTER_URL.to_string(),
                    bearer: Some(key.to_string()),
                    body: chat_body(model.unwrap_or(DEFAULT_CHAT_MODEL), prompt),
                })
            }
            Provider::Ollama => {
                let base = self.require_base(self.ollama_url.as_deref(), "OLLAMA_URL")?;
                Ok(ProviderRequest {
                    url: format!("{}/api/generate", base),
                    bearer: None,
                    body: serde_json::json!({
                        "model": model.unwrap_or(DEFAULT_OLLAMA_MODEL),
                        "prompt": prompt,
                        "stream": false,
                    }),
                })
            }
            Provider::LocalAi => {
                let base = self.require_base(self.localai_url.as_deref(), "LOCALAI_URL")?;
                Ok(ProviderRequest {
                    url: format!("{}/v1/chat/completions", base),
                    bearer: None,
                    body: chat_body(model.unwrap_or(DEFAULT_CHAT_MODEL), prompt),
                })
            }
            Provider::OpenWebUi => {
                let base = self.require_base(self.openwebui_url.as_deref(), "OPENWEBUI_URL")?;
                Ok(ProviderRequest {
                    url: format!("{}/api/chat/completions", base),
                    bearer: None,
                    body: chat_body(model.unwrap_or(DEFAULT_CHAT_MODEL), prompt),
                })
            }
            Provider::N8n => {
                let url = self
                    .n8n_webhook_url
                    .as_deref()
                    .ok_or_else(|| ApiError::Collaborator("N8N_WEBHOOK_URL not configured".into()))?
                    .to_string();
                Ok(ProviderRequest {
                    url,
                    bearer: None,
                    body: serde_json::json!({ "prompt": prompt }),
                })
            }
        }
    }

    fn require_base(&self, base: Option<&str>, var: &str) -> Result<String, ApiError> {
        base.map(|b| b.trim_end_matches('/').to_string())
            .ok_or_else(|| ApiError::Collaborator(format!("{} not configured", var)))
    }
}

/// Pull the answer text out of a provider response body.
pub fn extract_response(provider: Provider, body: &Value) -> String {
    match provider {
        Provider::OpenRouter | Provider::LocalAi | Provider::OpenWebUi => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Provider::Ollama => body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Provider::N8n => body.to_string(),
    }
}

/// POST the prompt to the provider and extract the answer.  Transport
/// errors and non-success statuses surface as collaborator failures.
pub async fn dispatch(
    client: &reqwest::Client,
    endpoints: &ProviderEndpoints,
    provider: Provider,
    prompt: &str,
    model: Option<&str>,
) -> Result<String, ApiError> {
    let request = endpoints.request_for(provider, prompt, model)?;
    tracing::debug!(provider = provider.as_str(), url = %request.url, "dispatching provider request");
    let mut builder = client.post(&request.url).json(&request.body);
    if let Some(token) = &request.bearer {
        builder = builder.bearer_auth(token);
    }
    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Collaborator(format!(
            "provider {} returned {}",
            provider.as_str(),
            status
        )));
    }
    let body: Value = response.json().await?;
    Ok(extract_response(provider, &body))
}

fn chat_body(model: &str, prompt: &str) -> Value {
    serde_json::json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
    })
}
