//! Storage, auth and marketplace collaborators.
//!
//! Traits form the seams the router is built against; the REST
//! implementations talk to a Supabase-style backend and the marketplace
//! vendor APIs.  None of these carry business logic beyond shaping the
//! outbound request and surfacing failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub description: String,
    pub url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub report: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub item_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub email: String,
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ebay,
    Facebook,
    Mercari,
}

impl Platform {
    pub fn parse(name: &str) -> Result<Self, ApiError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ebay" => Ok(Platform::Ebay),
            "facebook" => Ok(Platform::Facebook),
            "mercari" => Ok(Platform::Mercari),
            _ => Err(ApiError::UnknownPlatform(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ebay => "ebay",
            Platform::Facebook => "facebook",
            Platform::Mercari => "mercari",
        }
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_item(&self, item: &ItemRecord) -> Result<StoredItem, ApiError>;
    async fn items_for(&self, email: &str) -> Result<Vec<StoredItem>, ApiError>;
    async fn fetch_item(&self, id: &str) -> Result<Option<StoredItem>, ApiError>;
    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), ApiError>;
    async fn insert_subscription(&self, sub: &SubscriptionRecord) -> Result<(), ApiError>;
}

#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ApiError>;
    /// Bad credentials come back as `ApiError::Auth`, not a collaborator
    /// failure.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError>;
    /// `Ok(None)` means the token is unknown or expired.
    async fn user_email(&self, token: &str) -> Result<Option<String>, ApiError>;
}

#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    async fn post_listing(
        &self,
        platform: Platform,
        item: &StoredItem,
        user_token: &str,
    ) -> Result<String, ApiError>;
}

/// Stand-in used when no storage backend is configured.  Every call
/// surfaces a configuration error rather than a connection failure.
pub struct UnconfiguredStore;

fn not_configured() -> ApiError {
    ApiError::Collaborator("FLIPSCOPE_STORE_URL is not configured".into())
}

#[async_trait]
impl ItemStore for UnconfiguredStore {
    async fn insert_item(&self, _item: &ItemRecord) -> Result<StoredItem, ApiError> {
        Err(not_configured())
    }

    async fn items_for(&self, _email: &str) -> Result<Vec<StoredItem>, ApiError> {
        Err(not_configured())
    }

    async fn fetch_item(&self, _id: &str) -> Result<Option<StoredItem>, ApiError> {
        Err(not_configured())
    }

    async fn insert_feedback(&self, _feedback: &FeedbackRecord) -> Result<(), ApiError> {
        Err(not_configured())
    }

    async fn insert_subscription(&self, _sub: &SubscriptionRecord) -> Result<(), ApiError> {
        Err(not_configured())
    }
}

#[async_trait]
impl AuthGateway for UnconfiguredStore {
    async fn sign_up(&self, _email: &str, _password: &str) -> Result<Session, ApiError> {
        Err(not_configured())
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session, ApiError> {
        Err(not_configured())
    }

    async fn user_email(&self, _token: &str) -> Result<Option<String>, ApiError> {
        Err(not_configured())
    }
}

/// Items, feedback and subscriptions over a PostgREST-style API.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    async fn insert(&self, table: &str, body: &Value) -> Result<reqwest::Response, ApiError> {
        let response = self
            .client
            .post(self.table(table))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        ensure_success(response, table).await
    }
}

async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(ApiError::Collaborator(format!(
        "{} request failed with {}: {}",
        what, status, detail
    )))
}

#[async_trait]
impl ItemStore for RestStore {
    async fn insert_item(&self, item: &ItemRecord) -> Result<StoredItem, ApiError> {
        let body = serde_json::to_value(item)
            .map_err(|e| ApiError::Collaborator(format!("item encode failed: {}", e)))?;
        let response = self.insert("items", &body).await?;
        let mut rows: Vec<StoredItem> = response.json().await?;
        rows.pop()
            .ok_or_else(|| ApiError::Collaborator("item insert returned no row".into()))
    }

    async fn items_for(&self, email: &str) -> Result<Vec<StoredItem>, ApiError> {
        let filter = format!("eq.{}", email);
        let response = self
            .client
            .get(self.table("items"))
            .header("apikey", &self.api_key)
            .query(&[("select", "*"), ("email", filter.as_str())])
            .send()
            .await?;
        let response = ensure_success(response, "items").await?;
        Ok(response.json().await?)
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<StoredItem>, ApiError> {
        let filter = format!("eq.{}", id);
        let response = self
            .client
            .get(self.table("items"))
            .header("apikey", &self.api_key)
            .query(&[("select", "*"), ("id", filter.as_str())])
            .send()
            .await?;
        let response = ensure_success(response, "items").await?;
        let mut rows: Vec<StoredItem> = response.json().await?;
        Ok(rows.pop())
    }

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "item_id": feedback.item_id,
            "rating": feedback.rating,
            "comments": feedback.comments,
            "user_email": feedback.user_email,
        });
        self.insert("feedback", &body).await.map(|_| ())
    }

    async fn insert_subscription(&self, sub: &SubscriptionRecord) -> Result<(), ApiError> {
        let body = serde_json::json!({ "email": sub.email, "tier": sub.tier });
        self.insert("subscriptions", &body).await.map(|_| ())
    }
}

/// Signup/login/token lookup against a GoTrue-style auth API.
pub struct RestAuth {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestAuth {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn session_from(&self, response: reqwest::Response) -> Result<Session, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(ApiError::Auth);
        }
        let response = ensure_success(response, "auth").await?;
        let body: Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let user_email = body
            .pointer("/user/email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if access_token.is_empty() {
            return Err(ApiError::Collaborator("auth response missing access token".into()));
        }
        Ok(Session {
            access_token,
            user_email,
        })
    }
}

#[async_trait]
impl AuthGateway for RestAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        self.session_from(response).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let response = self
            .client
            .post(format!(
                "{}/auth/v1/token?grant_type=password",
                self.base_url
            ))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        self.session_from(response).await
    }

    async fn user_email(&self, token: &str) -> Result<Option<String>, ApiError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let response = ensure_success(response, "auth").await?;
        let body: Value = response.json().await?;
        Ok(body
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Listing creation against the vendor marketplace APIs.
pub struct HttpMarketplace {
    client: reqwest::Client,
    ebay_app_id: Option<String>,
}

const EBAY_TRADING_URL: &str = "https://api.ebay.com/ws/api.dll";
const FACEBOOK_MARKETPLACE_URL: &str = "https://graph.facebook.com/me/marketplace";
const MERCARI_ITEMS_URL: &str = "https://api.mercari.jp/v1/items";

impl HttpMarketplace {
    pub fn new(client: reqwest::Client, ebay_app_id: Option<String>) -> Self {
        Self { client, ebay_app_id }
    }
}

#[async_trait]
impl MarketplaceClient for HttpMarketplace {
    async fn post_listing(
        &self,
        platform: Platform,
        item: &StoredItem,
        user_token: &str,
    ) -> Result<String, ApiError> {
        let response = match platform {
            Platform::Ebay => {
                let body = format!(
                    "<AddItemRequest><Item><Title>{}</Title></Item></AddItemRequest>",
                    xml_escape(&item.description)
                );
                self.client
                    .post(EBAY_TRADING_URL)
                    .header("X-EBAY-API-CALL-NAME", "AddItem")
                    .header(
                        "X-EBAY-API-APP-NAME",
                        self.ebay_app_id.as_deref().unwrap_or_default(),
                    )
                    .header("Content-Type", "text/xml")
                    .bearer_auth(user_token)
                    .body(body)
                    .send()
                    .await?
            }
            Platform::Facebook => {
                self.client
                    .post(FACEBOOK_MARKETPLACE_URL)
                    .bearer_auth(user_token)
                    .json(&serde_json::json!({ "title": item.description, "price": 100 }))
                    .send()
                    .await?
            }
            Platform::Mercari => {
                self.client
                    .post(MERCARI_ITEMS_URL)
                    .bearer_auth(user_token)
                    .json(&serde_json::json!({ "name": item.description, "price": 100 }))
                    .send()
                    .await?
            }
        };
        if response.status().is_success() {
            Ok(format!("Posted to {} successfully", platform.as_str()))
        } else {
            Err(ApiError::Collaborator(format!(
                "{} posting failed with {}",
                platform.as_str(),
                response.status()
            )))
        }
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
