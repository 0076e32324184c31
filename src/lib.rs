//! Core library for Flipscope.  This module wires together the shared
//! application state (cache, rate limiter, input guard, collaborator
//! clients), the HTTP router and the request handlers.  Subsystems live in
//! their own modules; everything request-facing converges here.

mod audit;
mod cache;
mod config;
mod enrich;
mod error;
mod guard;
mod limiter;
mod orchestrator;
mod providers;
mod store;

pub use audit::{ActionStats, AuditLog};
pub use cache::{cache_key, ResearchCache};
pub use config::{AppConfig, RotationConfig};
pub use enrich::{Enricher, HttpEnricher};
pub use error::ApiError;
pub use guard::{Guard, GuardRule, ThreatAssessment, ThreatTag};
pub use limiter::{RateDecision, SlidingWindow};
pub use orchestrator::{AnalysisReport, AnalysisTask, ReportFormat};
pub use providers::{dispatch, Provider, ProviderEndpoints};
pub use store::{
    AuthGateway, FeedbackRecord, HttpMarketplace, ItemRecord, ItemStore, MarketplaceClient,
    Platform, RestAuth, RestStore, Session, StoredItem, SubscriptionRecord, UnconfiguredStore,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::set_header::SetResponseHeaderLayer;

/// Request-latency histogram bucket upper bounds in ms.
const HIST_BUCKETS: [u64; 11] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000];

pub struct Metrics {
    pub requests_total: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub blocked_total: AtomicU64,
    pub cache_hits_total: AtomicU64,
    pub cache_misses_total: AtomicU64,
    pub collaborator_errors_total: AtomicU64,
    hist_counts: Vec<AtomicU64>,
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
    process_start_epoch: f64,
    process_start_instant: Instant,
}

impl Metrics {
    fn new() -> Self {
        let start = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            requests_total: AtomicU64::new(0),
            rate_limited_total: AtomicU64::new(0),
            blocked_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            cache_misses_total: AtomicU64::new(0),
            collaborator_errors_total: AtomicU64::new(0),
            hist_counts: HIST_BUCKETS.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
            process_start_epoch: start.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }

    pub fn cache_hit(&self) {
        self.cache_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, err: &ApiError) {
        match err {
            ApiError::RateLimited { .. } => {
                self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
            }
            ApiError::PolicyBlock(_) => {
                self.blocked_total.fetch_add(1, Ordering::Relaxed);
            }
            ApiError::Collaborator(_) => {
                self.collaborator_errors_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn observe_latency(&self, ms: u64) {
        self.hist_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        for (idx, ub) in HIST_BUCKETS.iter().enumerate() {
            if ms <= *ub {
                self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }
}

/// Shared application state.  Cache and rate-limiter maps are process-wide
/// and concurrency-safe; everything behind a trait object is a collaborator
/// the tests replace with stubs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<ResearchCache>,
    pub limiter: Arc<SlidingWindow>,
    pub guard: Arc<Guard>,
    pub enricher: Arc<dyn Enricher>,
    pub items: Arc<dyn ItemStore>,
    pub auth: Arc<dyn AuthGateway>,
    pub marketplace: Arc<dyn MarketplaceClient>,
    pub audit: Option<Arc<AuditLog>>,
    pub stats: Arc<ActionStats>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        enricher: Arc<dyn Enricher>,
        items: Arc<dyn ItemStore>,
        auth: Arc<dyn AuthGateway>,
        marketplace: Arc<dyn MarketplaceClient>,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        let cache = Arc::new(ResearchCache::new(config.cache_ttl()));
        Self {
            config: Arc::new(config),
            cache,
            limiter: Arc::new(SlidingWindow::new()),
            guard: Arc::new(Guard::new()),
            enricher,
            items,
            auth,
            marketplace,
            audit,
            stats: Arc::new(ActionStats::new()),
            metrics: Arc::new(Metrics::new()),
            http: reqwest::Client::new(),
        }
    }

    pub(crate) fn audit_record(&self, user: Option<&str>, action: &str, details: serde_json::Value) {
        self.stats.record(user, action);
        if let Some(log) = &self.audit {
            log.record(user, action, details);
        }
    }
}

/// Build production state from environment variables.
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    let client = reqwest::Client::new();

    let enricher: Arc<dyn Enricher> = Arc::new(HttpEnricher::new(
        client.clone(),
        config.providers.clone(),
        config.report_provider,
        config.report_model.clone(),
        config.ebay_token.clone(),
    ));

    let (items, auth): (Arc<dyn ItemStore>, Arc<dyn AuthGateway>) = match &config.store_url {
        Some(url) => (
            Arc::new(RestStore::new(
                client.clone(),
                url.clone(),
                config.store_key.clone(),
            )),
            Arc::new(RestAuth::new(
                client.clone(),
                url.clone(),
                config.store_key.clone(),
            )),
        ),
        None => {
            tracing::warn!("FLIPSCOPE_STORE_URL not set; storage and auth routes will fail");
            (Arc::new(UnconfiguredStore), Arc::new(UnconfiguredStore))
        }
    };

    let marketplace: Arc<dyn MarketplaceClient> = Arc::new(HttpMarketplace::new(
        client.clone(),
        config.ebay_app_id.clone(),
    ));

    let audit = match config.audit_log_file.as_deref() {
        Some(path) => match AuditLog::open(
            path,
            config.rotation.max_bytes,
            config.rotation.keep,
            config.rotation.compress,
        ) {
            Ok(log) => Some(Arc::new(log)),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "failed to open AUDIT_LOG_FILE; audit disabled");
                None
            }
        },
        None => None,
    };

    Ok(AppState::new(
        config,
        enricher,
        items,
        auth,
        marketplace,
        audit,
    ))
}

/// Build the axum router.  Security headers apply to every response; the
/// body limit only when configured.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route("/api/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/analytics", get(analytics_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/ai", post(ai_proxy_handler))
        .route("/api/auth/signup", post(signup_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/items", get(items_handler))
        .route("/api/post", post(post_listing_handler))
        .route("/api/feedback", post(feedback_handler))
        .route("/api/subscribe", post(subscribe_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

/// Caller identity for rate-limit and cache keys: first hop of
/// `x-forwarded-for`, falling back to a shared anonymous bucket.
fn caller_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Auth)?;
    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(ApiError::Auth);
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(ApiError::Auth);
    }
    Ok(token.to_string())
}

/// JSON extractor whose rejections carry the same error shape as every
/// other failure, instead of axum's plain-text bodies.
struct AppJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(ApiError::Validation(rejection.body_text())),
        }
    }
}

/// Liveness endpoint.  Never rate limited.
async fn health_handler(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cacheEntries": state.cache.len(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Multipart form submission: description, optional url/email/phone,
/// optional images, requested output format.
async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let task = match read_analysis_task(multipart).await {
        Ok(task) => task,
        Err(err) => return err.into_response(),
    };
    let caller = caller_key(&headers);
    let format = task.format;

    let start = Instant::now();
    match orchestrator::run(&state, &caller, &task).await {
        Ok(report) => {
            state
                .metrics
                .observe_latency(start.elapsed().as_millis() as u64);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, format.content_type())],
                report.render(format),
            )
                .into_response()
        }
        Err(err) => {
            state.metrics.record_error(&err);
            err.into_response()
        }
    }
}

async fn read_analysis_task(mut multipart: Multipart) -> Result<AnalysisTask, ApiError> {
    let mut task = AnalysisTask::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(format!("malformed multipart body: {}", e)))?;
        let Some(field) = field else { break };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "description" => task.description = read_text_field(field).await?,
            "url" => task.url = non_empty(read_text_field(field).await?),
            "email" => task.email = non_empty(read_text_field(field).await?),
            "phone" => task.phone = non_empty(read_text_field(field).await?),
            "format" => task.format = ReportFormat::parse_lenient(&read_text_field(field).await?),
            "images" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("unreadable image field: {}", e)))?;
                if !bytes.is_empty() {
                    task.images.push(bytes);
                }
            }
            other => {
                tracing::debug!(field = %other, "ignoring unknown form field");
            }
        }
    }
    Ok(task)
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable form field: {}", e)))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AiProxyRequest {
    provider: String,
    prompt: String,
    #[serde(default)]
    model: Option<String>,
}

/// JSON passthrough to a model provider; its own rate namespace, prompt
/// sanitised before dispatch.
async fn ai_proxy_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(request): AppJson<AiProxyRequest>,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let caller = caller_key(&headers);
    let decision = state.limiter.check(
        &format!("ai_{}", caller),
        state.config.ai_rate_limit,
        state.config.ai_rate_window(),
    );
    if !decision.allowed {
        let err = ApiError::RateLimited {
            retry_after_ms: decision.retry_after.as_millis() as u64,
        };
        state.metrics.record_error(&err);
        return err.into_response();
    }

    let result = async {
        let provider = Provider::parse(&request.provider)?;
        let prompt = state.guard.sanitize(&request.prompt);
        providers::dispatch(
            &state.http,
            &state.config.providers,
            provider,
            &prompt,
            request.model.as_deref(),
        )
        .await
    }
    .await;

    match result {
        Ok(answer) => (StatusCode::OK, Json(serde_json::json!({ "response": answer })))
            .into_response(),
        Err(err) => {
            state.metrics.record_error(&err);
            err.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

fn validate_credentials(creds: &Credentials) -> Result<(), ApiError> {
    if !creds.email.contains('@') {
        return Err(ApiError::Validation("email is malformed".into()));
    }
    if creds.password.trim().is_empty() {
        return Err(ApiError::Validation("password must not be empty".into()));
    }
    Ok(())
}

async fn signup_handler(
    State(state): State<AppState>,
    AppJson(creds): AppJson<Credentials>,
) -> Result<Json<Session>, ApiError> {
    validate_credentials(&creds)?;
    let session = state.auth.sign_up(&creds.email, &creds.password).await?;
    state.audit_record(Some(&creds.email), "signup", serde_json::json!({}));
    Ok(Json(session))
}

async fn login_handler(
    State(state): State<AppState>,
    AppJson(creds): AppJson<Credentials>,
) -> Result<Json<Session>, ApiError> {
    validate_credentials(&creds)?;
    let session = state.auth.sign_in(&creds.email, &creds.password).await?;
    state.audit_record(Some(&creds.email), "signin", serde_json::json!({}));
    Ok(Json(session))
}

async fn items_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<StoredItem>>, ApiError> {
    let token = extract_bearer_token(&headers)?;
    let email = state.auth.user_email(&token).await?.ok_or(ApiError::Auth)?;
    let items = state.items.items_for(&email).await?;
    state.audit_record(Some(&email), "view_items", serde_json::json!({}));
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRequest {
    platform: String,
    item_id: String,
    user_token: String,
}

async fn post_listing_handler(
    State(state): State<AppState>,
    AppJson(request): AppJson<PostRequest>,
) -> Result<Response, ApiError> {
    if request.item_id.trim().is_empty() || request.user_token.trim().is_empty() {
        return Err(ApiError::Validation(
            "itemId and userToken are required".into(),
        ));
    }
    let platform = Platform::parse(&request.platform)?;
    let item = state
        .items
        .fetch_item(&request.item_id)
        .await?
        .ok_or_else(|| ApiError::Validation(format!("unknown itemId '{}'", request.item_id)))?;
    let outcome = state
        .marketplace
        .post_listing(platform, &item, &request.user_token)
        .await?;
    state.audit_record(
        item.email.as_deref(),
        &format!("posted_{}", platform.as_str()),
        serde_json::json!({ "itemId": item.id }),
    );
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        outcome,
    )
        .into_response())
}

async fn feedback_handler(
    State(state): State<AppState>,
    AppJson(feedback): AppJson<FeedbackRecord>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if feedback.item_id.trim().is_empty() {
        return Err(ApiError::Validation("itemId is required".into()));
    }
    if !(1..=5).contains(&feedback.rating) {
        return Err(ApiError::Validation("rating must be between 1 and 5".into()));
    }
    state.items.insert_feedback(&feedback).await?;
    state.audit_record(
        feedback.user_email.as_deref(),
        "feedback",
        serde_json::json!({ "itemId": feedback.item_id, "rating": feedback.rating }),
    );
    Ok(Json(serde_json::json!({
        "status": "recorded",
        "itemId": feedback.item_id,
    })))
}

async fn subscribe_handler(
    State(state): State<AppState>,
    AppJson(subscription): AppJson<SubscriptionRecord>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !subscription.email.contains('@') {
        return Err(ApiError::Validation("email is malformed".into()));
    }
    if subscription.tier.trim().is_empty() {
        return Err(ApiError::Validation("tier is required".into()));
    }
    state.items.insert_subscription(&subscription).await?;
    state.audit_record(
        Some(&subscription.email),
        "subscribe",
        serde_json::json!({ "tier": subscription.tier }),
    );
    Ok(Json(serde_json::json!({
        "email": subscription.email,
        "tier": subscription.tier,
        "status": "subscribed",
    })))
}

/// Per-action counts across the audit trail plus the number of distinct
/// users seen, aggregated in memory since startup.
async fn analytics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (actions, users) = state.stats.snapshot();
    Json(serde_json::json!({
        "actions": actions,
        "users": users,
    }))
}

/// Prometheus-style metrics exposition.  Text format with simple counters
/// and one latency histogram.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    use std::fmt::Write as _;
    let m = &state.metrics;
    let mut buf = String::new();

    let counters: [(&str, &str, u64); 6] = [
        (
            "flipscope_requests_total",
            "Total analyze/ai requests processed",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "flipscope_rate_limited_total",
            "Requests denied by the sliding-window limiter",
            m.rate_limited_total.load(Ordering::Relaxed),
        ),
        (
            "flipscope_blocked_total",
            "Requests vetoed by the threat assessor",
            m.blocked_total.load(Ordering::Relaxed),
        ),
        (
            "flipscope_cache_hits_total",
            "Analyze requests served from the research cache",
            m.cache_hits_total.load(Ordering::Relaxed),
        ),
        (
            "flipscope_cache_misses_total",
            "Analyze requests that required enrichment",
            m.cache_misses_total.load(Ordering::Relaxed),
        ),
        (
            "flipscope_collaborator_errors_total",
            "Downstream API or storage failures",
            m.collaborator_errors_total.load(Ordering::Relaxed),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }

    writeln!(
        &mut buf,
        "# HELP flipscope_analyze_latency_ms Analyze latency histogram milliseconds"
    )
    .ok();
    writeln!(&mut buf, "# TYPE flipscope_analyze_latency_ms histogram").ok();
    let mut cumulative = 0u64;
    for (idx, ub) in HIST_BUCKETS.iter().enumerate() {
        cumulative += m.hist_counts[idx].load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "flipscope_analyze_latency_ms_bucket{{le=\"{}\"}} {}",
            ub, cumulative
        )
        .ok();
    }
    let total = m.hist_count.load(Ordering::Relaxed);
    writeln!(
        &mut buf,
        "flipscope_analyze_latency_ms_bucket{{le=\"+Inf\"}} {}",
        total
    )
    .ok();
    writeln!(
        &mut buf,
        "flipscope_analyze_latency_ms_sum {}",
        m.hist_sum_ms.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(&mut buf, "flipscope_analyze_latency_ms_count {}", total).ok();

    writeln!(
        &mut buf,
        "# HELP flipscope_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE flipscope_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "flipscope_process_start_time_seconds {}",
        m.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP flipscope_process_uptime_seconds Process uptime seconds\n# TYPE flipscope_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "flipscope_process_uptime_seconds {}",
        m.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
