use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flipscope::{
    ApiError, AppConfig, AppState, AuditLog, AuthGateway, Enricher, FeedbackRecord, ItemRecord,
    ItemStore, MarketplaceClient, Platform, Session, StoredItem, SubscriptionRecord,
};

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Hand-rolled multipart encoding for request tests.  Returns the content
/// type header value and the body.
#[allow(dead_code)]
pub fn multipart_body(fields: &[(&str, &str)]) -> (String, String) {
    let boundary = "flipscope-test-boundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            boundary, name, value
        ));
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    (
        format!("multipart/form-data; boundary={}", boundary),
        body,
    )
}

/// Counting enricher returning canned material, optionally failing.
#[allow(dead_code)]
pub struct StubEnricher {
    pub report_calls: AtomicUsize,
    pub fail: bool,
}

#[allow(dead_code)]
impl StubEnricher {
    pub fn new() -> Self {
        Self {
            report_calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            report_calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl Enricher for StubEnricher {
    async fn describe_image(&self, image: &[u8]) -> Result<String, ApiError> {
        Ok(format!("stub image note ({} bytes)", image.len()))
    }

    async fn research(&self, _description: &str, _url: Option<&str>) -> Result<String, ApiError> {
        Ok("stub research: 3 similar items".into())
    }

    async fn generate_report(
        &self,
        description: &str,
        _url: Option<&str>,
        _image_notes: &[String],
        _research: &str,
    ) -> Result<String, ApiError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ApiError::Collaborator("stub enricher set to fail".into()));
        }
        Ok(format!("stub report for {}", description))
    }
}

/// In-memory item store.
#[allow(dead_code)]
pub struct MemoryStore {
    pub items: Mutex<Vec<StoredItem>>,
    pub feedback: Mutex<Vec<FeedbackRecord>>,
    pub subscriptions: Mutex<Vec<SubscriptionRecord>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            feedback: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_item(&self, item: &ItemRecord) -> Result<StoredItem, ApiError> {
        let mut items = self.items.lock().unwrap();
        let stored = StoredItem {
            id: format!("item-{}", items.len() + 1),
            description: item.description.clone(),
            url: item.url.clone(),
            email: item.email.clone(),
            report: item.report.clone(),
        };
        items.push(stored.clone());
        Ok(stored)
    }

    async fn items_for(&self, email: &str) -> Result<Vec<StoredItem>, ApiError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn fetch_item(&self, id: &str) -> Result<Option<StoredItem>, ApiError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.id == id)
            .cloned())
    }

    async fn insert_feedback(&self, feedback: &FeedbackRecord) -> Result<(), ApiError> {
        self.feedback.lock().unwrap().push(feedback.clone());
        Ok(())
    }

    async fn insert_subscription(&self, sub: &SubscriptionRecord) -> Result<(), ApiError> {
        self.subscriptions.lock().unwrap().push(sub.clone());
        Ok(())
    }
}

/// Deterministic auth gateway: any email signs up, one shared password
/// signs in, tokens are `tok_<email>`.
#[allow(dead_code)]
pub struct StaticAuth {
    pub password: String,
}

#[allow(dead_code)]
impl StaticAuth {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
        }
    }
}

#[async_trait]
impl AuthGateway for StaticAuth {
    async fn sign_up(&self, email: &str, _password: &str) -> Result<Session, ApiError> {
        Ok(Session {
            access_token: format!("tok_{}", email),
            user_email: email.to_string(),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        if password != self.password {
            return Err(ApiError::Auth);
        }
        Ok(Session {
            access_token: format!("tok_{}", email),
            user_email: email.to_string(),
        })
    }

    async fn user_email(&self, token: &str) -> Result<Option<String>, ApiError> {
        Ok(token.strip_prefix("tok_").map(str::to_string))
    }
}

#[allow(dead_code)]
pub struct StubMarketplace;

#[async_trait]
impl MarketplaceClient for StubMarketplace {
    async fn post_listing(
        &self,
        platform: Platform,
        _item: &StoredItem,
        _user_token: &str,
    ) -> Result<String, ApiError> {
        Ok(format!("Posted to {} successfully", platform.as_str()))
    }
}

/// Build state wired to in-process stubs.  Returns the enricher and store
/// handles so tests can count calls and inspect writes.
#[allow(dead_code)]
pub fn stub_state(config: AppConfig) -> (AppState, Arc<StubEnricher>, Arc<MemoryStore>) {
    let enricher = Arc::new(StubEnricher::new());
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        config,
        enricher.clone(),
        store.clone(),
        Arc::new(StaticAuth::new("hunter2!")),
        Arc::new(StubMarketplace),
        None,
    );
    (state, enricher, store)
}

/// Same as `stub_state` but recording every audited action to `audit`.
#[allow(dead_code)]
pub fn audited_state(config: AppConfig, audit: Arc<AuditLog>) -> AppState {
    AppState::new(
        config,
        Arc::new(StubEnricher::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(StaticAuth::new("hunter2!")),
        Arc::new(StubMarketplace),
        Some(audit),
    )
}

/// Same as `stub_state` but with a report generator that always fails.
#[allow(dead_code)]
pub fn failing_state(config: AppConfig) -> AppState {
    AppState::new(
        config,
        Arc::new(StubEnricher::failing()),
        Arc::new(MemoryStore::new()),
        Arc::new(StaticAuth::new("hunter2!")),
        Arc::new(StubMarketplace),
        None,
    )
}
