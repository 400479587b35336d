//! Remote backend interface and implementations.
//!
//! The sync layer treats every backend failure as either retryable (leave
//! the work queued, try again next cycle) or permanent (drop the action and
//! report it). [`HttpBackend`] talks to a real deployment over HTTP;
//! [`InMemoryBackend`] is a faithful little server for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use wareflow_core::DomainError;
use wareflow_domain::{Movement, Mutation, Product};

/// Backend failure taxonomy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The service could not be reached at all.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The service answered but refused transiently (5xx, throttling).
    #[error("backend rejected (retryable): {0}")]
    Transient(String),

    /// The service rejected the request for good (validation failure,
    /// missing referent). Retrying cannot succeed.
    #[error("backend rejected (permanent): {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn retryable(&self) -> bool {
        !matches!(self, RemoteError::Permanent(_))
    }
}

/// Request/response surface of the authoritative backend.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError>;
    async fn fetch_movements(&self) -> Result<Vec<Movement>, RemoteError>;
    async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError>;

    /// Cheap reachability probe (health endpoint or equivalent).
    async fn check_connectivity(&self) -> bool;
}

/// HTTP client for a deployed backend.
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::new(base_url)
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let resp = req.send().await.map_err(classify_send_error)?;
        if !resp.status().is_success() {
            return Err(classify_status(resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|err| RemoteError::Permanent(format!("malformed response body: {err}")))
    }

    async fn send_expect_ok(&self, req: reqwest::RequestBuilder) -> Result<(), RemoteError> {
        let resp = req.send().await.map_err(classify_send_error)?;
        if !resp.status().is_success() {
            return Err(classify_status(resp).await);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError> {
        self.send_json(self.request(reqwest::Method::GET, "/products"))
            .await
    }

    async fn fetch_movements(&self) -> Result<Vec<Movement>, RemoteError> {
        self.send_json(self.request(reqwest::Method::GET, "/movements"))
            .await
    }

    async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        let req = match mutation {
            Mutation::CreateProduct { product } => self
                .request(reqwest::Method::POST, "/products")
                .json(product),
            Mutation::UpdateProduct { id, .. } => self
                .request(reqwest::Method::PATCH, &format!("/products/{id}"))
                .json(mutation),
            Mutation::DeleteProduct { id, .. } => {
                self.request(reqwest::Method::DELETE, &format!("/products/{id}"))
            }
            Mutation::CreateMovement { movement } => self
                .request(reqwest::Method::POST, "/movements")
                .json(movement),
        };
        self.send_expect_ok(req).await
    }

    async fn check_connectivity(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

fn classify_send_error(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::Unreachable(err.to_string())
    } else {
        RemoteError::Transient(err.to_string())
    }
}

async fn classify_status(resp: reqwest::Response) -> RemoteError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{status}: {body}");

    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Permanent(message)
    }
}

#[derive(Debug, Default)]
struct ServerState {
    products: Vec<Product>,
    movements: Vec<Movement>,
}

/// In-memory backend with failure injection.
///
/// Applies mutations with the same merge semantics as the client, so a
/// drained queue must land the server in exactly the state direct online
/// writes would have produced.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<ServerState>,
    /// Fail the next N fetch calls with `Unreachable`.
    fail_fetches: AtomicU32,
    /// Scripted failures returned (in order) by upcoming `apply` calls.
    scripted_apply_errors: Mutex<VecDeque<RemoteError>>,
    /// Hard-offline switch: every call fails, connectivity probes report false.
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_products(&self, products: Vec<Product>) {
        self.state.lock().await.products = products;
    }

    pub async fn seed_movements(&self, movements: Vec<Movement>) {
        self.state.lock().await.movements = movements;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.fail_fetches.store(count, Ordering::Relaxed);
    }

    pub async fn script_apply_error(&self, err: RemoteError) {
        self.scripted_apply_errors.lock().await.push_back(err);
    }

    /// Server-side product state, for assertions.
    pub async fn products(&self) -> Vec<Product> {
        self.state.lock().await.products.clone()
    }

    /// Server-side movement state, for assertions.
    pub async fn movements(&self) -> Vec<Movement> {
        self.state.lock().await.movements.clone()
    }

    fn gate_offline(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(RemoteError::Unreachable("backend offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn gate_fetch_failure(&self) -> Result<(), RemoteError> {
        // Decrement-if-positive; races are irrelevant for test scripting.
        let remaining = self.fail_fetches.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_fetches.store(remaining - 1, Ordering::Relaxed);
            return Err(RemoteError::Unreachable(
                "injected fetch failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for InMemoryBackend {
    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError> {
        self.gate_offline()?;
        self.gate_fetch_failure()?;
        Ok(self.state.lock().await.products.clone())
    }

    async fn fetch_movements(&self) -> Result<Vec<Movement>, RemoteError> {
        self.gate_offline()?;
        self.gate_fetch_failure()?;
        Ok(self.state.lock().await.movements.clone())
    }

    async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        self.gate_offline()?;
        if let Some(err) = self.scripted_apply_errors.lock().await.pop_front() {
            return Err(err);
        }

        let mut state = self.state.lock().await;
        let ServerState {
            products,
            movements,
        } = &mut *state;
        mutation.apply_to(products, movements).map_err(|err| match err {
            DomainError::NotFound => {
                RemoteError::Permanent("referenced record no longer exists".to_string())
            }
            other => RemoteError::Permanent(other.to_string()),
        })
    }

    async fn check_connectivity(&self) -> bool {
        !self.offline.load(Ordering::Relaxed)
    }
}
