//! Outbound REST calls. Every request carries the session's auth headers, and
//! a request identical to one still in flight (same url, same serialized body)
//! cancels the earlier one before it is sent.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::Serialize;
use serde_json::Value;
use shared::{error::ErrorCode, protocol::ApiResponse};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::{join_url, ClientSettings},
    session::SessionStore,
};

pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
pub const AUTH_TYPE_HEADER: &str = "X-Auth-Type";
pub const AUTH_TYPE_APP: &str = "app";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("session invalidated: {0}")]
    SessionInvalid(String),
    #[error("request failed with status {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

/// Result of a request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Completed(T),
    /// A newer identical request replaced this one before it finished.
    Superseded,
}

impl<T> Delivery<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Delivery<U> {
        match self {
            Delivery::Completed(value) => Delivery::Completed(f(value)),
            Delivery::Superseded => Delivery::Superseded,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Delivery::Completed(value) => Some(value),
            Delivery::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Delivery::Superseded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub method: Method,
    pub data: Value,
}

impl RequestConfig {
    pub fn post(url: impl Into<String>, data: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            url: url.into(),
            method: Method::POST,
            data: serde_json::to_value(data)?,
        })
    }

    /// De-duplication key: `url + "&" + serialized body`.
    pub fn signature(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}&{}", self.url, serde_json::to_string(&self.data)?))
    }
}

struct PendingRequest {
    id: u64,
    cancel: oneshot::Sender<()>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingRequest>>>;

fn forget(pending: &mut HashMap<String, PendingRequest>, key: &str, id: u64) {
    if pending.get(key).is_some_and(|entry| entry.id == id) {
        pending.remove(key);
    }
}

/// Drops the in-flight record when `send` finishes, is superseded, or is
/// itself dropped by the caller.
struct PendingGuard {
    pending: PendingMap,
    key: String,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            forget(&mut pending, &self.key, self.id);
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pending = Arc::clone(&self.pending);
        let key = std::mem::take(&mut self.key);
        let id = self.id;
        runtime.spawn(async move {
            forget(&mut *pending.lock().await, &key, id);
        });
    }
}

pub struct RequestTransport {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl RequestTransport {
    pub fn new(
        settings: &ClientSettings,
        session: Arc<SessionStore>,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self::with_client(http, settings.api_base_url(), session))
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            session,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn send(
        &self,
        config: RequestConfig,
    ) -> Result<Delivery<ApiResponse>, TransportError> {
        let key = config.signature()?;
        let request = self.build_request(&config)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if let Some(previous) = pending.insert(
                key.clone(),
                PendingRequest {
                    id,
                    cancel: cancel_tx,
                },
            ) {
                let _ = previous.cancel.send(());
            }
        }
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
            id,
        };

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Http {
                    status: status.as_u16(),
                });
            }
            Ok(response.json::<ApiResponse>().await?)
        };

        let outcome = tokio::select! {
            _ = cancel_rx => None,
            result = exchange => Some(result),
        };

        let Some(result) = outcome else {
            debug!(url = %config.url, request_id = id, "transport: request superseded");
            return Ok(Delivery::Superseded);
        };

        unwrap_envelope(&config.url, result?)
    }

    fn build_request(
        &self,
        config: &RequestConfig,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = Url::parse(&join_url(&self.base_url, &config.url))?;
        let mut builder = self
            .http
            .request(config.method.clone(), url)
            .json(&config.data);

        if let Some(token) = self.session.user_token() {
            builder = builder
                .header(AUTH_TOKEN_HEADER, token)
                .header(AUTH_TYPE_HEADER, AUTH_TYPE_APP)
                .header(CONTENT_TYPE, "application/json");
        }

        Ok(builder)
    }
}

fn unwrap_envelope(
    url: &str,
    payload: ApiResponse,
) -> Result<Delivery<ApiResponse>, TransportError> {
    match payload.error_code() {
        Some(ErrorCode::SessionInvalid) => {
            warn!(url, message = %payload.message, "transport: session invalidated by server");
            Err(TransportError::SessionInvalid(payload.message))
        }
        Some(ErrorCode::Business) | None => Ok(Delivery::Completed(payload)),
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
