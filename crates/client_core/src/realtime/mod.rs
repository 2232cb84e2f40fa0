//! Realtime auth channel: magic-link sign-in, link verification and the
//! permissions token, all over the backend's Phoenix socket.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::info;
use uuid::Uuid;

pub mod phoenix;

use phoenix::PhoenixSocket;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("realtime auth channel is unavailable")]
    Unavailable,
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),
    #[error("failed to connect socket: {0}")]
    Connect(String),
    #[error("join rejected for topic {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },
    #[error("push {event} rejected: {reason}")]
    PushRejected { event: String, reason: String },
    #[error("timed out waiting for reply to {event}")]
    Timeout { event: String },
    #[error("socket closed")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Query parameters carried by the verification link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "auth_topic")]
    pub topic: String,
    #[serde(rename = "auth_token")]
    pub token: String,
    #[serde(rename = "auth_payload")]
    pub payload: String,
}

/// A sign-in waiting for the user to follow the emailed link. Resolves with
/// the credentials token. Dropping it stops listening.
pub struct PendingAuthentication {
    outcome: oneshot::Receiver<Result<String, RealtimeError>>,
    task: Option<JoinHandle<()>>,
}

impl PendingAuthentication {
    pub fn new(
        outcome: oneshot::Receiver<Result<String, RealtimeError>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { outcome, task }
    }

    pub async fn complete(mut self) -> Result<String, RealtimeError> {
        match (&mut self.outcome).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RealtimeError::Closed),
        }
    }
}

impl Drop for PendingAuthentication {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait RealtimeAuth: Send + Sync {
    async fn start_authentication(
        &self,
        email: &str,
    ) -> Result<PendingAuthentication, RealtimeError>;
    async fn verify_authentication(&self, params: &VerifyParams) -> Result<(), RealtimeError>;
    async fn refresh_perms_token(&self, credentials_token: &str) -> Result<String, RealtimeError>;
}

pub struct MissingRealtimeAuth;

#[async_trait]
impl RealtimeAuth for MissingRealtimeAuth {
    async fn start_authentication(
        &self,
        _email: &str,
    ) -> Result<PendingAuthentication, RealtimeError> {
        Err(RealtimeError::Unavailable)
    }

    async fn verify_authentication(&self, _params: &VerifyParams) -> Result<(), RealtimeError> {
        Err(RealtimeError::Unavailable)
    }

    async fn refresh_perms_token(
        &self,
        _credentials_token: &str,
    ) -> Result<String, RealtimeError> {
        Err(RealtimeError::Unavailable)
    }
}

/// Auth channel backed by the backend's Phoenix socket. Each operation opens
/// its own socket.
pub struct ReticulumAuth {
    socket_url: String,
    origin: String,
}

impl ReticulumAuth {
    pub fn new(socket_url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            origin: origin.into(),
        }
    }
}

#[async_trait]
impl RealtimeAuth for ReticulumAuth {
    async fn start_authentication(
        &self,
        email: &str,
    ) -> Result<PendingAuthentication, RealtimeError> {
        let socket = PhoenixSocket::connect(&self.socket_url).await?;
        let topic = format!("auth:{}", Uuid::new_v4());
        let mut channel = socket.join(&topic, json!({})).await?;
        channel.cast(
            "auth_request",
            json!({"email": email, "origin": self.origin}),
        )?;
        info!(%topic, "realtime: auth request sent");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let outcome = channel
                .next_event("auth_credentials")
                .await
                .and_then(|payload| credentials_token(&payload));
            let _ = tx.send(outcome);
            channel.socket().close().await;
        });

        Ok(PendingAuthentication::new(rx, Some(task)))
    }

    async fn verify_authentication(&self, params: &VerifyParams) -> Result<(), RealtimeError> {
        let socket = PhoenixSocket::connect(&self.socket_url).await?;
        let channel = socket.join(&params.topic, json!({})).await?;
        channel.cast(
            "auth_verified",
            json!({"token": params.token, "payload": params.payload}),
        )?;
        info!(topic = %params.topic, "realtime: auth verified");
        socket.close().await;
        Ok(())
    }

    async fn refresh_perms_token(&self, credentials_token: &str) -> Result<String, RealtimeError> {
        let socket = PhoenixSocket::connect(&self.socket_url).await?;
        let channel = socket
            .join("ret", json!({"hub_id": "index", "token": credentials_token}))
            .await?;
        let response = channel.push("refresh_perms_token", json!({})).await?;
        channel.leave().await;
        socket.close().await;

        response["perms_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RealtimeError::Protocol("reply carries no perms_token".into()))
    }
}

fn credentials_token(payload: &Value) -> Result<String, RealtimeError> {
    payload["credentials"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RealtimeError::Protocol("auth_credentials carries no credentials".into()))
}

#[cfg(test)]
#[path = "../tests/realtime_tests.rs"]
mod tests;
