//! RFID login client
//!
//! One JSON POST per attempt. The client never returns an error for a
//! failed attempt: transport, timeout and decoding problems are folded
//! into [`AuthOutcome::Failed`] so the session loop only has to show them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::device::CardId;
use crate::pin::Pin;
use crate::protocol::{AuthOutcome, LoginRequest, LoginResponse};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Anything that can check a card + PIN pair
#[async_trait]
pub trait Authenticator {
    async fn authenticate(&self, card: &CardId, pin: &Pin) -> AuthOutcome;
}

/// Authentication API client
pub struct ApiClient {
    client: Client,
    login_url: String,
}

impl ApiClient {
    /// Create a client posting to `login_url` with the given request timeout
    pub fn new(login_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            login_url: login_url.into(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, AuthError> {
        Self::new(config.login_url(), config.timeout())
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    async fn post_login(&self, card: &CardId, pin: &Pin) -> Result<LoginResponse, reqwest::Error> {
        let resp = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest {
                card_uid: card.as_str(),
                pin: pin.as_str(),
            })
            .send()
            .await?;

        tracing::debug!("Login endpoint answered HTTP {}", resp.status().as_u16());

        resp.json().await
    }
}

#[async_trait]
impl Authenticator for ApiClient {
    async fn authenticate(&self, card: &CardId, pin: &Pin) -> AuthOutcome {
        match self.post_login(card, pin).await {
            Ok(resp) => resp.into(),
            Err(e) => {
                tracing::warn!("Login request for card {} failed: {}", card, e);
                AuthOutcome::failed(network_error_message(&e))
            }
        }
    }
}

/// Short, screen-friendly description of a transport failure
fn network_error_message(err: &reqwest::Error) -> String {
    let detail = if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else if err.is_decode() {
        "invalid response".to_string()
    } else {
        err.to_string()
    };

    format!("Network error: {}", detail)
}
