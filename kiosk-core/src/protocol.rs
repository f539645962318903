//! Wire types for the RFID login endpoint
//!
//! Request: `{"card_uid": "...", "pin": "...."}`
//!
//! Response: `{"success": true, "data": {"token": "..."}}` or
//! `{"success": false, "error": "..."}`. The body is decoded whatever the
//! HTTP status; shapes outside these two fold into a failure.

use serde::{Deserialize, Serialize};

/// Error text shown when the backend refuses without saying why
pub const GENERIC_ERROR: &str = "Erreur";

/// Login request body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub card_uid: &'a str,
    pub pin: &'a str,
}

/// Login response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<LoginData>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload of a successful login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub token: Option<String>,
}

/// Result of one authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Backend accepted the card and PIN
    Granted { token: String },
    /// Refused, or the request never produced a usable answer
    Failed { error: String },
}

impl AuthOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

impl From<LoginResponse> for AuthOutcome {
    fn from(resp: LoginResponse) -> Self {
        if resp.success {
            match resp.data.and_then(|d| d.token) {
                Some(token) => AuthOutcome::Granted { token },
                None => AuthOutcome::failed("Invalid response"),
            }
        } else {
            AuthOutcome::failed(resp.error.unwrap_or_else(|| GENERIC_ERROR.to_string()))
        }
    }
}
