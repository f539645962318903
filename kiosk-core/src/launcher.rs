//! Post-login browser session
//!
//! Opens the redirect page in a full-screen browser and waits for it to
//! close, so the kiosk screen belongs to the browser for the whole user
//! session. Launch failures are logged and otherwise ignored.

use std::io::ErrorKind;

use async_trait::async_trait;
use reqwest::Url;
use tokio::process::Command;

use crate::config::{BrowserConfig, ConfigError};

/// Something that can show a URL to the user
#[async_trait]
pub trait Launcher {
    async fn launch(&mut self, url: &str);
}

/// Redirect page URL carrying the session token
pub fn redirect_url(base: &Url, token: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}

/// Parse the configured redirect page
pub fn parse_redirect_base(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        url: value.to_string(),
        reason: e.to_string(),
    })
}

/// Kiosk browser with a generic opener as fallback
pub struct BrowserLauncher {
    command: String,
    args: Vec<String>,
    fallback: String,
}

impl BrowserLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>, fallback: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args,
            fallback: fallback.into(),
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(&config.command, config.args.clone(), &config.fallback)
    }
}

#[async_trait]
impl Launcher for BrowserLauncher {
    async fn launch(&mut self, url: &str) {
        let primary = Command::new(&self.command).args(&self.args).arg(url).status().await;

        match primary {
            Ok(status) => {
                tracing::info!("{} exited with {}", self.command, status);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("{} not installed, falling back to {}", self.command, self.fallback);

                match Command::new(&self.fallback).arg(url).status().await {
                    Ok(status) => tracing::info!("{} exited with {}", self.fallback, status),
                    Err(e) => tracing::error!("Failed to run {}: {}", self.fallback, e),
                }
            }
            Err(e) => {
                tracing::error!("Failed to run {}: {}", self.command, e);
            }
        }
    }
}
