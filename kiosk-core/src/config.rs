//! Configuration management for the kiosk terminal
//!
//! The config is a JSON file read once at startup. It is looked up in:
//! - `./config.json` (next to the binary's working directory)
//! - Linux: ~/.config/bankly-rfid/config.json
//!
//! Only `lcd` and `api` are required; every other section has defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid bus address {0:?} (expected hex, e.g. \"0x27\")")]
    InvalidAddress(String),

    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No config file found (tried {0})")]
    NotFound(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Character LCD on the I2C bus
    pub lcd: LcdConfig,

    /// Authentication API
    pub api: ApiConfig,

    /// MPR121 touch keypad
    #[serde(default)]
    pub keypad: KeypadConfig,

    /// MFRC522 card reader
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Post-login browser session
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Dwell, debounce and polling intervals
    #[serde(default)]
    pub timing: TimingConfig,
}

/// LCD (PCF8574 backpack) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcdConfig {
    /// I2C address as a hex string ("0x27")
    pub address: String,

    /// I2C bus number (/dev/i2c-<port>)
    pub port: u8,

    /// Display columns
    pub cols: usize,

    /// Display rows
    pub rows: usize,
}

/// Authentication API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend ("http://192.0.2.5:5000")
    pub base_url: String,

    /// Path of the RFID login endpoint, appended to `base_url`
    pub rfid_login_endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

/// Touch keypad configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypadConfig {
    #[serde(default = "default_keypad_address")]
    pub address: String,

    #[serde(default = "default_i2c_port")]
    pub port: u8,
}

/// Card reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// SPI bus index (0 = /dev/spidev0.*)
    #[serde(default)]
    pub spi_bus: u8,

    /// Chip select line
    #[serde(default)]
    pub slave_select: u8,

    /// SPI clock in Hz
    #[serde(default = "default_spi_clock")]
    pub clock_hz: u32,

    /// BCM GPIO wired to the reader's RST pin, if any
    #[serde(default = "default_reset_pin")]
    pub reset_pin: Option<u8>,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Page opened after a granted login; `token=` is appended
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Kiosk browser binary
    #[serde(default = "default_browser_command")]
    pub command: String,

    /// Arguments passed before the URL
    #[serde(default = "default_browser_args")]
    pub args: Vec<String>,

    /// Generic opener used when `command` is not installed
    #[serde(default = "default_fallback_command")]
    pub fallback: String,
}

/// Timing configuration, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_card_dwell")]
    pub card_dwell_ms: u64,

    #[serde(default = "default_result_dwell")]
    pub result_dwell_ms: u64,

    #[serde(default = "default_error_pause")]
    pub error_pause_ms: u64,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn default_api_timeout() -> u64 {
    crate::DEFAULT_API_TIMEOUT_SECS
}
fn default_keypad_address() -> String {
    "0x5A".to_string()
}
fn default_i2c_port() -> u8 {
    1
}
fn default_spi_clock() -> u32 {
    1_000_000
}
fn default_reset_pin() -> Option<u8> {
    Some(25)
}
fn default_redirect_url() -> String {
    crate::DEFAULT_REDIRECT_URL.to_string()
}
fn default_browser_command() -> String {
    "chromium-browser".to_string()
}
fn default_browser_args() -> Vec<String> {
    vec!["--kiosk".to_string()]
}
fn default_fallback_command() -> String {
    "xdg-open".to_string()
}
fn default_card_dwell() -> u64 {
    1000
}
fn default_result_dwell() -> u64 {
    3000
}
fn default_error_pause() -> u64 {
    2000
}
fn default_debounce() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    100
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self {
            address: default_keypad_address(),
            port: default_i2c_port(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            slave_select: 0,
            clock_hz: default_spi_clock(),
            reset_pin: default_reset_pin(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            redirect_url: default_redirect_url(),
            command: default_browser_command(),
            args: default_browser_args(),
            fallback: default_fallback_command(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            card_dwell_ms: default_card_dwell(),
            result_dwell_ms: default_result_dwell(),
            error_pause_ms: default_error_pause(),
            debounce_ms: default_debounce(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl LcdConfig {
    /// 7-bit I2C address parsed from the hex string
    pub fn i2c_address(&self) -> Result<u16, ConfigError> {
        parse_hex_address(&self.address)
    }
}

impl KeypadConfig {
    pub fn i2c_address(&self) -> Result<u16, ConfigError> {
        parse_hex_address(&self.address)
    }
}

impl ApiConfig {
    /// Full login URL: base URL and endpoint joined verbatim
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.rfid_login_endpoint)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Config file name looked up in each candidate directory
    pub const FILE_NAME: &'static str = "config.json";

    /// Get config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bankly-rfid"))
    }

    /// Candidate config paths, in lookup order
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(Self::FILE_NAME)];
        if let Some(dir) = Self::config_dir() {
            paths.push(dir.join(Self::FILE_NAME));
        }
        paths
    }

    /// Load config from the first candidate path that exists
    pub fn load() -> Result<Self, ConfigError> {
        let candidates = Self::candidate_paths();

        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from(path),
            None => Err(ConfigError::NotFound(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse config from a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }
}

/// Parse "0x27", "0X27" or "27" as a hex bus address
fn parse_hex_address(value: &str) -> Result<u16, ConfigError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    u16::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidAddress(value.to_string()))
}
