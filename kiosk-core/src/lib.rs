//! kiosk-core: Shared library for the RFID + PIN kiosk terminal
//!
//! This crate provides:
//! - JSON configuration loading
//! - Authentication API client and wire types
//! - PIN entry buffer and the terminal state machine
//! - Device traits for the card reader, keypad and display
//! - The terminal session loop that sequences them

pub mod auth;
pub mod config;
pub mod device;
pub mod display;
pub mod launcher;
pub mod pin;
pub mod protocol;
pub mod session;
pub mod state;

pub use auth::{ApiClient, Authenticator};
pub use config::Config;
pub use device::{CardId, CardReader, DeviceError, Keypad};
pub use display::Display;
pub use launcher::{BrowserLauncher, Launcher};
pub use pin::{Key, Pin, PinBuffer};
pub use protocol::AuthOutcome;
pub use session::{SessionError, Terminal, TerminalSettings, Timings};
pub use state::TerminalState;

/// Number of digits in a card PIN
pub const PIN_LENGTH: usize = 4;

/// Default authentication request timeout in seconds
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 10;

/// Default page the browser is pointed at after a granted login
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:3000/auth/rfid-redirect";
