//! Peripheral traits
//!
//! The session loop only talks to hardware through these traits. The
//! Raspberry Pi drivers live in `kiosk-terminal`; tests use scripted
//! stand-ins.

use std::fmt;

use thiserror::Error;

use crate::pin::Key;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// SPI/I2C/GPIO transfer failed
    #[error("bus error: {0}")]
    Bus(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The chip answered, but not the way the driver expects
    #[error("{0}")]
    Protocol(String),
}

impl DeviceError {
    pub fn bus<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Bus(Box::new(err))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Card identifier as reported by the reader. Opaque to the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardId(String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RFID card reader
pub trait CardReader {
    /// Check the antenna once. `Ok(None)` when no new card is present.
    fn poll_card(&mut self) -> Result<Option<CardId>, DeviceError>;
}

/// Touch keypad
pub trait Keypad {
    /// Key currently held down, if any
    fn poll_key(&mut self) -> Result<Option<Key>, DeviceError>;
}
