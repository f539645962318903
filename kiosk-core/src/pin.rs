//! PIN entry
//!
//! The keypad has twelve electrodes: ten digits, `*` to erase the last
//! digit and `#` to submit. [`PinBuffer`] applies one key at a time and
//! never holds more than [`PIN_LENGTH`] digits.

use std::fmt;

use crate::PIN_LENGTH;

/// Keypad key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    /// `*`: erase the last digit
    Clear,
    /// `#`: submit a complete PIN
    Submit,
}

impl Key {
    /// Map a touch electrode (0-11) to its key
    pub fn from_electrode(index: usize) -> Option<Self> {
        match index {
            0..=9 => Some(Key::Digit(index as u8)),
            10 => Some(Key::Clear),
            11 => Some(Key::Submit),
            _ => None,
        }
    }
}

/// What a key did to the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    /// A digit was added or removed
    Changed,
    /// Submit with exactly [`PIN_LENGTH`] digits
    Submitted(Pin),
    /// Buffer full, empty, or incomplete submit
    Ignored,
}

/// A complete PIN. `Debug` never shows the digits.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    /// Exactly [`PIN_LENGTH`] ASCII digits, or `None`
    pub fn new(digits: &str) -> Option<Self> {
        (digits.len() == PIN_LENGTH && digits.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(digits.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({})", "*".repeat(self.0.len()))
    }
}

/// In-progress PIN
#[derive(Debug, Clone, Default)]
pub struct PinBuffer {
    digits: String,
}

impl PinBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.digits.len() == PIN_LENGTH
    }

    /// Apply one key press
    pub fn apply(&mut self, key: Key) -> PinEvent {
        match key {
            Key::Digit(d) if d <= 9 && self.digits.len() < PIN_LENGTH => {
                self.digits.push(char::from(b'0' + d));
                PinEvent::Changed
            }
            Key::Clear if !self.digits.is_empty() => {
                self.digits.pop();
                PinEvent::Changed
            }
            Key::Submit if self.is_complete() => match Pin::new(&self.digits) {
                Some(pin) => PinEvent::Submitted(pin),
                None => PinEvent::Ignored,
            },
            _ => PinEvent::Ignored,
        }
    }

    /// Second-row feedback: `PIN: ` and one `*` per digit
    pub fn masked(&self) -> String {
        format!("PIN: {}", "*".repeat(self.digits.len()))
    }
}
