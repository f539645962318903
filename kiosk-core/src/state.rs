//! Terminal state machine
//!
//! `Idle -> CardPresent -> PinEntry -> Authenticating -> {Granted, Denied} -> Idle`
//!
//! Any state may fall back to `Idle` when a cycle is abandoned on error.
//! There is no retry state: a refused attempt needs a new card tap.

use std::fmt;

/// Where the terminal is in the current cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TerminalState {
    #[default]
    Idle,
    CardPresent,
    PinEntry,
    Authenticating,
    Granted,
    Denied,
}

impl TerminalState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: TerminalState) -> bool {
        use TerminalState::*;

        matches!(
            (self, next),
            (Idle, CardPresent)
                | (CardPresent, PinEntry)
                | (PinEntry, Authenticating)
                | (Authenticating, Granted)
                | (Authenticating, Denied)
                | (_, Idle)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TerminalState::Idle => "idle",
            TerminalState::CardPresent => "card_present",
            TerminalState::PinEntry => "pin_entry",
            TerminalState::Authenticating => "authenticating",
            TerminalState::Granted => "granted",
            TerminalState::Denied => "denied",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
