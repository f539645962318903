//! Terminal session loop
//!
//! One cycle: wait for a card, show its UID, collect the PIN, ask the
//! backend, show the verdict, open the browser on success, then go back to
//! the idle screen. Errors abandon the cycle, are shown on the panel and
//! the loop carries on; only the shutdown future passed to
//! [`Terminal::run_until`] ends it.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio::time::sleep;

use crate::auth::Authenticator;
use crate::config::{Config, ConfigError, TimingConfig};
use crate::device::{CardId, CardReader, DeviceError, Keypad};
use crate::display::{Display, Screen};
use crate::launcher::{Launcher, parse_redirect_base, redirect_url};
use crate::pin::{Pin, PinBuffer, PinEvent};
use crate::protocol::AuthOutcome;
use crate::state::TerminalState;

pub const IDLE_TITLE: &str = "Bankly RFID Reader";
pub const IDLE_PROMPT: &str = "Presentez carte";
pub const CARD_DETECTED: &str = "Carte detectee";
pub const PIN_PROMPT: &str = "Entrez PIN:";
pub const AUTHENTICATING: &str = "Authentification...";
pub const ACCESS_GRANTED: &str = "Acces autorise";
pub const WELCOME: &str = "Bienvenue!";
pub const ACCESS_DENIED: &str = "Acces refuse";
pub const ERROR_TITLE: &str = "Erreur:";
pub const FAREWELL: &str = "Arret du programme";

/// A cycle that had to be abandoned
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("lecteur: {0}")]
    Reader(#[source] DeviceError),

    #[error("clavier: {0}")]
    Keypad(#[source] DeviceError),

    #[error("ecran: {0}")]
    Display(#[source] DeviceError),
}

impl SessionError {
    /// French name of the failing peripheral, shown after `Erreur:`
    pub fn peripheral(&self) -> &'static str {
        match self {
            SessionError::Reader(_) => "lecteur",
            SessionError::Keypad(_) => "clavier",
            SessionError::Display(_) => "ecran",
        }
    }

    pub fn device_error(&self) -> &DeviceError {
        match self {
            SessionError::Reader(e) | SessionError::Keypad(e) | SessionError::Display(e) => e,
        }
    }
}

/// Dwell, debounce and polling intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// UID stays on screen this long before the PIN prompt
    pub card_dwell: Duration,
    /// Verdict stays on screen this long before returning to idle
    pub result_dwell: Duration,
    /// Error message stays on screen this long
    pub error_pause: Duration,
    /// Pause after an accepted key so a held touch registers once
    pub key_debounce: Duration,
    /// Pause between reader/keypad polls
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for Timings {
    fn from(t: &TimingConfig) -> Self {
        Self {
            card_dwell: Duration::from_millis(t.card_dwell_ms),
            result_dwell: Duration::from_millis(t.result_dwell_ms),
            error_pause: Duration::from_millis(t.error_pause_ms),
            key_debounce: Duration::from_millis(t.debounce_ms),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
        }
    }
}

/// Everything the loop needs from the config file
#[derive(Debug, Clone)]
pub struct TerminalSettings {
    pub screen: Screen,
    pub redirect_base: Url,
    pub timings: Timings,
}

impl TerminalSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            screen: Screen::new(config.lcd.cols, config.lcd.rows),
            redirect_base: parse_redirect_base(&config.browser.redirect_url)?,
            timings: Timings::from(&config.timing),
        })
    }
}

/// The terminal: sole owner of every peripheral for the process lifetime
pub struct Terminal<R, K, D, A, L> {
    reader: R,
    keypad: K,
    display: D,
    auth: A,
    launcher: L,
    settings: TerminalSettings,
    state: TerminalState,
}

impl<R, K, D, A, L> Terminal<R, K, D, A, L>
where
    R: CardReader,
    K: Keypad,
    D: Display,
    A: Authenticator,
    L: Launcher,
{
    pub fn new(reader: R, keypad: K, display: D, auth: A, launcher: L, settings: TerminalSettings) -> Self {
        Self {
            reader,
            keypad,
            display,
            auth,
            launcher,
            settings,
            state: TerminalState::Idle,
        }
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run cycles until `shutdown` resolves, then show the farewell message.
    /// Panel failures are logged, so this always returns once interrupted.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future,
    {
        tokio::pin!(shutdown);

        if let Err(e) = self.show_idle() {
            tracing::error!("Failed to draw idle screen: {}", e);
        }

        loop {
            let interrupted = tokio::select! {
                _ = &mut shutdown => true,
                _ = self.run_once() => false,
            };

            if interrupted {
                tracing::info!("Shutdown requested");
                if let Err(e) = self.render(&[FAREWELL]) {
                    tracing::error!("Failed to draw farewell screen: {}", e);
                }
                return;
            }
        }
    }

    /// One cycle with error recovery; always ends on the idle screen
    pub async fn run_once(&mut self) {
        if let Err(e) = self.run_cycle().await {
            tracing::error!("Cycle abandoned in state {}: {}", self.state, e);
            self.show_error(&e).await;
        }

        if let Err(e) = self.show_idle() {
            tracing::error!("Failed to draw idle screen: {}", e);
            // Keep a dead panel from turning the loop into a spin
            sleep(self.settings.timings.error_pause).await;
        }
    }

    /// One cycle, errors propagated
    pub async fn run_cycle(&mut self) -> Result<AuthOutcome, SessionError> {
        let card = self.await_card().await?;
        tracing::info!("Card detected: {}", card);

        self.transition(TerminalState::CardPresent);
        self.render(&[CARD_DETECTED, format!("UID: {}", card).as_str()])?;
        sleep(self.settings.timings.card_dwell).await;

        self.transition(TerminalState::PinEntry);
        let pin = self.collect_pin().await?;

        self.transition(TerminalState::Authenticating);
        self.render(&[AUTHENTICATING])?;
        let outcome = self.auth.authenticate(&card, &pin).await;

        match &outcome {
            AuthOutcome::Granted { token } => {
                self.transition(TerminalState::Granted);
                tracing::info!("Access granted for card {}", card);
                self.render(&[ACCESS_GRANTED, WELCOME])?;

                let url = redirect_url(&self.settings.redirect_base, token);
                self.launcher.launch(url.as_str()).await;
            }
            AuthOutcome::Failed { error } => {
                self.transition(TerminalState::Denied);
                tracing::info!("Access denied for card {}: {}", card, error);
                self.render(&[ACCESS_DENIED, error.as_str()])?;
            }
        }

        sleep(self.settings.timings.result_dwell).await;
        Ok(outcome)
    }

    /// Poll the reader until a card shows up
    pub async fn await_card(&mut self) -> Result<CardId, SessionError> {
        loop {
            if let Some(card) = self.reader.poll_card().map_err(SessionError::Reader)? {
                return Ok(card);
            }
            sleep(self.settings.timings.poll_interval).await;
        }
    }

    /// Prompt for a PIN and poll the keypad until a complete one is submitted
    pub async fn collect_pin(&mut self) -> Result<Pin, SessionError> {
        let mut buffer = PinBuffer::new();
        self.render(&[PIN_PROMPT])?;

        loop {
            if let Some(key) = self.keypad.poll_key().map_err(SessionError::Keypad)? {
                match buffer.apply(key) {
                    PinEvent::Submitted(pin) => return Ok(pin),
                    PinEvent::Changed => {
                        self.settings
                            .screen
                            .render_row(&mut self.display, 1, &buffer.masked())
                            .map_err(SessionError::Display)?;
                        sleep(self.settings.timings.key_debounce).await;
                        continue;
                    }
                    PinEvent::Ignored => {}
                }
            }
            sleep(self.settings.timings.poll_interval).await;
        }
    }

    fn show_idle(&mut self) -> Result<(), SessionError> {
        self.transition(TerminalState::Idle);
        self.render(&[IDLE_TITLE, IDLE_PROMPT])
    }

    /// `Erreur: <peripheral>` on row 0, the device error on row 1
    async fn show_error(&mut self, error: &SessionError) {
        let title = format!("{} {}", ERROR_TITLE, error.peripheral());
        let detail = error.device_error().to_string();
        if let Err(e) = self.render(&[title.as_str(), detail.as_str()]) {
            tracing::error!("Failed to show error: {}", e);
        }
        sleep(self.settings.timings.error_pause).await;
    }

    fn render(&mut self, lines: &[&str]) -> Result<(), SessionError> {
        self.settings
            .screen
            .render(&mut self.display, lines)
            .map_err(SessionError::Display)
    }

    fn transition(&mut self, next: TerminalState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!("{} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::pin::Key;
    use crate::protocol::LoginResponse;

    /// Hands out queued cards, then reports an empty antenna
    struct ScriptedReader {
        cards: VecDeque<Result<CardId, DeviceError>>,
    }

    impl ScriptedReader {
        fn with_cards(ids: &[&str]) -> Self {
            Self {
                cards: ids.iter().map(|id| Ok(CardId::new(*id))).collect(),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                cards: VecDeque::from([Err(DeviceError::protocol(message))]),
            }
        }
    }

    impl CardReader for ScriptedReader {
        fn poll_card(&mut self) -> Result<Option<CardId>, DeviceError> {
            self.cards.pop_front().transpose()
        }
    }

    /// Replays a key script; `None` entries are polls with nothing touched.
    /// Once the script runs out, reports `failure` if one is set.
    struct ScriptedKeypad {
        keys: VecDeque<Option<Key>>,
        failure: Option<String>,
    }

    impl ScriptedKeypad {
        fn typing(script: &[Option<Key>]) -> Self {
            Self {
                keys: script.iter().copied().collect(),
                failure: None,
            }
        }

        fn failing_after(script: &[Option<Key>], message: &str) -> Self {
            Self {
                failure: Some(message.to_string()),
                ..Self::typing(script)
            }
        }

        fn pin(digits: &str) -> Self {
            let mut keys: Vec<Option<Key>> = digits
                .bytes()
                .map(|b| Some(Key::Digit(b - b'0')))
                .collect();
            keys.push(Some(Key::Submit));
            Self::typing(&keys)
        }
    }

    impl Keypad for ScriptedKeypad {
        fn poll_key(&mut self) -> Result<Option<Key>, DeviceError> {
            if let Some(key) = self.keys.pop_front() {
                return Ok(key);
            }
            match &self.failure {
                Some(message) => Err(DeviceError::protocol(message.clone())),
                None => Ok(None),
            }
        }
    }

    /// Panel model that also keeps every line ever written
    #[derive(Default)]
    struct RecordingDisplay {
        rows: [String; 2],
        written: Vec<String>,
    }

    impl Display for RecordingDisplay {
        fn clear(&mut self) -> Result<(), DeviceError> {
            self.rows = Default::default();
            Ok(())
        }

        fn write_line(&mut self, row: usize, text: &str) -> Result<(), DeviceError> {
            self.rows[row] = text.to_string();
            self.written.push(text.to_string());
            Ok(())
        }
    }

    impl RecordingDisplay {
        fn position(&self, text: &str) -> Option<usize> {
            self.written.iter().position(|w| w == text)
        }
    }

    /// Panel whose I2C backpack never acknowledges
    struct DeadPanel;

    impl Display for DeadPanel {
        fn clear(&mut self) -> Result<(), DeviceError> {
            Err(DeviceError::protocol("i2c nack"))
        }

        fn write_line(&mut self, _row: usize, _text: &str) -> Result<(), DeviceError> {
            Err(DeviceError::protocol("i2c nack"))
        }
    }

    fn dead_panel_terminal(
        reader: ScriptedReader,
    ) -> Terminal<ScriptedReader, ScriptedKeypad, DeadPanel, CannedAuth, RecordingLauncher> {
        Terminal::new(
            reader,
            ScriptedKeypad::pin("1234"),
            DeadPanel,
            CannedAuth::new(GRANTED),
            RecordingLauncher::default(),
            settings(),
        )
    }

    /// Answers every attempt with a canned JSON body
    struct CannedAuth {
        body: &'static str,
        calls: AtomicUsize,
    }

    impl CannedAuth {
        fn new(body: &'static str) -> Self {
            Self {
                body,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Authenticator for CannedAuth {
        async fn authenticate(&self, _card: &CardId, _pin: &Pin) -> AuthOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            serde_json::from_str::<LoginResponse>(self.body).unwrap().into()
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        urls: Vec<String>,
    }

    #[async_trait]
    impl Launcher for RecordingLauncher {
        async fn launch(&mut self, url: &str) {
            self.urls.push(url.to_string());
        }
    }

    fn settings() -> TerminalSettings {
        TerminalSettings {
            screen: Screen::new(16, 2),
            redirect_base: parse_redirect_base(crate::DEFAULT_REDIRECT_URL).unwrap(),
            timings: Timings {
                card_dwell: Duration::ZERO,
                result_dwell: Duration::ZERO,
                error_pause: Duration::ZERO,
                key_debounce: Duration::ZERO,
                poll_interval: Duration::from_millis(1),
            },
        }
    }

    type TestTerminal =
        Terminal<ScriptedReader, ScriptedKeypad, RecordingDisplay, CannedAuth, RecordingLauncher>;

    fn terminal(reader: ScriptedReader, keypad: ScriptedKeypad, body: &'static str) -> TestTerminal {
        Terminal::new(
            reader,
            keypad,
            RecordingDisplay::default(),
            CannedAuth::new(body),
            RecordingLauncher::default(),
            settings(),
        )
    }

    const GRANTED: &str = r#"{"success": true, "data": {"token": "abc"}}"#;
    const DENIED: &str = r#"{"success": false, "error": "Invalid PIN"}"#;

    #[tokio::test]
    async fn test_granted_launches_browser_once() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["123456789012"]),
            ScriptedKeypad::pin("1234"),
            GRANTED,
        );

        let outcome = term.run_cycle().await.unwrap();
        assert!(outcome.is_granted());
        assert_eq!(term.state(), TerminalState::Granted);

        let urls = &term.launcher().urls;
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("token=abc"));

        let shown = &term.display().written;
        assert!(shown.contains(&ACCESS_GRANTED.to_string()));
        assert!(shown.contains(&WELCOME.to_string()));
    }

    #[tokio::test]
    async fn test_denied_shows_error_and_no_launch() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["42"]),
            ScriptedKeypad::pin("0000"),
            DENIED,
        );

        term.run_cycle().await.unwrap();
        assert_eq!(term.state(), TerminalState::Denied);
        assert!(term.launcher().urls.is_empty());

        let display = term.display();
        let refused = display.position(ACCESS_DENIED).unwrap();
        let reason = display.position("Invalid PIN").unwrap();
        assert_eq!(reason, refused + 1);
    }

    #[tokio::test]
    async fn test_long_denial_reason_is_truncated() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["42"]),
            ScriptedKeypad::pin("0000"),
            r#"{"success": false, "error": "Carte bloquee, contactez un administrateur"}"#,
        );

        term.run_cycle().await.unwrap();
        assert_eq!(term.display().rows[1], "Carte bloquee, c");
    }

    #[tokio::test]
    async fn test_returns_to_idle_screen_after_result() {
        for body in [GRANTED, DENIED] {
            let mut term = terminal(
                ScriptedReader::with_cards(&["42"]),
                ScriptedKeypad::pin("1234"),
                body,
            );

            term.run_once().await;

            assert_eq!(term.state(), TerminalState::Idle);
            assert_eq!(term.display().rows[0], "Bankly RFID Read");
            assert_eq!(term.display().rows[1], IDLE_PROMPT);
        }
    }

    #[tokio::test]
    async fn test_card_uid_shown_before_pin_prompt() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["3964541233"]),
            ScriptedKeypad::pin("1234"),
            DENIED,
        );

        term.run_cycle().await.unwrap();

        let display = term.display();
        let uid = display.position("UID: 3964541233").unwrap();
        let prompt = display.position(PIN_PROMPT).unwrap();
        assert_eq!(display.position(CARD_DETECTED), Some(uid - 1));
        assert!(uid < prompt);
    }

    #[tokio::test]
    async fn test_pin_feedback_and_early_submit_ignored() {
        let script = [
            Some(Key::Submit),
            None,
            Some(Key::Digit(1)),
            Some(Key::Digit(2)),
            Some(Key::Clear),
            Some(Key::Digit(3)),
            Some(Key::Submit),
            Some(Key::Digit(4)),
            Some(Key::Digit(5)),
            Some(Key::Digit(6)),
            Some(Key::Submit),
        ];
        let mut term = terminal(
            ScriptedReader::with_cards(&["42"]),
            ScriptedKeypad::typing(&script),
            DENIED,
        );

        let pin = term.collect_pin().await.unwrap();
        assert_eq!(pin.as_str(), "1345");

        let feedback: Vec<&str> = term
            .display()
            .written
            .iter()
            .filter(|w| w.starts_with("PIN: "))
            .map(|w| w.trim_end())
            .collect();
        assert_eq!(
            feedback,
            vec!["PIN: *", "PIN: **", "PIN: *", "PIN: **", "PIN: ***", "PIN: ****"]
        );
        assert!(term.display().written.iter().all(|w| w.chars().count() <= 16));
    }

    #[tokio::test]
    async fn test_reader_error_is_shown_and_loop_recovers() {
        let mut term = terminal(
            ScriptedReader::failing("no answer from MFRC522"),
            ScriptedKeypad::pin("1234"),
            GRANTED,
        );

        term.run_once().await;

        let display = term.display();
        let title = display.position("Erreur: lecteur").unwrap();
        assert_eq!(display.written[title + 1], "no answer from M");
        assert_eq!(display.rows[0], "Bankly RFID Read");
        assert_eq!(term.state(), TerminalState::Idle);
        assert!(term.launcher().urls.is_empty());
    }

    #[tokio::test]
    async fn test_keypad_error_is_shown_and_loop_recovers() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["42"]),
            ScriptedKeypad::failing_after(&[Some(Key::Digit(1))], "touch i2c"),
            GRANTED,
        );

        term.run_once().await;

        let display = term.display();
        let title = display.position("Erreur: clavier").unwrap();
        assert_eq!(display.written[title + 1], "touch i2c");
        let feedback = display.written.iter().position(|w| w.trim_end() == "PIN: *");
        assert!(feedback.is_some_and(|p| p < title));
        assert_eq!(display.rows[1], IDLE_PROMPT);
        assert_eq!(term.state(), TerminalState::Idle);
        assert_eq!(term.auth.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_session_error_names_peripheral() {
        let err = SessionError::Display(DeviceError::protocol("i2c nack"));
        assert_eq!(err.peripheral(), "ecran");
        assert_eq!(err.device_error().to_string(), "i2c nack");
        assert_eq!(err.to_string(), "ecran: i2c nack");
    }

    #[tokio::test]
    async fn test_dead_panel_abandons_cycle_and_loop_continues() {
        let mut term = dead_panel_terminal(ScriptedReader::with_cards(&["42"]));

        term.run_once().await;

        assert_eq!(term.state(), TerminalState::Idle);
        assert_eq!(term.auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_with_dead_panel_is_graceful() {
        let mut term = dead_panel_terminal(ScriptedReader::with_cards(&[]));

        term.run_until(std::future::ready(())).await;

        assert_eq!(term.state(), TerminalState::Idle);
        assert_eq!(term.auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_shows_farewell() {
        let mut term = terminal(
            ScriptedReader::with_cards(&[]),
            ScriptedKeypad::typing(&[]),
            GRANTED,
        );

        term.run_until(std::future::ready(())).await;

        assert_eq!(term.display().rows[0], "Arret du program");
        assert_eq!(term.auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_after_one_cycle() {
        let mut term = terminal(
            ScriptedReader::with_cards(&["42"]),
            ScriptedKeypad::pin("1234"),
            GRANTED,
        );

        term.run_until(sleep(Duration::from_millis(100))).await;

        assert_eq!(term.auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(term.launcher().urls.len(), 1);
        assert_eq!(term.display().rows[0], "Arret du program");
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_json(
            r#"{
                "lcd": { "address": "0x27", "port": 1, "cols": 20, "rows": 4 },
                "api": { "base_url": "http://h", "rfid_login_endpoint": "/x" },
                "timing": { "result_dwell_ms": 500 }
            }"#,
        )
        .unwrap();

        let settings = TerminalSettings::from_config(&config).unwrap();
        assert_eq!(settings.screen.columns, 20);
        assert_eq!(settings.screen.rows, 4);
        assert_eq!(settings.timings.result_dwell, Duration::from_millis(500));
        assert_eq!(settings.timings.card_dwell, Duration::from_secs(1));
        assert_eq!(settings.redirect_base.as_str(), crate::DEFAULT_REDIRECT_URL);
    }
}
