//! bankly-rfid: RFID + PIN kiosk terminal daemon
//!
//! Runs on the Raspberry Pi next to the reader:
//! - MFRC522 card reader on SPI
//! - MPR121 touch keypad and a 16x2 LCD on I2C
//! - Posts card + PIN to the backend, opens the kiosk browser on success
//!
//! Runs until Ctrl-C.

mod lcd;
mod mfrc522;
mod mpr121;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kiosk_core::{ApiClient, BrowserLauncher, Config, Terminal, TerminalSettings};

use crate::lcd::Lcd;
use crate::mfrc522::Mfrc522;
use crate::mpr121::Mpr121;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "kiosk_terminal=info,kiosk_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().context("Failed to load config")?;
    let settings = TerminalSettings::from_config(&config)?;
    tracing::info!("Authentication endpoint: {}", config.api.login_url());

    // Peripherals
    let display = Lcd::open(
        config.lcd.port,
        config.lcd.i2c_address()?,
        config.lcd.cols,
        config.lcd.rows,
    )
    .context("Failed to initialize LCD")?;

    let keypad = Mpr121::open(config.keypad.port, config.keypad.i2c_address()?)
        .context("Failed to initialize MPR121 keypad")?;

    let reader = Mfrc522::open(&config.reader).context("Failed to initialize MFRC522 reader")?;

    let auth = ApiClient::from_config(&config.api)?;
    let launcher = BrowserLauncher::from_config(&config.browser);

    let mut terminal = Terminal::new(reader, keypad, display, auth, launcher, settings);

    tracing::info!("Terminal ready. Press Ctrl+C to stop.");
    terminal.run_until(shutdown_signal()).await;

    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
