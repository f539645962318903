//! MFRC522 RFID reader over SPI
//!
//! Only what the kiosk needs: REQA, cascade level 1 anticollision, SELECT
//! and HLTA. The card is halted after each read, so a card resting on the
//! antenna is reported once and again only after it leaves the field.

use std::thread;
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use kiosk_core::config::ReaderConfig;
use kiosk_core::{CardId, CardReader, DeviceError};

// Registers
const COMMAND_REG: u8 = 0x01;
const COMM_IEN_REG: u8 = 0x02;
const COMM_IRQ_REG: u8 = 0x04;
const DIV_IRQ_REG: u8 = 0x05;
const ERROR_REG: u8 = 0x06;
const FIFO_DATA_REG: u8 = 0x09;
const FIFO_LEVEL_REG: u8 = 0x0A;
const CONTROL_REG: u8 = 0x0C;
const BIT_FRAMING_REG: u8 = 0x0D;
const MODE_REG: u8 = 0x11;
const TX_CONTROL_REG: u8 = 0x14;
const TX_ASK_REG: u8 = 0x15;
const CRC_RESULT_REG_M: u8 = 0x21;
const CRC_RESULT_REG_L: u8 = 0x22;
const T_MODE_REG: u8 = 0x2A;
const T_PRESCALER_REG: u8 = 0x2B;
const T_RELOAD_REG_H: u8 = 0x2C;
const T_RELOAD_REG_L: u8 = 0x2D;
const VERSION_REG: u8 = 0x37;

// Reader commands
const PCD_IDLE: u8 = 0x00;
const PCD_CALC_CRC: u8 = 0x03;
const PCD_TRANSCEIVE: u8 = 0x0C;
const PCD_SOFT_RESET: u8 = 0x0F;

// Card commands
const PICC_REQA: u8 = 0x26;
const PICC_ANTICOLL_CL1: u8 = 0x93;
const PICC_HLTA: u8 = 0x50;

/// FIFO is 64 bytes but no frame we exchange is longer than this
const MAX_FRAME_LEN: usize = 16;

/// Busy-wait bound for a transceive round trip
const MAX_IRQ_POLLS: usize = 2000;

/// Bytes returned by anticollision: 4 UID bytes and their BCC
pub type Uid = [u8; 5];

/// Frame received from the card
struct Frame {
    bytes: Vec<u8>,
    bits: usize,
}

pub struct Mfrc522 {
    spi: Spi,
    _reset: Option<OutputPin>,
}

impl Mfrc522 {
    /// Open the SPI device, release the RST line and initialize the chip
    pub fn open(config: &ReaderConfig) -> Result<Self, DeviceError> {
        let bus = spi_bus(config.spi_bus)?;
        let slave = slave_select(config.slave_select)?;
        let spi = Spi::new(bus, slave, config.clock_hz, Mode::Mode0).map_err(DeviceError::bus)?;

        let reset = match config.reset_pin {
            Some(pin) => {
                let mut pin = Gpio::new()
                    .and_then(|gpio| gpio.get(pin))
                    .map_err(DeviceError::bus)?
                    .into_output();
                pin.set_high();
                Some(pin)
            }
            None => None,
        };

        let mut reader = Self { spi, _reset: reset };
        reader.init()?;
        Ok(reader)
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.soft_reset()?;

        let version = self.read(VERSION_REG)?;
        if version == 0x00 || version == 0xFF {
            return Err(DeviceError::protocol("MFRC522 not responding, check wiring"));
        }
        tracing::info!("MFRC522 firmware version 0x{:02X}", version);

        // Timer: ~25ms timeout for card answers
        self.write(T_MODE_REG, 0x8D)?;
        self.write(T_PRESCALER_REG, 0x3E)?;
        self.write(T_RELOAD_REG_L, 30)?;
        self.write(T_RELOAD_REG_H, 0)?;

        // 100% ASK modulation, CRC preset 0x6363
        self.write(TX_ASK_REG, 0x40)?;
        self.write(MODE_REG, 0x3D)?;

        self.antenna_on()
    }

    fn soft_reset(&mut self) -> Result<(), DeviceError> {
        self.write(COMMAND_REG, PCD_SOFT_RESET)?;
        thread::sleep(Duration::from_millis(50));

        // PowerDown bit clears once the oscillator is back up
        for _ in 0..10 {
            if self.read(COMMAND_REG)? & 0x10 == 0 {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
        Err(DeviceError::protocol("MFRC522 stuck in reset"))
    }

    fn antenna_on(&mut self) -> Result<(), DeviceError> {
        let value = self.read(TX_CONTROL_REG)?;
        if value & 0x03 != 0x03 {
            self.write(TX_CONTROL_REG, value | 0x03)?;
        }
        Ok(())
    }

    /// UID of a card in the field, if one answers
    pub fn read_uid(&mut self) -> Result<Option<Uid>, DeviceError> {
        if !self.request()? {
            return Ok(None);
        }

        let Some(uid) = self.anticollision()? else {
            return Ok(None);
        };

        if let Err(e) = self.select(&uid) {
            tracing::debug!("SELECT failed: {}", e);
        }
        self.halt()?;

        Ok(Some(uid))
    }

    /// REQA: true when an idle card answers with its ATQA
    fn request(&mut self) -> Result<bool, DeviceError> {
        Ok(matches!(self.transceive(&[PICC_REQA], 7)?, Some(frame) if frame.bits == 16))
    }

    fn anticollision(&mut self) -> Result<Option<Uid>, DeviceError> {
        let Some(frame) = self.transceive(&[PICC_ANTICOLL_CL1, 0x20], 0)? else {
            return Ok(None);
        };

        let Ok(uid) = Uid::try_from(frame.bytes.as_slice()) else {
            tracing::debug!("Anticollision returned {} bytes", frame.bytes.len());
            return Ok(None);
        };

        if !bcc_matches(&uid) {
            tracing::debug!("Anticollision BCC mismatch");
            return Ok(None);
        }

        Ok(Some(uid))
    }

    /// SELECT; returns the card's SAK
    fn select(&mut self, uid: &Uid) -> Result<u8, DeviceError> {
        let mut frame = vec![PICC_ANTICOLL_CL1, 0x70];
        frame.extend_from_slice(uid);
        let crc = self.calculate_crc(&frame)?;
        frame.extend_from_slice(&crc);

        match self.transceive(&frame, 0)? {
            Some(answer) if answer.bits == 24 => Ok(answer.bytes[0]),
            _ => Err(DeviceError::protocol("card did not acknowledge SELECT")),
        }
    }

    /// HLTA; a halted card stays silent until it leaves the field
    fn halt(&mut self) -> Result<(), DeviceError> {
        let mut frame = vec![PICC_HLTA, 0x00];
        let crc = self.calculate_crc(&frame)?;
        frame.extend_from_slice(&crc);

        // Silence is the success answer to HLTA
        self.transceive(&frame, 0)?;
        Ok(())
    }

    fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2], DeviceError> {
        self.write(COMMAND_REG, PCD_IDLE)?;
        self.clear_bits(DIV_IRQ_REG, 0x04)?;
        self.set_bits(FIFO_LEVEL_REG, 0x80)?;
        for &byte in data {
            self.write(FIFO_DATA_REG, byte)?;
        }
        self.write(COMMAND_REG, PCD_CALC_CRC)?;

        for _ in 0..255 {
            if self.read(DIV_IRQ_REG)? & 0x04 != 0 {
                self.write(COMMAND_REG, PCD_IDLE)?;
                return Ok([self.read(CRC_RESULT_REG_L)?, self.read(CRC_RESULT_REG_M)?]);
            }
        }
        Err(DeviceError::protocol("CRC coprocessor timed out"))
    }

    /// Send `data` and collect the answer. `None` when no card answered or
    /// the answer was garbled (collision, parity, protocol error).
    fn transceive(&mut self, data: &[u8], tx_last_bits: u8) -> Result<Option<Frame>, DeviceError> {
        self.write(COMMAND_REG, PCD_IDLE)?;
        self.write(COMM_IEN_REG, 0x77 | 0x80)?;
        self.write(COMM_IRQ_REG, 0x7F)?;
        self.set_bits(FIFO_LEVEL_REG, 0x80)?;
        for &byte in data {
            self.write(FIFO_DATA_REG, byte)?;
        }
        self.write(BIT_FRAMING_REG, tx_last_bits & 0x07)?;
        self.write(COMMAND_REG, PCD_TRANSCEIVE)?;
        self.set_bits(BIT_FRAMING_REG, 0x80)?;

        let mut answered = false;
        for _ in 0..MAX_IRQ_POLLS {
            let irq = self.read(COMM_IRQ_REG)?;
            if irq & 0x30 != 0 {
                answered = true;
                break;
            }
            if irq & 0x01 != 0 {
                break;
            }
        }
        self.clear_bits(BIT_FRAMING_REG, 0x80)?;

        if !answered || self.read(ERROR_REG)? & 0x1B != 0 {
            return Ok(None);
        }

        let level = usize::from(self.read(FIFO_LEVEL_REG)?);
        let last_bits = usize::from(self.read(CONTROL_REG)? & 0x07);
        let bits = match last_bits {
            0 => level * 8,
            n => level.saturating_sub(1) * 8 + n,
        };

        let count = level.clamp(1, MAX_FRAME_LEN);
        let mut bytes = Vec::with_capacity(count);
        for _ in 0..count {
            bytes.push(self.read(FIFO_DATA_REG)?);
        }

        Ok(Some(Frame { bytes, bits }))
    }

    fn read(&mut self, reg: u8) -> Result<u8, DeviceError> {
        let mut rx = [0u8; 2];
        self.spi
            .transfer(&mut rx, &[((reg << 1) & 0x7E) | 0x80, 0])
            .map_err(DeviceError::bus)?;
        Ok(rx[1])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), DeviceError> {
        self.spi
            .write(&[(reg << 1) & 0x7E, value])
            .map_err(DeviceError::bus)?;
        Ok(())
    }

    fn set_bits(&mut self, reg: u8, mask: u8) -> Result<(), DeviceError> {
        let value = self.read(reg)?;
        self.write(reg, value | mask)
    }

    fn clear_bits(&mut self, reg: u8, mask: u8) -> Result<(), DeviceError> {
        let value = self.read(reg)?;
        self.write(reg, value & !mask)
    }
}

impl CardReader for Mfrc522 {
    fn poll_card(&mut self) -> Result<Option<CardId>, DeviceError> {
        Ok(self
            .read_uid()?
            .map(|uid| CardId::new(card_number(&uid).to_string())))
    }
}

/// Card number as the backend stores it: the five anticollision bytes
/// read as one big-endian integer
pub fn card_number(uid: &Uid) -> u64 {
    uid.iter().fold(0u64, |n, &b| (n << 8) | u64::from(b))
}

/// BCC is the XOR of the four UID bytes
fn bcc_matches(uid: &Uid) -> bool {
    uid[..4].iter().fold(0u8, |acc, &b| acc ^ b) == uid[4]
}

fn spi_bus(index: u8) -> Result<Bus, DeviceError> {
    match index {
        0 => Ok(Bus::Spi0),
        1 => Ok(Bus::Spi1),
        2 => Ok(Bus::Spi2),
        n => Err(DeviceError::protocol(format!("unsupported SPI bus {}", n))),
    }
}

fn slave_select(index: u8) -> Result<SlaveSelect, DeviceError> {
    match index {
        0 => Ok(SlaveSelect::Ss0),
        1 => Ok(SlaveSelect::Ss1),
        2 => Ok(SlaveSelect::Ss2),
        n => Err(DeviceError::protocol(format!("unsupported SPI slave select {}", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_number() {
        let uid: Uid = [0x88, 0x04, 0x12, 0x34, 0xAA];
        assert_eq!(card_number(&uid), 0x88_04_12_34_AA);
        assert_eq!(card_number(&[0, 0, 0, 1, 1]), 257);
    }

    #[test]
    fn test_bcc() {
        let bcc = 0xDE ^ 0xAD ^ 0xBE ^ 0xEF;
        assert!(bcc_matches(&[0xDE, 0xAD, 0xBE, 0xEF, bcc]));
        assert!(!bcc_matches(&[0xDE, 0xAD, 0xBE, 0xEF, bcc ^ 0x01]));
    }

    #[test]
    fn test_bus_selection() {
        assert!(spi_bus(0).is_ok());
        assert!(spi_bus(7).is_err());
        assert!(slave_select(1).is_ok());
        assert!(slave_select(9).is_err());
    }
}
