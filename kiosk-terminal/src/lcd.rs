//! HD44780 character LCD behind a PCF8574 I2C backpack
//!
//! Expander wiring: P0 = RS, P1 = RW, P2 = E, P3 = backlight, P4-P7 = D4-D7.
//! The panel runs in 4-bit mode.

use std::thread;
use std::time::Duration;

use rppal::i2c::I2c;

use kiosk_core::{DeviceError, Display};

// Expander bits
const RS: u8 = 0x01;
const ENABLE: u8 = 0x04;
const BACKLIGHT: u8 = 0x08;

// HD44780 commands
const CLEAR_DISPLAY: u8 = 0x01;
const ENTRY_MODE_INCREMENT: u8 = 0x06;
const DISPLAY_ON_CURSOR_OFF: u8 = 0x0C;
const FUNCTION_SET_4BIT_2LINE: u8 = 0x28;
const SET_DDRAM_ADDR: u8 = 0x80;

/// DDRAM address of column 0 for each row
const ROW_OFFSETS: [u8; 4] = [0x00, 0x40, 0x14, 0x54];

pub struct Lcd {
    i2c: I2c,
    columns: usize,
    rows: usize,
}

impl Lcd {
    pub fn open(bus: u8, address: u16, columns: usize, rows: usize) -> Result<Self, DeviceError> {
        if rows == 0 || rows > ROW_OFFSETS.len() {
            return Err(DeviceError::protocol(format!("unsupported LCD row count {}", rows)));
        }

        let mut i2c = I2c::with_bus(bus).map_err(DeviceError::bus)?;
        i2c.set_slave_address(address).map_err(DeviceError::bus)?;

        let mut lcd = Self { i2c, columns, rows };
        lcd.init()?;
        Ok(lcd)
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        thread::sleep(Duration::from_millis(50));

        // Force 8-bit mode three times, then switch to 4-bit
        for wait in [4500, 4500, 150] {
            self.write_nibble(0x03, 0)?;
            thread::sleep(Duration::from_micros(wait));
        }
        self.write_nibble(0x02, 0)?;

        self.command(FUNCTION_SET_4BIT_2LINE)?;
        self.command(DISPLAY_ON_CURSOR_OFF)?;
        self.clear()?;
        self.command(ENTRY_MODE_INCREMENT)
    }

    fn command(&mut self, value: u8) -> Result<(), DeviceError> {
        self.send(value, 0)
    }

    fn send(&mut self, value: u8, mode: u8) -> Result<(), DeviceError> {
        self.write_nibble(value >> 4, mode)?;
        self.write_nibble(value & 0x0F, mode)
    }

    fn write_nibble(&mut self, nibble: u8, mode: u8) -> Result<(), DeviceError> {
        let byte = (nibble << 4) | mode | BACKLIGHT;

        self.expander_write(byte | ENABLE)?;
        thread::sleep(Duration::from_micros(1));
        self.expander_write(byte & !ENABLE)?;
        thread::sleep(Duration::from_micros(50));
        Ok(())
    }

    fn expander_write(&mut self, byte: u8) -> Result<(), DeviceError> {
        self.i2c.write(&[byte]).map_err(DeviceError::bus)?;
        Ok(())
    }
}

impl Display for Lcd {
    fn clear(&mut self) -> Result<(), DeviceError> {
        self.command(CLEAR_DISPLAY)?;
        thread::sleep(Duration::from_millis(2));
        Ok(())
    }

    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DeviceError> {
        if row >= self.rows {
            return Err(DeviceError::protocol(format!("LCD has no row {}", row)));
        }

        self.command(SET_DDRAM_ADDR | ROW_OFFSETS[row])?;
        for ch in text.chars().take(self.columns) {
            self.send(rom_code(ch), RS)?;
        }
        Ok(())
    }
}

/// Character ROM code; the A00 ROM only matches ASCII in the printable range
fn rom_code(ch: char) -> u8 {
    match ch {
        ' '..='}' => ch as u8,
        _ => b'?',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_code() {
        assert_eq!(rom_code('A'), b'A');
        assert_eq!(rom_code('*'), b'*');
        assert_eq!(rom_code('é'), b'?');
        assert_eq!(rom_code('\n'), b'?');
        assert_eq!(rom_code('~'), b'?');
    }
}
