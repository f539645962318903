//! MPR121 capacitive touch keypad over I2C
//!
//! Electrodes 0-9 are the digits, 10 is `*` and 11 is `#`. When several
//! pads are touched at once the lowest electrode wins.

use std::thread;
use std::time::Duration;

use rppal::i2c::I2c;

use kiosk_core::{DeviceError, Key, Keypad};

const TOUCH_STATUS: u8 = 0x00;
const MHD_RISING: u8 = 0x2B;
const NHD_RISING: u8 = 0x2C;
const NCL_RISING: u8 = 0x2D;
const FDL_RISING: u8 = 0x2E;
const MHD_FALLING: u8 = 0x2F;
const NHD_FALLING: u8 = 0x30;
const NCL_FALLING: u8 = 0x31;
const FDL_FALLING: u8 = 0x32;
const NHD_TOUCHED: u8 = 0x33;
const NCL_TOUCHED: u8 = 0x34;
const FDL_TOUCHED: u8 = 0x35;
const TOUCH_THRESHOLD_0: u8 = 0x41;
const RELEASE_THRESHOLD_0: u8 = 0x42;
const DEBOUNCE: u8 = 0x5B;
const CONFIG1: u8 = 0x5C;
const CONFIG2: u8 = 0x5D;
const ELECTRODE_CONFIG: u8 = 0x5E;
const SOFT_RESET: u8 = 0x80;

const ELECTRODES: u8 = 12;
const TOUCH_THRESHOLD: u8 = 12;
const RELEASE_THRESHOLD: u8 = 6;

pub struct Mpr121 {
    i2c: I2c,
}

impl Mpr121 {
    pub fn open(bus: u8, address: u16) -> Result<Self, DeviceError> {
        let mut i2c = I2c::with_bus(bus).map_err(DeviceError::bus)?;
        i2c.set_slave_address(address).map_err(DeviceError::bus)?;

        let mut keypad = Self { i2c };
        keypad.init()?;
        Ok(keypad)
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.write(SOFT_RESET, 0x63)?;
        thread::sleep(Duration::from_millis(1));

        // Registers are only writable in stop mode
        self.write(ELECTRODE_CONFIG, 0x00)?;

        let config2 = self.read(CONFIG2)?;
        if config2 != 0x24 {
            return Err(DeviceError::protocol(format!(
                "MPR121 not found (CONFIG2 reads 0x{:02X})",
                config2
            )));
        }

        for electrode in 0..ELECTRODES {
            self.write(TOUCH_THRESHOLD_0 + 2 * electrode, TOUCH_THRESHOLD)?;
            self.write(RELEASE_THRESHOLD_0 + 2 * electrode, RELEASE_THRESHOLD)?;
        }

        // Baseline filtering
        for (reg, value) in [
            (MHD_RISING, 0x01),
            (NHD_RISING, 0x01),
            (NCL_RISING, 0x0E),
            (FDL_RISING, 0x00),
            (MHD_FALLING, 0x01),
            (NHD_FALLING, 0x05),
            (NCL_FALLING, 0x01),
            (FDL_FALLING, 0x00),
            (NHD_TOUCHED, 0x00),
            (NCL_TOUCHED, 0x00),
            (FDL_TOUCHED, 0x00),
        ] {
            self.write(reg, value)?;
        }

        self.write(DEBOUNCE, 0x00)?;
        self.write(CONFIG1, 0x10)?;
        self.write(CONFIG2, 0x20)?;

        // Run mode, baseline tracking on, all 12 electrodes
        self.write(ELECTRODE_CONFIG, 0x8F)
    }

    /// Bitmask of touched electrodes
    pub fn touched(&mut self) -> Result<u16, DeviceError> {
        let mut status = [0u8; 2];
        self.i2c
            .write_read(&[TOUCH_STATUS], &mut status)
            .map_err(DeviceError::bus)?;
        Ok(u16::from_le_bytes(status) & 0x0FFF)
    }

    fn read(&mut self, reg: u8) -> Result<u8, DeviceError> {
        self.i2c.smbus_read_byte(reg).map_err(DeviceError::bus)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), DeviceError> {
        self.i2c.smbus_write_byte(reg, value).map_err(DeviceError::bus)
    }
}

impl Keypad for Mpr121 {
    fn poll_key(&mut self) -> Result<Option<Key>, DeviceError> {
        Ok(lowest_touched(self.touched()?).and_then(Key::from_electrode))
    }
}

fn lowest_touched(mask: u16) -> Option<usize> {
    (mask != 0).then(|| mask.trailing_zeros() as usize)
}
