//! CMSDK APB UART used as the boot console.

use core::fmt;

use super::{read_register, write_register};

const DATA: usize = 0x000;
const STATE: usize = 0x004;
const CTRL: usize = 0x008;
const BAUDDIV: usize = 0x010;

const STATE_TX_FULL: u32 = 1 << 0;
const CTRL_TX_ENABLE: u32 = 1 << 0;

/// The smallest divisor the UART accepts.
pub const MIN_BAUD_DIVISOR: u32 = 16;

/// A transmit-only CMSDK UART.
pub struct Uart {
    base: usize,
}

impl Uart {
    /// Creates a new [`Uart`] for the registers at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Enables the transmitter with the given clock divisor.
    pub fn enable(&mut self, divisor: u32) {
        // SAFETY:
        // `self.base` is the base of a CMSDK UART register block.
        unsafe { write_register(self.base + BAUDDIV, divisor) }
        // SAFETY:
        // `self.base` is the base of a CMSDK UART register block.
        unsafe { write_register(self.base + CTRL, CTRL_TX_ENABLE) }
    }

    /// Blocks until `byte` has been queued for transmission.
    pub fn write_byte(&mut self, byte: u8) {
        // SAFETY:
        // `self.base` is the base of a CMSDK UART register block.
        while unsafe { read_register(self.base + STATE) } & STATE_TX_FULL != 0 {
            core::hint::spin_loop();
        }

        // SAFETY:
        // `self.base` is the base of a CMSDK UART register block.
        unsafe { write_register(self.base + DATA, u32::from(byte)) }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|byte| self.write_byte(byte));
        Ok(())
    }
}
