use cortex_m::peripheral::{DCB, DWT, SCB};
use image::{FlashGeometry, FLASH_HEADER_OFFSET, FLASH_HEADER_SIZE};
use secure_boot::{
    isolation::ProtectionController,
    logging,
    sequencer::{Platform, ResetCause, StepFailure, TraceRecord},
};

use super::{
    read_register, uart::MIN_BAUD_DIVISOR, write_register, Mpu, Uart, FLASH_BASE, FLASH_AREAS,
    PARTITION_DATA, SYSTEM_CLOCK_HZ, UART0_BASE,
};

const SYSCTL_BASE: usize = 0x5002_1000;
const RESET_SYNDROME: usize = SYSCTL_BASE + 0x100;
const RESET_MASK: usize = SYSCTL_BASE + 0x104;

const SYNDROME_POWER_ON: u32 = 1 << 0;
const SYNDROME_NS_WATCHDOG: u32 = 1 << 1;
const SYNDROME_S_WATCHDOG: u32 = 1 << 2;
const SYNDROME_LOCKUP: u32 = 1 << 3;
const SYNDROME_SYSRESETREQ: u32 = (1 << 4) | (1 << 5);
const SYNDROME_PIN: u32 = 1 << 8;
const SYNDROME_SW_RESET: u32 = 1 << 9;

const MASK_NS_WATCHDOG: u32 = 1 << 4;
const MASK_S_WATCHDOG: u32 = 1 << 5;

const WATCHDOG_BASE: usize = 0x5002_E000;
const WATCHDOG_LOAD: usize = WATCHDOG_BASE;
const WATCHDOG_CTRL: usize = WATCHDOG_BASE + 0x008;
const WATCHDOG_INTCLR: usize = WATCHDOG_BASE + 0x00C;
const WATCHDOG_LOCK: usize = WATCHDOG_BASE + 0xC00;
const WATCHDOG_UNLOCK_KEY: u32 = 0x1ACC_E551;
const WATCHDOG_CLOCK_HZ: u64 = 32_768;

const WATCHDOG_CTRL_INTEN: u32 = 1 << 0;
const WATCHDOG_CTRL_RESEN: u32 = 1 << 1;

/// The bring-up [`Platform`] of the AN505.
pub struct An505 {
    scb: SCB,
    dcb: DCB,
    dwt: DWT,
    watchdog_armed: bool,
}

impl An505 {
    /// Creates a new [`An505`] that owns the core peripherals it configures.
    pub fn new(scb: SCB, dcb: DCB, dwt: DWT) -> Self {
        Self {
            scb,
            dcb,
            dwt,
            watchdog_armed: false,
        }
    }

    fn with_watchdog_unlocked(&mut self, f: impl FnOnce()) {
        // SAFETY:
        // `WATCHDOG_LOCK` is the lock register of the secure watchdog.
        unsafe { write_register(WATCHDOG_LOCK, WATCHDOG_UNLOCK_KEY) }
        f();
        // SAFETY:
        // `WATCHDOG_LOCK` is the lock register of the secure watchdog.
        unsafe { write_register(WATCHDOG_LOCK, 0) }
    }
}

impl Platform for An505 {
    fn configure_reset_sources(&mut self) -> Result<(), StepFailure> {
        // SAFETY:
        // `RESET_MASK` is the reset mask register of the system control block.
        let mask = unsafe { read_register(RESET_MASK) };
        // SAFETY:
        // Enabling watchdog resets only adds reset sources.
        unsafe { write_register(RESET_MASK, mask | MASK_NS_WATCHDOG | MASK_S_WATCHDOG) }
        Ok(())
    }

    fn set_watchdog_auto_feed(&mut self, enabled: bool) -> Result<(), StepFailure> {
        let ctrl = match (enabled, self.watchdog_armed) {
            (true, _) => 0,
            (false, true) => WATCHDOG_CTRL_INTEN | WATCHDOG_CTRL_RESEN,
            (false, false) => return Err(StepFailure::NotReady),
        };

        self.with_watchdog_unlocked(|| {
            // SAFETY:
            // `WATCHDOG_INTCLR` and `WATCHDOG_CTRL` belong to the unlocked secure watchdog.
            unsafe { write_register(WATCHDOG_INTCLR, 1) }
            // SAFETY:
            // `WATCHDOG_CTRL` belongs to the unlocked secure watchdog.
            unsafe { write_register(WATCHDOG_CTRL, ctrl) }
        });
        Ok(())
    }

    fn init_memory_protection(&mut self) -> Result<(), StepFailure> {
        let mut mpu = Mpu;
        mpu.disable();
        for index in 0..mpu.region_count() {
            mpu.clear(index as u8);
        }
        Ok(())
    }

    fn zero_memory(&mut self) -> Result<(), StepFailure> {
        let base = PARTITION_DATA.base as usize as *mut u32;
        let words = PARTITION_DATA.length as usize / 4;
        for word in 0..words {
            // SAFETY:
            // Partition data memory is outside the boot core's memory and not yet in use.
            unsafe { core::ptr::write_volatile(base.wrapping_add(word), 0) }
        }
        Ok(())
    }

    fn reset_cache(&mut self) -> Result<(), StepFailure> {
        self.scb.invalidate_icache();
        Ok(())
    }

    fn configure_clocks(&mut self) -> Result<(), StepFailure> {
        // The FPGA drives the system clock at a fixed frequency.
        log::trace!("system clock: {SYSTEM_CLOCK_HZ} Hz");
        Ok(())
    }

    fn init_console(&mut self, baud_rate: u32) -> Result<(), StepFailure> {
        let divisor = SYSTEM_CLOCK_HZ / baud_rate.max(1);
        if !(divisor >= MIN_BAUD_DIVISOR) {
            return Err(StepFailure::Hardware { status: divisor });
        }

        let uart = cortex_m::singleton!(: Uart = Uart::new(UART0_BASE))
            .ok_or(StepFailure::NotReady)?;
        uart.enable(divisor);
        logging::attach_console(uart);

        log::info!(
            "Booting {} {}",
            crate::BOOTLOADER_NAME,
            crate::BOOTLOADER_VERSION
        );
        Ok(())
    }

    fn start_flash(&mut self) -> Result<(), StepFailure> {
        let end = FLASH_AREAS
            .iter()
            .map(|area| area.offset as usize + area.length as usize)
            .max()
            .unwrap_or(0);
        if !(end <= super::FLASH_SIZE) {
            return Err(StepFailure::Hardware { status: end as u32 });
        }

        Ok(())
    }

    fn read_flash_header(
        &mut self,
        buffer: &mut [u8; FLASH_HEADER_SIZE],
    ) -> Result<(), StepFailure> {
        let header = (FLASH_BASE + FLASH_HEADER_OFFSET as usize) as *const u8;
        for (offset, byte) in buffer.iter_mut().enumerate() {
            // SAFETY:
            // The flash header lies inside emulated flash.
            *byte = unsafe { core::ptr::read_volatile(header.wrapping_add(offset)) };
        }
        Ok(())
    }

    fn unlock_flash(&mut self) -> Result<(), StepFailure> {
        Ok(())
    }

    fn configure_flash(&mut self, geometry: &FlashGeometry) -> Result<(), StepFailure> {
        if !(geometry.size as usize >= super::FLASH_SIZE) {
            log::error!(
                "flash header describes {:#X} bytes, areas need {:#X}",
                geometry.size,
                super::FLASH_SIZE
            );
            return Err(StepFailure::Hardware {
                status: geometry.size,
            });
        }

        Ok(())
    }

    fn enable_write_protection(&mut self) -> Result<(), StepFailure> {
        // Emulated flash is never written by the boot core.
        Ok(())
    }

    fn reset_cause(&mut self) -> ResetCause {
        // SAFETY:
        // `RESET_SYNDROME` is the reset syndrome register of the system control block.
        let syndrome = unsafe { read_register(RESET_SYNDROME) };

        if syndrome & (SYNDROME_NS_WATCHDOG | SYNDROME_S_WATCHDOG) != 0 {
            ResetCause::Watchdog
        } else if syndrome & SYNDROME_LOCKUP != 0 {
            ResetCause::Lockup
        } else if syndrome & (SYNDROME_SYSRESETREQ | SYNDROME_SW_RESET) != 0 {
            ResetCause::Software
        } else if syndrome & SYNDROME_PIN != 0 {
            ResetCause::Pin
        } else if syndrome & SYNDROME_POWER_ON != 0 {
            ResetCause::PowerOn
        } else {
            ResetCause::Unknown
        }
    }

    fn trace_record(&mut self) -> Option<TraceRecord> {
        None
    }

    fn enable_trace_recording(&mut self) {
        self.dcb.enable_trace();
        self.dwt.enable_cycle_counter();
    }

    fn configure_watchdog(&mut self, timeout_ms: u32) -> Result<(), StepFailure> {
        let ticks = u64::from(timeout_ms) * WATCHDOG_CLOCK_HZ / 1000;
        let ticks = u32::try_from(ticks).unwrap_or(u32::MAX);

        self.with_watchdog_unlocked(|| {
            // SAFETY:
            // `WATCHDOG_LOAD` belongs to the unlocked secure watchdog.
            unsafe { write_register(WATCHDOG_LOAD, ticks) }
        });
        self.watchdog_armed = true;
        Ok(())
    }
}
