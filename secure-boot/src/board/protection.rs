//! Secure MPU, SAU and secure privilege control of the AN505.

use core::sync::atomic::{AtomicBool, Ordering};

use secure_boot::isolation::{
    armv8m, EnablePolicy, HardwareStatus, PpcLocation, Privilege, ProtectionController,
    ProtectionRegionSpec, SecurityGate,
};

use super::{read_register, write_register};

const MPU_TYPE: usize = 0xE000_ED90;
const MPU_CTRL: usize = 0xE000_ED94;
const MPU_RNR: usize = 0xE000_ED98;
const MPU_RBAR: usize = 0xE000_ED9C;
const MPU_RLAR: usize = 0xE000_EDA0;
const MPU_MAIR0: usize = 0xE000_EDC0;

const SAU_CTRL: usize = 0xE000_EDD0;
const SAU_CTRL_ENABLE: u32 = 1 << 0;
const SAU_CTRL_ALLNS: u32 = 1 << 1;

const SPCTRL_BASE: usize = 0x5008_0000;
/// Offsets of the unprivileged access registers, indexed by [`PpcLocation::bank`].
const SPPPC_BANKS: [usize; 6] = [0x0A0, 0x0A4, 0x0B0, 0x0B4, 0x0B8, 0x0BC];

/// Whether thread mode drops privilege when control passes to the loaded image.
pub(super) static THREAD_UNPRIVILEGED: AtomicBool = AtomicBool::new(false);

/// The secure MPU.
pub struct Mpu;

impl Mpu {
    /// Disables the MPU.
    pub fn disable(&mut self) {
        // SAFETY:
        // Disabling the MPU falls back to the default memory map, which the boot core runs
        // under.
        unsafe { write_register(MPU_CTRL, 0) }
        barrier();
    }
}

impl ProtectionController for Mpu {
    fn region_count(&self) -> usize {
        // SAFETY:
        // `MPU_TYPE` is a read-only architectural register.
        let mpu_type = unsafe { read_register(MPU_TYPE) };
        ((mpu_type >> 8) & 0xFF) as usize
    }

    fn program(&mut self, spec: &ProtectionRegionSpec) {
        // SAFETY:
        // `MPU_RNR` selects the region the following writes apply to.
        unsafe { write_register(MPU_RNR, u32::from(spec.index)) }
        // SAFETY:
        // The isolation manager only programs validated regions.
        unsafe { write_register(MPU_RBAR, armv8m::rbar(spec)) }
        // SAFETY:
        // The isolation manager only programs validated regions.
        unsafe { write_register(MPU_RLAR, armv8m::rlar(spec)) }
        barrier();
    }

    fn clear(&mut self, index: u8) {
        // SAFETY:
        // `MPU_RNR` selects the region the following writes apply to.
        unsafe { write_register(MPU_RNR, u32::from(index)) }
        // SAFETY:
        // Disabling a region only removes access granted to unprivileged code.
        unsafe { write_register(MPU_RLAR, 0) }
        barrier();
    }

    fn enable(&mut self, policy: EnablePolicy) {
        // SAFETY:
        // The attribute indices used by `armv8m::rlar` refer to `armv8m::MAIR0`.
        unsafe { write_register(MPU_MAIR0, armv8m::MAIR0) }
        // SAFETY:
        // The static regions are programmed and the boot core runs privileged, so it keeps
        // access to its own memory through the default map.
        unsafe { write_register(MPU_CTRL, armv8m::ctrl(policy)) }
        barrier();
    }
}

/// The SAU and secure privilege control block.
pub struct Gate;

impl SecurityGate for Gate {
    fn init_attribution(&mut self) -> Result<(), HardwareStatus> {
        // Everything the boot chain touches stays secure.
        // SAFETY:
        // With `ALLNS` clear and the SAU disabled, all memory is secure.
        unsafe { write_register(SAU_CTRL, 0) }
        barrier();

        // SAFETY:
        // `SAU_CTRL` is an architectural register.
        let ctrl = unsafe { read_register(SAU_CTRL) };
        if ctrl & (SAU_CTRL_ENABLE | SAU_CTRL_ALLNS) != 0 {
            return Err(HardwareStatus(ctrl));
        }

        Ok(())
    }

    fn secure_peripheral(&mut self, location: PpcLocation, privilege: Privilege) {
        let bank = SPPPC_BANKS.get(location.bank as usize);
        let bit = 1u32.checked_shl(u32::from(location.location));
        let (Some(offset), Some(bit)) = (bank, bit) else {
            log::warn!("no protection controller bit at {location:?}");
            return;
        };
        let address = SPCTRL_BASE + offset;

        // SAFETY:
        // `address` is a secure unprivileged access register of the secure privilege control
        // block.
        let value = unsafe { read_register(address) };
        let value = match privilege {
            Privilege::Privileged => value & !bit,
            Privilege::Unprivileged => value | bit,
        };
        // SAFETY:
        // Only the bit of the claimed peripheral changes.
        unsafe { write_register(address, value) }
    }

    fn set_thread_privilege(&mut self, privilege: Privilege) {
        // CONTROL.nPRIV is written by the handoff itself, after the last privileged access.
        THREAD_UNPRIVILEGED.store(privilege == Privilege::Unprivileged, Ordering::Release);
    }
}

fn barrier() {
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}
