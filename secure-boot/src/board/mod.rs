//! Support for the MPS2 AN505 (Cortex-M33, SSE-200) board, as emulated by QEMU.
//!
//! Flash is emulated by a window of PSRAM that the host preloads with the flash image.

mod handoff;
mod platform;
mod protection;
mod uart;

pub use handoff::{Jump, Sram};
pub use platform::An505;
pub use protection::{Gate, Mpu};
pub use uart::Uart;

use secure_boot::{
    boot::PartitionLayout,
    isolation::{
        AssetDescriptor, AssetKind, MmioDescriptor, PartitionDescriptor, PartitionFlags,
        PeripheralId, PpcLocation, StaticRegion, StaticRegionKind,
    },
    loader::{AddressRange, MemoryLayout},
    region::{AreaId, FlashArea, FlashAreaMap},
};

/// The frequency of the system clock, in hertz.
pub const SYSTEM_CLOCK_HZ: u32 = 25_000_000;

/// The address at which emulated flash is mapped.
pub const FLASH_BASE: usize = 0x8000_0000;
/// The size, in bytes, of emulated flash.
pub const FLASH_SIZE: usize = 0x10_0000;

/// The secure alias of UART0.
pub const UART0_BASE: usize = 0x5020_0000;

/// The flash area table of the board.
pub static FLASH_AREAS: [FlashArea; 4] = [
    FlashArea {
        id: AreaId::BOOTLOADER,
        offset: 0x0,
        length: 0x1_0000,
    },
    FlashArea {
        id: AreaId::IMAGE_PRIMARY,
        offset: 0x1_0000,
        length: 0x4_0000,
    },
    FlashArea {
        id: AreaId::IMAGE_SECONDARY,
        offset: 0x5_0000,
        length: 0x4_0000,
    },
    FlashArea {
        id: AreaId::SCRATCH,
        offset: 0x9_0000,
        length: 0x1_0000,
    },
];

/// Secure code SRAM.
const CODE_MEMORY: AddressRange = AddressRange::new(0x1000_0000, 0x40_0000);
/// Secure data SRAM.
const DATA_MEMORY: AddressRange = AddressRange::new(0x3800_0000, 0x40_0000);
/// The code of the boot core, see `memory.x`.
const BOOT_CODE: AddressRange = AddressRange::new(0x1000_0000, 0x4_0000);
/// The data and stack of the boot core, see `memory.x`.
const BOOT_DATA: AddressRange = AddressRange::new(0x3800_0000, 0x1_0000);

/// The memory that images may be loaded into.
pub const MEMORY_LAYOUT: MemoryLayout<'static> = MemoryLayout {
    executable: &[CODE_MEMORY],
    data: &[DATA_MEMORY],
    reserved: &[BOOT_CODE, BOOT_DATA],
};

/// The range of data memory that loaded images may observe.
pub const PARTITION_DATA: AddressRange = AddressRange::new(
    BOOT_DATA.base + BOOT_DATA.length,
    DATA_MEMORY.length - BOOT_DATA.length,
);

/// The peripherals partitions may claim.
pub static ALLOW_LIST: [MmioDescriptor; 3] = [
    MmioDescriptor {
        name: "UART0",
        number: 0,
        ppc: Some(PpcLocation {
            bank: 4,
            location: 0,
        }),
        base: 0x5020_0000,
        limit: 0x5020_0FFF,
    },
    MmioDescriptor {
        name: "UART1",
        number: 1,
        ppc: Some(PpcLocation {
            bank: 4,
            location: 1,
        }),
        base: 0x5020_1000,
        limit: 0x5020_1FFF,
    },
    MmioDescriptor {
        name: "FPGAIO",
        number: 2,
        ppc: Some(PpcLocation {
            bank: 4,
            location: 10,
        }),
        base: 0x5030_2000,
        limit: 0x5030_2FFF,
    },
];

/// The static protection layout and the partition the loaded image runs as.
pub static PARTITION_LAYOUT: PartitionLayout<'static> = PartitionLayout {
    static_regions: &[
        StaticRegion {
            kind: StaticRegionKind::Code,
            base: BOOT_CODE.base,
            limit: BOOT_CODE.base + (BOOT_CODE.length - 1),
        },
        StaticRegion {
            kind: StaticRegionKind::PrivilegedStack,
            base: BOOT_DATA.base,
            limit: BOOT_DATA.base + (BOOT_DATA.length - 1),
        },
        StaticRegion {
            kind: StaticRegionKind::PartitionCode,
            base: BOOT_CODE.base + BOOT_CODE.length,
            limit: CODE_MEMORY.base + (CODE_MEMORY.length - 1),
        },
        StaticRegion {
            kind: StaticRegionKind::PartitionDataStack,
            base: PARTITION_DATA.base,
            limit: PARTITION_DATA.base + (PARTITION_DATA.length - 1),
        },
    ],
    application: PartitionDescriptor {
        id: 0x100,
        flags: PartitionFlags::NONE,
        assets: &[AssetDescriptor {
            kind: AssetKind::NamedPeripheral(PeripheralId("UART0")),
        }],
    },
};

/// Returns the [`FlashAreaMap`] over emulated flash.
pub fn flash_areas() -> FlashAreaMap<'static> {
    // SAFETY:
    // Emulated flash is mapped for the lifetime of the program and nothing writes to it.
    let flash = unsafe { core::slice::from_raw_parts(FLASH_BASE as *const u8, FLASH_SIZE) };
    FlashAreaMap::new(flash, &FLASH_AREAS)
}

/// Reads the 32-bit register at `address`.
///
/// # Safety
/// `address` must be the address of a readable, 4-byte aligned register.
unsafe fn read_register(address: usize) -> u32 {
    // SAFETY:
    // The caller guarantees that `address` is a readable register.
    unsafe { core::ptr::read_volatile(address as *const u32) }
}

/// Writes `value` to the 32-bit register at `address`.
///
/// # Safety
/// `address` must be the address of a writable, 4-byte aligned register, and writing `value` to
/// it must not break memory safety.
unsafe fn write_register(address: usize, value: u32) {
    // SAFETY:
    // The caller guarantees that `address` is a writable register.
    unsafe { core::ptr::write_volatile(address as *mut u32, value) }
}
