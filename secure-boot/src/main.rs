//! Secure boot firmware for the MPS2 AN505 board.

#![no_std]
#![no_main]

use core::convert::Infallible;

use secure_boot::{
    boot::{boot, BootError},
    config::BootConfig,
    isolation::IsolationManager,
    loader::{ImageLoader, SkipVerification},
    logging,
};

pub mod board;

/// The name of this bootloader.
const BOOTLOADER_NAME: &str = "capora-secure-boot";
/// The version of capora-secure-boot.
const BOOTLOADER_VERSION: &str = core::env!("CARGO_PKG_VERSION");

#[cortex_m_rt::entry]
fn main() -> ! {
    let config = BootConfig::DEFAULT;

    // Booting shouldn't break due to a logging error.
    let _ = logging::init_logging(config.log_level);

    let peripherals =
        cortex_m::Peripherals::take().expect("core peripherals are only taken at entry");

    match run(&config, peripherals) {
        Ok(never) => match never {},
        Err(error) => {
            log::error!("{error}");
            panic!("boot failed: {error}");
        }
    }
}

/// Boots the first valid image of `config`.
fn run(
    config: &BootConfig<'_>,
    peripherals: cortex_m::Peripherals,
) -> Result<Infallible, BootError> {
    let mut platform = board::An505::new(peripherals.SCB, peripherals.DCB, peripherals.DWT);
    let mut loader = ImageLoader::new(
        board::flash_areas(),
        board::Sram,
        SkipVerification,
        board::MEMORY_LAYOUT,
    );
    let mut isolation = IsolationManager::new(
        board::Mpu,
        board::Gate,
        &board::ALLOW_LIST,
        config.isolation_level,
    )?;

    boot(
        config,
        &mut platform,
        &mut loader,
        &mut isolation,
        &board::PARTITION_LAYOUT,
        &mut board::Jump,
    )
}

/// Reports the panic on the console, if one is attached, and resets the core.
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    logging::write_console(format_args!("{info}\r\n"));
    cortex_m::peripheral::SCB::sys_reset()
}
