//! Application for testing `capora-secure-boot`.

#![no_std]
#![no_main]

/// The secure alias of the UART the boot chain grants this application.
const UART0_BASE: usize = 0x5020_0000;
/// Offset of the data register.
const UART_DATA: usize = 0x000;
/// Offset of the state register.
const UART_STATE: usize = 0x004;
/// `STATE.TXFULL`.
const STATE_TX_FULL: u32 = 1 << 0;

/// Written by the entry point so a debugger can tell the application ran.
#[export_name = "SYMBOL"]
static mut K: u8 = 0;

/// The entry point of the test application.
#[cortex_m_rt::entry]
fn entry() -> ! {
    // SAFETY:
    // Nothing else accesses `K`.
    unsafe { core::ptr::write_volatile(core::ptr::addr_of_mut!(K), 2) }

    let control = cortex_m::register::control::read();
    write_str("test-application running ");
    write_str(if control.npriv().is_privileged() {
        "privileged\r\n"
    } else {
        "unprivileged\r\n"
    });

    loop {
        cortex_m::asm::wfi();
    }
}

/// Writes `s` to UART0, which the boot chain left enabled.
fn write_str(s: &str) {
    let state = (UART0_BASE + UART_STATE) as *const u32;
    let data = (UART0_BASE + UART_DATA) as *mut u32;

    for byte in s.bytes() {
        // SAFETY:
        // `UART0_BASE` is a CMSDK UART this partition was granted.
        while unsafe { core::ptr::read_volatile(state) } & STATE_TX_FULL != 0 {
            core::hint::spin_loop();
        }

        // SAFETY:
        // `UART0_BASE` is a CMSDK UART this partition was granted.
        unsafe { core::ptr::write_volatile(data, u32::from(byte)) }
    }
}

/// Handles all panics.
#[panic_handler]
fn panic_handler(_: &core::panic::PanicInfo) -> ! {
    loop {}
}
