//! Logging for `capora-secure-boot`.

use core::{
    fmt::{self, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use log::Log;

static LOCK: AtomicBool = AtomicBool::new(false);

static mut CONSOLE: Option<&'static mut dyn Write> = None;

static LOGGER: Logger = Logger;

/// Installs the logger and sets the maximum level to `level`.
///
/// Records are dropped until a console is attached with [`attach_console()`].
///
/// # Errors
/// Returns [`log::SetLoggerError`] if a logger was already installed.
pub fn init_logging(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Directs log records to `console`, returning the previously attached console.
pub fn attach_console(console: &'static mut dyn Write) -> Option<&'static mut dyn Write> {
    with_lock(|slot| slot.replace(console))
}

/// Stops logging to the attached console and returns it.
pub fn detach_console() -> Option<&'static mut dyn Write> {
    with_lock(|slot| slot.take())
}

/// Writes `args` to the attached console, bypassing the logger.
///
/// Returns `false` if no console is attached or the console is busy.
pub fn write_console(args: fmt::Arguments<'_>) -> bool {
    if LOCK.swap(true, Ordering::Acquire) {
        return false;
    }

    let written = console_mut().is_some_and(|console| console.write_fmt(args).is_ok());

    LOCK.store(false, Ordering::Release);
    written
}

fn with_lock<R>(f: impl FnOnce(&mut Option<&'static mut dyn Write>) -> R) -> R {
    while LOCK.swap(true, Ordering::Acquire) {
        core::hint::spin_loop();
    }

    // SAFETY:
    // `LOCK` is held, so no other reference to `CONSOLE` exists.
    let result = f(unsafe { &mut *core::ptr::addr_of_mut!(CONSOLE) });

    LOCK.store(false, Ordering::Release);
    result
}

/// Must only be called while `LOCK` is held.
fn console_mut() -> Option<&'static mut dyn Write> {
    let console = core::ptr::addr_of_mut!(CONSOLE);
    // SAFETY:
    // The caller holds `LOCK`, so no other reference to `CONSOLE` exists.
    let console: &'static mut Option<&'static mut dyn Write> = unsafe { &mut *console };
    console.as_deref_mut()
}

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // A record emitted while the console is in use, from a fault handler for example, is
        // dropped rather than waited on.
        if LOCK.swap(true, Ordering::Acquire) {
            return;
        }

        if let Some(console) = console_mut() {
            let _ = write!(console, "[{:?}] {}\r\n", record.level(), record.args());
        }

        LOCK.store(false, Ordering::Release);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    struct Capture;

    impl Write for Capture {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            CAPTURED.lock().unwrap().push_str(s);
            Ok(())
        }
    }

    #[test]
    fn records_reach_attached_console_only() {
        init_logging(log::LevelFilter::Debug).unwrap();

        log::info!("before console");
        assert!(!write_console(format_args!("nothing attached")));

        assert!(attach_console(Box::leak(Box::new(Capture))).is_none());
        log::info!("attached {}", 1);
        log::trace!("too verbose");
        assert!(write_console(format_args!("panicked\r\n")));
        assert!(detach_console().is_some());

        log::info!("after console");

        let captured = CAPTURED.lock().unwrap();
        assert!(captured.contains("[Info] attached 1\r\n"));
        assert!(captured.contains("panicked\r\n"));
        assert!(!captured.contains("before console"));
        assert!(!captured.contains("too verbose"));
        assert!(!captured.contains("after console"));
    }
}
