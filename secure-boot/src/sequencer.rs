//! The ordered platform bring-up that runs before any image is trusted.

use core::{error, fmt};

use image::{parse_flash_header, FlashGeometry, ParseFlashHeaderError, FLASH_HEADER_SIZE};

/// A single step of platform bring-up, in execution order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    /// Configure the watchdog, brown-out and clock-glitch reset sources.
    ResetSources,
    /// Enable watchdog auto-feed for the long-running steps that follow.
    WatchdogAutoFeed,
    /// Apply memory protection defaults.
    MemoryProtection,
    /// Zero-fill memory that is not initialized by the runtime.
    ZeroMemory,
    /// Reset the cache and flash mapping.
    CacheReset,
    /// Configure the clock tree.
    Clocks,
    /// Bring up the console.
    Console,
    /// Run the flash chip startup flow.
    FlashStartup,
    /// Read the boot image's flash header.
    ReadFlashHeader,
    /// Unlock, configure and write-protect the flash controller.
    FlashConfig,
    /// Detect the cause of the last reset.
    ResetCause,
    /// Arm the watchdog that supervises the next stage.
    Watchdog,
}

impl Step {
    /// Every [`Step`], in execution order.
    pub const ALL: [Step; 12] = [
        Self::ResetSources,
        Self::WatchdogAutoFeed,
        Self::MemoryProtection,
        Self::ZeroMemory,
        Self::CacheReset,
        Self::Clocks,
        Self::Console,
        Self::FlashStartup,
        Self::ReadFlashHeader,
        Self::FlashConfig,
        Self::ResetCause,
        Self::Watchdog,
    ];

    /// Returns the name of this step.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResetSources => "reset sources",
            Self::WatchdogAutoFeed => "watchdog auto-feed",
            Self::MemoryProtection => "memory protection",
            Self::ZeroMemory => "zero memory",
            Self::CacheReset => "cache reset",
            Self::Clocks => "clocks",
            Self::Console => "console",
            Self::FlashStartup => "flash startup",
            Self::ReadFlashHeader => "read flash header",
            Self::FlashConfig => "flash configuration",
            Self::ResetCause => "reset cause",
            Self::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The cause of the most recent reset.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ResetCause {
    /// Power-on reset.
    PowerOn,
    /// External reset pin.
    Pin,
    /// Software-requested reset.
    Software,
    /// Core lockup.
    Lockup,
    /// Brown-out detector.
    BrownOut,
    /// A watchdog expired.
    Watchdog,
    /// The cause could not be determined.
    Unknown,
}

impl ResetCause {
    /// Returns `true` if a watchdog expiry caused the reset.
    pub const fn is_watchdog(self) -> bool {
        matches!(self, Self::Watchdog)
    }
}

/// Execution trace captured by the platform before the last reset.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct TraceRecord {
    /// The last recorded program counter.
    pub program_counter: u32,
    /// The last recorded link register.
    pub link_register: u32,
    /// The last recorded stack pointer.
    pub stack_pointer: u32,
}

/// The reason a single platform operation failed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StepFailure {
    /// A bounded poll loop ran out before the hardware became ready.
    Timeout,
    /// The hardware is absent or reports it is not ready.
    NotReady,
    /// The hardware reported an error status.
    Hardware {
        /// The raw status value.
        status: u32,
    },
    /// The flash header could not be parsed.
    InvalidFlashHeader(ParseFlashHeaderError),
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.pad("timed out"),
            Self::NotReady => f.pad("hardware not ready"),
            Self::Hardware { status } => write!(f, "hardware status {status:#X}"),
            Self::InvalidFlashHeader(error) => write!(f, "{error}"),
        }
    }
}

/// The platform operations performed during bring-up.
pub trait Platform {
    /// Configures the reset sources that guard against glitching and tampering.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the hardware cannot be configured.
    fn configure_reset_sources(&mut self) -> Result<(), StepFailure>;

    /// Enables or disables automatic feeding of the watchdog.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the hardware cannot be configured.
    fn set_watchdog_auto_feed(&mut self, enabled: bool) -> Result<(), StepFailure>;

    /// Applies the memory protection defaults.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the hardware cannot be configured.
    fn init_memory_protection(&mut self) -> Result<(), StepFailure>;

    /// Zero-fills memory that the runtime does not initialize.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the memory cannot be written.
    fn zero_memory(&mut self) -> Result<(), StepFailure>;

    /// Resets the cache and flash mapping.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the hardware cannot be configured.
    fn reset_cache(&mut self) -> Result<(), StepFailure>;

    /// Configures the clock tree.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the clocks do not lock.
    fn configure_clocks(&mut self) -> Result<(), StepFailure>;

    /// Brings up the console at `baud_rate` and attaches it to the logger.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the console cannot be configured.
    fn init_console(&mut self, baud_rate: u32) -> Result<(), StepFailure>;

    /// Runs the flash chip startup flow.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the flash chip does not respond.
    fn start_flash(&mut self) -> Result<(), StepFailure>;

    /// Reads the boot image's flash header into `buffer`.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if flash cannot be read.
    fn read_flash_header(
        &mut self,
        buffer: &mut [u8; FLASH_HEADER_SIZE],
    ) -> Result<(), StepFailure>;

    /// Unlocks the flash chip.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the status register cannot be written.
    fn unlock_flash(&mut self) -> Result<(), StepFailure>;

    /// Configures the flash controller for `geometry`.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the controller rejects the configuration.
    fn configure_flash(&mut self, geometry: &FlashGeometry) -> Result<(), StepFailure>;

    /// Enables write protection of the flash chip.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the protection cannot be enabled.
    fn enable_write_protection(&mut self) -> Result<(), StepFailure>;

    /// Returns the cause of the most recent reset.
    fn reset_cause(&mut self) -> ResetCause;

    /// Returns the execution trace captured before the last reset, if any.
    fn trace_record(&mut self) -> Option<TraceRecord>;

    /// Arms execution trace capture for the next stage.
    fn enable_trace_recording(&mut self);

    /// Configures the watchdog to expire after `timeout_ms` milliseconds.
    ///
    /// # Errors
    /// Returns [`StepFailure`] if the watchdog cannot be configured.
    fn configure_watchdog(&mut self, timeout_ms: u32) -> Result<(), StepFailure>;
}

/// The state of one boot attempt. Only ever moves forward.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BootAttemptState {
    step: Option<Step>,
    last_error: Option<StepFailure>,
    reset_cause: Option<ResetCause>,
}

impl BootAttemptState {
    const fn new() -> Self {
        Self {
            step: None,
            last_error: None,
            reset_cause: None,
        }
    }

    /// The step currently executing, or the last step that executed.
    pub fn step(&self) -> Option<Step> {
        self.step
    }

    /// The failure that stopped bring-up, if any.
    pub fn last_error(&self) -> Option<StepFailure> {
        self.last_error
    }

    /// The cause of the most recent reset, once detected.
    pub fn reset_cause(&self) -> Option<ResetCause> {
        self.reset_cause
    }

    fn advance(&mut self, step: Step) {
        debug_assert!(self.step < Some(step), "bring-up steps must advance");
        debug_assert!(self.last_error.is_none(), "bring-up advanced past a failure");
        self.step = Some(step);
    }
}

/// The results of a successful bring-up.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BringUpReport {
    /// The flash geometry described by the flash header.
    pub flash_geometry: FlashGeometry,
    /// The cause of the most recent reset.
    pub reset_cause: ResetCause,
}

/// Whether a [`Sequencer`] has run.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum Status {
    Ready,
    Finished,
    Failed,
}

/// Runs the bring-up [`Step`]s in order against a [`Platform`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Sequencer {
    baud_rate: u32,
    watchdog_timeout_ms: u32,
    state: BootAttemptState,
    status: Status,
}

impl Sequencer {
    /// Creates a new [`Sequencer`] that brings the console up at `baud_rate` and arms the final
    /// watchdog with `watchdog_timeout_ms`.
    pub const fn new(baud_rate: u32, watchdog_timeout_ms: u32) -> Self {
        Self {
            baud_rate,
            watchdog_timeout_ms,
            state: BootAttemptState::new(),
            status: Status::Ready,
        }
    }

    /// The state of the current boot attempt.
    pub fn state(&self) -> &BootAttemptState {
        &self.state
    }

    /// Runs every [`Step`] in order, stopping at the first failure.
    ///
    /// # Errors
    /// - [`BringUpError::StepFailed`] if a step fails. No later step runs.
    /// - [`BringUpError::NotRestartable`] if this [`Sequencer`] has already run.
    pub fn run<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
    ) -> Result<BringUpReport, BringUpError> {
        if self.status != Status::Ready {
            return Err(BringUpError::NotRestartable);
        }

        let mut flash_geometry = None;
        let mut reset_cause = ResetCause::Unknown;
        for step in Step::ALL {
            self.state.advance(step);
            let result = match step {
                Step::ResetSources => platform.configure_reset_sources(),
                Step::WatchdogAutoFeed => platform.set_watchdog_auto_feed(true),
                Step::MemoryProtection => platform.init_memory_protection(),
                Step::ZeroMemory => platform.zero_memory(),
                Step::CacheReset => platform.reset_cache(),
                Step::Clocks => platform.configure_clocks(),
                Step::Console => platform.init_console(self.baud_rate),
                Step::FlashStartup => platform.start_flash(),
                Step::ReadFlashHeader => read_flash_geometry(platform).map(|geometry| {
                    flash_geometry = Some(geometry);
                }),
                Step::FlashConfig => match flash_geometry {
                    Some(geometry) => configure_flash(platform, &geometry),
                    None => Err(StepFailure::NotReady),
                },
                Step::ResetCause => {
                    reset_cause = check_reset_cause(platform);
                    self.state.reset_cause = Some(reset_cause);
                    Ok(())
                }
                Step::Watchdog => platform
                    .configure_watchdog(self.watchdog_timeout_ms)
                    .and_then(|()| platform.set_watchdog_auto_feed(false)),
            };

            if let Err(failure) = result {
                log::error!("bring-up step \"{step}\" failed: {failure}");
                self.state.last_error = Some(failure);
                self.status = Status::Failed;
                return Err(BringUpError::StepFailed { step, failure });
            }
            log::trace!("bring-up step \"{step}\" done");
        }

        self.status = Status::Finished;
        let flash_geometry = flash_geometry.ok_or(BringUpError::StepFailed {
            step: Step::ReadFlashHeader,
            failure: StepFailure::NotReady,
        })?;

        Ok(BringUpReport {
            flash_geometry,
            reset_cause,
        })
    }
}

fn read_flash_geometry<P: Platform + ?Sized>(
    platform: &mut P,
) -> Result<FlashGeometry, StepFailure> {
    let mut buffer = [0; FLASH_HEADER_SIZE];
    platform.read_flash_header(&mut buffer)?;

    let geometry = parse_flash_header(&buffer).map_err(StepFailure::InvalidFlashHeader)?;
    log::info!(
        "flash: {} KiB, mode {}, speed code {}",
        geometry.size / 1024,
        geometry.mode.0,
        geometry.speed
    );
    Ok(geometry)
}

fn configure_flash<P: Platform + ?Sized>(
    platform: &mut P,
    geometry: &FlashGeometry,
) -> Result<(), StepFailure> {
    platform.unlock_flash()?;
    platform.configure_flash(geometry)?;
    platform.enable_write_protection()
}

fn check_reset_cause<P: Platform + ?Sized>(platform: &mut P) -> ResetCause {
    let cause = platform.reset_cause();
    if cause.is_watchdog() {
        log::warn!("reset by watchdog");
        match platform.trace_record() {
            Some(record) => log::debug!(
                "last trace: pc={:#010X} lr={:#010X} sp={:#010X}",
                record.program_counter,
                record.link_register,
                record.stack_pointer
            ),
            None => log::debug!("no trace recorded"),
        }
    } else {
        log::info!("reset cause: {cause:?}");
    }

    platform.enable_trace_recording();
    cause
}

/// Various errors that can occur during bring-up.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BringUpError {
    /// A step failed.
    StepFailed {
        /// The step that failed.
        step: Step,
        /// Why the step failed.
        failure: StepFailure,
    },
    /// The [`Sequencer`] has already run.
    NotRestartable,
}

impl fmt::Display for BringUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepFailed { step, failure } => {
                write!(f, "bring-up step \"{step}\" failed: {failure}")
            }
            Self::NotRestartable => f.pad("bring-up has already run"),
        }
    }
}

impl error::Error for BringUpError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_ordered() {
        assert!(Step::ALL.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(Step::ResetSources < Step::WatchdogAutoFeed);
        assert!(Step::CacheReset < Step::FlashStartup);
        assert!(Step::Clocks < Step::Console);
        assert!(Step::ReadFlashHeader < Step::FlashConfig);
        assert!(Step::FlashConfig < Step::ResetCause);
        assert!(Step::ResetCause < Step::Watchdog);
    }

    #[test]
    fn state_moves_forward() {
        let mut state = BootAttemptState::new();
        assert_eq!(state.step(), None);

        state.advance(Step::ResetSources);
        state.advance(Step::Clocks);
        assert_eq!(state.step(), Some(Step::Clocks));
    }

    #[test]
    #[should_panic(expected = "bring-up steps must advance")]
    fn state_never_rolls_back() {
        let mut state = BootAttemptState::new();
        state.advance(Step::Clocks);
        state.advance(Step::ResetSources);
    }
}
