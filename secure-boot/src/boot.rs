//! The boot flow: bring-up, slot selection, isolation and handoff.

use core::{convert::Infallible, error, fmt};

use crate::{
    config::BootConfig,
    isolation::{
        IsolationError, IsolationManager, PartitionDescriptor, ProtectionController, SecurityGate,
        StaticRegion,
    },
    loader::{Handoff, ImageLoader, LoadError, LoadedImage, TargetMemory, Verifier},
    logging,
    region::RegionProvider,
    sequencer::{BringUpError, Platform, Sequencer},
};

/// The isolation layout applied before control passes to the loaded image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionLayout<'layout> {
    /// The static boundaries protecting the boot core.
    pub static_regions: &'layout [StaticRegion],
    /// The partition the loaded image runs as.
    pub application: PartitionDescriptor<'layout>,
}

/// Brings the platform up, loads the first bootable image of `config.slots`, isolates it and
/// transfers control to it.
///
/// # Errors
/// - [`BootError::BringUp`] if a bring-up step fails.
/// - [`BootError::NoBootableImage`] if every slot was unavailable or untrusted.
/// - [`BootError::Load`] if an image failed validation or copying, or control returned from the
///   image.
/// - [`BootError::Isolation`] if the boundaries of the image cannot be established.
pub fn boot<Pl, P, M, V, C, G, H>(
    config: &BootConfig<'_>,
    platform: &mut Pl,
    loader: &mut ImageLoader<'_, P, M, V>,
    isolation: &mut IsolationManager<'_, C, G>,
    layout: &PartitionLayout<'_>,
    handoff: &mut H,
) -> Result<Infallible, BootError>
where
    Pl: Platform + ?Sized,
    P: RegionProvider,
    M: TargetMemory,
    V: Verifier,
    C: ProtectionController,
    G: SecurityGate,
    H: Handoff + ?Sized,
{
    let report = Sequencer::new(config.baud_rate, config.watchdog_timeout_ms).run(platform)?;
    log::debug!("bring-up complete: {report:?}");

    let image = load_first_bootable(config, loader)?;

    isolation.establish_static_boundaries(layout.static_regions)?;
    let handle = isolation.bind(&layout.application)?;

    log::info!(
        "starting {} image at {:#010X}",
        image.slot(),
        image.descriptor().entry_address()
    );

    handoff.prepare();
    isolation.update(&handle)?;

    let console = logging::detach_console();
    let result = image.jump(handoff);
    if let Some(console) = console {
        logging::attach_console(console);
    }

    result.map_err(BootError::Load)
}

/// Loads the first image of `config.slots` that is available and trusted.
///
/// A slot whose image fails validation ends the boot instead of passing to the next slot.
///
/// # Errors
/// - [`BootError::NoBootableImage`] if every slot was unavailable or untrusted.
/// - [`BootError::Load`] if a slot held an image that failed validation or copying.
pub fn load_first_bootable<P, M, V>(
    config: &BootConfig<'_>,
    loader: &mut ImageLoader<'_, P, M, V>,
) -> Result<LoadedImage, BootError>
where
    P: RegionProvider,
    M: TargetMemory,
    V: Verifier,
{
    let mut last = None;
    for &slot in config.slots {
        match loader.load(slot, config.header_offset) {
            Ok(image) => return Ok(image),
            Err(error) if error.allows_fallback() => {
                log::warn!("{slot} image rejected: {error}");
                last = Some(error);
            }
            Err(error) => {
                log::error!("{slot} image is invalid: {error}");
                return Err(BootError::Load(error));
            }
        }
    }

    Err(BootError::NoBootableImage { last })
}

/// Various errors that can end a boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// Platform bring-up failed.
    BringUp(BringUpError),
    /// No slot holds a bootable image.
    NoBootableImage {
        /// The error of the last slot tried, if any slot was tried.
        last: Option<LoadError>,
    },
    /// Loading failed in a way that rules out trying another slot.
    Load(LoadError),
    /// The isolation boundaries of the image could not be established.
    Isolation(IsolationError),
}

impl From<BringUpError> for BootError {
    fn from(value: BringUpError) -> Self {
        Self::BringUp(value)
    }
}

impl From<LoadError> for BootError {
    fn from(value: LoadError) -> Self {
        Self::Load(value)
    }
}

impl From<IsolationError> for BootError {
    fn from(value: IsolationError) -> Self {
        Self::Isolation(value)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BringUp(error) => write!(f, "{error}"),
            Self::NoBootableImage { last: Some(error) } => {
                write!(f, "no bootable image: {error}")
            }
            Self::NoBootableImage { last: None } => f.pad("no image slots configured"),
            Self::Load(error) => write!(f, "error loading image: {error}"),
            Self::Isolation(error) => write!(f, "error isolating image: {error}"),
        }
    }
}

impl error::Error for BootError {}
