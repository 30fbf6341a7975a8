//! Compile-time configuration of the boot chain.

use image::DEFAULT_HEADER_OFFSET;

use crate::{isolation::IsolationLevel, region::ImageSlot};

/// The configuration of one boot.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BootConfig<'slots> {
    /// The slots to try, in order of preference.
    pub slots: &'slots [ImageSlot],
    /// The offset of the image header inside each slot.
    pub header_offset: u32,
    /// The baud rate of the console.
    pub baud_rate: u32,
    /// The timeout of the watchdog that supervises the loaded image, in milliseconds.
    pub watchdog_timeout_ms: u32,
    /// The most verbose level that is logged.
    pub log_level: log::LevelFilter,
    /// The isolation model enforced between partitions.
    pub isolation_level: IsolationLevel,
}

impl BootConfig<'static> {
    /// The default [`BootConfig`].
    pub const DEFAULT: Self = Self {
        slots: &[ImageSlot::PRIMARY, ImageSlot::SECONDARY],
        header_offset: DEFAULT_HEADER_OFFSET,
        baud_rate: 115_200,
        watchdog_timeout_ms: 9_000,
        log_level: log::LevelFilter::Info,
        isolation_level: IsolationLevel::Two,
    };
}

impl Default for BootConfig<'static> {
    fn default() -> Self {
        Self::DEFAULT
    }
}
