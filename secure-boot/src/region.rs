//! Byte-addressable access to the storage areas that hold boot images.

use core::{cell::Cell, error, fmt, ops::Deref};

/// Identifier of a storage area.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AreaId(pub u8);

impl AreaId {
    /// The area holding the boot core itself.
    pub const BOOTLOADER: Self = Self(0);
    /// The area holding the primary application image.
    pub const IMAGE_PRIMARY: Self = Self(1);
    /// The area holding the secondary application image.
    pub const IMAGE_SECONDARY: Self = Self(2);
    /// Scratch space used by image update tooling.
    pub const SCRATCH: Self = Self(3);
}

/// A slot that may hold a candidate application image.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageSlot(pub u8);

impl ImageSlot {
    /// The primary image slot.
    pub const PRIMARY: Self = Self(0);
    /// The secondary image slot.
    pub const SECONDARY: Self = Self(1);

    /// Returns the [`AreaId`] backing this slot, or [`None`] if this slot has no area.
    pub const fn area_id(self) -> Option<AreaId> {
        match self {
            Self::PRIMARY => Some(AreaId::IMAGE_PRIMARY),
            Self::SECONDARY => Some(AreaId::IMAGE_SECONDARY),
            _ => None,
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::PRIMARY => f.pad("primary"),
            Self::SECONDARY => f.pad("secondary"),
            Self(slot) => write!(f, "slot {slot}"),
        }
    }
}

/// An entry in a board's flash area table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FlashArea {
    /// The identifier of the area.
    pub id: AreaId,
    /// The offset of the area from the start of flash.
    pub offset: u32,
    /// The size of the area, in bytes.
    pub length: u32,
}

/// An opened storage area.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Region {
    /// The identifier of the area this region was opened from.
    pub id: AreaId,
    /// The offset of the region from the start of its backing storage.
    pub base: u32,
    /// The size of the region, in bytes.
    pub length: u32,
}

/// Abstraction over persistent storage divided into named areas.
pub trait RegionProvider {
    /// Opens the area identified by `id`.
    ///
    /// # Errors
    /// Returns [`OpenRegionError`] if the area does not exist or does not fit the storage.
    fn open(&self, id: AreaId) -> Result<Region, OpenRegionError>;

    /// Maps `length` bytes at `offset` inside `region` for reading.
    ///
    /// # Errors
    /// Returns [`MapError`] if the range exceeds the region or another view is still mapped.
    fn map(&self, region: &Region, offset: u32, length: u32) -> Result<MappedView<'_>, MapError>;

    /// Releases `view`.
    fn unmap(&self, view: MappedView<'_>) {
        drop(view)
    }
}

impl<P: RegionProvider + ?Sized> RegionProvider for &P {
    fn open(&self, id: AreaId) -> Result<Region, OpenRegionError> {
        P::open(self, id)
    }

    fn map(&self, region: &Region, offset: u32, length: u32) -> Result<MappedView<'_>, MapError> {
        P::map(self, region, offset, length)
    }

    fn unmap(&self, view: MappedView<'_>) {
        P::unmap(self, view)
    }
}

/// The single window through which storage is mapped.
///
/// At most one [`MappedView`] obtained from a window is alive at any time.
#[derive(Debug, Default)]
pub struct MappingWindow {
    busy: Cell<bool>,
}

impl MappingWindow {
    /// Creates a new, unoccupied [`MappingWindow`].
    pub const fn new() -> Self {
        Self {
            busy: Cell::new(false),
        }
    }

    /// Occupies the window with a view of `bytes`.
    ///
    /// # Errors
    /// Returns [`MapError::AlreadyMapped`] if a view is already outstanding.
    pub fn map<'window>(
        &'window self,
        bytes: &'window [u8],
    ) -> Result<MappedView<'window>, MapError> {
        if self.busy.replace(true) {
            return Err(MapError::AlreadyMapped);
        }

        Ok(MappedView {
            bytes,
            window: self,
        })
    }

    /// Returns `true` if a view is currently outstanding.
    pub fn is_mapped(&self) -> bool {
        self.busy.get()
    }
}

/// A readable view into mapped storage. Dropping the view unmaps it.
#[derive(Debug)]
pub struct MappedView<'window> {
    bytes: &'window [u8],
    window: &'window MappingWindow,
}

impl Deref for MappedView<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.bytes
    }
}

impl Drop for MappedView<'_> {
    fn drop(&mut self) {
        self.window.busy.set(false);
    }
}

/// A [`RegionProvider`] over flash that is addressable as a byte slice.
pub struct FlashAreaMap<'flash> {
    flash: &'flash [u8],
    areas: &'flash [FlashArea],
    window: MappingWindow,
}

impl<'flash> FlashAreaMap<'flash> {
    /// Creates a new [`FlashAreaMap`] over `flash`, divided according to `areas`.
    pub const fn new(flash: &'flash [u8], areas: &'flash [FlashArea]) -> Self {
        Self {
            flash,
            areas,
            window: MappingWindow::new(),
        }
    }

    /// Returns the underlying flash contents.
    pub fn flash(&self) -> &'flash [u8] {
        self.flash
    }

    /// Returns `true` if a view is currently outstanding.
    pub fn is_mapped(&self) -> bool {
        self.window.is_mapped()
    }
}

impl RegionProvider for FlashAreaMap<'_> {
    fn open(&self, id: AreaId) -> Result<Region, OpenRegionError> {
        let area = self
            .areas
            .iter()
            .find(|area| area.id == id)
            .ok_or(OpenRegionError::NotFound { id })?;

        let end = area.offset as u64 + area.length as u64;
        if !(end <= self.flash.len() as u64) {
            log::warn!("flash area {} does not fit in flash", id.0);
            return Err(OpenRegionError::OutOfBounds { id });
        }

        Ok(Region {
            id,
            base: area.offset,
            length: area.length,
        })
    }

    fn map(&self, region: &Region, offset: u32, length: u32) -> Result<MappedView<'_>, MapError> {
        let end = offset as u64 + length as u64;
        if !(end <= region.length as u64) {
            return Err(MapError::OutOfRange {
                offset,
                length,
                region_length: region.length,
            });
        }

        let start = region.base as usize + offset as usize;
        let bytes = self
            .flash
            .get(start..start + length as usize)
            .ok_or(MapError::OutOfRange {
                offset,
                length,
                region_length: region.length,
            })?;

        self.window.map(bytes)
    }
}

/// Various errors that can occur while opening a [`Region`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OpenRegionError {
    /// No area with the given identifier exists.
    NotFound {
        /// The requested area.
        id: AreaId,
    },
    /// The area extends past the end of its backing storage.
    OutOfBounds {
        /// The requested area.
        id: AreaId,
    },
}

impl fmt::Display for OpenRegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "flash area {} does not exist", id.0),
            Self::OutOfBounds { id } => write!(f, "flash area {} exceeds the flash device", id.0),
        }
    }
}

impl error::Error for OpenRegionError {}

/// Various errors that can occur while mapping part of a [`Region`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MapError {
    /// The requested range does not lie inside the region.
    OutOfRange {
        /// The requested offset.
        offset: u32,
        /// The requested length.
        length: u32,
        /// The length of the region.
        region_length: u32,
    },
    /// Another view is still mapped.
    AlreadyMapped,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange {
                offset,
                length,
                region_length,
            } => write!(
                f,
                "range {offset:#X}+{length:#X} exceeds region of {region_length:#X} bytes"
            ),
            Self::AlreadyMapped => f.pad("mapping window is already in use"),
        }
    }
}

impl error::Error for MapError {}
