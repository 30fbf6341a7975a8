//! Functionality that deals with loading an application image out of an image slot.

use core::{convert::Infallible, error, fmt};

use image::{header_size, ImageHeader, ParseImageHeaderError, Segment, SegmentKind, MAX_SEGMENTS};

use crate::region::{ImageSlot, MapError, OpenRegionError, Region, RegionProvider};

/// A contiguous range of the boot core's physical address space.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AddressRange {
    /// The first address of the range.
    pub base: u32,
    /// The size, in bytes, of the range.
    pub length: u32,
}

impl AddressRange {
    /// Creates a new [`AddressRange`] of `length` bytes starting at `base`.
    pub const fn new(base: u32, length: u32) -> Self {
        Self { base, length }
    }

    /// The address one past the end of this range.
    pub const fn end(&self) -> u64 {
        self.base as u64 + self.length as u64
    }

    /// Returns `true` if every byte of `other` lies inside `self`.
    pub const fn contains(&self, other: &AddressRange) -> bool {
        self.base <= other.base && other.end() <= self.end()
    }

    /// Returns `true` if `address` lies inside `self`.
    pub const fn contains_address(&self, address: u32) -> bool {
        self.base <= address && (address as u64) < self.end()
    }

    /// Returns `true` if `self` and `other` share at least one byte.
    pub const fn overlaps(&self, other: &AddressRange) -> bool {
        (self.base as u64) < other.end() && (other.base as u64) < self.end()
    }
}

/// The memory map of the boot core's platform, as far as loading is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout<'layout> {
    /// Memory that code segments may be loaded into.
    pub executable: &'layout [AddressRange],
    /// Memory that data segments may be loaded into.
    pub data: &'layout [AddressRange],
    /// Memory occupied by the boot core, which no segment may touch.
    pub reserved: &'layout [AddressRange],
}

impl MemoryLayout<'_> {
    fn class(&self, kind: SegmentKind) -> &[AddressRange] {
        match kind {
            SegmentKind::Code => self.executable,
            SegmentKind::Data => self.data,
        }
    }
}

/// A parsed and owned copy of an image header.
///
/// The descriptor outlives the view it was parsed from, so the mapping window is free while
/// segments are copied.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ImageDescriptor {
    entry_address: u32,
    segments: [Segment; MAX_SEGMENTS],
    segment_count: usize,
}

impl ImageDescriptor {
    /// Copies the contents of `header`.
    pub fn from_header(header: &ImageHeader<'_>) -> Self {
        let mut segments = [Segment {
            source_offset: 0,
            length: 0,
            destination: 0,
            kind: SegmentKind::Data,
        }; MAX_SEGMENTS];

        let mut segment_count = 0;
        for (slot, segment) in segments.iter_mut().zip(header.segments()) {
            *slot = segment;
            segment_count += 1;
        }

        Self {
            entry_address: header.entry_address(),
            segments,
            segment_count,
        }
    }

    /// The address control is transferred to.
    pub fn entry_address(&self) -> u32 {
        self.entry_address
    }

    /// The segments of the image, in declaration order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments[..self.segment_count]
    }
}

/// The outcome of an image verification.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Verdict {
    /// The image may be booted.
    Trusted,
    /// The image must not be booted.
    Untrusted,
}

/// The trust decision consulted before any segment is copied.
pub trait Verifier {
    /// Decides whether the image described by `descriptor`, stored in `region`, may be booted.
    fn verify<P: RegionProvider + ?Sized>(
        &mut self,
        provider: &P,
        region: &Region,
        descriptor: &ImageDescriptor,
    ) -> Verdict;
}

/// A [`Verifier`] that trusts every structurally valid image.
///
/// Only suitable for development boards without provisioned keys.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct SkipVerification;

impl Verifier for SkipVerification {
    fn verify<P: RegionProvider + ?Sized>(
        &mut self,
        _provider: &P,
        region: &Region,
        _descriptor: &ImageDescriptor,
    ) -> Verdict {
        log::warn!("image in flash area {} booted without verification", region.id.0);
        Verdict::Trusted
    }
}

/// The memory segments are loaded into.
pub trait TargetMemory {
    /// Copies `bytes` to the physical address `destination`.
    ///
    /// The loader only calls this with ranges that passed validation against its
    /// [`MemoryLayout`].
    fn copy_to(&mut self, destination: u32, bytes: &[u8]);
}

/// The one-way transfer of control into a loaded image.
pub trait Handoff {
    /// Quiesces the platform before control leaves the boot core.
    fn prepare(&mut self);

    /// Transfers control to `entry`. Returning from this function is a fault.
    ///
    /// # Safety
    /// `entry` must lie inside a code segment that has been fully copied to its destination.
    unsafe fn transfer(&mut self, entry: u32);
}

/// An image whose segments have been copied to their destinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    slot: ImageSlot,
    region: Region,
    descriptor: ImageDescriptor,
}

impl LoadedImage {
    /// The slot the image was loaded from.
    pub fn slot(&self) -> ImageSlot {
        self.slot
    }

    /// The region the image was loaded from.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// The descriptor of the image.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Transfers control to the image's entry address without preparing `handoff`.
    ///
    /// # Errors
    /// Returns [`LoadError::TransferDidNotDiverge`] if `handoff` returns.
    pub fn jump<H: Handoff + ?Sized>(&self, handoff: &mut H) -> Result<Infallible, LoadError> {
        let entry = self.descriptor.entry_address();
        log::info!("jumping to {entry:#010X}");

        // SAFETY:
        // A `LoadedImage` is only produced once every segment has been copied, and its entry
        // address was validated to lie inside a code segment.
        unsafe { handoff.transfer(entry) }

        log::error!("transfer to {entry:#010X} returned");
        Err(LoadError::TransferDidNotDiverge { entry })
    }
}

/// Loads images out of the slots of a [`RegionProvider`].
pub struct ImageLoader<'layout, P, M, V> {
    provider: P,
    memory: M,
    verifier: V,
    layout: MemoryLayout<'layout>,
}

impl<'layout, P: RegionProvider, M: TargetMemory, V: Verifier> ImageLoader<'layout, P, M, V> {
    /// Creates a new [`ImageLoader`].
    pub fn new(provider: P, memory: M, verifier: V, layout: MemoryLayout<'layout>) -> Self {
        Self {
            provider,
            memory,
            verifier,
            layout,
        }
    }

    /// Returns the underlying [`TargetMemory`].
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Returns the underlying [`RegionProvider`].
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the underlying [`Verifier`].
    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Loads the image in `slot`, whose header lies `header_offset` bytes into the slot, and
    /// transfers control to it.
    ///
    /// # Errors
    /// Returns any error [`ImageLoader::load()`] returns, or
    /// [`LoadError::TransferDidNotDiverge`] if `handoff` returns.
    pub fn load_and_jump<H: Handoff + ?Sized>(
        &mut self,
        slot: ImageSlot,
        header_offset: u32,
        handoff: &mut H,
    ) -> Result<Infallible, LoadError> {
        let image = self.load(slot, header_offset)?;
        handoff.prepare();
        image.jump(handoff)
    }

    /// Validates the image in `slot` and copies its segments to their destinations.
    ///
    /// Every check happens before the first byte is copied.
    ///
    /// # Errors
    /// - [`LoadError::SlotUnavailable`] if `slot` cannot be opened.
    /// - [`LoadError::Header`] if the image header cannot be parsed.
    /// - [`LoadError::InvalidDestination`], [`LoadError::OverlapsBootCore`],
    ///   [`LoadError::EntryOutsideCode`] or [`LoadError::OverlappingSegments`] if the segment
    ///   table does not fit the [`MemoryLayout`].
    /// - [`LoadError::Untrusted`] if the [`Verifier`] rejects the image.
    /// - [`LoadError::Map`] or [`LoadError::CopyFailed`] if the slot cannot be read.
    pub fn load(&mut self, slot: ImageSlot, header_offset: u32) -> Result<LoadedImage, LoadError> {
        let region = slot
            .area_id()
            .ok_or(LoadError::SlotUnavailable { slot, error: None })
            .and_then(|id| {
                self.provider
                    .open(id)
                    .map_err(|error| LoadError::SlotUnavailable {
                        slot,
                        error: Some(error),
                    })
            })?;

        let descriptor = self.read_descriptor(&region, header_offset)?;
        log::debug!(
            "{slot} image: entry={:#010X}, segments={}",
            descriptor.entry_address(),
            descriptor.segments().len()
        );

        validate_segments(&self.layout, &descriptor)?;

        if self.verifier.verify(&self.provider, &region, &descriptor) == Verdict::Untrusted {
            return Err(LoadError::Untrusted { slot });
        }

        for (index, segment) in descriptor.segments().iter().enumerate() {
            log::info!(
                "{} segment: start={:#x}, size={:#x}, vaddr={:#x}",
                segment.kind,
                segment.source_offset,
                segment.length,
                segment.destination
            );
            if segment.length == 0 {
                continue;
            }

            let view = self
                .provider
                .map(&region, segment.source_offset, segment.length)
                .map_err(|error| LoadError::CopyFailed { index, error })?;
            self.memory.copy_to(segment.destination, &view);
            self.provider.unmap(view);
        }

        Ok(LoadedImage {
            slot,
            region,
            descriptor,
        })
    }

    fn read_descriptor(
        &self,
        region: &Region,
        header_offset: u32,
    ) -> Result<ImageDescriptor, LoadError> {
        let available = region
            .length
            .checked_sub(header_offset)
            .ok_or(LoadError::Header(ParseImageHeaderError::SliceTooSmall))?;
        let length = available.min(header_size(MAX_SEGMENTS) as u32);

        let view = self.provider.map(region, header_offset, length)?;
        let descriptor = ImageHeader::parse(&view, region.length)
            .map(|header| ImageDescriptor::from_header(&header));
        self.provider.unmap(view);

        Ok(descriptor?)
    }
}

/// Checks every segment of `descriptor` against `layout` and against the other segments.
fn validate_segments(
    layout: &MemoryLayout<'_>,
    descriptor: &ImageDescriptor,
) -> Result<(), LoadError> {
    let mut destinations = DestinationMap::new();

    for (index, segment) in descriptor.segments().iter().enumerate() {
        let range = AddressRange::new(segment.destination, segment.length);
        let in_class = layout
            .class(segment.kind)
            .iter()
            .any(|class| class.contains(&range));
        if !in_class {
            return Err(LoadError::InvalidDestination {
                index,
                kind: segment.kind,
                destination: segment.destination,
                length: segment.length,
            });
        }

        if layout.reserved.iter().any(|reserved| reserved.overlaps(&range)) {
            return Err(LoadError::OverlapsBootCore {
                index,
                destination: segment.destination,
                length: segment.length,
            });
        }

        destinations.insert(range, index)?;
    }

    let entry = descriptor.entry_address();
    let entry_in_code = descriptor.segments().iter().any(|segment| {
        segment.kind == SegmentKind::Code
            && AddressRange::new(segment.destination, segment.length).contains_address(entry)
    });
    if !entry_in_code {
        return Err(LoadError::EntryOutsideCode { entry });
    }

    Ok(())
}

/// An ordered collection of non-overlapping destination ranges.
struct DestinationMap {
    entries: [(AddressRange, usize); MAX_SEGMENTS],
    length: usize,
}

impl DestinationMap {
    fn new() -> Self {
        Self {
            entries: [(AddressRange::new(0, 0), 0); MAX_SEGMENTS],
            length: 0,
        }
    }

    /// Inserts the destination of segment `index`, checking that it doesn't overlap with the
    /// destination of an already inserted segment.
    fn insert(&mut self, range: AddressRange, index: usize) -> Result<(), LoadError> {
        if range.length == 0 {
            return Ok(());
        }

        let entries = &self.entries[..self.length];
        let position = match entries.binary_search_by_key(&range.base, |(entry, _)| entry.base) {
            Ok(position) => {
                return Err(LoadError::OverlappingSegments {
                    first: entries[position].1,
                    second: index,
                })
            }
            Err(position) => position,
        };

        let neighbours = [
            position.checked_sub(1).and_then(|before| entries.get(before)),
            entries.get(position),
        ];
        if let Some((_, first)) = neighbours
            .into_iter()
            .flatten()
            .find(|(entry, _)| entry.overlaps(&range))
        {
            return Err(LoadError::OverlappingSegments {
                first: *first,
                second: index,
            });
        }

        self.entries.copy_within(position..self.length, position + 1);
        self.entries[position] = (range, index);
        self.length += 1;

        Ok(())
    }
}

/// Various errors that can occur while loading an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The slot does not exist or its area could not be opened.
    SlotUnavailable {
        /// The requested slot.
        slot: ImageSlot,
        /// The error reported by the [`RegionProvider`], if the slot has an area at all.
        error: Option<OpenRegionError>,
    },
    /// The image header could not be mapped.
    Map(MapError),
    /// The image header is malformed or declares out-of-range segments.
    Header(ParseImageHeaderError),
    /// A segment's destination does not lie in memory of the kind it declares.
    InvalidDestination {
        /// The index of the segment.
        index: usize,
        /// The declared kind of the segment.
        kind: SegmentKind,
        /// The destination of the segment.
        destination: u32,
        /// The length of the segment.
        length: u32,
    },
    /// A segment's destination overlaps memory used by the boot core.
    OverlapsBootCore {
        /// The index of the segment.
        index: usize,
        /// The destination of the segment.
        destination: u32,
        /// The length of the segment.
        length: u32,
    },
    /// Two segments share destination bytes.
    OverlappingSegments {
        /// The index of the earlier segment.
        first: usize,
        /// The index of the later segment.
        second: usize,
    },
    /// The entry address does not lie inside a code segment.
    EntryOutsideCode {
        /// The declared entry address.
        entry: u32,
    },
    /// The [`Verifier`] rejected the image.
    Untrusted {
        /// The slot holding the rejected image.
        slot: ImageSlot,
    },
    /// A segment could not be read after copying started.
    CopyFailed {
        /// The index of the segment.
        index: usize,
        /// The mapping error.
        error: MapError,
    },
    /// Control returned from the loaded image.
    TransferDidNotDiverge {
        /// The entry address control was transferred to.
        entry: u32,
    },
}

impl LoadError {
    /// Returns `true` if another slot may be tried after this error.
    ///
    /// Only an unavailable slot or an image the [`Verifier`] rejected qualify. A structural or
    /// destination violation means the slot holds hostile or corrupt input and ends the boot.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::SlotUnavailable { .. } | Self::Untrusted { .. })
    }
}

impl From<MapError> for LoadError {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

impl From<ParseImageHeaderError> for LoadError {
    fn from(value: ParseImageHeaderError) -> Self {
        Self::Header(value)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlotUnavailable { slot, error: None } => {
                write!(f, "{slot} image slot has no flash area")
            }
            Self::SlotUnavailable {
                slot,
                error: Some(error),
            } => write!(f, "{slot} image slot unavailable: {error}"),
            Self::Map(error) => write!(f, "error mapping image header: {error}"),
            Self::Header(error) => write!(f, "{error}"),
            Self::InvalidDestination {
                index,
                kind,
                destination,
                length,
            } => write!(
                f,
                "segment {index} at {destination:#010X} of {length:#X} bytes is outside {kind} \
                memory"
            ),
            Self::OverlapsBootCore {
                index,
                destination,
                length,
            } => write!(
                f,
                "segment {index} at {destination:#010X} of {length:#X} bytes overlaps the boot core"
            ),
            Self::OverlappingSegments { first, second } => {
                write!(f, "segments {first} and {second} overlap")
            }
            Self::EntryOutsideCode { entry } => {
                write!(f, "entry address {entry:#010X} is not inside a code segment")
            }
            Self::Untrusted { slot } => write!(f, "{slot} image failed verification"),
            Self::CopyFailed { index, error } => {
                write!(f, "error reading segment {index}: {error}")
            }
            Self::TransferDidNotDiverge { entry } => {
                write!(f, "control returned from image entry {entry:#010X}")
            }
        }
    }
}

impl error::Error for LoadError {}
