//! Definitions and wrappers for interacting with capora-secure-boot's slot image format.

#![cfg_attr(not(test), no_std)]

use core::{error, fmt, mem};

pub use image_raw::{
    DestinationKind, FlashMode, FlashSize, DEFAULT_HEADER_OFFSET, FLASH_HEADER_MAGIC,
    FLASH_HEADER_OFFSET, LOAD_HEADER_MAGIC, MAX_SEGMENTS,
};
use image_raw::{FlashHeader as RawFlashHeader, LoadHeader, SegmentEntry};

/// The size, in bytes, of the fixed part of an image header.
pub const LOAD_HEADER_SIZE: usize = mem::size_of::<LoadHeader>();
/// The size, in bytes, of a single segment table entry.
pub const SEGMENT_ENTRY_SIZE: usize = mem::size_of::<SegmentEntry>();
/// The size, in bytes, of a [`FlashHeader`][fh].
///
/// [fh]: image_raw::FlashHeader
pub const FLASH_HEADER_SIZE: usize = mem::size_of::<RawFlashHeader>();

/// Returns the size, in bytes, of an image header declaring `segment_count` segments.
pub const fn header_size(segment_count: usize) -> usize {
    LOAD_HEADER_SIZE + segment_count * SEGMENT_ENTRY_SIZE
}

/// A validated view of the image header stored in an image slot.
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct ImageHeader<'slice> {
    slice: &'slice [u8],
}

impl<'slice> ImageHeader<'slice> {
    /// Parses `slice`, which starts at the image header, and returns an [`ImageHeader`] if the
    /// header is well-formed and every segment it declares lies inside a slot of
    /// `slot_length` bytes.
    ///
    /// No trust decision is made here: a successfully parsed header only says that the bytes are
    /// structurally sound.
    ///
    /// # Errors
    /// - [`ParseImageHeaderError::SliceTooSmall`] if the header or its segment table is cut off.
    /// - [`ParseImageHeaderError::MalformedHeader`] if the magic number does not match.
    /// - [`ParseImageHeaderError::TooManySegments`] if more than [`MAX_SEGMENTS`] are declared.
    /// - [`ParseImageHeaderError::UnknownDestinationKind`] for an unrecognized segment kind.
    /// - [`ParseImageHeaderError::RegionOutOfRange`] if a segment's data exceeds the slot.
    pub fn parse(slice: &'slice [u8], slot_length: u32) -> Result<Self, ParseImageHeaderError> {
        if !(LOAD_HEADER_SIZE <= slice.len()) {
            return Err(ParseImageHeaderError::SliceTooSmall);
        }

        let header = Self { slice };
        if header.magic() != LOAD_HEADER_MAGIC {
            return Err(ParseImageHeaderError::MalformedHeader {
                magic: header.magic(),
            });
        }

        let segment_count = header.segment_count();
        if !(segment_count as usize <= MAX_SEGMENTS) {
            return Err(ParseImageHeaderError::TooManySegments { segment_count });
        }

        if !(header_size(segment_count as usize) <= slice.len()) {
            return Err(ParseImageHeaderError::SliceTooSmall);
        }

        for index in 0..segment_count as usize {
            let entry = header.raw_segment(index);
            if entry.destination_kind != DestinationKind::CODE
                && entry.destination_kind != DestinationKind::DATA
            {
                return Err(ParseImageHeaderError::UnknownDestinationKind {
                    index,
                    kind: entry.destination_kind,
                });
            }

            let end = entry.source_offset as u64 + entry.length as u64;
            if !(end <= slot_length as u64) {
                return Err(ParseImageHeaderError::RegionOutOfRange {
                    index,
                    source_offset: entry.source_offset,
                    length: entry.length,
                    slot_length,
                });
            }
        }

        Ok(header)
    }

    /// The magic number of this header.
    pub fn magic(&self) -> u32 {
        self.read_u32(mem::offset_of!(LoadHeader, header_magic))
    }

    /// The address control is transferred to once every segment is loaded.
    pub fn entry_address(&self) -> u32 {
        self.read_u32(mem::offset_of!(LoadHeader, entry_address))
    }

    /// The number of segments this header declares.
    pub fn segment_count(&self) -> u32 {
        self.read_u32(mem::offset_of!(LoadHeader, segment_count))
    }

    /// Returns the [`Segment`] at `index`, or [`None`] if out of bounds.
    pub fn segment(&self, index: usize) -> Option<Segment> {
        if !(index < self.segment_count() as usize) {
            return None;
        }

        let entry = self.raw_segment(index);
        let kind = match entry.destination_kind {
            DestinationKind::CODE => SegmentKind::Code,
            _ => SegmentKind::Data,
        };

        Some(Segment {
            source_offset: entry.source_offset,
            length: entry.length,
            destination: entry.destination_address,
            kind,
        })
    }

    /// An [`Iterator`] over the segments of this header, in declaration order.
    pub fn segments(&self) -> SegmentIter<'slice> {
        SegmentIter {
            header: *self,
            index: 0,
        }
    }

    fn raw_segment(&self, index: usize) -> SegmentEntry {
        let base = header_size(index);
        SegmentEntry {
            source_offset: self.read_u32(base + mem::offset_of!(SegmentEntry, source_offset)),
            length: self.read_u32(base + mem::offset_of!(SegmentEntry, length)),
            destination_address: self
                .read_u32(base + mem::offset_of!(SegmentEntry, destination_address)),
            destination_kind: DestinationKind(
                self.read_u32(base + mem::offset_of!(SegmentEntry, destination_kind)),
            ),
        }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let bytes = self.slice[offset..]
            .first_chunk::<4>()
            .expect("parsing bounds checking failed");
        u32::from_le_bytes(*bytes)
    }
}

impl fmt::Debug for ImageHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("ImageHeader");

        debug_struct.field("magic", &format_args!("{:#X}", self.magic()));
        debug_struct.field("entry_address", &format_args!("{:#X}", self.entry_address()));
        debug_struct.field("segment_count", &self.segment_count());

        debug_struct.finish()
    }
}

/// Various errors that can occur while parsing an [`ImageHeader`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ParseImageHeaderError {
    /// The given slice is too small to hold the header and its segment table.
    SliceTooSmall,
    /// The magic number of the header does not match [`LOAD_HEADER_MAGIC`].
    MalformedHeader {
        /// The magic number that was found.
        magic: u32,
    },
    /// The header declares more than [`MAX_SEGMENTS`] segments.
    TooManySegments {
        /// The declared number of segments.
        segment_count: u32,
    },
    /// A segment declares a destination kind that is not recognized.
    UnknownDestinationKind {
        /// The index of the segment.
        index: usize,
        /// The unrecognized kind.
        kind: DestinationKind,
    },
    /// A segment's source bytes extend past the end of the image slot.
    RegionOutOfRange {
        /// The index of the segment.
        index: usize,
        /// The declared offset of the segment's data.
        source_offset: u32,
        /// The declared length of the segment's data.
        length: u32,
        /// The length of the image slot.
        slot_length: u32,
    },
}

impl ParseImageHeaderError {
    /// Returns `true` if the header itself is malformed, as opposed to declaring bounds that do
    /// not fit the slot.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::RegionOutOfRange { .. })
    }
}

impl fmt::Display for ParseImageHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SliceTooSmall => f.pad("image header is truncated"),
            Self::MalformedHeader { magic } => {
                write!(f, "malformed image header: bad magic {magic:#010X}")
            }
            Self::TooManySegments { segment_count } => write!(
                f,
                "malformed image header: {segment_count} segments declared, at most \
                {MAX_SEGMENTS} supported"
            ),
            Self::UnknownDestinationKind { index, kind } => write!(
                f,
                "malformed image header: segment {index} has unknown destination kind {}",
                kind.0
            ),
            Self::RegionOutOfRange {
                index,
                source_offset,
                length,
                slot_length,
            } => write!(
                f,
                "segment {index} at offset {source_offset:#X} of {length:#X} bytes does not fit \
                in slot of {slot_length:#X} bytes"
            ),
        }
    }
}

impl error::Error for ParseImageHeaderError {}

/// An [`Iterator`] over the [`Segment`]s of an [`ImageHeader`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct SegmentIter<'slice> {
    header: ImageHeader<'slice>,
    index: usize,
}

impl Iterator for SegmentIter<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.header.segment(self.index)?;
        self.index += 1;
        Some(segment)
    }
}

/// A contiguous range of an image that is relocated to a destination address before execution.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Segment {
    /// The offset, in bytes, from the start of the image slot to the segment's data.
    pub source_offset: u32,
    /// The size, in bytes, of the segment.
    pub length: u32,
    /// The address the segment is copied to.
    pub destination: u32,
    /// The kind of memory the destination lies in.
    pub kind: SegmentKind,
}

/// The kind of memory a [`Segment`] is loaded into.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SegmentKind {
    /// Execute-capable memory.
    Code,
    /// Data memory.
    Data,
}

impl SegmentKind {
    fn raw(self) -> DestinationKind {
        match self {
            Self::Code => DestinationKind::CODE,
            Self::Data => DestinationKind::DATA,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => f.pad("code"),
            Self::Data => f.pad("data"),
        }
    }
}

/// Accumulates [`Segment`]s and writes the image header that declares them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageHeaderWriter {
    entry_address: u32,
    segments: [Segment; MAX_SEGMENTS],
    count: usize,
}

impl ImageHeaderWriter {
    /// Creates a new [`ImageHeaderWriter`] declaring `entry_address` and no segments.
    pub const fn new(entry_address: u32) -> Self {
        Self {
            entry_address,
            segments: [Segment {
                source_offset: 0,
                length: 0,
                destination: 0,
                kind: SegmentKind::Data,
            }; MAX_SEGMENTS],
            count: 0,
        }
    }

    /// Appends `segment` to the segment table.
    ///
    /// # Errors
    /// Returns [`EncodeImageHeaderError::TooManySegments`] if the table is already full.
    pub fn push(&mut self, segment: Segment) -> Result<(), EncodeImageHeaderError> {
        let Some(slot) = self.segments.get_mut(self.count) else {
            return Err(EncodeImageHeaderError::TooManySegments {
                segment_count: self.count + 1,
            });
        };

        *slot = segment;
        self.count += 1;
        Ok(())
    }

    /// The segments appended so far.
    pub fn segments(&self) -> &[Segment] {
        &self.segments[..self.count]
    }

    /// The size, in bytes, of the header this writer produces.
    pub fn encoded_len(&self) -> usize {
        header_size(self.count)
    }

    /// Writes the header into the start of `out`, returning the number of bytes written.
    ///
    /// # Errors
    /// Returns [`EncodeImageHeaderError::BufferTooSmall`] if `out` cannot hold the header.
    pub fn write(&self, out: &mut [u8]) -> Result<usize, EncodeImageHeaderError> {
        encode_header(self.entry_address, self.segments(), out)
    }
}

/// Encodes an image header declaring `entry_address` and `segments` into the start of `out`,
/// returning the number of bytes written.
///
/// # Errors
/// - [`EncodeImageHeaderError::TooManySegments`] if more than [`MAX_SEGMENTS`] are given.
/// - [`EncodeImageHeaderError::BufferTooSmall`] if `out` cannot hold the header.
pub fn encode_header(
    entry_address: u32,
    segments: &[Segment],
    out: &mut [u8],
) -> Result<usize, EncodeImageHeaderError> {
    if !(segments.len() <= MAX_SEGMENTS) {
        return Err(EncodeImageHeaderError::TooManySegments {
            segment_count: segments.len(),
        });
    }

    let size = header_size(segments.len());
    if !(size <= out.len()) {
        return Err(EncodeImageHeaderError::BufferTooSmall {
            required: size,
            available: out.len(),
        });
    }

    let mut write_u32 = |offset: usize, value: u32| {
        out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    };

    write_u32(mem::offset_of!(LoadHeader, header_magic), LOAD_HEADER_MAGIC);
    write_u32(mem::offset_of!(LoadHeader, entry_address), entry_address);
    write_u32(
        mem::offset_of!(LoadHeader, segment_count),
        segments.len() as u32,
    );

    for (index, segment) in segments.iter().enumerate() {
        let base = header_size(index);
        write_u32(
            base + mem::offset_of!(SegmentEntry, source_offset),
            segment.source_offset,
        );
        write_u32(base + mem::offset_of!(SegmentEntry, length), segment.length);
        write_u32(
            base + mem::offset_of!(SegmentEntry, destination_address),
            segment.destination,
        );
        write_u32(
            base + mem::offset_of!(SegmentEntry, destination_kind),
            segment.kind.raw().0,
        );
    }

    Ok(size)
}

/// Various errors that can occur while encoding an image header.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum EncodeImageHeaderError {
    /// More than [`MAX_SEGMENTS`] segments were given.
    TooManySegments {
        /// The number of segments given.
        segment_count: usize,
    },
    /// The output buffer is too small to hold the header.
    BufferTooSmall {
        /// The number of bytes the header requires.
        required: usize,
        /// The number of bytes available.
        available: usize,
    },
}

impl fmt::Display for EncodeImageHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManySegments { segment_count } => write!(
                f,
                "{segment_count} segments given, at most {MAX_SEGMENTS} supported"
            ),
            Self::BufferTooSmall {
                required,
                available,
            } => write!(
                f,
                "header requires {required} bytes but only {available} are available"
            ),
        }
    }
}

impl error::Error for EncodeImageHeaderError {}

/// The layout of the flash chip, as described by the boot image's own header.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FlashGeometry {
    /// The size, in bytes, of the flash chip.
    pub size: u32,
    /// The flash interface mode.
    pub mode: FlashMode,
    /// The raw flash frequency code.
    pub speed: u8,
}

impl FlashGeometry {
    /// The size of one erase sector, in bytes.
    pub const SECTOR_SIZE: u32 = 0x1000;
    /// The size of one erase block, in bytes.
    pub const BLOCK_SIZE: u32 = 0x1_0000;
    /// The size of one program page, in bytes.
    pub const PAGE_SIZE: u32 = 0x100;
}

/// Parses the boot image's flash header and returns the [`FlashGeometry`] it describes.
///
/// Unknown size codes fall back to a 2 MiB chip.
///
/// # Errors
/// - [`ParseFlashHeaderError::SliceTooSmall`] if `slice` cannot hold a flash header.
/// - [`ParseFlashHeaderError::BadMagic`] if the magic byte does not match.
pub fn parse_flash_header(slice: &[u8]) -> Result<FlashGeometry, ParseFlashHeaderError> {
    let Some(header) = slice.first_chunk::<FLASH_HEADER_SIZE>() else {
        return Err(ParseFlashHeaderError::SliceTooSmall);
    };

    let magic = header[mem::offset_of!(RawFlashHeader, magic)];
    if magic != FLASH_HEADER_MAGIC {
        return Err(ParseFlashHeaderError::BadMagic { magic });
    }

    let speed_size = header[mem::offset_of!(RawFlashHeader, flash_speed_size)];
    let size_mib = match FlashSize(speed_size >> 4) {
        FlashSize::MIB_1 => 1,
        FlashSize::MIB_2 => 2,
        FlashSize::MIB_4 => 4,
        FlashSize::MIB_8 => 8,
        FlashSize::MIB_16 => 16,
        _ => 2,
    };

    Ok(FlashGeometry {
        size: size_mib * 0x10_0000,
        mode: FlashMode(header[mem::offset_of!(RawFlashHeader, flash_mode)]),
        speed: speed_size & 0xF,
    })
}

/// Encodes a flash header describing a chip of `size` driven in `mode` at frequency code `speed`.
///
/// Only the low nibble of `speed` is kept.
pub fn encode_flash_header(
    size: FlashSize,
    mode: FlashMode,
    speed: u8,
    entry_address: u32,
) -> [u8; FLASH_HEADER_SIZE] {
    let mut header = [0; FLASH_HEADER_SIZE];
    header[mem::offset_of!(RawFlashHeader, magic)] = FLASH_HEADER_MAGIC;
    header[mem::offset_of!(RawFlashHeader, flash_mode)] = mode.0;
    header[mem::offset_of!(RawFlashHeader, flash_speed_size)] = (size.0 << 4) | (speed & 0xF);

    let entry_offset = mem::offset_of!(RawFlashHeader, entry_address);
    header[entry_offset..entry_offset + 4].copy_from_slice(&entry_address.to_le_bytes());
    header
}

/// Various errors that can occur while parsing the flash header.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ParseFlashHeaderError {
    /// The given slice is too small.
    SliceTooSmall,
    /// The magic byte does not match [`FLASH_HEADER_MAGIC`].
    BadMagic {
        /// The magic byte that was found.
        magic: u8,
    },
}

impl fmt::Display for ParseFlashHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SliceTooSmall => f.pad("flash header is truncated"),
            Self::BadMagic { magic } => write!(f, "flash header has bad magic {magic:#04X}"),
        }
    }
}

impl error::Error for ParseFlashHeaderError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(source_offset: u32, length: u32, destination: u32) -> Segment {
        Segment {
            source_offset,
            length,
            destination,
            kind: SegmentKind::Code,
        }
    }

    fn encoded(entry: u32, segments: &[Segment]) -> Vec<u8> {
        let mut buffer = vec![0; header_size(segments.len())];
        encode_header(entry, segments, &mut buffer).unwrap();
        buffer
    }

    #[test]
    fn parses_encoded_header() {
        let segments = [
            code(0x100, 0x40, 0x1000_0000),
            Segment {
                source_offset: 0x140,
                length: 0x20,
                destination: 0x3800_0000,
                kind: SegmentKind::Data,
            },
        ];
        let bytes = encoded(0x1000_0001, &segments);

        let header = ImageHeader::parse(&bytes, 0x1000).unwrap();
        assert_eq!(header.entry_address(), 0x1000_0001);
        assert_eq!(header.segment_count(), 2);
        assert!(header.segments().eq(segments.iter().copied()));
        assert_eq!(header.segment(2), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encoded(0, &[code(0x100, 0x40, 0x1000_0000)]);
        bytes[..4].copy_from_slice(&0xABAD_1DEAu32.to_le_bytes());

        let error = ImageHeader::parse(&bytes, 0x1000).unwrap_err();
        assert_eq!(
            error,
            ParseImageHeaderError::MalformedHeader { magic: 0xABAD_1DEA }
        );
        assert!(error.is_malformed());
    }

    #[test]
    fn rejects_truncated_segment_table() {
        let bytes = encoded(0, &[code(0, 4, 0), code(4, 4, 4)]);

        assert_eq!(
            ImageHeader::parse(&bytes[..header_size(1)], 0x1000),
            Err(ParseImageHeaderError::SliceTooSmall)
        );
        assert_eq!(
            ImageHeader::parse(&bytes[..8], 0x1000),
            Err(ParseImageHeaderError::SliceTooSmall)
        );
    }

    #[test]
    fn rejects_segment_past_slot_end() {
        let bytes = encoded(0, &[code(0x100, 0x40, 0), code(0xFF0, 0x20, 0x100)]);

        let error = ImageHeader::parse(&bytes, 0x1000).unwrap_err();
        assert_eq!(
            error,
            ParseImageHeaderError::RegionOutOfRange {
                index: 1,
                source_offset: 0xFF0,
                length: 0x20,
                slot_length: 0x1000,
            }
        );
        assert!(!error.is_malformed());
    }

    #[test]
    fn segment_bounds_do_not_wrap() {
        let bytes = encoded(0, &[code(u32::MAX, 2, 0)]);

        assert!(matches!(
            ImageHeader::parse(&bytes, u32::MAX),
            Err(ParseImageHeaderError::RegionOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_excess_segments_and_unknown_kinds() {
        let mut bytes = encoded(0, &[code(0, 4, 0)]);
        bytes[8..12].copy_from_slice(&(MAX_SEGMENTS as u32 + 1).to_le_bytes());
        assert_eq!(
            ImageHeader::parse(&bytes, 0x1000),
            Err(ParseImageHeaderError::TooManySegments {
                segment_count: MAX_SEGMENTS as u32 + 1
            })
        );

        let mut bytes = encoded(0, &[code(0, 4, 0)]);
        let kind_offset = LOAD_HEADER_SIZE + mem::offset_of!(SegmentEntry, destination_kind);
        bytes[kind_offset..kind_offset + 4].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(
            ImageHeader::parse(&bytes, 0x1000),
            Err(ParseImageHeaderError::UnknownDestinationKind {
                index: 0,
                kind: DestinationKind(7)
            })
        );
    }

    #[test]
    fn encode_checks_buffer_size() {
        let mut buffer = [0; LOAD_HEADER_SIZE];
        assert_eq!(
            encode_header(0, &[code(0, 4, 0)], &mut buffer),
            Err(EncodeImageHeaderError::BufferTooSmall {
                required: header_size(1),
                available: LOAD_HEADER_SIZE,
            })
        );
    }

    #[test]
    fn writer_matches_encoder() {
        let segment = code(0x40, 0x10, 0x1000_0000);
        let mut writer = ImageHeaderWriter::new(0x1000_0009);
        writer.push(segment).unwrap();

        let mut buffer = vec![0; writer.encoded_len()];
        assert_eq!(writer.write(&mut buffer), Ok(header_size(1)));
        assert_eq!(buffer, encoded(0x1000_0009, &[segment]));

        for _ in 1..MAX_SEGMENTS {
            writer.push(segment).unwrap();
        }
        assert_eq!(
            writer.push(segment),
            Err(EncodeImageHeaderError::TooManySegments {
                segment_count: MAX_SEGMENTS + 1
            })
        );
    }

    #[test]
    fn flash_geometry_from_size_code() {
        let header = [FLASH_HEADER_MAGIC, 3, FlashMode::DIO.0, 0x3F, 0, 0, 0, 0];
        let geometry = parse_flash_header(&header).unwrap();
        assert_eq!(geometry.size, 8 * 0x10_0000);
        assert_eq!(geometry.mode, FlashMode::DIO);
        assert_eq!(geometry.speed, 0xF);

        let unknown_size = [FLASH_HEADER_MAGIC, 0, 0, 0x90, 0, 0, 0, 0];
        assert_eq!(parse_flash_header(&unknown_size).unwrap().size, 0x20_0000);
    }

    #[test]
    fn encoded_flash_header_parses() {
        let header = encode_flash_header(FlashSize::MIB_4, FlashMode::QIO, 0x12, 0x1000_0000);
        assert_eq!(header[0], FLASH_HEADER_MAGIC);
        assert_eq!(&header[4..], &0x1000_0000u32.to_le_bytes());

        let geometry = parse_flash_header(&header).unwrap();
        assert_eq!(geometry.size, 4 * 0x10_0000);
        assert_eq!(geometry.mode, FlashMode::QIO);
        assert_eq!(geometry.speed, 0x2);
    }

    #[test]
    fn flash_header_errors() {
        assert_eq!(
            parse_flash_header(&[FLASH_HEADER_MAGIC; 4]),
            Err(ParseFlashHeaderError::SliceTooSmall)
        );
        assert_eq!(
            parse_flash_header(&[0xFF; FLASH_HEADER_SIZE]),
            Err(ParseFlashHeaderError::BadMagic { magic: 0xFF })
        );
    }
}
