//! Definitions for the on-flash layouts read by capora-secure-boot.
//!
//! All multi-byte fields are little-endian. The parser in the `image` crate and every producer of
//! slot images must agree on these layouts.

#![no_std]

/// The magic number that starts every [`LoadHeader`].
pub const LOAD_HEADER_MAGIC: u32 = 0xACE6_37D3;

/// The default offset, in bytes, from the start of an image slot to its [`LoadHeader`].
///
/// The space before the header is reserved for the outer image header of the update tooling.
pub const DEFAULT_HEADER_OFFSET: u32 = 0x20;

/// The maximum number of [`SegmentEntry`]s a [`LoadHeader`] may declare.
pub const MAX_SEGMENTS: usize = 16;

/// The header found at a fixed offset inside an image slot.
///
/// The header is immediately followed by [`LoadHeader::segment_count`] [`SegmentEntry`]s.
#[repr(C)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct LoadHeader {
    /// Must equal [`LOAD_HEADER_MAGIC`].
    pub header_magic: u32,
    /// The address control is transferred to once all segments are loaded.
    pub entry_address: u32,
    /// The number of [`SegmentEntry`]s following this header.
    pub segment_count: u32,
}

/// A description of one contiguous range of the image that must be copied before execution.
#[repr(C)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct SegmentEntry {
    /// The offset, in bytes, from the start of the image slot to the segment's data.
    pub source_offset: u32,
    /// The size, in bytes, of the segment.
    pub length: u32,
    /// The address the segment must be copied to.
    pub destination_address: u32,
    /// The kind of memory the destination lies in.
    pub destination_kind: DestinationKind,
}

/// The kind of memory a [`SegmentEntry`] is copied to.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct DestinationKind(pub u32);

impl DestinationKind {
    /// The segment is copied into execute-capable memory.
    pub const CODE: Self = Self(0);
    /// The segment is copied into data memory.
    pub const DATA: Self = Self(1);
}

/// The offset, in bytes, of the [`FlashHeader`] from the start of flash.
pub const FLASH_HEADER_OFFSET: u32 = 0x1000;

/// The magic byte that starts a [`FlashHeader`].
pub const FLASH_HEADER_MAGIC: u8 = 0xE9;

/// The header of the boot image itself, describing how the flash chip is wired.
#[repr(C)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FlashHeader {
    /// Must equal [`FLASH_HEADER_MAGIC`].
    pub magic: u8,
    /// The number of segments in the boot image.
    pub segment_count: u8,
    /// The flash interface mode.
    pub flash_mode: u8,
    /// The flash frequency in the low nibble and the [`FlashSize`] code in the high nibble.
    pub flash_speed_size: u8,
    /// The entry address of the boot image.
    pub entry_address: u32,
}

/// Flash chip size codes stored in [`FlashHeader::flash_speed_size`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FlashSize(pub u8);

impl FlashSize {
    /// 1 MiB flash chip.
    pub const MIB_1: Self = Self(0);
    /// 2 MiB flash chip.
    pub const MIB_2: Self = Self(1);
    /// 4 MiB flash chip.
    pub const MIB_4: Self = Self(2);
    /// 8 MiB flash chip.
    pub const MIB_8: Self = Self(3);
    /// 16 MiB flash chip.
    pub const MIB_16: Self = Self(4);
}

/// Flash interface modes stored in [`FlashHeader::flash_mode`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct FlashMode(pub u8);

impl FlashMode {
    /// Quad I/O.
    pub const QIO: Self = Self(0);
    /// Quad output.
    pub const QOUT: Self = Self(1);
    /// Dual I/O.
    pub const DIO: Self = Self(2);
    /// Dual output.
    pub const DOUT: Self = Self(3);
}
