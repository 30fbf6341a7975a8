//! Slot image construction and inspection.

use core::{error, fmt};
use std::{io::Write, path::Path};

use image::{
    header_size, EncodeImageHeaderError, ImageHeader, ImageHeaderWriter, ParseImageHeaderError,
    Segment, SegmentKind,
};

/// The alignment, in bytes, of every segment payload inside a slot image.
pub const PAYLOAD_ALIGNMENT: usize = 4;

/// A segment payload that has been read into memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    /// The kind of memory the segment is loaded into.
    pub kind: SegmentKind,
    /// The address the segment is loaded at.
    pub destination: u32,
    /// The bytes of the segment.
    pub data: Vec<u8>,
}

/// Lays out a slot image: `header_offset` bytes of padding, the image header, then each payload
/// aligned to [`PAYLOAD_ALIGNMENT`] bytes in declaration order.
pub fn build_slot_image(
    entry: u32,
    header_offset: u32,
    payloads: &[Payload],
) -> Result<Vec<u8>, PackError> {
    let mut writer = ImageHeaderWriter::new(entry);
    let mut cursor = header_offset as usize + header_size(payloads.len());

    for payload in payloads {
        cursor = cursor.next_multiple_of(PAYLOAD_ALIGNMENT);
        let source_offset = u32::try_from(cursor).map_err(|_| PackError::ImageTooLarge)?;
        let length = u32::try_from(payload.data.len()).map_err(|_| PackError::ImageTooLarge)?;
        if payload.destination as u64 + length as u64 > 1 << 32 {
            return Err(PackError::DestinationOverflow {
                destination: payload.destination,
                length,
            });
        }

        writer.push(Segment {
            source_offset,
            length,
            destination: payload.destination,
            kind: payload.kind,
        })?;
        cursor += payload.data.len();
    }

    let slot_length = u32::try_from(cursor).map_err(|_| PackError::ImageTooLarge)?;
    let mut image = vec![0; slot_length as usize];
    writer.write(&mut image[header_offset as usize..])?;
    for (segment, payload) in writer.segments().iter().zip(payloads) {
        let start = segment.source_offset as usize;
        image[start..start + payload.data.len()].copy_from_slice(&payload.data);
    }

    Ok(image)
}

/// Writes `image` to `path` atomically: the bytes land in a temporary file in the same directory
/// which then replaces `path`.
pub fn write_slot_image(path: &Path, image: &[u8]) -> Result<(), PackError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(directory)?;
    file.write_all(image)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;

    Ok(())
}

/// Parses the image header of `image`, which is the full contents of a slot.
pub fn inspect_slot_image(
    image: &[u8],
    header_offset: u32,
) -> Result<ImageHeader<'_>, PackError> {
    let slot_length = u32::try_from(image.len()).map_err(|_| PackError::ImageTooLarge)?;
    let header = image
        .get(header_offset as usize..)
        .ok_or(PackError::Parse(ParseImageHeaderError::SliceTooSmall))?;

    Ok(ImageHeader::parse(header, slot_length)?)
}

/// Various errors that can occur while packing or inspecting a slot image.
#[derive(Debug)]
pub enum PackError {
    /// An error occurred while accessing a file.
    Io(std::io::Error),
    /// The image header could not be encoded.
    Encode(EncodeImageHeaderError),
    /// The image header could not be parsed.
    Parse(ParseImageHeaderError),
    /// The slot image does not fit a 32-bit address space.
    ImageTooLarge,
    /// A segment's destination range wraps the address space.
    DestinationOverflow {
        /// The destination address of the segment.
        destination: u32,
        /// The length of the segment.
        length: u32,
    },
}

impl From<std::io::Error> for PackError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeImageHeaderError> for PackError {
    fn from(value: EncodeImageHeaderError) -> Self {
        Self::Encode(value)
    }
}

impl From<ParseImageHeaderError> for PackError {
    fn from(value: ParseImageHeaderError) -> Self {
        Self::Parse(value)
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "i/o error: {error}"),
            Self::Encode(error) => write!(f, "error encoding image header: {error}"),
            Self::Parse(error) => write!(f, "error parsing image header: {error}"),
            Self::ImageTooLarge => f.write_str("slot image exceeds 4 GiB"),
            Self::DestinationOverflow {
                destination,
                length,
            } => write!(
                f,
                "segment at {destination:#X} of {length:#X} bytes wraps the address space"
            ),
        }
    }
}

impl error::Error for PackError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads() -> Vec<Payload> {
        vec![
            Payload {
                kind: SegmentKind::Code,
                destination: 0x1000_0000,
                data: vec![0xDE, 0xAD, 0xBE],
            },
            Payload {
                kind: SegmentKind::Data,
                destination: 0x3800_0000,
                data: vec![0x55; 8],
            },
        ]
    }

    #[test]
    fn packed_image_parses() {
        let image = build_slot_image(0x1000_0001, 0x20, &payloads()).unwrap();
        let header = inspect_slot_image(&image, 0x20).unwrap();

        assert_eq!(header.entry_address(), 0x1000_0001);
        let segments = header.segments().collect::<Vec<_>>();
        assert_eq!(segments.len(), 2);

        let first_payload = 0x20 + header_size(2);
        assert_eq!(segments[0].source_offset as usize, first_payload);
        assert_eq!(segments[1].source_offset as usize % PAYLOAD_ALIGNMENT, 0);
        assert_eq!(segments[1].kind, SegmentKind::Data);

        let start = segments[0].source_offset as usize;
        assert_eq!(&image[start..start + 3], &[0xDE, 0xAD, 0xBE]);
        assert!(image[..0x20].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn written_image_replaces_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("slot.bin");
        std::fs::write(&path, b"stale").unwrap();

        let image = build_slot_image(0x1000_0001, 0x20, &payloads()).unwrap();
        write_slot_image(&path, &image).unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, image);
        assert!(inspect_slot_image(&written, 0x20).is_ok());
    }

    #[test]
    fn inspect_reports_wrong_offset() {
        let image = build_slot_image(0, 0x20, &payloads()).unwrap();

        assert!(matches!(
            inspect_slot_image(&image, 0),
            Err(PackError::Parse(ParseImageHeaderError::MalformedHeader { magic: 0 }))
        ));
        assert!(matches!(
            inspect_slot_image(&image, image.len() as u32 + 1),
            Err(PackError::Parse(ParseImageHeaderError::SliceTooSmall))
        ));
    }
}
