//! Helper executable for packing and inspecting capora-secure-boot slot images.

use std::{path::PathBuf, process::ExitCode};

use cli::{parse_arguments, Action, SegmentArgument};
use pack::{build_slot_image, inspect_slot_image, write_slot_image, PackError, Payload};

pub mod cli;
pub mod pack;

fn main() -> ExitCode {
    let result = match parse_arguments() {
        Action::Pack {
            output,
            entry,
            header_offset,
            segments,
        } => pack(output, entry, header_offset, segments),
        Action::Inspect {
            path,
            header_offset,
        } => inspect(path, header_offset),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

/// Reads every segment payload and writes the packed slot image to `output`.
fn pack(
    output: PathBuf,
    entry: u32,
    header_offset: u32,
    segments: Vec<SegmentArgument>,
) -> Result<(), PackError> {
    let mut payloads = Vec::with_capacity(segments.len());
    for segment in segments {
        payloads.push(Payload {
            kind: segment.kind,
            destination: segment.destination,
            data: std::fs::read(&segment.file_path)?,
        });
    }

    let image = build_slot_image(entry, header_offset, &payloads)?;
    write_slot_image(&output, &image)?;

    println!(
        "packed {} segments into \"{}\" ({:#X} bytes)",
        payloads.len(),
        output.display(),
        image.len()
    );
    Ok(())
}

/// Prints the image header stored in the slot image at `path`.
fn inspect(path: PathBuf, header_offset: u32) -> Result<(), PackError> {
    let image = std::fs::read(&path)?;
    let header = inspect_slot_image(&image, header_offset)?;

    println!("{header:#?}");
    for (index, segment) in header.segments().enumerate() {
        println!(
            "segment {index}: {:<4} offset={:#010X} length={:#010X} destination={:#010X}",
            segment.kind, segment.source_offset, segment.length, segment.destination
        );
    }

    Ok(())
}
