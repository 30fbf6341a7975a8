//! Command line parsing and [`Action`] construction.

use core::{error, fmt, num::ParseIntError};
use std::path::PathBuf;

use image::{SegmentKind, DEFAULT_HEADER_OFFSET};

/// The action to carry out.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Action {
    /// Pack segment payloads into a slot image.
    Pack {
        /// The path the slot image is written to.
        output: PathBuf,
        /// The entry address of the image.
        entry: u32,
        /// The offset of the image header inside the slot.
        header_offset: u32,
        /// The segments to pack, in declaration order.
        segments: Vec<SegmentArgument>,
    },
    /// Print the header of a slot image.
    Inspect {
        /// The path of the slot image.
        path: PathBuf,
        /// The offset of the image header inside the slot.
        header_offset: u32,
    },
}

/// Parses arguments to construct an [`Action`].
pub fn parse_arguments() -> Action {
    let mut matches = command_parser().get_matches();
    let (subcommand_name, subcommand_matches) =
        matches.remove_subcommand().expect("subcommand required");
    match subcommand_name.as_str() {
        "pack" => parse_pack_arguments(subcommand_matches),
        "inspect" => parse_inspect_arguments(subcommand_matches),
        name => unreachable!("unexpected subcommand {name:?}"),
    }
}

/// Parses subcommand arguments for the [`Action::Pack`] subcommand.
pub fn parse_pack_arguments(mut matches: clap::ArgMatches) -> Action {
    let output = matches
        .remove_one::<PathBuf>("output")
        .expect("output is a required argument");
    let entry = matches
        .remove_one::<u32>("entry")
        .expect("entry is a required argument");
    let header_offset = matches
        .remove_one::<u32>("header-offset")
        .unwrap_or(DEFAULT_HEADER_OFFSET);
    let segments = matches
        .remove_many::<SegmentArgument>("segment")
        .map(|iter| iter.collect::<Vec<SegmentArgument>>())
        .unwrap_or(Vec::new());

    Action::Pack {
        output,
        entry,
        header_offset,
        segments,
    }
}

/// Parses subcommand arguments for the [`Action::Inspect`] subcommand.
pub fn parse_inspect_arguments(mut matches: clap::ArgMatches) -> Action {
    let path = matches
        .remove_one::<PathBuf>("slot")
        .expect("slot is a required argument");
    let header_offset = matches
        .remove_one::<u32>("header-offset")
        .unwrap_or(DEFAULT_HEADER_OFFSET);

    Action::Inspect {
        path,
        header_offset,
    }
}

/// Returns the clap command parser.
pub fn command_parser() -> clap::Command {
    let header_offset_arg = clap::Arg::new("header-offset")
        .help("The offset of the image header inside the slot")
        .long("header-offset")
        .value_parser(parse_address)
        .value_name("OFFSET")
        .value_hint(clap::builder::ValueHint::Other);

    let output_arg = clap::Arg::new("output")
        .help("The path the slot image is written to")
        .long("output")
        .short('o')
        .value_parser(clap::builder::PathBufValueParser::new())
        .value_name("OUTPUT")
        .value_hint(clap::builder::ValueHint::FilePath)
        .required(true);

    let entry_arg = clap::Arg::new("entry")
        .help("The address control is transferred to after loading")
        .long("entry")
        .short('e')
        .value_parser(parse_address)
        .value_name("ADDRESS")
        .value_hint(clap::builder::ValueHint::Other)
        .required(true);

    let segment_arg = clap::Arg::new("segment")
        .help("A segment to pack, as `kind:destination:path` where kind is `code` or `data`")
        .long("segment")
        .short('s')
        .value_parser(parse_segment_argument)
        .value_name("SEGMENT")
        .value_hint(clap::builder::ValueHint::Other)
        .action(clap::ArgAction::Append);

    let pack_subcommand = clap::Command::new("pack")
        .about("Packs segment payloads into a slot image")
        .arg_required_else_help(true)
        .arg(output_arg)
        .arg(entry_arg)
        .arg(segment_arg)
        .arg(header_offset_arg.clone());

    let slot_arg = clap::Arg::new("slot")
        .help("The path of the slot image")
        .value_parser(clap::builder::PathBufValueParser::new())
        .value_name("SLOT")
        .value_hint(clap::builder::ValueHint::FilePath)
        .required(true);

    let inspect_subcommand = clap::Command::new("inspect")
        .about("Prints the image header of a slot image")
        .arg_required_else_help(true)
        .arg(slot_arg)
        .arg(header_offset_arg);

    clap::Command::new("capora-image-ctl")
        .about("Utility for managing capora-secure-boot slot images")
        .subcommand(pack_subcommand)
        .subcommand(inspect_subcommand)
        .subcommand_required(true)
        .arg_required_else_help(true)
}

/// A segment payload to be packed into a slot image.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SegmentArgument {
    /// The kind of memory the segment is loaded into.
    pub kind: SegmentKind,
    /// The address the segment is loaded at.
    pub destination: u32,
    /// The path to the segment payload.
    pub file_path: PathBuf,
}

/// Parses a supplied [`str`] of the form `kind:destination:path` into a [`SegmentArgument`].
pub fn parse_segment_argument(input: &str) -> Result<SegmentArgument, ParseSegmentArgumentError> {
    let (kind, remaining) = input
        .split_once(':')
        .ok_or(ParseSegmentArgumentError::MissingDestination)?;
    let (destination, path) = remaining
        .split_once(':')
        .ok_or(ParseSegmentArgumentError::MissingPath)?;

    let kind = match kind {
        "code" => SegmentKind::Code,
        "data" => SegmentKind::Data,
        kind => return Err(ParseSegmentArgumentError::UnsupportedKind(kind.to_owned())),
    };
    let destination =
        parse_address(destination).map_err(ParseSegmentArgumentError::InvalidDestination)?;
    if path.is_empty() {
        return Err(ParseSegmentArgumentError::MissingPath);
    }

    Ok(SegmentArgument {
        kind,
        destination,
        file_path: PathBuf::from(path),
    })
}

/// Various errors that can occur when parsing a [`SegmentArgument`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseSegmentArgumentError {
    /// The string does not contain a destination address.
    MissingDestination,
    /// The string does not contain a payload path.
    MissingPath,
    /// The given segment kind is not supported.
    UnsupportedKind(String),
    /// The destination address is not a valid 32-bit address.
    InvalidDestination(ParseIntError),
}

impl fmt::Display for ParseSegmentArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDestination => {
                f.write_str("missing destination: format is `kind:destination:path`")
            }
            Self::MissingPath => f.write_str("missing path: format is `kind:destination:path`"),
            Self::UnsupportedKind(kind) => {
                write!(f, "segment kind `{kind}` is not supported, use `code` or `data`")
            }
            Self::InvalidDestination(error) => write!(f, "invalid destination address: {error}"),
        }
    }
}

impl error::Error for ParseSegmentArgumentError {}

/// Parses a decimal or `0x`-prefixed hexadecimal 32-bit value.
pub fn parse_address(input: &str) -> Result<u32, ParseIntError> {
    match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => input.replace('_', "").parse::<u32>(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_argument() {
        assert_eq!(
            parse_segment_argument("code:0x1000_0000:target/app.text"),
            Ok(SegmentArgument {
                kind: SegmentKind::Code,
                destination: 0x1000_0000,
                file_path: PathBuf::from("target/app.text"),
            })
        );
        assert_eq!(
            parse_segment_argument("data"),
            Err(ParseSegmentArgumentError::MissingDestination)
        );
        assert_eq!(
            parse_segment_argument("data:4096"),
            Err(ParseSegmentArgumentError::MissingPath)
        );
        assert_eq!(
            parse_segment_argument("bss:0:x"),
            Err(ParseSegmentArgumentError::UnsupportedKind("bss".to_owned()))
        );
        assert!(matches!(
            parse_segment_argument("data:0x1_0000_0000:x"),
            Err(ParseSegmentArgumentError::InvalidDestination(_))
        ));
    }

    #[test]
    fn pack_defaults_header_offset() {
        let matches = command_parser().get_matches_from([
            "capora-image-ctl",
            "pack",
            "--output",
            "slot.bin",
            "--entry",
            "0x10000009",
            "--segment",
            "code:0x10000000:app.bin",
        ]);
        let (_, matches) = matches.subcommand().unwrap();

        assert_eq!(
            parse_pack_arguments(matches.clone()),
            Action::Pack {
                output: PathBuf::from("slot.bin"),
                entry: 0x1000_0009,
                header_offset: DEFAULT_HEADER_OFFSET,
                segments: vec![SegmentArgument {
                    kind: SegmentKind::Code,
                    destination: 0x1000_0000,
                    file_path: PathBuf::from("app.bin"),
                }],
            }
        );
    }
}
