//! Command line parsing and [`Action`] construction.

use std::path::PathBuf;

/// The action to carry out.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Action {
    /// Build capora-secure-boot.
    Build {
        /// The board to build for.
        board: Board,
        /// Whether to build in release mode.
        release: bool,
    },
    /// Build and run capora-secure-boot with the test application in its primary slot.
    Run {
        /// The board to emulate.
        board: Board,
        /// Whether to build in release mode.
        release: bool,
        /// The objcopy used to extract the test application's loadable bytes.
        objcopy: PathBuf,
    },
}

/// Parses arguments to construct an [`Action`].
pub fn parse_arguments() -> Action {
    let mut matches = command_parser().get_matches();
    let (subcommand_name, subcommand_matches) =
        matches.remove_subcommand().expect("subcommand required");
    match subcommand_name.as_str() {
        "build" => parse_build_arguments(subcommand_matches),
        "run" => parse_run_arguments(subcommand_matches),
        name => unreachable!("unexpected subcommand {name:?}"),
    }
}

/// Parses subcommand arguments for the [`Action::Build`] subcommand.
pub fn parse_build_arguments(mut matches: clap::ArgMatches) -> Action {
    let board = matches
        .remove_one::<Board>("board")
        .expect("board is a required argument");
    let release = matches.get_flag("release");

    Action::Build { board, release }
}

/// Parses subcommand arguments for the [`Action::Run`] subcommand.
pub fn parse_run_arguments(mut matches: clap::ArgMatches) -> Action {
    let board = matches
        .remove_one::<Board>("board")
        .expect("board is a required argument");
    let release = matches.get_flag("release");
    let objcopy = matches
        .remove_one::<PathBuf>("objcopy")
        .expect("objcopy has a default value");

    Action::Run {
        board,
        release,
        objcopy,
    }
}

/// Returns the clap command parser.
pub fn command_parser() -> clap::Command {
    let board_arg = clap::Arg::new("board")
        .long("board")
        .value_parser(clap::builder::EnumValueParser::<Board>::new())
        .default_value("an505");

    let release_arg = clap::Arg::new("release")
        .help("Build the firmware in release mode")
        .long("release")
        .short('r')
        .action(clap::ArgAction::SetTrue);

    let objcopy_arg = clap::Arg::new("objcopy")
        .help("The objcopy used to flatten the test application")
        .long("objcopy")
        .value_parser(clap::builder::PathBufValueParser::new())
        .value_name("OBJCOPY")
        .value_hint(clap::builder::ValueHint::CommandName)
        .default_value("arm-none-eabi-objcopy");

    let build_subcommand = clap::Command::new("build")
        .about("Builds capora-secure-boot")
        .arg(board_arg.clone())
        .arg(release_arg.clone());

    let run_subcommand = clap::Command::new("run")
        .about("Builds and runs capora-secure-boot under QEMU")
        .arg(board_arg)
        .arg(release_arg)
        .arg(objcopy_arg);

    clap::Command::new("xtask")
        .about("Developer utility for running various tasks on capora-secure-boot")
        .subcommand(build_subcommand)
        .subcommand(run_subcommand)
        .subcommand_required(true)
        .arg_required_else_help(true)
}

/// The boards supported by capora-secure-boot.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Board {
    /// The MPS2 AN505 (Cortex-M33) board.
    An505,
}

impl Board {
    /// Returns the target triple of the firmware for this [`Board`].
    pub fn as_target_triple(&self) -> &'static str {
        match self {
            Self::An505 => "thumbv8m.main-none-eabi",
        }
    }

    /// Returns the textual representation of this [`Board`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::An505 => "an505",
        }
    }

    /// Returns the QEMU machine emulating this [`Board`].
    pub fn qemu_machine(&self) -> &'static str {
        match self {
            Self::An505 => "mps2-an505",
        }
    }
}

impl clap::ValueEnum for Board {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::An505]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::An505 => Some(clap::builder::PossibleValue::new("an505")),
        }
    }
}
