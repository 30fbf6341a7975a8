//! Helper crate for building and testing capora secure boot.

use core::fmt;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use cli::{parse_arguments, Action, Board};
use image::{encode_flash_header, FlashMode, FlashSize, FLASH_HEADER_OFFSET};

pub mod cli;

/// The address the firmware is linked at, see `secure-boot/memory.x`.
const FIRMWARE_BASE: u32 = 0x1000_0000;
/// The address the test application is linked at, see `test-application/memory.x`.
const APPLICATION_BASE: u32 = 0x1004_0000;
/// The size of the emulated flash image.
const FLASH_SIZE: usize = 0x10_0000;
/// The offset of the primary slot inside flash.
const PRIMARY_SLOT_OFFSET: usize = 0x1_0000;
/// The size of the primary slot.
const PRIMARY_SLOT_SIZE: usize = 0x4_0000;
/// The address QEMU maps the flash image at.
const FLASH_LOAD_ADDRESS: u32 = 0x8000_0000;

fn main() {
    match parse_arguments() {
        Action::Build { board, release } => match build(board, release) {
            Ok(path) => println!("firmware located at \"{}\"", path.display()),
            Err(error) => eprintln!("error while building firmware: {error}"),
        },
        Action::Run {
            board,
            release,
            objcopy,
        } => match run(board, release, &objcopy) {
            Ok(()) => {}
            Err(error) => eprintln!("error while running firmware: {error}"),
        },
    };
}

/// Builds capora-secure-boot.
pub fn build(board: Board, release: bool) -> Result<PathBuf, BuildError> {
    build_package("secure-boot", board, release)
}

/// Builds `test-application` for the specified board.
pub fn build_test_application(board: Board) -> Result<PathBuf, BuildError> {
    build_package("test-application", board, false)
}

/// Builds the firmware binary of `package` for `board`.
fn build_package(package: &str, board: Board, release: bool) -> Result<PathBuf, BuildError> {
    let mut cmd = std::process::Command::new("cargo");
    cmd.arg("build");
    cmd.args(["--package", package]);
    cmd.args(["--features", "board"]);

    cmd.args(["--target", board.as_target_triple()]);
    if release {
        cmd.arg("--release");
    }

    let mut binary_location = PathBuf::with_capacity(50);
    binary_location.push("target");
    binary_location.push(board.as_target_triple());
    if release {
        binary_location.push("release");
    } else {
        binary_location.push("debug");
    }
    binary_location.push(package);

    let status = cmd.status()?;
    if !status.success() {
        return Err(BuildError::UnsuccessfulBuild {
            code: status.code(),
        });
    }

    Ok(binary_location)
}

/// Various errors that can occur while building a cargo application.
#[derive(Debug)]
pub enum BuildError {
    /// An error occurred while launching the process.
    ProcessError(std::io::Error),
    /// The build was unsuccessful.
    UnsuccessfulBuild {
        /// The exit code of the child process that was launched.
        code: Option<i32>,
    },
}

impl From<std::io::Error> for BuildError {
    fn from(value: std::io::Error) -> Self {
        Self::ProcessError(value)
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessError(error) => writeln!(f, "error while launching cargo: {error}"),
            Self::UnsuccessfulBuild { code: Some(code) } => {
                writeln!(f, "cargo failed with exit status {code}")
            }
            Self::UnsuccessfulBuild { code: None } => f.write_str("cargo terminated by signal"),
        }
    }
}

/// Builds capora-secure-boot and runs it under QEMU with the test application in its primary
/// slot.
pub fn run(board: Board, release: bool, objcopy: &Path) -> Result<(), RunError> {
    let firmware = build(board, release).map_err(RunError::BuildFirmwareError)?;
    let test_application =
        build_test_application(board).map_err(RunError::BuildTestApplicationError)?;

    let run_directory = PathBuf::from("run").join(board.as_str());
    std::fs::create_dir_all(&run_directory).map_err(RunError::FlashImageError)?;

    let flat_application = run_directory.join("test-application.bin");
    flatten_application(objcopy, &test_application, &flat_application)?;

    let slot = run_directory.join("primary-slot.bin");
    pack_slot(&flat_application, &slot)?;

    let flash = run_directory.join("flash.bin");
    build_flash_image(&slot, &flash).map_err(RunError::FlashImageError)?;

    let mut cmd = std::process::Command::new("qemu-system-arm");

    cmd.args(["-machine", board.qemu_machine()]);
    cmd.args(["-display", "none"]);

    cmd.arg("-kernel").arg(firmware);

    let mut flash_arg = OsString::from("loader,file=");
    flash_arg.push(&flash);
    flash_arg.push(format!(",addr={FLASH_LOAD_ADDRESS:#x}"));
    cmd.arg("-device").arg(flash_arg);

    let mut serial_arg = OsString::from("file:");
    serial_arg.push(run_directory.join("serial.txt"));
    cmd.arg("-serial").arg(serial_arg);

    cmd.arg("-D").arg(run_directory.join("logfile.txt"));

    let status = cmd.status()?;
    if !status.success() {
        return Err(RunError::QemuError {
            code: status.code(),
        });
    }

    Ok(())
}

/// Various errors that can occur while building and running capora-secure-boot.
#[derive(Debug)]
pub enum RunError {
    /// An error occurred while building the firmware.
    BuildFirmwareError(BuildError),
    /// An error occurred while building the test application.
    BuildTestApplicationError(BuildError),
    /// An error occurred while packing the test application into a slot.
    PackError(PackError),
    /// An error occurred while writing the flash image.
    FlashImageError(std::io::Error),
    /// An error ocurred while launching qemu.
    ProcessError(std::io::Error),
    /// QEMU exited with a non-zero exit code.
    QemuError {
        /// The exit code of QEMU.
        code: Option<i32>,
    },
}

impl From<std::io::Error> for RunError {
    fn from(value: std::io::Error) -> Self {
        Self::ProcessError(value)
    }
}

impl From<PackError> for RunError {
    fn from(value: PackError) -> Self {
        Self::PackError(value)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuildFirmwareError(error) => {
                writeln!(f, "error while building capora-secure-boot: {error}")
            }
            Self::BuildTestApplicationError(error) => {
                writeln!(f, "error while building test-application: {error}")
            }
            Self::PackError(error) => {
                writeln!(f, "error while packing test-application: {error}")
            }
            Self::FlashImageError(error) => {
                writeln!(f, "error while writing flash image: {error}")
            }
            Self::ProcessError(error) => writeln!(f, "error while launching QEMU: {error}"),
            Self::QemuError { code: Some(code) } => {
                writeln!(f, "qemu failed with exit status {code}")
            }
            Self::QemuError { code: None } => f.write_str("qemu terminated by signal"),
        }
    }
}

/// Extracts the loadable bytes of the application at `elf_path` into `output`.
pub fn flatten_application(
    objcopy: &Path,
    elf_path: &Path,
    output: &Path,
) -> Result<(), PackError> {
    let mut cmd = std::process::Command::new(objcopy);
    cmd.args(["-O", "binary"]);
    cmd.arg(elf_path).arg(output);

    let status = cmd.status()?;
    if !status.success() {
        return Err(PackError::UnsuccessfulCommand {
            program: "objcopy",
            code: status.code(),
        });
    }

    Ok(())
}

/// Packs the flat application at `application_path` into the slot image at `slot_path`.
pub fn pack_slot(application_path: &Path, slot_path: &Path) -> Result<(), PackError> {
    let mut cmd = std::process::Command::new("cargo");
    cmd.arg("run");

    cmd.args(["--package", "image"]);
    cmd.args(["--features", "ctl"]);
    cmd.arg("--");

    cmd.arg("pack");

    cmd.arg("--output").arg(slot_path);
    cmd.args(["--entry", &format!("{APPLICATION_BASE:#x}")]);
    cmd.arg("--segment").arg(format!(
        "code:{APPLICATION_BASE:#x}:{}",
        application_path.display()
    ));

    let status = cmd.status()?;
    if !status.success() {
        return Err(PackError::UnsuccessfulCommand {
            program: "capora-image-ctl",
            code: status.code(),
        });
    }

    Ok(())
}

/// Various errors that can occur while packing the test application.
#[derive(Debug)]
pub enum PackError {
    /// An error occurred while launching the process.
    ProcessError(std::io::Error),
    /// The process was unsuccessful.
    UnsuccessfulCommand {
        /// The program that failed.
        program: &'static str,
        /// The exit code of the child process that failed.
        code: Option<i32>,
    },
}

impl From<std::io::Error> for PackError {
    fn from(value: std::io::Error) -> Self {
        Self::ProcessError(value)
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessError(error) => writeln!(f, "error while launching process: {error}"),
            Self::UnsuccessfulCommand {
                program,
                code: Some(code),
            } => writeln!(f, "{program} failed with exit status {code}"),
            Self::UnsuccessfulCommand {
                program,
                code: None,
            } => writeln!(f, "{program} terminated by signal"),
        }
    }
}

/// Writes the flash image holding the flash header and the slot image at `slot_path` to
/// `output`.
pub fn build_flash_image(slot_path: &Path, output: &Path) -> Result<(), std::io::Error> {
    let slot = std::fs::read(slot_path)?;
    if slot.len() > PRIMARY_SLOT_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "slot image is {:#x} bytes but the primary slot holds {PRIMARY_SLOT_SIZE:#x}",
                slot.len()
            ),
        ));
    }

    let mut flash = vec![0xFF; FLASH_SIZE];
    let header = encode_flash_header(FlashSize::MIB_1, FlashMode::QIO, 0, FIRMWARE_BASE);
    let header_offset = FLASH_HEADER_OFFSET as usize;
    flash[header_offset..header_offset + header.len()].copy_from_slice(&header);
    flash[PRIMARY_SLOT_OFFSET..PRIMARY_SLOT_OFFSET + slot.len()].copy_from_slice(&slot);

    std::fs::write(output, flash)
}

#[cfg(test)]
mod tests {
    use image::{parse_flash_header, FLASH_HEADER_SIZE};

    use super::*;

    #[test]
    fn flash_image_layout() {
        let directory = tempfile::tempdir().unwrap();
        let slot_path = directory.path().join("slot.bin");
        let flash_path = directory.path().join("flash.bin");
        std::fs::write(&slot_path, [0xA5; 0x40]).unwrap();

        build_flash_image(&slot_path, &flash_path).unwrap();
        let flash = std::fs::read(&flash_path).unwrap();

        assert_eq!(flash.len(), FLASH_SIZE);
        let header_offset = FLASH_HEADER_OFFSET as usize;
        let geometry =
            parse_flash_header(&flash[header_offset..header_offset + FLASH_HEADER_SIZE]).unwrap();
        assert_eq!(geometry.size as usize, FLASH_SIZE);
        assert_eq!(&flash[PRIMARY_SLOT_OFFSET..][..0x40], &[0xA5; 0x40]);
        assert_eq!(flash[PRIMARY_SLOT_OFFSET + 0x40], 0xFF);
    }

    #[test]
    fn oversized_slot_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let slot_path = directory.path().join("slot.bin");
        std::fs::write(&slot_path, vec![0; PRIMARY_SLOT_SIZE + 1]).unwrap();

        let error = build_flash_image(&slot_path, &directory.path().join("flash.bin")).unwrap_err();
        assert_eq!(error.kind(), std::io::ErrorKind::InvalidData);
    }
}
