//! Hardware memory isolation between the boot core and the partitions it hands control to.
//!
//! Protection regions come in two kinds. Static regions are computed from the link-time layout
//! and programmed once by [`IsolationManager::establish_static_boundaries()`]. Dynamic regions
//! belong to a partition: [`IsolationManager::bind()`] validates a partition's assets and returns a
//! [`PartitionBoundaryHandle`], and [`IsolationManager::update()`] reprograms the dynamic regions
//! whenever that partition becomes active.

use core::{error, fmt};

pub mod armv8m;
mod manager;

pub use manager::IsolationManager;

/// The maximum number of hardware protection regions the manager can track.
pub const MAX_REGIONS: usize = 16;
/// The maximum number of partitions that can be bound.
pub const MAX_PARTITIONS: usize = 8;
/// The maximum number of dynamic regions a single partition can own.
pub const MAX_PARTITION_REGIONS: usize = 4;
/// The granule, in bytes, of protection region bases and limits.
pub const REGION_GRANULE: u32 = 32;

/// The access a protection region grants.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AccessClass {
    /// Readable and executable normal memory.
    ReadOnlyAll,
    /// Readable and writable normal memory. Never executable.
    ReadWriteAll,
    /// Readable and writable device memory. Never executable.
    Device,
    /// Readable normal memory. Never executable.
    NoExec,
}

impl AccessClass {
    /// Returns `true` if the region is writable.
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWriteAll | Self::Device)
    }

    /// Returns `true` if the region is executable.
    pub const fn is_executable(self) -> bool {
        matches!(self, Self::ReadOnlyAll)
    }
}

/// The privilege levels a protection region grants access to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RegionPrivilege {
    /// Privileged and unprivileged code.
    AllLevels,
    /// Privileged code only.
    PrivilegedOnly,
}

/// The shareability domain of a protection region.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Shareability {
    /// Not shared.
    NonShareable,
    /// Outer shareable.
    OuterShareable,
    /// Inner shareable.
    InnerShareable,
}

/// The complete description of one hardware protection region.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ProtectionRegionSpec {
    /// The index of the hardware region slot.
    pub index: u8,
    /// The first address covered by the region.
    pub base: u32,
    /// The last address covered by the region, inclusive.
    pub limit: u32,
    /// The access the region grants.
    pub access: AccessClass,
    /// The privilege levels the access is granted to.
    pub privilege: RegionPrivilege,
    /// The shareability domain of the region.
    pub shareability: Shareability,
}

impl ProtectionRegionSpec {
    /// Checks that the region is not inverted and that its bounds lie on [`REGION_GRANULE`]
    /// boundaries.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::Inverted`] or [`ConfigurationError::Unaligned`].
    pub const fn validate(&self) -> Result<(), ConfigurationError> {
        if self.base > self.limit {
            return Err(ConfigurationError::Inverted {
                base: self.base,
                limit: self.limit,
            });
        }

        let mask = REGION_GRANULE - 1;
        if self.base & mask != 0 || self.limit & mask != mask {
            return Err(ConfigurationError::Unaligned {
                base: self.base,
                limit: self.limit,
            });
        }

        Ok(())
    }

    /// Returns `true` if `self` and `other` describe the same protection at possibly different
    /// indices.
    pub fn same_protection(&self, other: &ProtectionRegionSpec) -> bool {
        Self { index: 0, ..*self } == Self { index: 0, ..*other }
    }
}

/// Privilege level of a partition's thread mode.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Privilege {
    /// Privileged execution.
    Privileged,
    /// Unprivileged execution.
    Unprivileged,
}

impl Privilege {
    /// The [`RegionPrivilege`] of regions granted to a partition with this privilege.
    pub const fn region_privilege(self) -> RegionPrivilege {
        match self {
            Self::Privileged => RegionPrivilege::PrivilegedOnly,
            Self::Unprivileged => RegionPrivilege::AllLevels,
        }
    }
}

/// The isolation model enforced between partitions.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum IsolationLevel {
    /// The boot core is isolated from everything else; every partition is privileged.
    One,
    /// Partitions are additionally isolated from each other; only root-of-trust partitions are
    /// privileged.
    Two,
}

/// Flags of a [`PartitionDescriptor`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PartitionFlags(pub u32);

impl PartitionFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The partition belongs to the platform root of trust and runs privileged.
    pub const PSA_ROT: Self = Self(1 << 0);

    /// Returns `true` if every flag in `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The identifier of a named peripheral.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PeripheralId(pub &'static str);

/// The kind of resource an [`AssetDescriptor`] claims.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AssetKind {
    /// A peripheral identified by name.
    NamedPeripheral(PeripheralId),
    /// A peripheral identified by number.
    NumberedPeripheral(u32),
    /// A range of memory inside the static partition memory.
    ///
    /// The static regions already grant access to it, so it never gets a region of its own.
    Memory {
        /// The first address of the range.
        base: u32,
        /// The last address of the range, inclusive.
        limit: u32,
    },
}

/// A resource claimed by a partition.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// The claimed resource.
    pub kind: AssetKind,
}

/// The load-time description of a partition.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PartitionDescriptor<'assets> {
    /// The identifier of the partition.
    pub id: u32,
    /// The flags of the partition.
    pub flags: PartitionFlags,
    /// The resources the partition claims.
    pub assets: &'assets [AssetDescriptor],
}

/// The location of a peripheral in the peripheral protection controllers.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PpcLocation {
    /// The protection controller bank.
    pub bank: u8,
    /// The bit of the peripheral inside the bank.
    pub location: u8,
}

/// An entry in the platform's peripheral allow-list.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct MmioDescriptor {
    /// The name partitions use to claim the peripheral.
    pub name: &'static str,
    /// The number partitions use to claim the peripheral.
    pub number: u32,
    /// The location of the peripheral in the protection controllers, if it has one.
    pub ppc: Option<PpcLocation>,
    /// The first address of the peripheral's register window.
    pub base: u32,
    /// The last address of the peripheral's register window, inclusive.
    pub limit: u32,
}

/// The kind of a statically protected memory range.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StaticRegionKind {
    /// Entry veneers into the boot core.
    Veneers,
    /// Code executable by every partition.
    Code,
    /// Read-only data.
    ReadOnlyData,
    /// The boot core's stack.
    PrivilegedStack,
    /// Partition code.
    PartitionCode,
    /// Partition data and stacks.
    PartitionDataStack,
    /// The partition metadata pointer.
    MetadataPointer,
}

impl StaticRegionKind {
    /// The access granted to a region of this kind.
    pub const fn access(self) -> AccessClass {
        match self {
            Self::Veneers | Self::Code | Self::PartitionCode => AccessClass::ReadOnlyAll,
            Self::ReadOnlyData | Self::MetadataPointer => AccessClass::NoExec,
            Self::PrivilegedStack | Self::PartitionDataStack => AccessClass::ReadWriteAll,
        }
    }

    /// The privilege levels granted access to a region of this kind.
    pub const fn privilege(self) -> RegionPrivilege {
        match self {
            Self::PrivilegedStack => RegionPrivilege::PrivilegedOnly,
            _ => RegionPrivilege::AllLevels,
        }
    }

    /// Returns `true` if partition memory assets may be carved out of this kind of region.
    pub const fn is_partition_memory(self) -> bool {
        matches!(self, Self::PartitionCode | Self::PartitionDataStack)
    }
}

/// A statically protected memory range, taken from the link-time layout.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct StaticRegion {
    /// The kind of the range.
    pub kind: StaticRegionKind,
    /// The first address of the range.
    pub base: u32,
    /// The last address of the range, inclusive.
    pub limit: u32,
}

/// How the protection unit behaves once enabled.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct EnablePolicy {
    /// Privileged accesses that hit no region use the default memory map.
    pub privileged_default_map: bool,
    /// Regions stay enforced while fault handlers and NMI execute.
    pub enforce_in_fault_handlers: bool,
}

/// The narrow interface to the hardware protection unit.
pub trait ProtectionController {
    /// The number of region slots the hardware provides.
    fn region_count(&self) -> usize;

    /// Programs the slot `spec.index` with `spec`.
    fn program(&mut self, spec: &ProtectionRegionSpec);

    /// Disables the slot `index`.
    fn clear(&mut self, index: u8);

    /// Enables the protection unit.
    fn enable(&mut self, policy: EnablePolicy);
}

/// A raw status reported by security hardware.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct HardwareStatus(pub u32);

/// Security attribution and privilege controls of the platform.
pub trait SecurityGate {
    /// Configures security attribution of memory and peripherals.
    ///
    /// # Errors
    /// Returns the [`HardwareStatus`] of the controller that failed to initialize.
    fn init_attribution(&mut self) -> Result<(), HardwareStatus>;

    /// Makes the peripheral at `location` secure, accessible at `privilege` and above.
    fn secure_peripheral(&mut self, location: PpcLocation, privilege: Privilege);

    /// Sets the privilege of thread mode.
    fn set_thread_privilege(&mut self, privilege: Privilege);
}

/// Identifies the dynamic region set a handle refers to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct RegionSetId(pub u8);

impl RegionSetId {
    /// The set of partitions that own no dynamic regions.
    pub const EMPTY: Self = Self(u8::MAX);
}

/// The programmed isolation state of a bound partition.
///
/// Equal handles program identical privilege and region state, so switching between them can be
/// skipped.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PartitionBoundaryHandle {
    /// The thread-mode privilege of the partition.
    pub privilege: Privilege,
    /// The generation of the region set when it was bound.
    pub generation: u32,
    /// The region set of the partition.
    pub region_set: RegionSetId,
}

/// Ways a boundary configuration can be invalid.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A region's base lies above its limit.
    Inverted {
        /// The base of the region.
        base: u32,
        /// The limit of the region.
        limit: u32,
    },
    /// A region's bounds are not aligned to [`REGION_GRANULE`].
    Unaligned {
        /// The base of the region.
        base: u32,
        /// The limit of the region.
        limit: u32,
    },
    /// The protection controller reports more regions than [`MAX_REGIONS`].
    ControllerCapacity {
        /// The reported number of regions.
        reported: usize,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inverted { base, limit } => {
                write!(f, "region base {base:#010X} lies above its limit {limit:#010X}")
            }
            Self::Unaligned { base, limit } => write!(
                f,
                "region {base:#010X}..={limit:#010X} is not aligned to {REGION_GRANULE} bytes"
            ),
            Self::ControllerCapacity { reported } => write!(
                f,
                "protection unit reports {reported} regions, at most {MAX_REGIONS} supported"
            ),
        }
    }
}

impl error::Error for ConfigurationError {}

/// Various errors that can occur while managing isolation boundaries.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum IsolationError {
    /// The boundary configuration is invalid.
    ConfigurationError(ConfigurationError),
    /// More regions are required than the hardware provides.
    RegionCapacityExceeded {
        /// The number of regions required.
        required: usize,
        /// The number of regions available.
        available: usize,
    },
    /// A partition claims an asset that is not in the allow-list.
    AssetNotAllowed {
        /// The partition.
        partition: u32,
        /// The rejected asset.
        asset: AssetDescriptor,
    },
    /// The static boundaries have already been established.
    AlreadyEstablished,
    /// The static boundaries have not been established yet.
    NotEstablished,
    /// The handle was not produced by this manager.
    UnknownHandle,
    /// No more partitions can be bound.
    PartitionTableFull,
    /// Security attribution could not be configured.
    Attribution(HardwareStatus),
}

impl From<ConfigurationError> for IsolationError {
    fn from(value: ConfigurationError) -> Self {
        Self::ConfigurationError(value)
    }
}

impl fmt::Display for IsolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationError(error) => write!(f, "invalid configuration: {error}"),
            Self::RegionCapacityExceeded {
                required,
                available,
            } => write!(
                f,
                "{required} protection regions required but only {available} available"
            ),
            Self::AssetNotAllowed { partition, asset } => {
                write!(f, "partition {partition:#X} claims disallowed asset {:?}", asset.kind)
            }
            Self::AlreadyEstablished => f.pad("static boundaries already established"),
            Self::NotEstablished => f.pad("static boundaries not established"),
            Self::UnknownHandle => f.pad("unknown partition boundary handle"),
            Self::PartitionTableFull => f.pad("partition table is full"),
            Self::Attribution(status) => {
                write!(f, "security attribution failed with status {:#X}", status.0)
            }
        }
    }
}

impl error::Error for IsolationError {}
