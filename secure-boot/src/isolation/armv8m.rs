//! Register encodings of the ARMv8-M protected memory system architecture.

use super::{AccessClass, EnablePolicy, ProtectionRegionSpec, RegionPrivilege, Shareability};

/// `MPU_CTRL.ENABLE`.
pub const CTRL_ENABLE: u32 = 1 << 0;
/// `MPU_CTRL.HFNMIENA`.
pub const CTRL_HFNMIENA: u32 = 1 << 1;
/// `MPU_CTRL.PRIVDEFENA`.
pub const CTRL_PRIVDEFENA: u32 = 1 << 2;

/// `MPU_RBAR.XN`.
pub const RBAR_XN: u32 = 1 << 0;
/// `MPU_RLAR.EN`.
pub const RLAR_EN: u32 = 1 << 0;

/// Mask of the address bits of `MPU_RBAR` and `MPU_RLAR`.
pub const ADDRESS_MASK: u32 = !0x1F;

/// Memory attribute index of code: normal memory, write-through, read-allocate.
pub const ATTR_CODE: u8 = 0;
/// Memory attribute index of data: normal memory, write-back, read/write-allocate.
pub const ATTR_DATA: u8 = 1;
/// Memory attribute index of peripherals: device-nGnRE.
pub const ATTR_DEVICE: u8 = 2;

/// The value of `MPU_MAIR0` matching [`ATTR_CODE`], [`ATTR_DATA`] and [`ATTR_DEVICE`].
pub const MAIR0: u32 = 0xAA | (0xFF << 8) | (0x04 << 16);

/// Returns the memory attribute index of `access`.
pub const fn attribute_index(access: AccessClass) -> u8 {
    match access {
        AccessClass::ReadOnlyAll => ATTR_CODE,
        AccessClass::ReadWriteAll | AccessClass::NoExec => ATTR_DATA,
        AccessClass::Device => ATTR_DEVICE,
    }
}

/// Encodes the `MPU_RBAR` value of `spec`.
pub const fn rbar(spec: &ProtectionRegionSpec) -> u32 {
    let access_permissions = match (spec.access.is_writable(), spec.privilege) {
        (true, RegionPrivilege::PrivilegedOnly) => 0b00,
        (true, RegionPrivilege::AllLevels) => 0b01,
        (false, RegionPrivilege::PrivilegedOnly) => 0b10,
        (false, RegionPrivilege::AllLevels) => 0b11,
    };
    let shareability = match spec.shareability {
        Shareability::NonShareable => 0b00,
        Shareability::OuterShareable => 0b10,
        Shareability::InnerShareable => 0b11,
    };
    let execute_never = if spec.access.is_executable() {
        0
    } else {
        RBAR_XN
    };

    (spec.base & ADDRESS_MASK) | (shareability << 3) | (access_permissions << 1) | execute_never
}

/// Encodes the `MPU_RLAR` value of `spec`.
pub const fn rlar(spec: &ProtectionRegionSpec) -> u32 {
    (spec.limit & ADDRESS_MASK) | ((attribute_index(spec.access) as u32) << 1) | RLAR_EN
}

/// Encodes the `MPU_CTRL` value of `policy`.
pub const fn ctrl(policy: EnablePolicy) -> u32 {
    let mut value = CTRL_ENABLE;
    if policy.privileged_default_map {
        value |= CTRL_PRIVDEFENA;
    }
    if policy.enforce_in_fault_handlers {
        value |= CTRL_HFNMIENA;
    }
    value
}
