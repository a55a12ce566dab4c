//! VM profile records as they are edited, persisted and compiled.

use std::{
    collections::BTreeSet,
    fmt::{self, Display},
    ops::RangeInclusive,
    path::{Path, PathBuf},
    str::FromStr,
};

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub mod store;

pub use store::ProfileStore;

pub const DEFAULT_PROFILE_NAME: &str = "Default VM";

/// Accepted guest memory in megabytes.
pub const RAM_RANGE: RangeInclusive<u32> = 128..=131072;
/// Accepted virtual CPU count.
pub const CPU_RANGE: RangeInclusive<u32> = 1..=64;

/// One named VM configuration.
///
/// Every field has a default, so records written by older versions of the
/// tool decode into a fully populated profile.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct VmProfile {
    pub name: String,
    /// Path to the `qemu-system-*` binary
    #[serde(rename = "qemu_path")]
    pub executable: PathBuf,
    /// Informational only, the executable decides the emulated machine
    #[schemars(with = "String")]
    pub arch: Architecture,
    #[serde(with = "empty_path")]
    #[schemars(with = "String")]
    pub iso: Option<PathBuf>,
    #[serde(with = "empty_path")]
    #[schemars(with = "String")]
    pub disk: Option<PathBuf>,
    /// Memory in megabytes
    pub ram: u32,
    pub cpus: u32,
    #[schemars(with = "String")]
    pub boot: BootDevice,
    /// Extra QEMU options, split on whitespace
    pub extra: String,
    #[schemars(with = "String")]
    pub network_mode: NetworkMode,
    /// Raw options, only used with the custom network mode
    pub network_options: String,
    #[serde(deserialize_with = "usb_ids::deserialize")]
    #[schemars(with = "Vec<String>")]
    pub usb_devices: BTreeSet<UsbDeviceId>,
    /// UEFI firmware flash
    pub ovmf_enabled: bool,
    #[serde(with = "empty_path")]
    #[schemars(with = "String")]
    pub ovmf_path: Option<PathBuf>,
    pub snapshots: Vec<serde_json::Value>,
    pub secondary_isos: Vec<serde_json::Value>,
    #[serde(with = "empty_path")]
    #[schemars(with = "String")]
    pub iso_library_dir: Option<PathBuf>,
}

impl Default for VmProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE_NAME.to_string(),
            executable: PathBuf::new(),
            arch: Architecture::default(),
            iso: None,
            disk: None,
            ram: 2048,
            cpus: 2,
            boot: BootDevice::default(),
            extra: String::new(),
            network_mode: NetworkMode::default(),
            network_options: String::new(),
            usb_devices: BTreeSet::new(),
            ovmf_enabled: false,
            ovmf_path: None,
            snapshots: vec![],
            secondary_isos: vec![],
            iso_library_dir: None,
        }
    }
}

impl VmProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Pulls RAM and CPU count back into their accepted ranges.
    pub fn clamp_resources(&mut self) {
        self.ram = self.ram.clamp(*RAM_RANGE.start(), *RAM_RANGE.end());
        self.cpus = self.cpus.clamp(*CPU_RANGE.start(), *CPU_RANGE.end());
    }

    pub fn executable_exists(&self) -> bool {
        !self.executable.as_os_str().is_empty() && self.executable.exists()
    }

    /// Firmware path when UEFI is enabled and a path is actually set.
    pub fn firmware(&self) -> Option<&Path> {
        if !self.ovmf_enabled {
            return None;
        }
        self.ovmf_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(from = "String", into = "String")]
pub enum Architecture {
    #[default]
    #[value(name = "x86_64")]
    X86_64,
    #[value(name = "i386")]
    I386,
    Aarch64,
    Arm,
    Ppc,
    Mips,
    Riscv64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::I386 => "i386",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm => "arm",
            Architecture::Ppc => "ppc",
            Architecture::Mips => "mips",
            Architecture::Riscv64 => "riscv64",
        }
    }
}

impl From<String> for Architecture {
    fn from(value: String) -> Self {
        match Self::value_variants().iter().find(|a| a.as_str() == value) {
            Some(arch) => *arch,
            None => {
                warn!("unknown architecture `{value}`, using x86_64");
                Architecture::default()
            }
        }
    }
}

impl From<Architecture> for String {
    fn from(value: Architecture) -> Self {
        value.as_str().to_string()
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which medium is presented to the guest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(from = "String", into = "String")]
pub enum BootDevice {
    #[default]
    Iso,
    Disk,
}

impl BootDevice {
    const ISO_LABEL: &'static str = "ISO (cdrom)";
    const DISK_LABEL: &'static str = "Disk image";

    pub fn label(&self) -> &'static str {
        match self {
            BootDevice::Iso => Self::ISO_LABEL,
            BootDevice::Disk => Self::DISK_LABEL,
        }
    }
}

impl From<String> for BootDevice {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::ISO_LABEL | "iso" => BootDevice::Iso,
            // anything else boots from disk first
            _ => BootDevice::Disk,
        }
    }
}

impl From<BootDevice> for String {
    fn from(value: BootDevice) -> Self {
        value.label().to_string()
    }
}

impl Display for BootDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(from = "String", into = "String")]
pub enum NetworkMode {
    /// User-mode networking behind QEMU's NAT
    #[default]
    Nat,
    /// TAP device, must already exist on the host
    Bridged,
    /// Options taken verbatim from `network_options`
    Custom,
}

impl NetworkMode {
    const NAT_LABEL: &'static str = "user (NAT)";
    const BRIDGED_LABEL: &'static str = "bridged (TAP)";
    const CUSTOM_LABEL: &'static str = "custom";

    pub fn label(&self) -> &'static str {
        match self {
            NetworkMode::Nat => Self::NAT_LABEL,
            NetworkMode::Bridged => Self::BRIDGED_LABEL,
            NetworkMode::Custom => Self::CUSTOM_LABEL,
        }
    }
}

impl From<String> for NetworkMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::BRIDGED_LABEL | "bridged" => NetworkMode::Bridged,
            Self::CUSTOM_LABEL => NetworkMode::Custom,
            _ => NetworkMode::Nat,
        }
    }
}

impl From<NetworkMode> for String {
    fn from(value: NetworkMode) -> Self {
        value.label().to_string()
    }
}

impl Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Host USB device, written as `0x<vendor>:0x<product>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UsbDeviceId {
    pub vendor: u16,
    pub product: u16,
}

impl UsbDeviceId {
    pub fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }
}

impl Display for UsbDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.vendor, self.product)
    }
}

impl FromStr for UsbDeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidUsbId(s.to_string());
        let (vendor, product) = s.trim().split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let digits = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            if digits.is_empty() {
                return Err(invalid());
            }
            u16::from_str_radix(digits, 16).map_err(|_| invalid())
        };
        Ok(Self {
            vendor: parse(vendor)?,
            product: parse(product)?,
        })
    }
}

impl TryFrom<String> for UsbDeviceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UsbDeviceId> for String {
    fn from(value: UsbDeviceId) -> Self {
        value.to_string()
    }
}

/// Optional paths are stored as `""` when unset.
mod empty_path {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match path {
            Some(p) => p.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.filter(|s| !s.is_empty()).map(PathBuf::from))
    }
}

/// Entries that do not parse are dropped instead of failing the whole file.
mod usb_ids {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer};

    use super::UsbDeviceId;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeSet<UsbDeviceId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|s| match s.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("dropping usb device: {e}");
                    None
                }
            })
            .collect())
    }
}
