//! Host USB enumeration for passthrough.
//!
//! Enumeration is an optional capability. When the host offers no way to
//! list devices, [`detect`] returns `None` and the panel simply shows no
//! devices.

use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    profile::UsbDeviceId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    pub id: UsbDeviceId,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => write!(f, "  {m} {p}"),
            (None, Some(p)) => write!(f, "  {p}"),
            (Some(m), None) => write!(f, "  {m}"),
            (None, None) => Ok(()),
        }
    }
}

pub trait UsbEnumerator {
    fn backend(&self) -> &'static str;

    fn devices(&self) -> Result<Vec<UsbDevice>>;
}

/// Reads `idVendor`/`idProduct` from the Linux sysfs USB tree.
pub struct SysfsUsb {
    root: PathBuf,
}

impl SysfsUsb {
    pub const DEFAULT_ROOT: &'static str = "/sys/bus/usb/devices";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_device(dir: &Path) -> Option<UsbDevice> {
        let vendor = read_hex(&dir.join("idVendor"))?;
        let product_id = read_hex(&dir.join("idProduct"))?;
        Some(UsbDevice {
            id: UsbDeviceId::new(vendor, product_id),
            manufacturer: read_trimmed(&dir.join("manufacturer")),
            product: read_trimmed(&dir.join("product")),
        })
    }
}

impl UsbEnumerator for SysfsUsb {
    fn backend(&self) -> &'static str {
        "sysfs"
    }

    fn devices(&self) -> Result<Vec<UsbDevice>> {
        let entries = fs::read_dir(&self.root).map_err(Error::Enumeration)?;

        let mut devices = vec![];
        for entry in entries {
            let entry = entry.map_err(Error::Enumeration)?;
            // interface nodes like `1-1:1.0` carry no ids and are skipped here
            if let Some(dev) = Self::read_device(&entry.path()) {
                devices.push(dev);
            }
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices.dedup_by(|a, b| a.id == b.id);
        Ok(devices)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let s = fs::read_to_string(path).ok()?;
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn read_hex(path: &Path) -> Option<u16> {
    u16::from_str_radix(&read_trimmed(path)?, 16).ok()
}

/// Picks the enumeration backend available on this host, if any.
pub fn detect() -> Option<Box<dyn UsbEnumerator>> {
    if cfg!(target_os = "linux") && Path::new(SysfsUsb::DEFAULT_ROOT).is_dir() {
        return Some(Box::new(SysfsUsb::new(SysfsUsb::DEFAULT_ROOT)));
    }
    debug!("usb enumeration is not available on this host");
    None
}

/// Device list for display. Failures are logged and read as "no devices".
pub fn list_devices(capability: Option<&dyn UsbEnumerator>) -> Vec<UsbDevice> {
    let Some(usb) = capability else {
        return vec![];
    };
    match usb.devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("USB error ({}): {e}", usb.backend());
            vec![]
        }
    }
}
