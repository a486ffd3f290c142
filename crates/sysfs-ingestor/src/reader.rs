//! Filesystem-rooted access to PCI device attributes.
//!
//! All reads go through an injected root directory so tests can substitute a
//! tree of regular files for the host's `/sys/bus/pci/devices`.

use pciforge_core::bars::ResourceEntry;
use pciforge_core::error::{Error, Result};
use pciforge_core::Bdf;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Environment variable overriding the sysfs root.
pub const SYSFS_ROOT_ENV: &str = "PCILEECH_SYSFS_ROOT";

/// Canonical PCI sysfs root on a Linux host.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/pci/devices";

#[derive(Debug, Clone)]
pub struct SysfsReader {
    root: PathBuf,
}

impl SysfsReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `PCILEECH_SYSFS_ROOT`, falling back to the host default.
    pub fn from_env() -> Self {
        match std::env::var_os(SYSFS_ROOT_ENV) {
            Some(root) => Self::new(PathBuf::from(root)),
            None => Self::new(DEFAULT_SYSFS_ROOT),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, bdf: Bdf) -> PathBuf {
        self.root.join(bdf.to_string())
    }

    fn map_io_error(&self, bdf: Bdf, err: std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound => Error::DeviceNotFound {
                bdf: bdf.to_string(),
                root: self.root.clone(),
            },
            ErrorKind::PermissionDenied => Error::PermissionDenied {
                bdf: bdf.to_string(),
            },
            _ => Error::Io(err),
        }
    }

    /// Whole-file read of the configuration space (256 bytes, or up to 4096
    /// when the device exposes extended capabilities).
    pub fn read_config(&self, bdf: Bdf) -> Result<Vec<u8>> {
        let path = self.device_dir(bdf).join("config");
        std::fs::read(&path).map_err(|e| self.map_io_error(bdf, e))
    }

    /// Resource table: one `start end flags` hex triple per line. Returns at
    /// least the six BAR lines; line 7, when present, is the expansion ROM.
    pub fn read_resource_table(&self, bdf: Bdf) -> Result<Vec<ResourceEntry>> {
        let path = self.device_dir(bdf).join("resource");
        let content =
            std::fs::read_to_string(&path).map_err(|e| self.map_io_error(bdf, e))?;

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_resource_line(line).ok_or_else(|| {
                Error::Input(format!(
                    "{}:{}: malformed resource line '{line}'",
                    path.display(),
                    lineno + 1
                ))
            })?);
        }
        while entries.len() < 6 {
            entries.push(ResourceEntry::EMPTY);
        }
        Ok(entries)
    }

    pub fn read_vendor_device(&self, bdf: Bdf) -> Result<(u16, u16)> {
        let vendor = self.read_hex_attr(bdf, "vendor")?;
        let device = self.read_hex_attr(bdf, "device")?;
        Ok((vendor, device))
    }

    /// All device directories under the root that parse as a BDF, sorted.
    pub fn list_devices(&self) -> Result<Vec<Bdf>> {
        let entries = std::fs::read_dir(&self.root).map_err(Error::Io)?;
        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Ok(bdf) = name.to_string_lossy().parse::<Bdf>() {
                devices.push(bdf);
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn read_hex_attr(&self, bdf: Bdf, attr: &str) -> Result<u16> {
        let path = self.device_dir(bdf).join(attr);
        let content =
            std::fs::read_to_string(&path).map_err(|e| self.map_io_error(bdf, e))?;
        let trimmed = content.trim().trim_start_matches("0x");
        u16::from_str_radix(trimmed, 16).map_err(|e| {
            Error::Input(format!("{}: invalid hex value: {e}", path.display()))
        })
    }
}

fn parse_resource_line(line: &str) -> Option<ResourceEntry> {
    let mut fields = line.split_whitespace();
    let start = parse_hex_u64(fields.next()?)?;
    let end = parse_hex_u64(fields.next()?)?;
    let flags = parse_hex_u64(fields.next()?)?;
    Some(ResourceEntry { start, end, flags })
}

fn parse_hex_u64(field: &str) -> Option<u64> {
    u64::from_str_radix(field.trim_start_matches("0x"), 16).ok()
}
