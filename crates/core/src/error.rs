// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for PCIForge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error kinds for the whole generation pipeline.
///
/// Every failure that can surface to the user is one of these variants; the
/// CLI maps them onto the documented exit statuses via [`Error::exit_code`].
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed BDF, unknown board, conflicting options.
    #[error("invalid input: {0}")]
    Input(String),

    /// No device at the given BDF under the sysfs root.
    #[error("no PCI device {bdf} under {root}")]
    DeviceNotFound { bdf: String, root: PathBuf },

    /// Configuration space exists but cannot be read.
    #[error("permission denied reading configuration space of {bdf}")]
    PermissionDenied { bdf: String },

    /// Configuration space image shorter than the standard header region.
    #[error("configuration space truncated: {len} bytes, need at least {min}")]
    TruncatedConfigSpace { len: usize, min: usize },

    /// The capability linked list revisited an offset (or exceeded the walk bound).
    #[error("capability list cycle detected at offset {offset:#04x}")]
    CapabilityCycle { offset: u16 },

    /// A next pointer left the valid capability region.
    #[error("capability pointer {offset:#04x} outside valid range [{lo:#04x}, {hi:#x})")]
    CapabilityOutOfRange { offset: u16, lo: u16, hi: usize },

    /// A capability header fits but its declared span does not.
    #[error("capability id {id:#04x} at {offset:#04x} truncated: needs {needed} bytes")]
    TruncatedCapability { offset: u16, id: u16, needed: usize },

    /// Impossible BAR flag or size combination.
    #[error("BAR{index} invalid: {reason}")]
    BarInvalid { index: usize, reason: String },

    /// MSI-X table does not fit inside its BAR.
    #[error(
        "MSI-X table [{offset:#x}..{offset:#x}+{len:#x}) exceeds BAR{bar} size {bar_size:#x}"
    )]
    MsixTableOutOfBar {
        bar: u8,
        offset: u32,
        len: u32,
        bar_size: u64,
    },

    /// MSI-X pending-bit array does not fit inside its BAR.
    #[error("MSI-X PBA [{offset:#x}..{offset:#x}+{len:#x}) exceeds BAR{bar} size {bar_size:#x}")]
    MsixPbaOutOfBar {
        bar: u8,
        offset: u32,
        len: u32,
        bar_size: u64,
    },

    /// MSI-X table and PBA share a BAR and their ranges intersect.
    #[error("MSI-X table and PBA overlap in BAR{bar}")]
    MsixOverlap { bar: u8 },

    /// Donor profile file failed schema validation.
    #[error("donor profile schema error: {0}")]
    ProfileSchema(String),

    /// Render context failed final validation.
    #[error("render context invalid (missing: [{}]; inconsistent: [{}])",
        missing_keys.join(", "), inconsistent_fields.join(", "))]
    ContextInvalid {
        missing_keys: Vec<String>,
        inconsistent_fields: Vec<String>,
    },

    /// A template referenced an undeclared key or used a bad format spec.
    #[error("template '{template}': {reason}")]
    TemplateRender { template: String, reason: String },

    /// Post-render cross-check found diverging constants. Always a bug.
    #[error("codegen inconsistency: {0}")]
    CodegenInconsistency(String),

    /// Infrastructure I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream constraint fetch failed (non-fatal at the call site).
    #[error("constraint cache fetch failed: {0}")]
    CacheFetch(String),
}

impl Error {
    /// Stable kind name for structured error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Input(_) => "InputError",
            Error::DeviceNotFound { .. } => "DeviceNotFound",
            Error::PermissionDenied { .. } => "PermissionDenied",
            Error::TruncatedConfigSpace { .. } => "TruncatedConfigSpace",
            Error::CapabilityCycle { .. } => "CapabilityCycle",
            Error::CapabilityOutOfRange { .. } => "CapabilityOutOfRange",
            Error::TruncatedCapability { .. } => "TruncatedCapability",
            Error::BarInvalid { .. } => "BarInvalid",
            Error::MsixTableOutOfBar { .. } => "MsixTableOutOfBar",
            Error::MsixPbaOutOfBar { .. } => "MsixPbaOutOfBar",
            Error::MsixOverlap { .. } => "MsixOverlap",
            Error::ProfileSchema(_) => "ProfileSchemaError",
            Error::ContextInvalid { .. } => "ContextInvalid",
            Error::TemplateRender { .. } => "TemplateRenderError",
            Error::CodegenInconsistency(_) => "CodegenInconsistency",
            Error::Io(_) => "IoError",
            Error::CacheFetch(_) => "CacheFetchError",
        }
    }

    /// Exit status for the CLI contract: 0 success, 2 validation error,
    /// 3 extraction error, 4 codegen inconsistency, 1 anything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Input(_)
            | Error::TruncatedConfigSpace { .. }
            | Error::CapabilityCycle { .. }
            | Error::CapabilityOutOfRange { .. }
            | Error::TruncatedCapability { .. }
            | Error::BarInvalid { .. }
            | Error::MsixTableOutOfBar { .. }
            | Error::MsixPbaOutOfBar { .. }
            | Error::MsixOverlap { .. }
            | Error::ProfileSchema(_)
            | Error::ContextInvalid { .. } => 2,
            Error::DeviceNotFound { .. } | Error::PermissionDenied { .. } => 3,
            Error::CodegenInconsistency(_) => 4,
            Error::TemplateRender { .. } | Error::Io(_) | Error::CacheFetch(_) => 1,
        }
    }

    /// True when local-profile mode may downgrade this error to a warning,
    /// provided the donor template supplies the missing field.
    pub fn is_extraction_error(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound { .. }
                | Error::PermissionDenied { .. }
                | Error::TruncatedConfigSpace { .. }
                | Error::TruncatedCapability { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_cli_contract() {
        assert_eq!(Error::Input("bad bdf".into()).exit_code(), 2);
        assert_eq!(
            Error::CapabilityOutOfRange {
                offset: 0x30,
                lo: 0x40,
                hi: 256
            }
            .exit_code(),
            2
        );
        assert_eq!(
            Error::DeviceNotFound {
                bdf: "0000:03:00.0".into(),
                root: PathBuf::from("/sys/bus/pci/devices"),
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::CodegenInconsistency("vendor id mismatch".into()).exit_code(),
            4
        );
        assert_eq!(Error::CacheFetch("timeout".into()).exit_code(), 1);
    }
}
