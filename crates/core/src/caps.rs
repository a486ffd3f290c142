// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Typed PCI capability records.
//!
//! Each capability node carries its config-space offset, the raw next
//! pointer, a per-node decode status and a typed payload. Unknown capability
//! IDs keep their raw bytes so a profile round-trips losslessly.

use serde::{Deserialize, Serialize};

pub const CAP_ID_POWER_MANAGEMENT: u8 = 0x01;
pub const CAP_ID_MSI: u8 = 0x05;
pub const CAP_ID_VENDOR_SPECIFIC: u8 = 0x09;
pub const CAP_ID_PCI_EXPRESS: u8 = 0x10;
pub const CAP_ID_MSIX: u8 = 0x11;

pub const EXT_CAP_ID_AER: u16 = 0x0001;

/// MSI-X message control bit layout.
pub const MSIX_TABLE_SIZE_MASK: u16 = 0x07ff;
pub const MSIX_FUNCTION_MASK_BIT: u16 = 0x4000;
pub const MSIX_ENABLE_BIT: u16 = 0x8000;

/// MSI-X table/PBA dword layout: BIR in bits 2:0, dword-aligned offset above.
pub const MSIX_BIR_MASK: u32 = 0x7;

/// Fallback span for capabilities whose length is not self-describing.
const STD_CAP_SIZE_DEFAULT: usize = 16;
const EXT_CAP_SIZE_DEFAULT: usize = 32;

/// Whether a node's typed payload was fully decodable from the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStatus {
    Decoded,
    /// The header fit but the capability body ran off the end of the image.
    /// The walk continues; downstream stages decide whether this is fatal.
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityKind {
    PowerManagement {
        pmcsr_offset: u16,
        d1_supported: bool,
        d2_supported: bool,
        pme_support_mask: u8,
    },
    Msi {
        is_64bit: bool,
        multi_message_capable: u8,
        per_vector_masking: bool,
    },
    MsiX {
        /// Encoded table size (N-1), bits 10:0 of message control.
        table_size: u16,
        table_bar: u8,
        table_offset: u32,
        pba_bar: u8,
        pba_offset: u32,
        function_mask: bool,
        enable: bool,
    },
    PciExpress {
        max_payload_supported: u16,
        link_width: u8,
        link_speed: u8,
        max_read_request_size: u16,
        aspm_support: u8,
    },
    VendorSpecific {
        length: u8,
        raw: Vec<u8>,
    },
    Aer {
        uncorrectable_mask: u32,
        uncorrectable_severity: u32,
        correctable_mask: u32,
    },
    Unknown {
        id: u16,
        raw: Vec<u8>,
    },
}

/// One node of the standard or extended capability list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityNode {
    pub offset: u16,
    pub next: u16,
    pub status: DecodeStatus,
    #[serde(flatten)]
    pub kind: CapabilityKind,
}

impl CapabilityNode {
    pub fn is_msix(&self) -> bool {
        matches!(self.kind, CapabilityKind::MsiX { .. })
    }

    pub fn is_msi(&self) -> bool {
        matches!(self.kind, CapabilityKind::Msi { .. })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *bytes.get(at)?,
        *bytes.get(at + 1)?,
        *bytes.get(at + 2)?,
        *bytes.get(at + 3)?,
    ]))
}

/// Decode one standard capability at `offset`. `next` is the already-masked
/// next pointer, used to bound the raw span of unknown capabilities.
pub fn decode_standard(bytes: &[u8], offset: u16, id: u8, next: u16) -> (CapabilityKind, DecodeStatus) {
    let at = offset as usize;
    match id {
        CAP_ID_POWER_MANAGEMENT => {
            // PMC register sits at +2, PMCSR at +4.
            match read_u16(bytes, at + 2) {
                Some(pmc) if bytes.len() >= at + 8 => (
                    CapabilityKind::PowerManagement {
                        pmcsr_offset: offset + 4,
                        d1_supported: pmc & (1 << 9) != 0,
                        d2_supported: pmc & (1 << 10) != 0,
                        pme_support_mask: ((pmc >> 11) & 0x1f) as u8,
                    },
                    DecodeStatus::Decoded,
                ),
                _ => truncated(offset, id as u16, next, bytes),
            }
        }
        CAP_ID_MSI => match read_u16(bytes, at + 2) {
            Some(control) => (
                CapabilityKind::Msi {
                    is_64bit: control & (1 << 7) != 0,
                    multi_message_capable: ((control >> 1) & 0x7) as u8,
                    per_vector_masking: control & (1 << 8) != 0,
                },
                DecodeStatus::Decoded,
            ),
            None => truncated(offset, id as u16, next, bytes),
        },
        CAP_ID_MSIX => {
            let control = read_u16(bytes, at + 2);
            let table = read_u32(bytes, at + 4);
            let pba = read_u32(bytes, at + 8);
            match (control, table, pba) {
                (Some(control), Some(table), Some(pba)) => (
                    CapabilityKind::MsiX {
                        table_size: control & MSIX_TABLE_SIZE_MASK,
                        table_bar: (table & MSIX_BIR_MASK) as u8,
                        table_offset: table & !MSIX_BIR_MASK,
                        pba_bar: (pba & MSIX_BIR_MASK) as u8,
                        pba_offset: pba & !MSIX_BIR_MASK,
                        function_mask: control & MSIX_FUNCTION_MASK_BIT != 0,
                        enable: control & MSIX_ENABLE_BIT != 0,
                    },
                    DecodeStatus::Decoded,
                ),
                _ => truncated(offset, id as u16, next, bytes),
            }
        }
        CAP_ID_PCI_EXPRESS => {
            let dev_caps = read_u32(bytes, at + 0x04);
            let dev_control = read_u16(bytes, at + 0x08);
            let link_caps = read_u32(bytes, at + 0x0c);
            match (dev_caps, dev_control, link_caps) {
                (Some(dev_caps), Some(dev_control), Some(link_caps)) => (
                    CapabilityKind::PciExpress {
                        max_payload_supported: 128 << (dev_caps & 0x7),
                        link_speed: (link_caps & 0xf) as u8,
                        link_width: ((link_caps >> 4) & 0x3f) as u8,
                        aspm_support: ((link_caps >> 10) & 0x3) as u8,
                        max_read_request_size: 128 << ((dev_control >> 12) & 0x7),
                    },
                    DecodeStatus::Decoded,
                ),
                _ => truncated(offset, id as u16, next, bytes),
            }
        }
        CAP_ID_VENDOR_SPECIFIC => match bytes.get(at + 2).copied() {
            Some(length) if length >= 3 && at + length as usize <= bytes.len() => (
                CapabilityKind::VendorSpecific {
                    length,
                    raw: bytes[at..at + length as usize].to_vec(),
                },
                DecodeStatus::Decoded,
            ),
            _ => truncated(offset, id as u16, next, bytes),
        },
        other => {
            let span = unknown_span(offset, next, bytes.len(), STD_CAP_SIZE_DEFAULT);
            (
                CapabilityKind::Unknown {
                    id: other as u16,
                    raw: bytes[at..at + span].to_vec(),
                },
                DecodeStatus::Decoded,
            )
        }
    }
}

/// Decode one extended capability at `offset` (id from the 32-bit header).
pub fn decode_extended(bytes: &[u8], offset: u16, id: u16, next: u16) -> (CapabilityKind, DecodeStatus) {
    let at = offset as usize;
    match id {
        EXT_CAP_ID_AER => {
            let uncorrectable_mask = read_u32(bytes, at + 0x08);
            let uncorrectable_severity = read_u32(bytes, at + 0x0c);
            let correctable_mask = read_u32(bytes, at + 0x14);
            match (uncorrectable_mask, uncorrectable_severity, correctable_mask) {
                (Some(um), Some(us), Some(cm)) => (
                    CapabilityKind::Aer {
                        uncorrectable_mask: um,
                        uncorrectable_severity: us,
                        correctable_mask: cm,
                    },
                    DecodeStatus::Decoded,
                ),
                _ => truncated(offset, id, next, bytes),
            }
        }
        other => {
            let span = unknown_span(offset, next, bytes.len(), EXT_CAP_SIZE_DEFAULT);
            (
                CapabilityKind::Unknown {
                    id: other,
                    raw: bytes[at..at + span].to_vec(),
                },
                DecodeStatus::Decoded,
            )
        }
    }
}

/// Span of an unknown capability: the gap to the next node when the list is
/// ascending, a fixed estimate otherwise, clamped to the image.
fn unknown_span(offset: u16, next: u16, len: usize, default: usize) -> usize {
    let at = offset as usize;
    let span = if next > offset {
        (next - offset) as usize
    } else {
        default
    };
    span.min(len - at)
}

fn truncated(offset: u16, id: u16, next: u16, bytes: &[u8]) -> (CapabilityKind, DecodeStatus) {
    let at = offset as usize;
    let span = unknown_span(offset, next, bytes.len(), 2);
    (
        CapabilityKind::Unknown {
            id,
            raw: bytes[at..at + span].to_vec(),
        },
        DecodeStatus::Truncated,
    )
}

/// Human-readable name for a standard capability ID, for logs and summaries.
pub fn standard_capability_name(id: u8) -> &'static str {
    match id {
        0x01 => "Power Management",
        0x02 => "AGP",
        0x03 => "VPD",
        0x04 => "Slot ID",
        0x05 => "MSI",
        0x06 => "CompactPCI Hot Swap",
        0x07 => "PCI-X",
        0x08 => "HyperTransport",
        0x09 => "Vendor-Specific",
        0x0a => "Debug Port",
        0x0b => "CompactPCI CRC",
        0x0c => "PCI Hot Plug",
        0x0d => "PCI Bridge Subsystem VID",
        0x0e => "AGP 8x",
        0x0f => "Secure Device",
        0x10 => "PCI Express",
        0x11 => "MSI-X",
        0x12 => "SATA Data Index Conf",
        0x13 => "Advanced Features",
        _ => "Unknown",
    }
}

/// Human-readable name for an extended capability ID.
pub fn extended_capability_name(id: u16) -> &'static str {
    match id {
        0x0001 => "Advanced Error Reporting",
        0x0002 => "Virtual Channel",
        0x0003 => "Device Serial Number",
        0x0004 => "Power Budgeting",
        0x000b => "Vendor-Specific Extended",
        0x000d => "Access Control Services",
        0x000e => "Alternative Routing-ID Interpretation",
        0x000f => "Address Translation Services",
        0x0010 => "Single Root I/O Virtualization",
        0x0015 => "Resizable BAR",
        0x0018 => "Latency Tolerance Reporting",
        0x0019 => "Secondary PCI Express",
        0x001d => "Downstream Port Containment",
        0x001e => "L1 PM Substates",
        0x001f => "Precision Time Measurement",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msix_decode_extracts_bir_and_offset() {
        let mut bytes = vec![0u8; 256];
        // Capability header at 0x70: id 0x11, next 0, control with table_size=7.
        bytes[0x70] = CAP_ID_MSIX;
        bytes[0x71] = 0x00;
        bytes[0x72..0x74].copy_from_slice(&0x0007u16.to_le_bytes());
        // Table in BAR4 at offset 0, PBA in BAR4 at 0x1000.
        bytes[0x74..0x78].copy_from_slice(&0x0000_0004u32.to_le_bytes());
        bytes[0x78..0x7c].copy_from_slice(&0x0000_1004u32.to_le_bytes());

        let (kind, status) = decode_standard(&bytes, 0x70, CAP_ID_MSIX, 0);
        assert_eq!(status, DecodeStatus::Decoded);
        match kind {
            CapabilityKind::MsiX {
                table_size,
                table_bar,
                table_offset,
                pba_bar,
                pba_offset,
                function_mask,
                enable,
            } => {
                assert_eq!(table_size, 7);
                assert_eq!(table_bar, 4);
                assert_eq!(table_offset, 0);
                assert_eq!(pba_bar, 4);
                assert_eq!(pba_offset, 0x1000);
                assert!(!function_mask);
                assert!(!enable);
            }
            other => panic!("expected MSI-X, got {other:?}"),
        }
    }

    #[test]
    fn msix_control_flags_decode() {
        let mut bytes = vec![0u8; 256];
        bytes[0x70] = CAP_ID_MSIX;
        let control = 0x07ffu16 | MSIX_FUNCTION_MASK_BIT | MSIX_ENABLE_BIT;
        bytes[0x72..0x74].copy_from_slice(&control.to_le_bytes());

        let (kind, _) = decode_standard(&bytes, 0x70, CAP_ID_MSIX, 0);
        match kind {
            CapabilityKind::MsiX {
                table_size,
                function_mask,
                enable,
                ..
            } => {
                assert_eq!(table_size, 2047);
                assert!(function_mask);
                assert!(enable);
            }
            other => panic!("expected MSI-X, got {other:?}"),
        }
    }

    #[test]
    fn power_management_decode() {
        let mut bytes = vec![0u8; 256];
        bytes[0x50] = CAP_ID_POWER_MANAGEMENT;
        // PMC: D1 + D2 supported, PME from D3hot|D0.
        let pmc: u16 = (1 << 9) | (1 << 10) | (0b01001 << 11);
        bytes[0x52..0x54].copy_from_slice(&pmc.to_le_bytes());

        let (kind, status) = decode_standard(&bytes, 0x50, CAP_ID_POWER_MANAGEMENT, 0);
        assert_eq!(status, DecodeStatus::Decoded);
        match kind {
            CapabilityKind::PowerManagement {
                pmcsr_offset,
                d1_supported,
                d2_supported,
                pme_support_mask,
            } => {
                assert_eq!(pmcsr_offset, 0x54);
                assert!(d1_supported);
                assert!(d2_supported);
                assert_eq!(pme_support_mask, 0b01001);
            }
            other => panic!("expected PM, got {other:?}"),
        }
    }

    #[test]
    fn truncated_body_preserves_raw_and_flags_node() {
        // MSI-X header at 254: header readable, body off the end.
        let mut bytes = vec![0u8; 256];
        bytes[0xfc] = CAP_ID_MSIX;
        let (kind, status) = decode_standard(&bytes, 0xfc, CAP_ID_MSIX, 0);
        assert_eq!(status, DecodeStatus::Truncated);
        assert!(matches!(kind, CapabilityKind::Unknown { id: 0x11, .. }));
    }

    #[test]
    fn unknown_capability_keeps_bytes_verbatim() {
        let mut bytes = vec![0u8; 256];
        bytes[0x60] = 0x42;
        bytes[0x61] = 0x80;
        for (i, b) in (0x60..0x70).enumerate() {
            bytes[b] = 0xa0 + i as u8;
        }
        let (kind, status) = decode_standard(&bytes, 0x60, 0x42, 0x80);
        assert_eq!(status, DecodeStatus::Decoded);
        match kind {
            CapabilityKind::Unknown { id, raw } => {
                assert_eq!(id, 0x42);
                assert_eq!(raw.len(), 0x20); // gap to next at 0x80
                assert_eq!(&raw[..16], &bytes[0x60..0x70]);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }
}
