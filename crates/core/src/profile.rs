// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The donor profile: everything extracted from (or supplied for) a physical
//! device, immutable once assembled. Serializes to canonical JSON and
//! round-trips value-equal, including raw bytes of unknown capabilities.

use crate::bars::{self, BarDescriptor, ExpansionRomDescriptor, ResourceEntry};
use crate::bdf::Bdf;
use crate::caps::CapabilityNode;
use crate::config_space::ConfigSpace;
use crate::error::Result;
use crate::msix::MsixInfo;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
    /// 24-bit class code: class << 16 | subclass << 8 | prog-if.
    pub class_code: u32,
    pub revision_id: u8,
}

impl DeviceIdentity {
    /// Base class byte, the coarse device category.
    pub fn base_class(&self) -> u8 {
        (self.class_code >> 16) as u8
    }
}

/// Length-preserving configuration-space image plus its parsed capability
/// lists. The byte image is serialized as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpaceImage {
    #[serde(with = "hex_image")]
    pub bytes: Vec<u8>,
    pub capabilities: Vec<CapabilityNode>,
    pub extended_capabilities: Vec<CapabilityNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_bdf: Option<Bdf>,
    /// RFC 3339 timestamp stamped once at extraction time.
    pub captured_at: String,
    pub generator_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f32>,
}

/// Per-register access statistics gathered by the behavior profiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAccess {
    pub offset: u16,
    pub read_count: u64,
    pub write_count: u64,
    /// Bucketed read-latency counts; bucket bounds in
    /// [`LATENCY_BUCKET_BOUNDS_NS`], last bucket is overflow.
    pub latency_ns_histogram: Vec<u64>,
}

/// Upper bounds (ns) of the latency histogram buckets.
pub const LATENCY_BUCKET_BOUNDS_NS: [u64; 5] = [1_000, 10_000, 100_000, 1_000_000, 10_000_000];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BehaviorProfile {
    pub register_accesses: Vec<RegisterAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_rate_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dma_burst_size_distribution: Option<Vec<u64>>,
    /// Deterministic seed for manufacturing-variance scaling, derived from
    /// the donor identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorProfile {
    pub identity: DeviceIdentity,
    pub config_space: ConfigSpaceImage,
    pub bars: [BarDescriptor; 6],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion_rom: Option<ExpansionRomDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msix: Option<MsixInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorProfile>,
    pub provenance: Provenance,
}

impl DonorProfile {
    /// Assemble a profile from a raw image and resource table: parse the
    /// header, walk both capability lists, analyze BARs, derive MSI-X
    /// geometry and validate it against the BARs.
    pub fn from_config_space(
        cfg: &ConfigSpace,
        resources: &[ResourceEntry],
        provenance: Provenance,
    ) -> Result<Self> {
        let identity = cfg.identity();
        let capabilities = cfg.capabilities()?;
        let extended_capabilities = cfg.extended_capabilities()?;
        let bars = bars::analyze_bars(cfg, resources)?;
        let expansion_rom = bars::analyze_expansion_rom(resources);

        let msix = capabilities
            .iter()
            .find(|node| node.is_msix())
            .and_then(|node| MsixInfo::from_capability(&node.kind));
        if let Some(msix) = &msix {
            msix.validate(&bars)?;
        }

        Ok(Self {
            identity,
            config_space: ConfigSpaceImage {
                bytes: cfg.bytes().to_vec(),
                capabilities,
                extended_capabilities,
            },
            bars,
            expansion_rom,
            msix,
            behavior: None,
            provenance,
        })
    }

    /// Re-check the structural invariants of an already-assembled profile
    /// (loaded profiles skip `from_config_space` and land here).
    pub fn validate(&self) -> Result<()> {
        for bar in &self.bars {
            if bar.is_64bit && bar.index < 5 {
                let upper = &self.bars[bar.index + 1];
                if upper.present {
                    return Err(crate::error::Error::BarInvalid {
                        index: bar.index + 1,
                        reason: "upper half of a 64-bit BAR marked present".into(),
                    });
                }
            }
        }
        if let Some(msix) = &self.msix {
            msix.validate(&self.bars)?;
        }
        Ok(())
    }

    pub fn has_msi(&self) -> bool {
        self.config_space.capabilities.iter().any(|c| c.is_msi())
    }
}

/// Hex-string (de)serialization of the raw config-space image.
mod hex_image {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        ser.serialize_str(&out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        if s.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex image"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&s[i..i + 2], 16)
                    .map_err(|e| serde::de::Error::custom(format!("bad hex image: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{CAP_ID_MSIX, CAP_ID_POWER_MANAGEMENT};

    fn provenance() -> Provenance {
        Provenance {
            source_bdf: Some("0000:03:00.0".parse().unwrap()),
            captured_at: "2026-01-15T10:30:00Z".into(),
            generator_version: crate::GENERATOR_VERSION.into(),
            duration_seconds: None,
        }
    }

    fn nic_image() -> (ConfigSpace, Vec<ResourceEntry>) {
        let mut bytes = vec![0u8; 256];
        bytes[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&0x1533u16.to_le_bytes());
        bytes[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
        bytes[0x0b] = 0x02;
        bytes[0x34] = 0x50;
        bytes[0x10..0x14].copy_from_slice(&0xf000_0000u32.to_le_bytes());
        // PM at 0x50, then an unknown vendor cap at 0x68.
        bytes[0x50] = CAP_ID_POWER_MANAGEMENT;
        bytes[0x51] = 0x68;
        bytes[0x68] = 0x42;
        bytes[0x69] = 0x00;
        bytes[0x6a..0x70].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);

        let mut resources = vec![ResourceEntry::EMPTY; 6];
        resources[0] = ResourceEntry {
            start: 0xf000_0000,
            end: 0xf000_0000 + 0x20000 - 1,
            flags: 0x200,
        };
        (ConfigSpace::new(bytes).unwrap(), resources)
    }

    #[test]
    fn assembles_profile_from_image() {
        let (cfg, res) = nic_image();
        let profile = DonorProfile::from_config_space(&cfg, &res, provenance()).unwrap();
        assert_eq!(profile.identity.vendor_id, 0x8086);
        assert_eq!(profile.identity.base_class(), 0x02);
        assert_eq!(profile.config_space.capabilities.len(), 2);
        assert!(profile.bars[0].present);
        assert_eq!(profile.bars[0].size_bytes, 0x20000);
        assert!(profile.msix.is_none());
        profile.validate().unwrap();
    }

    #[test]
    fn serialize_round_trip_preserves_unknown_bytes() {
        let (cfg, res) = nic_image();
        let profile = DonorProfile::from_config_space(&cfg, &res, provenance()).unwrap();
        let json = serde_json::to_string_pretty(&profile).unwrap();
        let back: DonorProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
        // The unknown capability's payload survives verbatim.
        let unknown = back
            .config_space
            .capabilities
            .iter()
            .find(|c| matches!(c.kind, crate::caps::CapabilityKind::Unknown { id: 0x42, .. }))
            .expect("unknown capability kept");
        match &unknown.kind {
            crate::caps::CapabilityKind::Unknown { raw, .. } => {
                assert_eq!(&raw[2..8], &[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn msix_profile_validates_against_bars() {
        let mut bytes = vec![0u8; 256];
        bytes[0x00..0x02].copy_from_slice(&0x10ecu16.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&0x8125u16.to_le_bytes());
        bytes[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
        bytes[0x34] = 0x70;
        bytes[0x70] = CAP_ID_MSIX;
        bytes[0x72..0x74].copy_from_slice(&7u16.to_le_bytes());
        bytes[0x74..0x78].copy_from_slice(&4u32.to_le_bytes()); // table: BAR4 +0
        bytes[0x78..0x7c].copy_from_slice(&0x1004u32.to_le_bytes()); // PBA: BAR4 +0x1000
        bytes[0x20..0x24].copy_from_slice(&(0xe000_0000u32 | 0b100 | 0b1000).to_le_bytes());

        let mut resources = vec![ResourceEntry::EMPTY; 6];
        resources[4] = ResourceEntry {
            start: 0xe000_0000,
            end: 0xe000_0000 + 0x2000 - 1,
            flags: 0x200,
        };

        let cfg = ConfigSpace::new(bytes).unwrap();
        let profile = DonorProfile::from_config_space(&cfg, &resources, provenance()).unwrap();
        let msix = profile.msix.unwrap();
        assert_eq!(msix.num_vectors, 8);
        assert_eq!(msix.table_bar, 4);
        assert_eq!(msix.pba_offset, 0x1000);
        assert!(profile.bars[4].is_64bit);
        assert!(!profile.bars[5].present);
    }

    #[test]
    fn msix_window_outside_bar_fails_assembly() {
        let mut bytes = vec![0u8; 256];
        bytes[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
        bytes[0x34] = 0x70;
        bytes[0x70] = CAP_ID_MSIX;
        bytes[0x72..0x74].copy_from_slice(&63u16.to_le_bytes()); // 64 vectors
        bytes[0x74..0x78].copy_from_slice(&0x4000u32.to_le_bytes()); // table: BAR0 +0x4000
        bytes[0x78..0x7c].copy_from_slice(&0x6000u32.to_le_bytes());
        bytes[0x10..0x14].copy_from_slice(&0xf000_0000u32.to_le_bytes());

        let mut resources = vec![ResourceEntry::EMPTY; 6];
        resources[0] = ResourceEntry {
            start: 0xf000_0000,
            end: 0xf000_0000 + 0x2000 - 1,
            flags: 0x200,
        };

        let cfg = ConfigSpace::new(bytes).unwrap();
        let err = DonorProfile::from_config_space(&cfg, &resources, provenance()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
