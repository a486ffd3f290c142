// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! On-disk donor profile schema and the profile store.
//!
//! A donor template is JSON with required `metadata` and `device_info` keys.
//! Null fields mean "use the discovered value"; unknown keys are preserved
//! on round-trip so templates written by newer versions survive re-saving.

use crate::request::AdvancedFeatures;
use pciforge_core::bars::{BarDescriptor, BarKind, ResourceEntry};
use pciforge_core::error::{Error, Result};
use pciforge_core::msix::{MsixInfo, MSIX_MAX_VECTORS, MSIX_MIN_VECTORS};
use pciforge_core::profile::{BehaviorProfile, DonorProfile, Provenance};
use pciforge_core::ConfigSpace;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_bdf: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Identification {
    pub vendor_id: Option<u32>,
    pub device_id: Option<u32>,
    pub subsystem_vendor_id: Option<u32>,
    pub subsystem_device_id: Option<u32>,
    pub class_code: Option<u32>,
    pub revision_id: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarType {
    Memory,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarEntry {
    pub enabled: bool,
    pub size: u64,
    pub r#type: BarType,
    pub prefetchable: bool,
    #[serde(rename = "64bit")]
    pub is_64bit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BarsSection {
    pub bar0: Option<BarEntry>,
    pub bar1: Option<BarEntry>,
    pub bar2: Option<BarEntry>,
    pub bar3: Option<BarEntry>,
    pub bar4: Option<BarEntry>,
    pub bar5: Option<BarEntry>,
    pub expansion_rom: Option<BarEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BarsSection {
    pub fn slot(&self, index: usize) -> Option<&BarEntry> {
        match index {
            0 => self.bar0.as_ref(),
            1 => self.bar1.as_ref(),
            2 => self.bar2.as_ref(),
            3 => self.bar3.as_ref(),
            4 => self.bar4.as_ref(),
            5 => self.bar5.as_ref(),
            _ => None,
        }
    }

    fn set_slot(&mut self, index: usize, entry: Option<BarEntry>) {
        match index {
            0 => self.bar0 = entry,
            1 => self.bar1 = entry,
            2 => self.bar2 = entry,
            3 => self.bar3 = entry,
            4 => self.bar4 = entry,
            5 => self.bar5 = entry,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsixSection {
    pub num_vectors: u16,
    pub table_bar: u8,
    pub table_offset: u32,
    pub pba_bar: u8,
    pub pba_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
    pub identification: Identification,
    pub bars: BarsSection,
    #[serde(default)]
    pub msix: Option<MsixSection>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The §6.3 donor template document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorTemplate {
    pub metadata: Metadata,
    pub device_info: DeviceInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavioral_profile: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcileech_optimizations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_features: Option<AdvancedFeatures>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DonorTemplate {
    /// A template with every field null: fill in what you know, the rest is
    /// discovered from the donor.
    pub fn blank() -> Self {
        Self {
            metadata: Metadata::default(),
            device_info: DeviceInfo::default(),
            behavioral_profile: None,
            pcileech_optimizations: None,
            advanced_features: None,
            extra: BTreeMap::new(),
        }
    }

    /// Snapshot of an assembled profile, suitable for `--donor-template`.
    pub fn from_profile(profile: &DonorProfile) -> Self {
        let id = &profile.identity;
        let mut bars = BarsSection::default();
        for bar in &profile.bars {
            bars.set_slot(bar.index, bar_entry(bar));
        }
        bars.expansion_rom = profile.expansion_rom.map(|rom| BarEntry {
            enabled: rom.present,
            size: rom.size_bytes,
            r#type: BarType::Memory,
            prefetchable: false,
            is_64bit: false,
        });

        Self {
            metadata: Metadata {
                generator_version: Some(profile.provenance.generator_version.clone()),
                captured_at: Some(profile.provenance.captured_at.clone()),
                source_bdf: profile.provenance.source_bdf.map(|b| b.to_string()),
                extra: BTreeMap::new(),
            },
            device_info: DeviceInfo {
                identification: Identification {
                    vendor_id: Some(id.vendor_id.into()),
                    device_id: Some(id.device_id.into()),
                    subsystem_vendor_id: Some(id.subsystem_vendor_id.into()),
                    subsystem_device_id: Some(id.subsystem_device_id.into()),
                    class_code: Some(id.class_code),
                    revision_id: Some(id.revision_id.into()),
                    extra: BTreeMap::new(),
                },
                bars,
                msix: profile.msix.map(|m| MsixSection {
                    num_vectors: m.num_vectors,
                    table_bar: m.table_bar,
                    table_offset: m.table_offset,
                    pba_bar: m.pba_bar,
                    pba_offset: m.pba_offset,
                }),
                extra: BTreeMap::new(),
            },
            behavioral_profile: profile
                .behavior
                .as_ref()
                .and_then(|b| serde_json::to_value(b).ok()),
            pcileech_optimizations: None,
            advanced_features: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let template: Self = serde_json::from_str(&content)
            .map_err(|e| Error::ProfileSchema(format!("{}: {e}", path.display())))?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_json(&self, compact: bool) -> String {
        let mut out = if compact {
            serde_json::to_string(self).expect("donor template serializes")
        } else {
            serde_json::to_string_pretty(self).expect("donor template serializes")
        };
        out.push('\n');
        out
    }

    pub fn to_file(&self, path: &Path, compact: bool) -> Result<()> {
        std::fs::write(path, self.to_json(compact))?;
        Ok(())
    }

    /// Schema validation beyond what serde enforces: value ranges, BAR flag
    /// combinations, MSI-X bounds and alignment.
    pub fn validate(&self) -> Result<()> {
        let id = &self.device_info.identification;
        check_range("vendor_id", id.vendor_id, 0xffff)?;
        check_range("device_id", id.device_id, 0xffff)?;
        check_range("subsystem_vendor_id", id.subsystem_vendor_id, 0xffff)?;
        check_range("subsystem_device_id", id.subsystem_device_id, 0xffff)?;
        check_range("class_code", id.class_code, 0xff_ffff)?;
        check_range("revision_id", id.revision_id, 0xff)?;

        for index in 0..6 {
            if let Some(entry) = self.device_info.bars.slot(index) {
                if entry.size != 0 && !entry.size.is_power_of_two() {
                    return Err(Error::ProfileSchema(format!(
                        "bar{index}: size {:#x} is not a power of two",
                        entry.size
                    )));
                }
                if entry.r#type == BarType::Io && entry.prefetchable {
                    return Err(Error::ProfileSchema(format!(
                        "bar{index}: I/O BARs cannot be prefetchable"
                    )));
                }
                if entry.r#type == BarType::Io && entry.is_64bit {
                    return Err(Error::ProfileSchema(format!(
                        "bar{index}: I/O BARs cannot be 64-bit"
                    )));
                }
            }
        }

        if let Some(msix) = &self.device_info.msix {
            if !(MSIX_MIN_VECTORS..=MSIX_MAX_VECTORS).contains(&msix.num_vectors) {
                return Err(Error::ProfileSchema(format!(
                    "msix.num_vectors {} outside {MSIX_MIN_VECTORS}..={MSIX_MAX_VECTORS}",
                    msix.num_vectors
                )));
            }
            if msix.table_bar > 5 || msix.pba_bar > 5 {
                return Err(Error::ProfileSchema("msix BIR outside 0..=5".into()));
            }
            if msix.table_offset % 4 != 0 || msix.pba_offset % 4 != 0 {
                return Err(Error::ProfileSchema(
                    "msix offsets must be dword-aligned".into(),
                ));
            }
        }

        Ok(())
    }

    /// Overlay this template onto a discovered profile: every non-null field
    /// wins over the discovered value, and the config-space image is patched
    /// so the identity bytes stay coherent with the overridden identity.
    pub fn apply_to(&self, mut profile: DonorProfile) -> Result<DonorProfile> {
        let id = &self.device_info.identification;
        if let Some(v) = id.vendor_id {
            profile.identity.vendor_id = v as u16;
        }
        if let Some(v) = id.device_id {
            profile.identity.device_id = v as u16;
        }
        if let Some(v) = id.subsystem_vendor_id {
            profile.identity.subsystem_vendor_id = v as u16;
        }
        if let Some(v) = id.subsystem_device_id {
            profile.identity.subsystem_device_id = v as u16;
        }
        if let Some(v) = id.class_code {
            profile.identity.class_code = v;
        }
        if let Some(v) = id.revision_id {
            profile.identity.revision_id = v as u8;
        }
        patch_identity_bytes(&mut profile);

        for index in 0..6 {
            if let Some(entry) = self.device_info.bars.slot(index) {
                profile.bars[index] = descriptor_from_entry(index, entry);
            }
        }
        if let Some(msix) = &self.device_info.msix {
            profile.msix = Some(MsixInfo {
                num_vectors: msix.num_vectors,
                table_bar: msix.table_bar,
                table_offset: msix.table_offset,
                pba_bar: msix.pba_bar,
                pba_offset: msix.pba_offset,
            });
        }
        if let Some(behavior) = &self.behavioral_profile {
            match serde_json::from_value::<BehaviorProfile>(behavior.clone()) {
                Ok(b) => profile.behavior = Some(b),
                Err(e) => tracing::warn!("ignoring malformed behavioral_profile: {e}"),
            }
        }

        profile.validate()?;
        Ok(profile)
    }

    /// Build a complete profile from the template alone (local-profile mode,
    /// no donor device). Every identity field must be non-null; a synthetic
    /// configuration space is assembled from the declared layout.
    pub fn to_profile(&self, captured_at: &str) -> Result<DonorProfile> {
        let id = &self.device_info.identification;
        let require = |name: &str, v: Option<u32>| {
            v.ok_or_else(|| {
                Error::ProfileSchema(format!(
                    "identification.{name} is null and no donor device is available"
                ))
            })
        };
        let vendor_id = require("vendor_id", id.vendor_id)? as u16;
        let device_id = require("device_id", id.device_id)? as u16;
        let subsystem_vendor_id = id.subsystem_vendor_id.unwrap_or(u32::from(vendor_id)) as u16;
        let subsystem_device_id = id.subsystem_device_id.unwrap_or(u32::from(device_id)) as u16;
        let class_code = require("class_code", id.class_code)?;
        let revision_id = id.revision_id.unwrap_or(0) as u8;

        let bytes = synthesize_config_space(
            vendor_id,
            device_id,
            subsystem_vendor_id,
            subsystem_device_id,
            class_code,
            revision_id,
            &self.device_info.bars,
            self.device_info.msix.as_ref(),
        );
        let resources = synthesize_resources(&self.device_info.bars);

        let provenance = Provenance {
            source_bdf: None,
            captured_at: captured_at.to_string(),
            generator_version: pciforge_core::GENERATOR_VERSION.to_string(),
            duration_seconds: None,
        };

        let cfg = ConfigSpace::new(bytes)?;
        let mut profile = DonorProfile::from_config_space(&cfg, &resources, provenance)?;
        if let Some(behavior) = &self.behavioral_profile {
            if let Ok(b) = serde_json::from_value::<BehaviorProfile>(behavior.clone()) {
                profile.behavior = Some(b);
            }
        }
        Ok(profile)
    }
}

fn check_range(name: &str, value: Option<u32>, max: u32) -> Result<()> {
    match value {
        Some(v) if v > max => Err(Error::ProfileSchema(format!(
            "identification.{name} {v:#x} exceeds {max:#x}"
        ))),
        _ => Ok(()),
    }
}

fn bar_entry(bar: &BarDescriptor) -> Option<BarEntry> {
    if !bar.present {
        return None;
    }
    Some(BarEntry {
        enabled: true,
        size: bar.size_bytes,
        r#type: match bar.kind {
            BarKind::Io => BarType::Io,
            _ => BarType::Memory,
        },
        prefetchable: bar.is_prefetchable,
        is_64bit: bar.is_64bit,
    })
}

fn descriptor_from_entry(index: usize, entry: &BarEntry) -> BarDescriptor {
    if !entry.enabled || entry.size == 0 {
        return BarDescriptor::absent(index);
    }
    BarDescriptor {
        index,
        present: true,
        kind: match entry.r#type {
            BarType::Memory => BarKind::Memory,
            BarType::Io => BarKind::Io,
        },
        size_bytes: entry.size,
        is_64bit: entry.is_64bit,
        is_prefetchable: entry.prefetchable,
        consumes_next_index: entry.is_64bit,
    }
}

/// Write the (possibly overridden) identity back into the raw image so the
/// byte image and the parsed identity never diverge.
fn patch_identity_bytes(profile: &mut DonorProfile) {
    let id = profile.identity;
    let bytes = &mut profile.config_space.bytes;
    bytes[0x00..0x02].copy_from_slice(&id.vendor_id.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&id.device_id.to_le_bytes());
    bytes[0x08] = id.revision_id;
    bytes[0x09] = id.class_code as u8;
    bytes[0x0a] = (id.class_code >> 8) as u8;
    bytes[0x0b] = (id.class_code >> 16) as u8;
    bytes[0x2c..0x2e].copy_from_slice(&id.subsystem_vendor_id.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&id.subsystem_device_id.to_le_bytes());
}

#[allow(clippy::too_many_arguments)]
fn synthesize_config_space(
    vendor_id: u16,
    device_id: u16,
    subsystem_vendor_id: u16,
    subsystem_device_id: u16,
    class_code: u32,
    revision_id: u8,
    bars: &BarsSection,
    msix: Option<&MsixSection>,
) -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&vendor_id.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&device_id.to_le_bytes());
    bytes[0x08] = revision_id;
    bytes[0x09] = class_code as u8;
    bytes[0x0a] = (class_code >> 8) as u8;
    bytes[0x0b] = (class_code >> 16) as u8;
    bytes[0x2c..0x2e].copy_from_slice(&subsystem_vendor_id.to_le_bytes());
    bytes[0x2e..0x30].copy_from_slice(&subsystem_device_id.to_le_bytes());

    let mut skip_next = false;
    for index in 0..6 {
        if skip_next {
            skip_next = false;
            continue;
        }
        if let Some(entry) = bars.slot(index) {
            if !entry.enabled || entry.size == 0 {
                continue;
            }
            let mut dword: u32 = 0;
            match entry.r#type {
                BarType::Io => dword |= 1,
                BarType::Memory => {
                    if entry.is_64bit {
                        dword |= 0b10 << 1;
                        skip_next = true;
                    }
                    if entry.prefetchable {
                        dword |= 1 << 3;
                    }
                }
            }
            bytes[0x10 + 4 * index..0x14 + 4 * index].copy_from_slice(&dword.to_le_bytes());
        }
    }

    // Capability list: power management at 0x40, MSI-X at 0x50 when declared.
    bytes[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
    bytes[0x34] = 0x40;
    bytes[0x40] = 0x01; // PM
    bytes[0x41] = if msix.is_some() { 0x50 } else { 0x00 };
    if let Some(msix) = msix {
        bytes[0x50] = 0x11;
        bytes[0x51] = 0x00;
        bytes[0x52..0x54].copy_from_slice(&(msix.num_vectors - 1).to_le_bytes());
        let table = (msix.table_offset & !0x7) | u32::from(msix.table_bar);
        let pba = (msix.pba_offset & !0x7) | u32::from(msix.pba_bar);
        bytes[0x54..0x58].copy_from_slice(&table.to_le_bytes());
        bytes[0x58..0x5c].copy_from_slice(&pba.to_le_bytes());
    }

    bytes
}

/// Synthetic resource table matching the declared BAR sizes. Base addresses
/// are fabricated; only spans matter downstream.
fn synthesize_resources(bars: &BarsSection) -> Vec<ResourceEntry> {
    let mut resources = vec![ResourceEntry::EMPTY; 7];
    let mut mem_base: u64 = 0xe000_0000;
    let mut io_base: u64 = 0xd000;
    for index in 0..6 {
        if let Some(entry) = bars.slot(index) {
            if !entry.enabled || entry.size == 0 {
                continue;
            }
            let (base, flags) = match entry.r#type {
                BarType::Memory => {
                    let b = mem_base;
                    mem_base += entry.size.next_power_of_two().max(0x1000);
                    (b, 0x200u64)
                }
                BarType::Io => {
                    let b = io_base;
                    io_base += entry.size.next_power_of_two().max(0x100);
                    (b, 0x100u64)
                }
            };
            resources[index] = ResourceEntry {
                start: base,
                end: base + entry.size - 1,
                flags,
            };
        }
    }
    if let Some(rom) = &bars.expansion_rom {
        if rom.enabled && rom.size > 0 {
            resources[6] = ResourceEntry {
                start: 0xfff0_0000,
                end: 0xfff0_0000 + rom.size - 1,
                flags: 0x200,
            };
        }
    }
    resources
}

/// Save the exact profile used for a build, for reproducibility.
pub fn save_profile(profile: &DonorProfile, path: &Path) -> Result<()> {
    let mut json = serde_json::to_string_pretty(profile)
        .map_err(|e| Error::ProfileSchema(format!("profile serialization: {e}")))?;
    json.push('\n');
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_profile(path: &Path) -> Result<DonorProfile> {
    let content = std::fs::read_to_string(path)?;
    let profile: DonorProfile = serde_json::from_str(&content)
        .map_err(|e| Error::ProfileSchema(format!("{}: {e}", path.display())))?;
    profile.validate()?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_template_json() -> &'static str {
        r#"{
            "metadata": { "captured_at": "2026-01-15T10:30:00Z" },
            "device_info": {
                "identification": {
                    "vendor_id": 32902,
                    "device_id": 5427,
                    "subsystem_vendor_id": null,
                    "subsystem_device_id": null,
                    "class_code": 131072,
                    "revision_id": 3
                },
                "bars": {
                    "bar0": { "enabled": true, "size": 131072, "type": "memory",
                              "prefetchable": false, "64bit": false },
                    "bar1": null, "bar2": null, "bar3": null, "bar4": null,
                    "bar5": null, "expansion_rom": null
                }
            },
            "vendor_notes": { "origin": "lab bench 3" }
        }"#
    }

    #[test]
    fn parses_and_preserves_unknown_keys() {
        let template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        template.validate().unwrap();
        assert_eq!(template.device_info.identification.vendor_id, Some(0x8086));
        assert!(template.extra.contains_key("vendor_notes"));

        let json = template.to_json(false);
        let back: DonorTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
        assert!(back.extra.contains_key("vendor_notes"));
    }

    #[test]
    fn blank_template_round_trips() {
        let blank = DonorTemplate::blank();
        let json = blank.to_json(true);
        let back: DonorTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, blank);
    }

    #[test]
    fn non_power_of_two_bar_size_rejected() {
        let mut template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        template.device_info.bars.bar0.as_mut().unwrap().size = 100000;
        assert!(matches!(
            template.validate(),
            Err(Error::ProfileSchema(_))
        ));
    }

    #[test]
    fn msix_vector_bounds_enforced() {
        let mut template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        template.device_info.msix = Some(MsixSection {
            num_vectors: 2049,
            table_bar: 0,
            table_offset: 0,
            pba_bar: 0,
            pba_offset: 0x1000,
        });
        assert!(template.validate().is_err());
    }

    #[test]
    fn template_only_profile_synthesizes_config_space() {
        let template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        let profile = template.to_profile("2026-01-15T10:30:00Z").unwrap();
        assert_eq!(profile.identity.vendor_id, 0x8086);
        assert_eq!(profile.identity.device_id, 0x1533);
        assert_eq!(profile.identity.class_code, 0x020000);
        assert!(profile.bars[0].present);
        assert_eq!(profile.bars[0].size_bytes, 0x20000);
        assert!(profile.msix.is_none());
        // The synthesized image re-parses to the same identity.
        let cfg = ConfigSpace::new(profile.config_space.bytes.clone()).unwrap();
        assert_eq!(cfg.identity(), profile.identity);
    }

    #[test]
    fn override_wins_and_patches_image() {
        let base: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        let discovered = base.to_profile("2026-01-15T10:30:00Z").unwrap();
        assert_eq!(discovered.identity.vendor_id, 0x8086);

        let mut overlay = DonorTemplate::blank();
        overlay.device_info.identification.vendor_id = Some(0x10ec);
        let merged = overlay.apply_to(discovered).unwrap();
        assert_eq!(merged.identity.vendor_id, 0x10ec);
        assert_eq!(
            u16::from_le_bytes([
                merged.config_space.bytes[0],
                merged.config_space.bytes[1]
            ]),
            0x10ec
        );
    }

    #[test]
    fn profile_save_load_round_trip() {
        let template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        let profile = template.to_profile("2026-01-15T10:30:00Z").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("donor_info.json");
        save_profile(&profile, &path).unwrap();
        let back = load_profile(&path).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn template_from_profile_feeds_back_identically() {
        let template: DonorTemplate = serde_json::from_str(minimal_template_json()).unwrap();
        let profile = template.to_profile("2026-01-15T10:30:00Z").unwrap();

        let snapshot = DonorTemplate::from_profile(&profile);
        let rebuilt = snapshot.to_profile("2026-01-15T10:30:00Z").unwrap();
        assert_eq!(rebuilt.identity, profile.identity);
        assert_eq!(rebuilt.bars, profile.bars);
        assert_eq!(rebuilt.msix, profile.msix);
    }
}
