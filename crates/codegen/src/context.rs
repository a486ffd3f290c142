//! Flat render context: every key a template may reference is declared here
//! with a concrete value (or an explicit null), before rendering begins.
//!
//! Building the context is a pure function of the donor profile, the board
//! descriptor and the build options. Nothing below this layer reads the
//! clock, the environment or the filesystem.

use crate::repo_cache::PinoutConstraints;
use pciforge_config::{AdvancedFeatures, BoardDescriptor, BuildOptions, IpFamily};
use pciforge_core::caps::CapabilityKind;
use pciforge_core::error::{Error, Result};
use pciforge_core::msix::MsixInfo;
use pciforge_core::profile::DonorProfile;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A value bound to a context key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    UInt(u64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::UInt(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
        }
    }
}

/// Immutable string-keyed map consumed by the renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    map: BTreeMap<String, Value>,
}

impl RenderContext {
    /// Assemble a context from pre-flattened keys. Intended for tests and
    /// for tooling that replays a stored context.
    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    fn set(&mut self, key: impl Into<String>, value: Value) {
        self.map.insert(key.into(), value);
    }

    fn set_uint(&mut self, key: impl Into<String>, value: u64) {
        self.set(key, Value::UInt(value));
    }

    fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, Value::Bool(value));
    }

    fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Value::Str(value.into()));
    }
}

/// Synthetic MSI-X defaults used when the donor has no MSI-X capability.
pub const MSIX_DEFAULT: MsixInfo = MsixInfo {
    num_vectors: 1,
    table_bar: 0,
    table_offset: 0,
    pba_bar: 0,
    pba_offset: 2048,
};

/// First 16 hex chars of a sha256 over the donor identity, used to tag every
/// generated file with the donor it came from.
pub fn donor_identity_hash(profile: &DonorProfile) -> String {
    let id = &profile.identity;
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{:04x}:{:04x}:{:04x}:{:04x}:{:06x}:{:02x}",
            id.vendor_id,
            id.device_id,
            id.subsystem_vendor_id,
            id.subsystem_device_id,
            id.class_code,
            id.revision_id
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Build the full context. Re-validates profile invariants at the end, so a
/// hand-edited profile that slipped past earlier stages still cannot render.
pub fn build_context(
    profile: &DonorProfile,
    board: &BoardDescriptor,
    options: &BuildOptions,
    pinout: &PinoutConstraints,
) -> Result<RenderContext> {
    let mut ctx = RenderContext::default();
    let id = &profile.identity;

    ctx.set_str("header.generator_version", &profile.provenance.generator_version);
    ctx.set_str("header.donor_hash", donor_identity_hash(profile));
    ctx.set_str("header.board", board.name);
    ctx.set_str("header.captured_at", &profile.provenance.captured_at);

    ctx.set_uint("device.vendor_id", id.vendor_id.into());
    ctx.set_uint("device.device_id", id.device_id.into());
    ctx.set_uint("device.subsystem_vendor_id", id.subsystem_vendor_id.into());
    ctx.set_uint("device.subsystem_device_id", id.subsystem_device_id.into());
    ctx.set_uint("device.class_code", id.class_code.into());
    ctx.set_uint("device.revision_id", id.revision_id.into());

    ctx.set_uint("bars.len", 6);
    for bar in &profile.bars {
        let p = format!("bars.{}", bar.index);
        ctx.set_uint(format!("{p}.index"), bar.index as u64);
        ctx.set_bool(format!("{p}.present"), bar.present);
        ctx.set_uint(format!("{p}.size"), bar.size_bytes);
        ctx.set_bool(
            format!("{p}.is_memory"),
            bar.kind == pciforge_core::bars::BarKind::Memory,
        );
        ctx.set_bool(
            format!("{p}.is_io"),
            bar.kind == pciforge_core::bars::BarKind::Io,
        );
        ctx.set_bool(format!("{p}.is_64bit"), bar.is_64bit);
        ctx.set_bool(format!("{p}.is_prefetchable"), bar.is_prefetchable);
    }

    let rom = profile.expansion_rom;
    ctx.set_bool("rom.present", rom.map(|r| r.present).unwrap_or(false));
    ctx.set_uint("rom.size", rom.map(|r| r.size_bytes).unwrap_or(0));

    let msix = profile.msix.unwrap_or(MSIX_DEFAULT);
    ctx.set_bool("msix.is_supported", profile.msix.is_some());
    ctx.set_uint("msix.num_vectors", msix.num_vectors.into());
    ctx.set_uint(
        "msix.table_size_minus_one",
        msix.table_size_minus_one().into(),
    );
    ctx.set_uint("msix.table_bar", msix.table_bar.into());
    ctx.set_uint("msix.table_offset", msix.table_offset.into());
    ctx.set_uint("msix.pba_bar", msix.pba_bar.into());
    ctx.set_uint("msix.pba_offset", msix.pba_offset.into());
    ctx.set_uint("msix.addr_width", msix_addr_width(msix.num_vectors));

    ctx.set_str("board.name", board.name);
    ctx.set_str("board.fpga_part", board.fpga_part);
    ctx.set_uint(
        "board.default_bar0_size_kb",
        board.default_bar0_size_kb.into(),
    );

    ctx.set_str(
        "pcie.ip_family",
        match board.ip_family {
            IpFamily::Pcie7Series => "pcie7x",
            IpFamily::UltraScale => "ultrascale",
        },
    );
    ctx.set_bool("pcie.is_ultrascale", board.ip_family == IpFamily::UltraScale);
    let link = profile
        .config_space
        .capabilities
        .iter()
        .find_map(|node| match node.kind {
            CapabilityKind::PciExpress {
                max_payload_supported,
                link_width,
                link_speed,
                ..
            } => Some((max_payload_supported, link_width, link_speed)),
            _ => None,
        });
    ctx.set_uint(
        "pcie.max_payload",
        link.map(|(mp, _, _)| mp as u64).unwrap_or(256),
    );
    ctx.set_uint("pcie.link_width", link.map(|(_, w, _)| w as u64).unwrap_or(1));
    ctx.set_uint("pcie.link_speed", link.map(|(_, _, s)| s as u64).unwrap_or(1));

    active_device_config(&mut ctx, profile, options)?;
    feature_flags(&mut ctx, &options.advanced);

    ctx.set_bool("options.skip_synthesis", options.skip_synthesis);
    ctx.set_bool("variance.enabled", options.enable_variance);
    ctx.set_uint(
        "variance.seed",
        profile
            .behavior
            .as_ref()
            .and_then(|b| b.variance_seed)
            .unwrap_or(0),
    );

    ctx.set_str("constraints.pinout", &pinout.text);
    ctx.set_bool("constraints.is_fallback", pinout.is_fallback());
    ctx.set_str("constraints.source", pinout.source_label());

    validate_context(&ctx, profile)?;
    Ok(ctx)
}

/// Address width of the MSI-X table index: ceil(log2(n)), at least 1.
fn msix_addr_width(num_vectors: u16) -> u64 {
    let width = 16 - u16::leading_zeros(num_vectors.saturating_sub(1).max(1));
    u64::from(width.max(1))
}

/// Device-class heuristics plus explicit overrides.
fn active_device_config(
    ctx: &mut RenderContext,
    profile: &DonorProfile,
    options: &BuildOptions,
) -> Result<()> {
    let num_sources: u64 = match profile.identity.base_class() {
        0x01 => 8, // mass storage
        0x02 => 4, // network
        _ => 1,
    };
    ctx.set_uint("active_device_config.num_sources", num_sources);

    let (strategy, vectors) = if profile.msix.is_some() {
        ("msix", u64::from(profile.msix.unwrap().num_vectors))
    } else if profile.has_msi() {
        ("msi", 1)
    } else {
        ("intx", 1)
    };
    ctx.set_str("active_device_config.interrupt_strategy", strategy);
    ctx.set_uint("active_device_config.interrupt_vectors", vectors);

    // Advisory timing defaults, refined by the behavior profile when one was
    // captured. Units: clock cycles at the 100 MHz user clock.
    let mut timer_period: u64 = 100_000;
    let mut counter_width: u64 = 32;
    if let Some(behavior) = &profile.behavior {
        let total_reads: u64 = behavior.register_accesses.iter().map(|a| a.read_count).sum();
        if total_reads > 0 {
            counter_width = 64;
        }
        if let Some(seed) = behavior.variance_seed {
            // Spread the period by up to ~3% so two clones of the same donor
            // model do not tick in lockstep.
            timer_period += seed % 3_000;
        }
    }
    ctx.set_uint("active_device_config.timer_period", timer_period);
    ctx.set_uint("active_device_config.counter_width", counter_width);

    for (key, value) in &options.device_config_overrides {
        let full = format!("active_device_config.{key}");
        if !ctx.contains(&full) {
            return Err(Error::Input(format!(
                "unknown device-config override '{key}'"
            )));
        }
        let value = value
            .parse::<u64>()
            .map(Value::UInt)
            .unwrap_or_else(|_| Value::Str(value.clone()));
        ctx.set(full, value);
    }
    Ok(())
}

fn feature_flags(ctx: &mut RenderContext, advanced: &AdvancedFeatures) {
    ctx.set_bool("features.power_management", advanced.power_management);
    ctx.set_bool("features.error_handling", advanced.error_handling);
    ctx.set_bool("features.performance_counters", advanced.performance_counters);
    ctx.set_bool("features.clock_crossing", advanced.clock_crossing);
}

/// Final validation: profile invariants re-checked against the flattened
/// values, then every key the selected template set references must resolve.
fn validate_context(ctx: &RenderContext, profile: &DonorProfile) -> Result<()> {
    let mut inconsistent = Vec::new();

    if let Some(msix) = &profile.msix {
        if msix.validate(&profile.bars).is_err() {
            inconsistent.push("msix.table_offset".to_string());
        }
    }
    for bar in &profile.bars {
        if bar.is_64bit && bar.index < 5 && profile.bars[bar.index + 1].present {
            inconsistent.push(format!("bars.{}.present", bar.index + 1));
        }
    }

    let missing: Vec<String> = crate::templates::referenced_keys(ctx)
        .into_iter()
        .filter(|key| !ctx.contains(key))
        .collect();

    if !missing.is_empty() || !inconsistent.is_empty() {
        return Err(Error::ContextInvalid {
            missing_keys: missing,
            inconsistent_fields: inconsistent,
        });
    }
    Ok(())
}
