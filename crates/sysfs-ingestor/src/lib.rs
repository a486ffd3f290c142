//! # Sysfs Ingestor
//!
//! Extracts a [`DonorProfile`] from a live PCIe device exposed through a
//! sysfs-style directory tree. The tree root is injectable (and overridable
//! via `PCILEECH_SYSFS_ROOT`), so the whole extraction path runs unchanged
//! against a directory of regular files in tests.

pub mod profiler;
pub mod reader;

pub use profiler::{BehaviorProfiler, CancelToken};
pub use reader::{SysfsReader, DEFAULT_SYSFS_ROOT, SYSFS_ROOT_ENV};

use pciforge_core::error::Result;
use pciforge_core::profile::Provenance;
use pciforge_core::{Bdf, ConfigSpace, DonorProfile};

/// Knobs for a single extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Behavior-profiling duration; `None` or zero skips profiling.
    pub profile_duration_s: Option<f32>,
    pub enable_variance: bool,
    /// RFC 3339 timestamp recorded in provenance. Stamped by the caller so
    /// everything downstream of extraction stays clock-free.
    pub captured_at: String,
    pub cancel: CancelToken,
}

/// Run the full C1→C6 extraction: read config space and resources, parse,
/// analyze, optionally profile, and assemble the immutable profile.
pub fn extract_profile(
    reader: &SysfsReader,
    bdf: Bdf,
    options: &ExtractionOptions,
) -> Result<DonorProfile> {
    tracing::info!(%bdf, root = %reader.root().display(), "extracting donor profile");

    let bytes = reader.read_config(bdf)?;
    let cfg = ConfigSpace::new(bytes)?;
    let resources = reader.read_resource_table(bdf)?;

    let provenance = Provenance {
        source_bdf: Some(bdf),
        captured_at: options.captured_at.clone(),
        generator_version: pciforge_core::GENERATOR_VERSION.to_string(),
        duration_seconds: options.profile_duration_s,
    };

    let mut profile = DonorProfile::from_config_space(&cfg, &resources, provenance)?;
    tracing::info!(
        vendor = format_args!("{:04x}", profile.identity.vendor_id),
        device = format_args!("{:04x}", profile.identity.device_id),
        capabilities = profile.config_space.capabilities.len(),
        "donor profile assembled"
    );

    if let Some(duration) = options.profile_duration_s {
        if duration > 0.0 {
            let profiler = BehaviorProfiler::new(reader, bdf, options.enable_variance);
            profile.behavior =
                Some(profiler.capture(duration, &profile.identity, &options.cancel));
        }
    }

    Ok(profile)
}
