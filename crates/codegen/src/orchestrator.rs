//! Top-level build pipeline.
//!
//! Strictly sequential stages, each with a single failure mode: resolve
//! input, validate profile, build context, resolve board and constraint
//! cache, plan, render into a staging directory, cross-check anchor
//! constants, then atomically rename the staging directory onto the target.
//! Any failure discards the staging directory; the orchestrator is the only
//! writer of the output tree.

use crate::context::{build_context, RenderContext};
use crate::repo_cache::RepoCache;
use crate::templates::{build_plan, load_template, PlanEntry};
use pciforge_config::{find_board, save_profile, BuildRequest, DonorTemplate};
use pciforge_core::error::{Error, Result};
use pciforge_core::profile::DonorProfile;
use std::io::Write;
use std::path::{Path, PathBuf};
use sysfs_ingestor::{extract_profile, CancelToken, ExtractionOptions, SysfsReader};

#[derive(Debug)]
pub struct BuildReport {
    pub output_dir: PathBuf,
    /// Paths relative to `output_dir`, in render order.
    pub files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

pub struct Orchestrator<'a> {
    reader: &'a SysfsReader,
    repo_cache: RepoCache,
}

impl<'a> Orchestrator<'a> {
    pub fn new(reader: &'a SysfsReader, repo_cache: RepoCache) -> Self {
        Self { reader, repo_cache }
    }

    /// Run a complete build. `captured_at` is the only clock-derived value
    /// in the whole pipeline and is stamped by the caller.
    pub fn run(
        &self,
        request: &BuildRequest,
        captured_at: &str,
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        request.validate()?;
        if request.output_dir.exists() {
            return Err(Error::Input(format!(
                "output directory {} already exists",
                request.output_dir.display()
            )));
        }

        let mut warnings = Vec::new();

        // Stage 1: resolve input.
        let template = request
            .donor_profile_path
            .as_deref()
            .map(DonorTemplate::from_file)
            .transpose()?;
        let profile =
            self.resolve_profile(request, template.as_ref(), captured_at, cancel, &mut warnings)?;
        check_cancel(cancel)?;

        // Stage 2: validate profile invariants.
        profile.validate()?;

        // Stage 3/4: resolve board, then constraint cache (best-effort).
        let board = find_board(&request.board)
            .ok_or_else(|| Error::Input(format!("unknown board '{}'", request.board)))?;
        let pinout = self.repo_cache.resolve_pinout(board);
        if pinout.is_fallback() {
            warnings.push(format!(
                "no upstream constraint snapshot for board '{}'; built-in fallback pinout used",
                board.name
            ));
        }
        check_cancel(cancel)?;

        // Stage 3 (continued): build and validate the render context. The
        // donor template's advanced_features section applies unless the
        // request already enables something explicitly.
        let mut options = request.options.clone();
        if options.advanced == Default::default() {
            if let Some(advanced) = template.as_ref().and_then(|t| t.advanced_features) {
                options.advanced = advanced;
            }
        }
        let ctx = build_context(&profile, board, &options, &pinout)?;

        // Stage 5: plan the output file list. Pure, no I/O.
        let plan = build_plan(&ctx);

        // Stage 6: render into a staging directory.
        let staging = self.create_staging(&request.output_dir)?;
        let result = self.render_and_commit(
            request, &profile, &ctx, &plan, staging.path(), &warnings, cancel,
        );
        match result {
            Ok(files) => {
                // Stage 8 succeeded: the staging directory was renamed away,
                // so suppress the TempDir cleanup of the moved path.
                let _ = staging.into_path();
                tracing::info!(
                    out = %request.output_dir.display(),
                    files = files.len(),
                    "build committed"
                );
                Ok(BuildReport {
                    output_dir: request.output_dir.clone(),
                    files,
                    warnings,
                })
            }
            Err(e) => {
                // TempDir drop unlinks the staging tree.
                tracing::error!("build failed, discarding staging directory: {e}");
                Err(e)
            }
        }
    }

    fn resolve_profile(
        &self,
        request: &BuildRequest,
        template: Option<&DonorTemplate>,
        captured_at: &str,
        cancel: &CancelToken,
        warnings: &mut Vec<String>,
    ) -> Result<DonorProfile> {
        let extraction = ExtractionOptions {
            profile_duration_s: request.options.profile_duration_s,
            enable_variance: request.options.enable_variance,
            captured_at: captured_at.to_string(),
            cancel: cancel.clone(),
        };

        match (&request.bdf, template) {
            (Some(bdf), None) => extract_profile(self.reader, *bdf, &extraction),
            (None, Some(template)) => template.to_profile(captured_at),
            (Some(bdf), Some(template)) => {
                // Overlay mode: the template wins over discovered values, and
                // covers for the device when extraction fails.
                match extract_profile(self.reader, *bdf, &extraction) {
                    Ok(discovered) => template.apply_to(discovered),
                    Err(e) if e.is_extraction_error() => {
                        warnings.push(format!(
                            "extraction from {bdf} failed ({e}); donor template values used"
                        ));
                        template.to_profile(captured_at)
                    }
                    Err(e) => Err(e),
                }
            }
            (None, None) => unreachable!("request validation enforces an input"),
        }
    }

    fn create_staging(&self, output_dir: &Path) -> Result<tempfile::TempDir> {
        let parent = output_dir.parent().filter(|p| !p.as_os_str().is_empty());
        let parent = match parent {
            Some(p) => {
                std::fs::create_dir_all(p)?;
                p.to_path_buf()
            }
            None => PathBuf::from("."),
        };
        // Staging lives in the same directory as the target so the final
        // rename stays on one filesystem.
        let staging = tempfile::Builder::new()
            .prefix(".pciforge-staging-")
            .tempdir_in(parent)?;
        Ok(staging)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_and_commit(
        &self,
        request: &BuildRequest,
        profile: &DonorProfile,
        ctx: &RenderContext,
        plan: &[PlanEntry],
        staging: &Path,
        warnings: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let template_dir = request.options.template_dir.as_deref();

        for entry in plan {
            let template = load_template(entry.template_id, template_dir)?;
            let rendered = template.render(ctx)?;

            let target = staging.join(&entry.output_path);
            if let Some(dir) = target.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = std::fs::File::create(&target)?;
            file.write_all(rendered.as_bytes())?;
            files.push(entry.output_path.clone());
        }

        // The exact profile used, for reproducibility.
        save_profile(profile, &staging.join("donor_info.json"))?;
        files.push(PathBuf::from("donor_info.json"));

        if !warnings.is_empty() {
            let path = staging.join("generated/build_warnings.txt");
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut text = warnings.join("\n");
            text.push('\n');
            std::fs::write(&path, text)?;
            files.push(PathBuf::from("generated/build_warnings.txt"));
        }

        check_cancel(cancel)?;

        // Stage 7: cross-check anchor constants in the rendered tree.
        cross_check(staging, profile)?;

        // Stage 8: atomic commit.
        std::fs::rename(staging, &request.output_dir)?;
        Ok(files)
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "build cancelled",
        )));
    }
    Ok(())
}

/// Re-parse the identity constants out of the rendered device_config module
/// and IP configuration script, and compare them with the profile. Any
/// divergence is a generator bug and aborts the build.
fn cross_check(staging: &Path, profile: &DonorProfile) -> Result<()> {
    let id = &profile.identity;

    let sv = std::fs::read_to_string(staging.join("generated/device_config.sv"))?;
    let sv_checks: [(&str, u64); 6] = [
        ("VENDOR_ID", id.vendor_id.into()),
        ("DEVICE_ID", id.device_id.into()),
        ("SUBSYS_VENDOR_ID", id.subsystem_vendor_id.into()),
        ("SUBSYS_DEVICE_ID", id.subsystem_device_id.into()),
        ("CLASS_CODE", id.class_code.into()),
        ("REVISION_ID", id.revision_id.into()),
    ];
    for (param, expected) in sv_checks {
        let found = extract_sv_constant(&sv, param)?;
        if found != expected {
            return Err(Error::CodegenInconsistency(format!(
                "device_config.sv {param} is {found:#x}, profile says {expected:#x}"
            )));
        }
    }

    let tcl = std::fs::read_to_string(staging.join("tcl/02_ip_config.tcl"))?;
    let tcl_checks: [(&str, u64); 5] = [
        ("CONFIG.Vendor_ID", id.vendor_id.into()),
        ("CONFIG.Device_ID", id.device_id.into()),
        ("CONFIG.Subsystem_Vendor_ID", id.subsystem_vendor_id.into()),
        ("CONFIG.Subsystem_ID", id.subsystem_device_id.into()),
        ("CONFIG.Revision_ID", id.revision_id.into()),
    ];
    for (key, expected) in tcl_checks {
        let found = extract_tcl_hex(&tcl, key)?;
        if found != expected {
            return Err(Error::CodegenInconsistency(format!(
                "02_ip_config.tcl {key} is {found:#x}, profile says {expected:#x}"
            )));
        }
    }

    let msix_enabled = tcl.contains("CONFIG.MSIX_Enabled {true}");
    if msix_enabled != profile.msix.is_some() {
        return Err(Error::CodegenInconsistency(format!(
            "02_ip_config.tcl MSIX_Enabled is {msix_enabled}, profile says {}",
            profile.msix.is_some()
        )));
    }

    Ok(())
}

/// Parse `PARAM = N'hXXXX` out of a rendered Verilog parameter list. The
/// param name is matched as a whole word so DEVICE_ID does not match
/// SUBSYS_DEVICE_ID's line.
fn extract_sv_constant(content: &str, param: &str) -> Result<u64> {
    for line in content.lines() {
        let Some(at) = line.find(param) else {
            continue;
        };
        let before = line[..at].chars().next_back();
        if matches!(before, Some(c) if c == '_' || c.is_ascii_alphanumeric()) {
            continue;
        }
        let rest = &line[at + param.len()..];
        if !rest.trim_start().starts_with('=') {
            continue;
        }
        let Some(hex_at) = rest.find("'h") else {
            continue;
        };
        let digits: String = rest[hex_at + 2..]
            .chars()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        if digits.is_empty() {
            continue;
        }
        return u64::from_str_radix(&digits, 16)
            .map_err(|e| Error::CodegenInconsistency(format!("{param}: {e}")));
    }
    Err(Error::CodegenInconsistency(format!(
        "device_config.sv does not declare {param}"
    )))
}

/// Parse `CONFIG.Key {0xNNNN}` out of a rendered IP configuration script.
fn extract_tcl_hex(content: &str, key: &str) -> Result<u64> {
    let needle = format!("{key} {{0x");
    let at = content.find(&needle).ok_or_else(|| {
        Error::CodegenInconsistency(format!("02_ip_config.tcl does not set {key}"))
    })?;
    let digits: String = content[at + needle.len()..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u64::from_str_radix(&digits, 16)
        .map_err(|e| Error::CodegenInconsistency(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sv_constant_extraction_matches_whole_words() {
        let sv = "\
    parameter [15:0] VENDOR_ID        = 16'h8086,
    parameter [15:0] DEVICE_ID        = 16'h1533,
    parameter [15:0] SUBSYS_DEVICE_ID = 16'h0001,
    parameter [23:0] CLASS_CODE       = 24'h020000,
";
        assert_eq!(extract_sv_constant(sv, "VENDOR_ID").unwrap(), 0x8086);
        assert_eq!(extract_sv_constant(sv, "DEVICE_ID").unwrap(), 0x1533);
        assert_eq!(extract_sv_constant(sv, "SUBSYS_DEVICE_ID").unwrap(), 0x0001);
        assert_eq!(extract_sv_constant(sv, "CLASS_CODE").unwrap(), 0x020000);
        assert!(extract_sv_constant(sv, "REVISION_ID").is_err());
    }

    #[test]
    fn tcl_hex_extraction() {
        let tcl = "CONFIG.Vendor_ID {0x8086} \\\n CONFIG.Device_ID {0x1533} \\\n";
        assert_eq!(extract_tcl_hex(tcl, "CONFIG.Vendor_ID").unwrap(), 0x8086);
        assert_eq!(extract_tcl_hex(tcl, "CONFIG.Device_ID").unwrap(), 0x1533);
        assert!(extract_tcl_hex(tcl, "CONFIG.Revision_ID").is_err());
    }
}
