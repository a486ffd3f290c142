// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use pciforge_codegen::{Orchestrator, RepoCache};
use pciforge_config::{BuildOptions, BuildRequest, DonorTemplate};
use pciforge_core::error::{Error, Result};
use pciforge_core::{Bdf, ConfigSpace};
use std::path::PathBuf;
use std::process::ExitCode;
use sysfs_ingestor::{extract_profile, CancelToken, ExtractionOptions, SysfsReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;

/// Environment variable naming the upstream constraint repository; unset
/// means the build runs offline against the built-in fallbacks.
const REPO_URL_ENV: &str = "PCILEECH_REPO_URL";

fn parse_bdf(s: &str) -> std::result::Result<Bdf, String> {
    s.parse::<Bdf>().map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "pciforge",
    about = "Generate PCILeech FPGA firmware sources from a donor PCIe device",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract a donor profile and generate the firmware source tree.
    Build(BuildArgs),

    /// Create or validate a donor template (JSON).
    DonorTemplate(DonorTemplateArgs),

    /// List PCI devices visible under the sysfs root.
    ListDevices,
}

#[derive(Parser, Debug)]
struct BuildArgs {
    /// Donor device address, e.g. 0000:03:00.0
    #[arg(long, value_parser = parse_bdf)]
    bdf: Option<Bdf>,

    /// Target board name (see the board catalog).
    #[arg(long)]
    board: String,

    /// Output directory; must not already exist.
    #[arg(long, default_value = "output")]
    out: PathBuf,

    /// Behavior-profiling duration in seconds (0 disables profiling).
    #[arg(long)]
    profile_duration: Option<f32>,

    /// Derive manufacturing-variance parameters from the donor identity.
    #[arg(long)]
    enable_variance: bool,

    /// Donor template overriding (or substituting for) discovered values.
    #[arg(long)]
    donor_template: Option<PathBuf>,

    /// Write the donor template snapshot of this build to a file.
    #[arg(long)]
    output_template: Option<PathBuf>,

    /// Directory of template overrides shadowing the built-in set.
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Stop the master TCL script after constraints; skip synthesis steps.
    #[arg(long = "no-synth")]
    no_synth: bool,
}

#[derive(Parser, Debug)]
struct DonorTemplateArgs {
    /// Snapshot this device instead of emitting a blank template.
    #[arg(long, value_parser = parse_bdf)]
    bdf: Option<Bdf>,

    /// Emit a template with every field null.
    #[arg(long)]
    blank: bool,

    /// Single-line JSON output.
    #[arg(long)]
    compact: bool,

    /// Output path; stdout when omitted.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Validate an existing template instead of generating one.
    #[arg(long)]
    validate: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reader = SysfsReader::from_env();

    let result = match cli.command {
        Commands::Build(args) => cmd_build(&reader, args),
        Commands::DonorTemplate(args) => cmd_donor_template(&reader, args),
        Commands::ListDevices => cmd_list_devices(&reader),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("[{}] {e}", e.kind());
            ExitCode::from(e.exit_code())
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn cmd_build(reader: &SysfsReader, args: BuildArgs) -> Result<()> {
    if args.bdf.is_none() && args.donor_template.is_none() {
        return Err(Error::Input(
            "build needs --bdf, --donor-template, or both".into(),
        ));
    }

    let request = BuildRequest {
        bdf: args.bdf,
        donor_profile_path: args.donor_template.clone(),
        board: args.board.clone(),
        output_dir: args.out.clone(),
        options: BuildOptions {
            enable_variance: args.enable_variance,
            profile_duration_s: args.profile_duration,
            use_local_profile: args.donor_template.is_some(),
            skip_synthesis: args.no_synth,
            template_dir: args.template_dir.clone(),
            ..Default::default()
        },
    };

    let repo_cache = RepoCache::new(
        default_cache_dir(),
        std::env::var(REPO_URL_ENV).ok(),
    );
    let orchestrator = Orchestrator::new(reader, repo_cache);
    let report = orchestrator.run(&request, &now_rfc3339(), &CancelToken::new())?;

    if let Some(path) = &args.output_template {
        let profile = pciforge_config::load_profile(&report.output_dir.join("donor_info.json"))?;
        DonorTemplate::from_profile(&profile).to_file(path, false)?;
        info!("donor template written to {}", path.display());
    }

    info!(
        "generated {} files in {}",
        report.files.len(),
        report.output_dir.display()
    );
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    Ok(())
}

fn cmd_donor_template(reader: &SysfsReader, args: DonorTemplateArgs) -> Result<()> {
    if let Some(path) = &args.validate {
        DonorTemplate::from_file(path)?;
        println!("{}: valid donor template", path.display());
        return Ok(());
    }

    let template = if args.blank || args.bdf.is_none() {
        DonorTemplate::blank()
    } else {
        let options = ExtractionOptions {
            captured_at: now_rfc3339(),
            ..Default::default()
        };
        let profile = extract_profile(reader, args.bdf.unwrap(), &options)?;
        DonorTemplate::from_profile(&profile)
    };

    match &args.output {
        Some(path) => {
            template.to_file(path, args.compact)?;
            info!("donor template written to {}", path.display());
        }
        None => print!("{}", template.to_json(args.compact)),
    }
    Ok(())
}

fn cmd_list_devices(reader: &SysfsReader) -> Result<()> {
    let devices = reader.list_devices()?;
    println!("{} device(s) under {}", devices.len(), reader.root().display());

    for bdf in devices {
        match reader.read_config(bdf) {
            Ok(bytes) => match ConfigSpace::new(bytes) {
                Ok(cfg) => {
                    let id = cfg.identity();
                    println!(
                        "  {bdf}  {:04x}:{:04x}  class {:06x}  rev {:02x}",
                        id.vendor_id, id.device_id, id.class_code, id.revision_id
                    );
                }
                Err(_) => {
                    // Fall back to the id attribute files for devices whose
                    // config space is unreadable at this privilege level.
                    let (vendor, device) = reader.read_vendor_device(bdf)?;
                    println!("  {bdf}  {vendor:04x}:{device:04x}  (config space unreadable)");
                }
            },
            Err(e) => println!("  {bdf}  <{e}>"),
        }
    }
    Ok(())
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("pciforge")
}
