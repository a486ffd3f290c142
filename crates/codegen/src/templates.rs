//! Embedded template library and the output-file plan.
//!
//! The authoritative template set is compiled into the binary; an override
//! directory (BuildOptions::template_dir) may shadow any template by id,
//! which is how the upstream's historically duplicated template trees are
//! reduced to a single runtime choice.

use crate::context::{RenderContext, Value};
use crate::renderer::Template;
use pciforge_core::error::{Error, Result};
use std::path::{Path, PathBuf};

/// (template id, embedded source). Ids double as override-file paths
/// relative to the override directory, with `.tpl` appended.
static EMBEDDED: &[(&str, &str)] = &[
    (
        "sv/device_config.sv",
        include_str!("../templates/sv/device_config.sv.tpl"),
    ),
    (
        "sv/bar_controller.sv",
        include_str!("../templates/sv/bar_controller.sv.tpl"),
    ),
    (
        "sv/cfg_shadow.sv",
        include_str!("../templates/sv/cfg_shadow.sv.tpl"),
    ),
    (
        "sv/msix_capability_registers.sv",
        include_str!("../templates/sv/msix_capability_registers.sv.tpl"),
    ),
    (
        "sv/msix_implementation.sv",
        include_str!("../templates/sv/msix_implementation.sv.tpl"),
    ),
    (
        "sv/top_wrapper.sv",
        include_str!("../templates/sv/top_wrapper.sv.tpl"),
    ),
    (
        "sv/power_management.sv",
        include_str!("../templates/sv/power_management.sv.tpl"),
    ),
    (
        "sv/error_handling.sv",
        include_str!("../templates/sv/error_handling.sv.tpl"),
    ),
    (
        "sv/performance_counters.sv",
        include_str!("../templates/sv/performance_counters.sv.tpl"),
    ),
    (
        "sv/clock_crossing.sv",
        include_str!("../templates/sv/clock_crossing.sv.tpl"),
    ),
    (
        "tcl/01_project_setup.tcl",
        include_str!("../templates/tcl/01_project_setup.tcl.tpl"),
    ),
    (
        "tcl/ip_config_pcie7x.tcl",
        include_str!("../templates/tcl/ip_config_pcie7x.tcl.tpl"),
    ),
    (
        "tcl/ip_config_ultrascale.tcl",
        include_str!("../templates/tcl/ip_config_ultrascale.tcl.tpl"),
    ),
    (
        "tcl/03_add_sources.tcl",
        include_str!("../templates/tcl/03_add_sources.tcl.tpl"),
    ),
    (
        "tcl/04_constraints.tcl",
        include_str!("../templates/tcl/04_constraints.tcl.tpl"),
    ),
    (
        "tcl/05_synthesis.tcl",
        include_str!("../templates/tcl/05_synthesis.tcl.tpl"),
    ),
    (
        "tcl/06_implementation.tcl",
        include_str!("../templates/tcl/06_implementation.tcl.tpl"),
    ),
    (
        "tcl/07_bitstream.tcl",
        include_str!("../templates/tcl/07_bitstream.tcl.tpl"),
    ),
    (
        "tcl/build_all.tcl",
        include_str!("../templates/tcl/build_all.tcl.tpl"),
    ),
    (
        "xdc/pinout.xdc",
        include_str!("../templates/xdc/pinout.xdc.tpl"),
    ),
    (
        "xdc/timing.xdc",
        include_str!("../templates/xdc/timing.xdc.tpl"),
    ),
];

pub fn embedded_source(id: &str) -> Option<&'static str> {
    EMBEDDED.iter().find(|(name, _)| *name == id).map(|(_, s)| *s)
}

/// Load a template by id, preferring the override directory when given.
pub fn load_template(id: &str, override_dir: Option<&Path>) -> Result<Template> {
    if let Some(dir) = override_dir {
        let candidate = dir.join(format!("{id}.tpl"));
        if candidate.is_file() {
            let source = std::fs::read_to_string(&candidate)?;
            return Template::parse(id, &source);
        }
    }
    let source = embedded_source(id).ok_or_else(|| Error::TemplateRender {
        template: id.to_string(),
        reason: "unknown template id".into(),
    })?;
    Template::parse(id, source)
}

/// One planned output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub template_id: &'static str,
    pub output_path: PathBuf,
}

fn entry(template_id: &'static str, output_path: &str) -> PlanEntry {
    PlanEntry {
        template_id,
        output_path: PathBuf::from(output_path),
    }
}

fn flag(ctx: &RenderContext, key: &str) -> bool {
    matches!(ctx.get(key), Some(Value::Bool(true)))
}

/// Deterministic output plan: a pure function of the context, no I/O.
/// Exactly one of the two IP-config templates is selected, and optional
/// feature modules appear iff their gate is set.
pub fn build_plan(ctx: &RenderContext) -> Vec<PlanEntry> {
    let mut plan = vec![
        entry("sv/device_config.sv", "generated/device_config.sv"),
        entry("sv/bar_controller.sv", "generated/bar_controller.sv"),
        entry("sv/cfg_shadow.sv", "generated/cfg_shadow.sv"),
    ];

    if flag(ctx, "msix.is_supported") {
        plan.push(entry(
            "sv/msix_capability_registers.sv",
            "generated/msix_capability_registers.sv",
        ));
        plan.push(entry(
            "sv/msix_implementation.sv",
            "generated/msix_implementation.sv",
        ));
    }
    if flag(ctx, "features.power_management") {
        plan.push(entry("sv/power_management.sv", "generated/power_management.sv"));
    }
    if flag(ctx, "features.error_handling") {
        plan.push(entry("sv/error_handling.sv", "generated/error_handling.sv"));
    }
    if flag(ctx, "features.performance_counters") {
        plan.push(entry(
            "sv/performance_counters.sv",
            "generated/performance_counters.sv",
        ));
    }
    if flag(ctx, "features.clock_crossing") {
        plan.push(entry("sv/clock_crossing.sv", "generated/clock_crossing.sv"));
    }
    plan.push(entry("sv/top_wrapper.sv", "generated/top_wrapper.sv"));

    plan.push(entry("tcl/01_project_setup.tcl", "tcl/01_project_setup.tcl"));
    if flag(ctx, "pcie.is_ultrascale") {
        plan.push(entry("tcl/ip_config_ultrascale.tcl", "tcl/02_ip_config.tcl"));
    } else {
        plan.push(entry("tcl/ip_config_pcie7x.tcl", "tcl/02_ip_config.tcl"));
    }
    plan.push(entry("tcl/03_add_sources.tcl", "tcl/03_add_sources.tcl"));
    plan.push(entry("tcl/04_constraints.tcl", "tcl/04_constraints.tcl"));
    plan.push(entry("tcl/05_synthesis.tcl", "tcl/05_synthesis.tcl"));
    plan.push(entry("tcl/06_implementation.tcl", "tcl/06_implementation.tcl"));
    plan.push(entry("tcl/07_bitstream.tcl", "tcl/07_bitstream.tcl"));
    plan.push(entry("tcl/build_all.tcl", "tcl/build_all.tcl"));

    plan.push(entry("xdc/pinout.xdc", "constraints/pinout.xdc"));
    plan.push(entry("xdc/timing.xdc", "constraints/timing.xdc"));

    plan
}

/// Every key the selected (embedded) template set can reference for this
/// context, used by final context validation.
pub fn referenced_keys(ctx: &RenderContext) -> Vec<String> {
    let mut keys = Vec::new();
    for entry in build_plan(ctx) {
        // Embedded templates are known-good; a parse failure here is a bug,
        // surfaced as an empty key set that validation then reports.
        if let Some(source) = embedded_source(entry.template_id) {
            if let Ok(template) = Template::parse(entry.template_id, source) {
                keys.extend(template.referenced_keys(6));
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx(flags: &[(&str, bool)]) -> RenderContext {
        let mut map = BTreeMap::new();
        for (k, v) in flags {
            map.insert(k.to_string(), Value::Bool(*v));
        }
        RenderContext::from_map(map)
    }

    #[test]
    fn all_embedded_templates_parse() {
        for (id, source) in EMBEDDED {
            Template::parse(id, source).unwrap_or_else(|e| panic!("{id}: {e}"));
        }
    }

    #[test]
    fn msix_modules_planned_only_when_supported() {
        let with = build_plan(&ctx(&[("msix.is_supported", true)]));
        assert!(with
            .iter()
            .any(|e| e.output_path.ends_with("msix_implementation.sv")));

        let without = build_plan(&ctx(&[("msix.is_supported", false)]));
        assert!(!without
            .iter()
            .any(|e| e.output_path.to_string_lossy().contains("msix")));
    }

    #[test]
    fn exactly_one_ip_config_selected() {
        for ultrascale in [false, true] {
            let plan = build_plan(&ctx(&[("pcie.is_ultrascale", ultrascale)]));
            let ip_entries: Vec<_> = plan
                .iter()
                .filter(|e| e.output_path.ends_with("02_ip_config.tcl"))
                .collect();
            assert_eq!(ip_entries.len(), 1);
            let expected = if ultrascale {
                "tcl/ip_config_ultrascale.tcl"
            } else {
                "tcl/ip_config_pcie7x.tcl"
            };
            assert_eq!(ip_entries[0].template_id, expected);
        }
    }

    #[test]
    fn plan_paths_are_unique() {
        let plan = build_plan(&ctx(&[
            ("msix.is_supported", true),
            ("features.power_management", true),
            ("features.error_handling", true),
            ("features.performance_counters", true),
            ("features.clock_crossing", true),
        ]));
        let mut paths: Vec<_> = plan.iter().map(|e| e.output_path.clone()).collect();
        let before = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), before);
    }

    #[test]
    fn unknown_template_id_rejected() {
        assert!(load_template("sv/nonexistent.sv", None).is_err());
    }
}
