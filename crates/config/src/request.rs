// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Build request and option types handed to the codegen orchestrator.

use crate::boards::find_board;
use pciforge_core::error::{Error, Result};
use pciforge_core::Bdf;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Optional feature blocks gated into the generated design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdvancedFeatures {
    pub power_management: bool,
    pub error_handling: bool,
    pub performance_counters: bool,
    pub clock_crossing: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildOptions {
    pub enable_variance: bool,
    pub profile_duration_s: Option<f32>,
    pub use_local_profile: bool,
    pub skip_synthesis: bool,
    /// Override for the embedded template tree; when unset the built-in
    /// authoritative set is used.
    pub template_dir: Option<PathBuf>,
    pub advanced: AdvancedFeatures,
    /// Explicit `active_device_config.*` overrides, applied after the class
    /// heuristics.
    pub device_config_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    /// Donor device address; mutually exclusive with `donor_profile_path`.
    pub bdf: Option<Bdf>,
    /// Prerecorded profile substituting for live extraction.
    pub donor_profile_path: Option<PathBuf>,
    pub board: String,
    pub output_dir: PathBuf,
    pub options: BuildOptions,
}

impl BuildRequest {
    pub fn validate(&self) -> Result<()> {
        match (&self.bdf, &self.donor_profile_path) {
            (None, None) => {
                return Err(Error::Input(
                    "either a donor BDF or a donor profile path is required".into(),
                ))
            }
            (Some(_), Some(_)) if !self.options.use_local_profile => {
                return Err(Error::Input(
                    "donor BDF and donor profile path are mutually exclusive \
                     (a donor template overlay requires local-profile mode)"
                        .into(),
                ))
            }
            _ => {}
        }
        if find_board(&self.board).is_none() {
            return Err(Error::Input(format!("unknown board '{}'", self.board)));
        }
        if let Some(duration) = self.options.profile_duration_s {
            if !duration.is_finite() || duration < 0.0 {
                return Err(Error::Input(format!(
                    "profile duration {duration} is not a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest {
        BuildRequest {
            bdf: Some("0000:03:00.0".parse().unwrap()),
            donor_profile_path: None,
            board: "pcileech_35t325_x1".into(),
            output_dir: PathBuf::from("out"),
            options: BuildOptions::default(),
        }
    }

    #[test]
    fn valid_request_passes() {
        request().validate().unwrap();
    }

    #[test]
    fn missing_input_rejected() {
        let mut req = request();
        req.bdf = None;
        assert!(req.validate().is_err());
    }

    #[test]
    fn conflicting_inputs_rejected() {
        let mut req = request();
        req.donor_profile_path = Some(PathBuf::from("donor.json"));
        assert!(req.validate().is_err());
    }

    #[test]
    fn unknown_board_rejected() {
        let mut req = request();
        req.board = "not_a_board".into();
        let err = req.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn negative_profile_duration_rejected() {
        let mut req = request();
        req.options.profile_duration_s = Some(-1.0);
        assert!(req.validate().is_err());
    }
}
