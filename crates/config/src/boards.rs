// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Static catalog of supported PCILeech FPGA boards.

use serde::{Deserialize, Serialize};

/// FPGA family that selects the PCIe IP core configuration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpFamily {
    Pcie7Series,
    UltraScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardDescriptor {
    pub name: &'static str,
    pub fpga_part: &'static str,
    pub ip_family: IpFamily,
    pub default_bar0_size_kb: u32,
    /// Built-in pinout constraints used when the upstream cache has nothing
    /// fresher for this board.
    pub fallback_pinout_xdc: Option<&'static str>,
}

const SQUIRREL_PINOUT: &str = include_str!("pinouts/pcileech_squirrel.xdc");
const X325_PINOUT: &str = include_str!("pinouts/pcileech_35t325.xdc");

pub const BOARDS: &[BoardDescriptor] = &[
    BoardDescriptor {
        name: "pcileech_35t325_x1",
        fpga_part: "xc7a35tcsg325-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 4,
        fallback_pinout_xdc: Some(X325_PINOUT),
    },
    BoardDescriptor {
        name: "pcileech_35t325_x4",
        fpga_part: "xc7a35tcsg325-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 4,
        fallback_pinout_xdc: Some(X325_PINOUT),
    },
    BoardDescriptor {
        name: "pcileech_75t484_x1",
        fpga_part: "xc7a75tfgg484-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 16,
        fallback_pinout_xdc: None,
    },
    BoardDescriptor {
        name: "pcileech_100t484_x1",
        fpga_part: "xc7a100tfgg484-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 16,
        fallback_pinout_xdc: None,
    },
    BoardDescriptor {
        name: "pcileech_enigma_x1",
        fpga_part: "xc7a75tfgg484-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 16,
        fallback_pinout_xdc: None,
    },
    BoardDescriptor {
        name: "pcileech_squirrel",
        fpga_part: "xc7a35tcsg324-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 4,
        fallback_pinout_xdc: Some(SQUIRREL_PINOUT),
    },
    BoardDescriptor {
        name: "pcileech_pciescreamer_xc7a35",
        fpga_part: "xc7a35tcsg325-2",
        ip_family: IpFamily::Pcie7Series,
        default_bar0_size_kb: 4,
        fallback_pinout_xdc: Some(X325_PINOUT),
    },
    BoardDescriptor {
        name: "pcileech_au15p_x4",
        fpga_part: "xcau15p-ffvb676-2-e",
        ip_family: IpFamily::UltraScale,
        default_bar0_size_kb: 64,
        fallback_pinout_xdc: None,
    },
];

pub fn find_board(name: &str) -> Option<&'static BoardDescriptor> {
    BOARDS.iter().find(|b| b.name == name)
}
