// PCIForge - PCILeech Donor Firmware Generator
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const NIC_BDF: &str = "0000:03:00.0";

fn pciforge(sysfs_root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pciforge"))
        .env("PCILEECH_SYSFS_ROOT", sysfs_root)
        .env_remove("PCILEECH_REPO_URL")
        .args(args)
        .output()
        .expect("failed to run pciforge")
}

fn write_nic(root: &Path) {
    let dir = root.join(NIC_BDF);
    fs::create_dir_all(&dir).unwrap();

    let mut config = vec![0u8; 256];
    config[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
    config[0x02..0x04].copy_from_slice(&0x1533u16.to_le_bytes());
    config[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
    config[0x08] = 0x03;
    config[0x0b] = 0x02;
    config[0x10..0x14].copy_from_slice(&0xf000_0000u32.to_le_bytes());
    config[0x34] = 0x40;
    config[0x40] = 0x01;
    fs::write(dir.join("config"), config).unwrap();

    fs::write(
        dir.join("resource"),
        "0x00000000f0000000 0x00000000f001ffff 0x0000000000040200\n\
         0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
         0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
         0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
         0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
         0x0000000000000000 0x0000000000000000 0x0000000000000000\n",
    )
    .unwrap();
    fs::write(dir.join("vendor"), "0x8086\n").unwrap();
    fs::write(dir.join("device"), "0x1533\n").unwrap();
}

#[test]
fn build_succeeds_and_writes_output_tree() {
    let tmp = tempfile::tempdir().unwrap();
    write_nic(tmp.path());
    let out = tmp.path().join("out");

    let output = pciforge(
        tmp.path(),
        &[
            "build",
            "--bdf",
            NIC_BDF,
            "--board",
            "pcileech_35t325_x1",
            "--out",
            out.to_str().unwrap(),
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    for rel in [
        "generated/device_config.sv",
        "generated/top_wrapper.sv",
        "tcl/01_project_setup.tcl",
        "tcl/02_ip_config.tcl",
        "tcl/07_bitstream.tcl",
        "tcl/build_all.tcl",
        "constraints/pinout.xdc",
        "constraints/timing.xdc",
        "donor_info.json",
    ] {
        assert!(out.join(rel).exists(), "missing {rel}");
    }
}

#[test]
fn malformed_bdf_exits_2() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pciforge(
        tmp.path(),
        &[
            "build",
            "--bdf",
            "03:00.0",
            "--board",
            "pcileech_35t325_x1",
            "--out",
            tmp.path().join("out").to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_board_exits_2() {
    let tmp = tempfile::tempdir().unwrap();
    write_nic(tmp.path());
    let output = pciforge(
        tmp.path(),
        &[
            "build",
            "--bdf",
            NIC_BDF,
            "--board",
            "no_such_board",
            "--out",
            tmp.path().join("out").to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_device_exits_3() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pciforge(
        tmp.path(),
        &[
            "build",
            "--bdf",
            "0000:99:00.0",
            "--board",
            "pcileech_35t325_x1",
            "--out",
            tmp.path().join("out").to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn truncated_capability_chain_exits_2_with_no_output() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join(NIC_BDF);
    fs::create_dir_all(&dir).unwrap();

    let mut config = vec![0u8; 256];
    config[0x06..0x08].copy_from_slice(&(1u16 << 4).to_le_bytes());
    config[0x34] = 0xe0;
    config[0xe0] = 0x01;
    config[0xe1] = 0x30;
    fs::write(dir.join("config"), config).unwrap();
    fs::write(
        dir.join("resource"),
        "0x0000000000000000 0x0000000000000000 0x0000000000000000\n",
    )
    .unwrap();

    let out = tmp.path().join("out");
    let output = pciforge(
        tmp.path(),
        &[
            "build",
            "--bdf",
            NIC_BDF,
            "--board",
            "pcileech_35t325_x1",
            "--out",
            out.to_str().unwrap(),
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(!out.exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CapabilityOutOfRange"), "stderr: {stderr}");
}

#[test]
fn donor_template_blank_emits_valid_json() {
    let tmp = tempfile::tempdir().unwrap();
    let output = pciforge(tmp.path(), &["donor-template", "--blank"]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json.get("metadata").is_some());
    assert!(json.get("device_info").is_some());
    assert!(json["device_info"]["identification"]["vendor_id"].is_null());
}

#[test]
fn donor_template_validate_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    write_nic(tmp.path());

    let template_path = tmp.path().join("donor.json");
    let output = pciforge(
        tmp.path(),
        &[
            "donor-template",
            "--bdf",
            NIC_BDF,
            "-o",
            template_path.to_str().unwrap(),
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = pciforge(
        tmp.path(),
        &["donor-template", "--validate", template_path.to_str().unwrap()],
    );
    assert!(output.status.success());
}

#[test]
fn donor_template_validate_rejects_bad_schema() {
    let tmp = tempfile::tempdir().unwrap();
    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "{\"metadata\": {}}").unwrap();

    let output = pciforge(
        tmp.path(),
        &["donor-template", "--validate", bad.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn list_devices_prints_identity() {
    let tmp = tempfile::tempdir().unwrap();
    write_nic(tmp.path());

    let output = pciforge(tmp.path(), &["list-devices"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("0000:03:00.0"));
    assert!(stdout.contains("8086:1533"));
}
