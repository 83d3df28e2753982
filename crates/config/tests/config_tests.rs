// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::Write;
use wbflash_config::{parse_size, BenchManifest, ControllerKind, TrailingStall};

#[test]
fn test_full_manifest_parses() {
    let yaml = r#"
schema_version: "1.0"
controller: qflexpress
bus:
  bomb_count: 4096
  trailing_stall: drain
flash:
  size: "8MiB"
  sector_size: "64KiB"
  page_size: 256
  device_id: 0x20ba1810
  reset_status: 0x1c
  erase_ticks: 500
  program_ticks: 100
  poll_limit: 10000
scenario:
  single_reads: 16
  vector_reads: 32
  sector: 3
  pages: 2
  seed: 7
"#;
    let manifest = BenchManifest::from_yaml(yaml).unwrap();
    assert_eq!(manifest.controller, ControllerKind::QFlexPress);
    assert_eq!(manifest.bus.bomb_count, 4096);
    assert_eq!(manifest.bus.trailing_stall, TrailingStall::Drain);
    assert_eq!(manifest.flash.size_bytes().unwrap(), 8 * 1024 * 1024);
    assert_eq!(manifest.flash.device_id, 0x20ba_1810);
    assert_eq!(manifest.flash.poll_limit, Some(10000));
    assert_eq!(manifest.scenario.sector, 3);
    assert_eq!(manifest.scenario.pages, Some(2));
    assert_eq!(manifest.scenario.seed, 7);
}

#[test]
fn test_empty_manifest_uses_defaults() {
    let manifest = BenchManifest::from_yaml("{}").unwrap();
    assert_eq!(manifest, BenchManifest::default());
    assert_eq!(manifest.controller, ControllerKind::DualFlexPress);
}

#[test]
fn test_controller_aliases() {
    let manifest = BenchManifest::from_yaml("controller: single").unwrap();
    assert_eq!(manifest.controller, ControllerKind::SpiXpress);
    let manifest = BenchManifest::from_yaml("controller: quad").unwrap();
    assert_eq!(manifest.controller, ControllerKind::QFlexPress);
    let manifest = BenchManifest::from_yaml("controller: wbqspiflash").unwrap();
    assert_eq!(manifest.controller, ControllerKind::WbQspiFlash);
    let manifest = BenchManifest::from_yaml("controller: wbqspi").unwrap();
    assert_eq!(manifest.controller, ControllerKind::WbQspiFlash);
}

#[test]
fn test_unknown_field_rejected() {
    let yaml = r#"
flash:
  block_size: 4096
"#;
    assert!(BenchManifest::from_yaml(yaml).is_err());
}

#[test]
fn test_bad_size_rejected() {
    let yaml = r#"
flash:
  size: "lots"
"#;
    let err = BenchManifest::from_yaml(yaml).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid flash size"));
}

#[test]
fn test_oversized_flash_rejected() {
    let yaml = r#"
flash:
  size: "32MiB"
"#;
    let err = BenchManifest::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("24-bit"));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "controller: spixpress").unwrap();
    writeln!(file, "scenario:").unwrap();
    writeln!(file, "  single_reads: 10").unwrap();
    let manifest = BenchManifest::from_file(file.path()).unwrap();
    assert_eq!(manifest.controller, ControllerKind::SpiXpress);
    assert_eq!(manifest.scenario.single_reads, 10);
}

#[test]
fn test_missing_file_has_context() {
    let err = BenchManifest::from_file("/nonexistent/bench.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read bench manifest"));
}

#[test]
fn test_parse_size_binary_units() {
    assert_eq!(parse_size("64KiB").unwrap(), 65536);
    assert_eq!(parse_size("16MiB").unwrap(), 16 * 1024 * 1024);
    assert!(parse_size("sixteen").is_err());
}
