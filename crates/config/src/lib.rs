// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Default schema version for YAML manifests
fn default_schema_version() -> String {
    "1.0".to_string()
}

/// Controller variant driven by the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Single-line SPI, plain `READ` per access.
    #[serde(alias = "spi", alias = "single")]
    SpiXpress,
    /// Dual-I/O continuous read.
    #[default]
    #[serde(alias = "dual", alias = "dspi")]
    DualFlexPress,
    /// Quad-I/O continuous read.
    #[serde(alias = "quad", alias = "qspi", alias = "quadflexpress")]
    QFlexPress,
    /// Quad SPI with register-driven erase and program.
    #[serde(alias = "wbqspi")]
    WbQspiFlash,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 4] = [
        ControllerKind::SpiXpress,
        ControllerKind::DualFlexPress,
        ControllerKind::QFlexPress,
        ControllerKind::WbQspiFlash,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ControllerKind::SpiXpress => "spixpress",
            ControllerKind::DualFlexPress => "dualflexpress",
            ControllerKind::QFlexPress => "qflexpress",
            ControllerKind::WbQspiFlash => "wbqspiflash",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spixpress" | "spi" | "single" => Ok(ControllerKind::SpiXpress),
            "dualflexpress" | "dual" | "dspi" => Ok(ControllerKind::DualFlexPress),
            "qflexpress" | "quadflexpress" | "quad" | "qspi" => Ok(ControllerKind::QFlexPress),
            "wbqspiflash" | "wbqspi" => Ok(ControllerKind::WbQspiFlash),
            other => anyhow::bail!(
                "Unknown controller '{}'. Expected one of: spixpress, dualflexpress, qflexpress, wbqspiflash",
                other
            ),
        }
    }
}

/// What the transactor does when stall is still asserted after a released cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrailingStall {
    /// Tick until stall drops, within the operation budget.
    #[default]
    Drain,
    /// Treat it as a protocol violation.
    Reject,
}

fn default_bomb_count() -> u32 {
    2048
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Per-operation tick budget before the run is marked bombed.
    #[serde(default = "default_bomb_count")]
    pub bomb_count: u32,
    #[serde(default)]
    pub trailing_stall: TrailingStall,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bomb_count: default_bomb_count(),
            trailing_stall: TrailingStall::Drain,
        }
    }
}

fn default_flash_size() -> String {
    "16MiB".to_string()
}

fn default_sector_size() -> String {
    "64KiB".to_string()
}

fn default_page_size() -> u32 {
    256
}

fn default_device_id() -> u32 {
    0x20ba_1810
}

fn default_reset_status() -> u8 {
    0x1c
}

fn default_erase_ticks() -> u64 {
    20_000
}

fn default_program_ticks() -> u64 {
    1_500
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlashConfig {
    #[serde(default = "default_flash_size")]
    pub size: String, // e.g. "16MiB"
    #[serde(default = "default_sector_size")]
    pub sector_size: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// JEDEC identification, packed big-endian.
    #[serde(default = "default_device_id")]
    pub device_id: u32,
    /// Status register value after power-up.
    #[serde(default = "default_reset_status")]
    pub reset_status: u8,
    /// Shift calls a sector erase keeps the chip busy.
    #[serde(default = "default_erase_ticks")]
    pub erase_ticks: u64,
    /// Shift calls a page program keeps the chip busy.
    #[serde(default = "default_program_ticks")]
    pub program_ticks: u64,
    /// Optional cap on status polls per wait; exceeding it bombs the run.
    #[serde(default)]
    pub poll_limit: Option<u32>,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            size: default_flash_size(),
            sector_size: default_sector_size(),
            page_size: default_page_size(),
            device_id: default_device_id(),
            reset_status: default_reset_status(),
            erase_ticks: default_erase_ticks(),
            program_ticks: default_program_ticks(),
            poll_limit: None,
        }
    }
}

impl FlashConfig {
    pub fn size_bytes(&self) -> Result<u64> {
        parse_size(&self.size).with_context(|| format!("Invalid flash size '{}'", self.size))
    }

    pub fn sector_bytes(&self) -> Result<u64> {
        parse_size(&self.sector_size)
            .with_context(|| format!("Invalid sector size '{}'", self.sector_size))
    }
}

fn default_single_reads() -> usize {
    1000
}

fn default_vector_reads() -> usize {
    1000
}

fn default_sector() -> u32 {
    1
}

fn default_seed() -> u64 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Words compared one `read` at a time, starting at word 0.
    #[serde(default = "default_single_reads")]
    pub single_reads: usize,
    /// Words compared with one burst read, following the single reads.
    #[serde(default = "default_vector_reads")]
    pub vector_reads: usize,
    /// Index of the sector that gets erased and programmed.
    #[serde(default = "default_sector")]
    pub sector: u32,
    /// Pages of that sector to program and read back. `None` means all.
    #[serde(default)]
    pub pages: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            single_reads: default_single_reads(),
            vector_reads: default_vector_reads(),
            sector: default_sector(),
            pages: None,
            seed: default_seed(),
        }
    }
}

/// Top-level bench description.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BenchManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub controller: ControllerKind,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

impl Default for BenchManifest {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            controller: ControllerKind::default(),
            bus: BusConfig::default(),
            flash: FlashConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl BenchManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read bench manifest at {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(contents).context("Failed to parse Bench Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if self.bus.bomb_count == 0 {
            anyhow::bail!("Bus 'bomb_count' must be greater than zero");
        }

        let size = self.flash.size_bytes()?;
        let sector = self.flash.sector_bytes()?;
        let page = self.flash.page_size as u64;

        if !size.is_power_of_two() || size > (1 << 24) {
            anyhow::bail!(
                "Flash size must be a power of two no larger than 16MiB (24-bit addressing), got {}",
                size
            );
        }
        if !page.is_power_of_two() || page < 4 {
            anyhow::bail!("Flash 'page_size' must be a power of two of at least 4, got {}", page);
        }
        if !sector.is_power_of_two() || sector < page {
            anyhow::bail!(
                "Flash 'sector_size' must be a power of two no smaller than the page, got {}",
                sector
            );
        }

        let scenario = &self.scenario;
        if scenario.sector == 0 {
            anyhow::bail!("Scenario 'sector' must be at least 1 so the word below it exists");
        }
        // The word just past the programmed sector is checked too.
        if (scenario.sector as u64 + 1) * sector + 4 > size {
            anyhow::bail!(
                "Scenario sector {} does not leave a following word inside a {} byte flash",
                scenario.sector,
                size
            );
        }
        let read_words = (scenario.single_reads + scenario.vector_reads) as u64;
        if read_words * 4 > size {
            anyhow::bail!(
                "Scenario reads {} words, more than the {} byte flash holds",
                read_words,
                size
            );
        }
        if let Some(pages) = scenario.pages {
            if pages as u64 > sector / page {
                anyhow::bail!(
                    "Scenario 'pages' is {}, but a sector only holds {} pages",
                    pages,
                    sector / page
                );
            }
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let manifest = BenchManifest::default();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.bus.bomb_count, 2048);
        assert_eq!(manifest.flash.reset_status, 0x1c);
        assert_eq!(manifest.flash.size_bytes().unwrap(), 16 * 1024 * 1024);
        assert_eq!(manifest.flash.sector_bytes().unwrap(), 64 * 1024);
    }

    #[test]
    fn test_controller_from_str() {
        assert_eq!(
            "spixpress".parse::<ControllerKind>().unwrap(),
            ControllerKind::SpiXpress
        );
        assert_eq!(
            "Dual".parse::<ControllerKind>().unwrap(),
            ControllerKind::DualFlexPress
        );
        assert_eq!(
            "qspi".parse::<ControllerKind>().unwrap(),
            ControllerKind::QFlexPress
        );
        assert_eq!(
            "WBQSPI".parse::<ControllerKind>().unwrap(),
            ControllerKind::WbQspiFlash
        );
        assert!("octal".parse::<ControllerKind>().is_err());
    }

    #[test]
    fn test_controller_name_round_trips() {
        for kind in ControllerKind::ALL {
            assert_eq!(kind.to_string().parse::<ControllerKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_invalid_schema_version() {
        let manifest = BenchManifest {
            schema_version: "2.0".to_string(),
            ..Default::default()
        };
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_zero_bomb_count_rejected() {
        let mut manifest = BenchManifest::default();
        manifest.bus.bomb_count = 0;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("bomb_count"));
    }

    #[test]
    fn test_sector_zero_rejected() {
        let mut manifest = BenchManifest::default();
        manifest.scenario.sector = 0;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("sector"));
    }

    #[test]
    fn test_last_sector_rejected() {
        let mut manifest = BenchManifest::default();
        manifest.scenario.sector = 255;
        assert!(manifest.validate().is_err());
        manifest.scenario.sector = 254;
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_too_many_pages_rejected() {
        let mut manifest = BenchManifest::default();
        manifest.scenario.pages = Some(257);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("pages"));
    }

    #[test]
    fn test_non_power_of_two_page_rejected() {
        let mut manifest = BenchManifest::default();
        manifest.flash.page_size = 300;
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_trailing_stall_yaml() {
        let yaml = r#"
bus:
  trailing_stall: reject
"#;
        let manifest = BenchManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.bus.trailing_stall, TrailingStall::Reject);
        assert_eq!(manifest.bus.bomb_count, 2048);
    }
}
