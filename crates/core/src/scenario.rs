// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end bench script.
//!
//! The steps run in a fixed order and the first failure ends the run. Mode
//! reads only run on controllers with a read configuration register. Every
//! value read over the bus is checked against the flash model, which the
//! script also prepares and inspects directly.

use crate::bench::{Bench, ReferenceBench};
use crate::bus::{BusError, Transactor, WishbonePort};
use crate::config::TransactorConfig;
use crate::flash::{CommandPath, Dialect, FlashDriver, FlashGeometry, ReadConfig};
use crate::models::{Controller, FlashSim};
use crate::{Dut, FlashModel, FlashResult};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::fmt;
use tracing::{error, info};
use wbflash_config::BenchManifest;

const PROGRAM_PATTERN: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

/// Ticks run after a failure so waveforms show the aftermath.
const FAILURE_DRAIN_TICKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Startup,
    SingleReads,
    VectorReads,
    ModeReads,
    Identify,
    EraseSector,
    SingleWordProgram,
    SectorProgram,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Startup,
        Step::SingleReads,
        Step::VectorReads,
        Step::ModeReads,
        Step::Identify,
        Step::EraseSector,
        Step::SingleWordProgram,
        Step::SectorProgram,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::Startup => "startup",
            Step::SingleReads => "single reads",
            Step::VectorReads => "vector reads",
            Step::ModeReads => "mode reads",
            Step::Identify => "identify",
            Step::EraseSector => "erase sector",
            Step::SingleWordProgram => "single word program",
            Step::SectorProgram => "sector program",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Bus timed out during {step}")]
    Bombed { step: Step },
    #[error("{what} mismatch at {addr:#010x}: read {actual:#010x}, expected {expected:#010x}")]
    Mismatch {
        what: &'static str,
        addr: u32,
        actual: u32,
        expected: u32,
    },
    #[error(transparent)]
    Protocol(#[from] BusError),
}

fn compare(what: &'static str, addr: u32, actual: u32, expected: u32) -> Result<(), ScenarioError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ScenarioError::Mismatch {
            what,
            addr,
            actual,
            expected,
        })
    }
}

fn pack_be(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSettings {
    pub single_reads: usize,
    pub vector_reads: usize,
    pub sector: u32,
    pub pages: Option<usize>,
    pub seed: u64,
    pub reset_status: u8,
    pub device_id: u32,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self::from_manifest(&BenchManifest::default())
    }
}

impl ScenarioSettings {
    pub fn from_manifest(manifest: &BenchManifest) -> Self {
        let scenario = &manifest.scenario;
        Self {
            single_reads: scenario.single_reads,
            vector_reads: scenario.vector_reads,
            sector: scenario.sector,
            pages: scenario.pages,
            seed: scenario.seed,
            reset_status: manifest.flash.reset_status,
            device_id: manifest.flash.device_id,
        }
    }
}

/// Outcome of one run, serialized for `--report`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioReport {
    pub passed: Vec<Step>,
    pub failed: Option<Step>,
    pub error: Option<String>,
    pub protocol_violation: bool,
    pub bombed: bool,
    pub ticks: u64,
}

impl ScenarioReport {
    pub fn success(&self) -> bool {
        self.failed.is_none()
    }
}

pub struct Scenario<D, F> {
    driver: FlashDriver<Bench<D, F>>,
    settings: ScenarioSettings,
    rng: StdRng,
}

impl Scenario<Controller, FlashSim> {
    /// Reference controller and flash built from a manifest, with the flash
    /// already filled.
    pub fn from_manifest(manifest: &BenchManifest) -> anyhow::Result<Self> {
        manifest.validate()?;
        let bench = ReferenceBench::from_manifest(manifest)?;
        let geometry = FlashGeometry::from_config(&manifest.flash)?;
        let bus = Transactor::new(bench, TransactorConfig::from(&manifest.bus));
        let driver = FlashDriver::new(bus, Dialect::for_controller(manifest.controller), geometry)
            .with_poll_limit(manifest.flash.poll_limit);
        let mut scenario = Scenario::new(driver, ScenarioSettings::from_manifest(manifest));
        scenario.prepare()?;
        Ok(scenario)
    }
}

impl<D: Dut, F: FlashModel> Scenario<D, F> {
    pub fn new(driver: FlashDriver<Bench<D, F>>, settings: ScenarioSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            driver,
            settings,
            rng,
        }
    }

    pub fn driver(&self) -> &FlashDriver<Bench<D, F>> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut FlashDriver<Bench<D, F>> {
        &mut self.driver
    }

    pub fn bench(&self) -> &Bench<D, F> {
        self.driver.bus().port()
    }

    pub fn bench_mut(&mut self) -> &mut Bench<D, F> {
        self.driver.bus_mut().port_mut()
    }

    pub fn settings(&self) -> &ScenarioSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ScenarioSettings {
        &mut self.settings
    }

    fn model(&self) -> &F {
        self.bench().flash()
    }

    fn model_mut(&mut self) -> &mut F {
        self.bench_mut().flash_mut()
    }

    /// Fill the whole flash with seeded random bytes, word 0 cleared.
    pub fn prepare(&mut self) -> FlashResult<()> {
        let size = self.driver.geometry().size as usize;
        let mut content = vec![0u8; size];
        self.rng.fill_bytes(&mut content);
        let flash = self.model_mut();
        flash.load(0, &content)?;
        flash.set_word(0, 0);
        Ok(())
    }

    /// Steps this controller runs, in order.
    pub fn steps(&self) -> Vec<Step> {
        let registers = self.driver.dialect().path == CommandPath::Registers;
        Step::ALL
            .into_iter()
            .filter(|step| *step != Step::ModeReads || registers)
            .collect()
    }

    pub fn run(&mut self) -> ScenarioReport {
        let mut report = ScenarioReport::default();
        for step in self.steps() {
            info!("Running {}", step);
            match self.run_step(step) {
                Ok(()) => report.passed.push(step),
                Err(err) => {
                    error!(tick = self.driver.bus().ticks(), "{} failed: {}", step, err);
                    report.protocol_violation = matches!(err, ScenarioError::Protocol(_));
                    report.failed = Some(step);
                    report.error = Some(err.to_string());
                    for _ in 0..FAILURE_DRAIN_TICKS {
                        if self.driver.bus_mut().tick().is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        report.bombed = self.driver.bus().bombed();
        report.ticks = self.driver.bus().ticks();
        if report.success() {
            info!("All steps passed in {} ticks", report.ticks);
        }
        report
    }

    pub fn run_step(&mut self, step: Step) -> Result<(), ScenarioError> {
        match step {
            Step::Startup => self.startup(),
            Step::SingleReads => self.single_reads(Step::SingleReads),
            Step::VectorReads => self.vector_reads(Step::VectorReads),
            Step::ModeReads => self.mode_reads(),
            Step::Identify => self.identify(),
            Step::EraseSector => self.erase_sector(),
            Step::SingleWordProgram => self.single_word_program(),
            Step::SectorProgram => self.sector_program(),
        }
    }

    fn check(&self, step: Step) -> Result<(), ScenarioError> {
        if self.driver.bus().bombed() {
            Err(ScenarioError::Bombed { step })
        } else {
            Ok(())
        }
    }

    fn sector_base(&self) -> u32 {
        self.settings.sector * self.driver.geometry().sector_size
    }

    fn startup(&mut self) -> Result<(), ScenarioError> {
        let limit = self.driver.bus().config().bomb_count;
        let bus = self.driver.bus_mut();
        let mut waited = 0;
        while bus.port().response().stall {
            if waited >= limit {
                bus.bomb("startup", 0);
                break;
            }
            bus.tick()?;
            waited += 1;
        }
        self.check(Step::Startup)?;

        let value = self.driver.bus_mut().read(0)?;
        self.check(Step::Startup)?;
        compare("startup word", 0, value, self.model().word(0))
    }

    fn single_reads(&mut self, step: Step) -> Result<(), ScenarioError> {
        for index in 0..self.settings.single_reads {
            let addr = (index * 4) as u32;
            let value = self.driver.bus_mut().read(addr)?;
            self.check(step)?;
            compare("read", addr, value, self.model().word(index))?;
        }
        Ok(())
    }

    fn vector_reads(&mut self, step: Step) -> Result<(), ScenarioError> {
        let base = self.settings.single_reads;
        let len = self.settings.vector_reads;
        let words = self.driver.bus_mut().burst_read((base * 4) as u32, len, 1)?;
        self.check(step)?;
        for (k, value) in words.into_iter().enumerate() {
            let index = base + k;
            compare("burst read", (index * 4) as u32, value, self.model().word(index))?;
        }
        Ok(())
    }

    /// Repeat the reads in quad mode, then in quad continuous mode. The
    /// controller is left in continuous mode for the remaining steps.
    fn mode_reads(&mut self) -> Result<(), ScenarioError> {
        for config in [ReadConfig::QUAD, ReadConfig::QUAD | ReadConfig::XIP] {
            info!("Reading with {:?}", config);
            self.driver.set_read_config(config)?;
            let readback = self.driver.read_config()?;
            self.check(Step::ModeReads)?;
            if let Some(readback) = readback {
                compare("read config", 0x0c, readback.bits(), config.bits())?;
            }
            self.single_reads(Step::ModeReads)?;
            self.vector_reads(Step::ModeReads)?;
        }
        Ok(())
    }

    fn identify(&mut self) -> Result<(), ScenarioError> {
        self.driver.take_offline()?;
        let status = self.driver.read_status()?;
        self.check(Step::Identify)?;
        compare("status", 0, status as u32, self.settings.reset_status as u32)?;

        let id = self.driver.read_id()?;
        self.check(Step::Identify)?;
        compare("device id", 0, id, self.settings.device_id)
    }

    fn erase_sector(&mut self) -> Result<(), ScenarioError> {
        let base = self.sector_base();
        let first = (base / 4) as usize;
        let words = self.driver.geometry().sector_words();
        let neighbours = [first - 1, first + words];

        // An all-ones neighbour would hide an erase that ran long.
        for index in neighbours {
            if self.model().word(index) == u32::MAX {
                self.model_mut().set_word(index, 0);
            }
        }
        let saved = neighbours.map(|index| self.model().word(index));

        self.driver.erase_sector(base)?;
        self.check(Step::EraseSector)?;

        for index in first..first + words {
            compare("erased word", (index * 4) as u32, self.model().word(index), u32::MAX)?;
        }
        for (index, expected) in neighbours.into_iter().zip(saved) {
            let addr = (index * 4) as u32;
            compare("neighbour word", addr, self.model().word(index), expected)?;
            let value = self.driver.bus_mut().read(addr)?;
            self.check(Step::EraseSector)?;
            compare("neighbour read", addr, value, expected)?;
        }
        Ok(())
    }

    fn single_word_program(&mut self) -> Result<(), ScenarioError> {
        let base = self.sector_base();
        self.driver.program(base, &PROGRAM_PATTERN)?;
        self.check(Step::SingleWordProgram)?;

        let value = self.driver.bus_mut().read(base)?;
        self.check(Step::SingleWordProgram)?;
        compare("programmed word", base, value, u32::from_be_bytes(PROGRAM_PATTERN))
    }

    fn sector_program(&mut self) -> Result<(), ScenarioError> {
        let base = self.sector_base();
        let geometry = *self.driver.geometry();
        let page = geometry.page_size as usize;
        let pages = self.settings.pages.unwrap_or(geometry.pages_per_sector());

        let mut payload = vec![0u8; pages * page];
        self.rng.fill_bytes(&mut payload);
        if let Some(head) = payload.get_mut(..4) {
            head.copy_from_slice(&PROGRAM_PATTERN);
        }

        for (n, chunk) in payload.chunks(page).enumerate() {
            let addr = base + (n * page) as u32;
            self.driver.program(addr, chunk)?;
            self.check(Step::SectorProgram)?;

            let expected = pack_be(chunk);
            let first = (addr / 4) as usize;
            for (k, &want) in expected.iter().enumerate() {
                let at = addr + 4 * k as u32;
                compare("model word", at, self.model().word(first + k), want)?;
            }

            let words = self.driver.bus_mut().burst_read(addr, expected.len(), 1)?;
            self.check(Step::SectorProgram)?;
            for (k, (&got, &want)) in words.iter().zip(&expected).enumerate() {
                compare("page read", addr + 4 * k as u32, got, want)?;
            }
        }
        info!("Programmed {} pages at {:#08x}", pages, base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wbflash_config::ControllerKind;

    fn small_manifest(controller: ControllerKind) -> BenchManifest {
        let mut manifest = BenchManifest::default();
        manifest.controller = controller;
        manifest.flash.size = "256KiB".to_string();
        manifest.flash.erase_ticks = 2_000;
        manifest.flash.program_ticks = 200;
        manifest.scenario.single_reads = 16;
        manifest.scenario.vector_reads = 16;
        manifest.scenario.pages = Some(2);
        manifest
    }

    #[test]
    fn test_prepare_is_seeded() {
        let manifest = small_manifest(ControllerKind::SpiXpress);
        let a = Scenario::from_manifest(&manifest).unwrap();
        let b = Scenario::from_manifest(&manifest).unwrap();
        assert_eq!(a.model().word(0), 0);
        assert_eq!(a.bench().flash().bytes(), b.bench().flash().bytes());
    }

    #[test]
    fn test_mismatch_message() {
        let err = compare("read", 0x40, 1, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "read mismatch at 0x00000040: read 0x00000001, expected 0x00000002"
        );
    }

    #[test]
    fn test_step_order_and_names() {
        assert_eq!(Step::ALL[0], Step::Startup);
        assert_eq!(Step::ALL[3], Step::ModeReads);
        assert_eq!(Step::ALL[7], Step::SectorProgram);
        assert_eq!(Step::ModeReads.to_string(), "mode reads");
        assert_eq!(Step::EraseSector.to_string(), "erase sector");
    }

    #[test]
    fn test_wrong_device_id_fails_identify() {
        let mut manifest = small_manifest(ControllerKind::SpiXpress);
        let mut scenario = Scenario::from_manifest(&manifest).unwrap();
        scenario.settings.device_id = 0x1234_5678;
        let report = scenario.run();
        assert_eq!(report.failed, Some(Step::Identify));
        assert!(!report.protocol_violation);
        assert!(report.error.unwrap().contains("device id"));

        manifest.flash.device_id = 0x1234_5678;
        let report = Scenario::from_manifest(&manifest).unwrap().run();
        assert!(report.success());
    }

    #[test]
    fn test_mode_reads_only_with_read_config_register() {
        let flex = Scenario::from_manifest(&small_manifest(ControllerKind::QFlexPress)).unwrap();
        assert!(!flex.steps().contains(&Step::ModeReads));
        assert_eq!(flex.steps().len(), 7);

        let regs = Scenario::from_manifest(&small_manifest(ControllerKind::WbQspiFlash)).unwrap();
        assert_eq!(regs.steps(), Step::ALL.to_vec());
    }

    #[test]
    fn test_register_controller_runs_every_step() {
        let mut scenario =
            Scenario::from_manifest(&small_manifest(ControllerKind::WbQspiFlash)).unwrap();
        let report = scenario.run();
        assert!(report.success(), "{:?}", report.error);
        assert_eq!(report.passed, Step::ALL.to_vec());
        match scenario.bench().dut() {
            Controller::Registers(dut) => {
                assert_eq!(dut.read_config(), ReadConfig::QUAD | ReadConfig::XIP);
                assert!(dut.in_continuous_read());
            }
            other => panic!("unexpected controller {:?}", other.kind()),
        }
    }

    #[test]
    fn test_poll_limit_bombs_erase() {
        let mut manifest = small_manifest(ControllerKind::DualFlexPress);
        manifest.flash.poll_limit = Some(2);
        let report = Scenario::from_manifest(&manifest).unwrap().run();
        assert_eq!(report.failed, Some(Step::EraseSector));
        assert!(report.bombed);
    }
}
