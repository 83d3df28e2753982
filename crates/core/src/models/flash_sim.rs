// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Behavioral SPI NOR flash.
//!
//! Input bits are sampled on rising clock edges and output bits advance on
//! falling edges, MSB first. A response byte is loaded as soon as the byte
//! before it completes, so its first bit is valid before the next edge.
//! Erase and program take effect when chip-select rises and keep the busy
//! bit set for a fixed number of shift calls.

use crate::flash::{ContinuousRead, FlashGeometry, Opcode, StatusFlags};
use crate::spi::LineWidth;
use crate::{FlashError, FlashModel, FlashResult};
use std::fmt;
use tracing::{debug, warn};
use wbflash_config::FlashConfig;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FlashSimConfig {
    pub geometry: FlashGeometry,
    pub device_id: u32,
    pub reset_status: u8,
    pub erase_ticks: u64,
    pub program_ticks: u64,
}

impl Default for FlashSimConfig {
    fn default() -> Self {
        Self {
            geometry: FlashGeometry::default(),
            device_id: 0x20ba_1810,
            reset_status: 0x1c,
            erase_ticks: 20_000,
            program_ticks: 1_500,
        }
    }
}

impl FlashSimConfig {
    pub fn from_config(config: &FlashConfig) -> anyhow::Result<Self> {
        Ok(Self {
            geometry: FlashGeometry::from_config(config)?,
            device_id: config.device_id,
            reset_status: config.reset_status,
            erase_ticks: config.erase_ticks,
            program_ticks: config.program_ticks,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opcode,
    Address { op: Opcode, got: u8 },
    Mode { op: Opcode },
    Dummy { op: Opcode, left: u8 },
    Read { op: Opcode },
    Program,
    Status,
    ReadId { next: u32 },
    Ignore,
}

/// Commands that only act once chip-select rises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    WriteEnable,
    WriteDisable,
    Erase,
    Program,
}

fn op_width(op: Opcode) -> LineWidth {
    match op {
        Opcode::DualIoRead => LineWidth::Dual,
        Opcode::QuadIoRead => LineWidth::Quad,
        _ => LineWidth::Single,
    }
}

pub struct FlashSim {
    config: FlashSimConfig,
    mem: Vec<u8>,
    protect: StatusFlags,
    write_enabled: bool,
    busy_ticks: u64,

    selected: bool,
    last_sck: bool,
    phase: Phase,
    addr: u32,
    shift_in: u8,
    bits_in: u8,
    out: u8,
    continuous: Option<Opcode>,
    pending: Pending,
    page_base: u32,
    page_offset: usize,
    page_buf: Vec<u8>,
    frames: u64,
}

impl fmt::Debug for FlashSim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashSim")
            .field("size", &self.mem.len())
            .field("phase", &self.phase)
            .field("continuous", &self.continuous)
            .field("write_enabled", &self.write_enabled)
            .field("busy_ticks", &self.busy_ticks)
            .finish()
    }
}

impl Default for FlashSim {
    fn default() -> Self {
        Self::new(FlashSimConfig::default())
    }
}

impl FlashSim {
    pub fn new(config: FlashSimConfig) -> Self {
        let geometry = config.geometry;
        let protect = StatusFlags::from_bits_retain(config.reset_status)
            - (StatusFlags::BUSY | StatusFlags::WEL);
        Self {
            mem: vec![0xff; geometry.size as usize],
            page_buf: vec![0xff; geometry.page_size as usize],
            protect,
            write_enabled: false,
            busy_ticks: 0,
            selected: false,
            last_sck: true,
            phase: Phase::Opcode,
            addr: 0,
            shift_in: 0,
            bits_in: 0,
            out: 0xff,
            continuous: None,
            pending: Pending::None,
            page_base: 0,
            page_offset: 0,
            frames: 0,
            config,
        }
    }

    pub fn config(&self) -> &FlashSimConfig {
        &self.config
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.config.geometry
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mem
    }

    pub fn is_busy(&self) -> bool {
        self.busy_ticks > 0
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// True while the flash expects the next frame to start with an address.
    pub fn continuous_mode(&self) -> bool {
        self.continuous.is_some()
    }

    /// Chip-select assertions seen so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn status(&self) -> u8 {
        let mut status = self.protect;
        status.set(StatusFlags::WEL, self.write_enabled);
        status.set(StatusFlags::BUSY, self.is_busy());
        status.bits()
    }

    fn mask(&self) -> u32 {
        self.config.geometry.address_mask()
    }

    fn width(&self) -> LineWidth {
        match self.phase {
            Phase::Address { op, .. }
            | Phase::Mode { op }
            | Phase::Dummy { op, .. }
            | Phase::Read { op } => op_width(op),
            _ => LineWidth::Single,
        }
    }

    fn drive(&self) -> u8 {
        match self.width() {
            LineWidth::Single => ((self.out >> 7) & 1) << 1,
            LineWidth::Dual => (self.out >> 6) & 0b11,
            LineWidth::Quad => (self.out >> 4) & 0xf,
        }
    }

    fn begin_frame(&mut self) {
        self.selected = true;
        self.frames += 1;
        self.shift_in = 0;
        self.bits_in = 0;
        self.pending = Pending::None;
        self.addr = 0;
        self.phase = match self.continuous {
            Some(op) => Phase::Address { op, got: 0 },
            None => Phase::Opcode,
        };
    }

    fn end_frame(&mut self) {
        match self.pending {
            Pending::None => {}
            Pending::WriteEnable => self.write_enabled = true,
            Pending::WriteDisable => self.write_enabled = false,
            Pending::Erase => {
                if self.write_enabled {
                    let geometry = self.config.geometry;
                    let base = geometry.sector_of(self.addr) as usize;
                    let end = base + geometry.sector_size as usize;
                    self.mem[base..end].fill(0xff);
                    self.busy_ticks = self.config.erase_ticks;
                    self.write_enabled = false;
                    debug!("Flash erased sector {:#08x}", base);
                } else {
                    warn!("Sector erase at {:#08x} without write enable ignored", self.addr);
                }
            }
            Pending::Program => {
                if self.write_enabled {
                    let base = self.page_base as usize;
                    for (i, byte) in self.page_buf.iter().enumerate() {
                        self.mem[base + i] &= byte;
                    }
                    self.busy_ticks = self.config.program_ticks;
                    self.write_enabled = false;
                    debug!("Flash programmed page {:#08x}", base);
                } else {
                    warn!("Page program at {:#08x} without write enable ignored", self.page_base);
                }
            }
        }
        self.pending = Pending::None;
        self.phase = Phase::Opcode;
    }

    fn rising(&mut self, dat: u8) {
        let width = self.width();
        self.shift_in = (self.shift_in << width.lanes()) | (dat & width.mask());
        self.bits_in += width.lanes();
        if self.bits_in >= 8 {
            let byte = self.shift_in;
            self.shift_in = 0;
            self.bits_in = 0;
            self.byte(byte);
        }
    }

    fn falling(&mut self) {
        self.out <<= self.width().lanes();
    }

    fn byte(&mut self, byte: u8) {
        match self.phase {
            Phase::Opcode => self.opcode(byte),
            Phase::Address { op, got } => {
                self.addr = ((self.addr << 8) | byte as u32) & self.mask();
                if got < 2 {
                    self.phase = Phase::Address { op, got: got + 1 };
                } else {
                    self.address_complete(op);
                }
            }
            Phase::Mode { op } => {
                self.continuous = ContinuousRead::keeps_mode(byte).then_some(op);
                match op.continuous_read().map_or(0, |mode| mode.dummy_bytes) {
                    0 => self.start_read(op),
                    left => self.phase = Phase::Dummy { op, left },
                }
            }
            Phase::Dummy { op, left } => {
                if left > 1 {
                    self.phase = Phase::Dummy { op, left: left - 1 };
                } else {
                    self.start_read(op);
                }
            }
            Phase::Read { .. } => {
                self.addr = (self.addr + 1) & self.mask();
                self.out = self.mem[self.addr as usize];
            }
            Phase::Program => {
                self.page_buf[self.page_offset] = byte;
                self.page_offset = (self.page_offset + 1) % self.page_buf.len();
            }
            Phase::Status => self.out = self.status(),
            Phase::ReadId { next } => {
                self.out = self.id_byte(next);
                self.phase = Phase::ReadId { next: next + 1 };
            }
            Phase::Ignore => {}
        }
    }

    fn opcode(&mut self, byte: u8) {
        let Ok(op) = Opcode::try_from(byte) else {
            warn!("Unknown flash opcode {:#04x}", byte);
            self.phase = Phase::Ignore;
            return;
        };
        if self.is_busy() && op != Opcode::ReadStatus {
            debug!("Flash busy, ignoring {:?}", op);
            self.phase = Phase::Ignore;
            return;
        }
        self.phase = match op {
            Opcode::WriteEnable => {
                self.pending = Pending::WriteEnable;
                Phase::Ignore
            }
            Opcode::WriteDisable => {
                self.pending = Pending::WriteDisable;
                Phase::Ignore
            }
            Opcode::ReadStatus => {
                self.out = self.status();
                Phase::Status
            }
            Opcode::ReadId => {
                self.out = self.id_byte(0);
                Phase::ReadId { next: 1 }
            }
            Opcode::Read
            | Opcode::PageProgram
            | Opcode::SectorErase
            | Opcode::DualIoRead
            | Opcode::QuadIoRead => Phase::Address { op, got: 0 },
            Opcode::ModeBitReset => Phase::Ignore,
        };
    }

    fn address_complete(&mut self, op: Opcode) {
        match op {
            Opcode::DualIoRead | Opcode::QuadIoRead => self.phase = Phase::Mode { op },
            Opcode::PageProgram => {
                let geometry = self.config.geometry;
                self.page_base = geometry.page_of(self.addr);
                self.page_offset = (self.addr - self.page_base) as usize;
                self.page_buf.fill(0xff);
                self.pending = Pending::Program;
                self.phase = Phase::Program;
            }
            Opcode::SectorErase => {
                self.pending = Pending::Erase;
                self.phase = Phase::Ignore;
            }
            _ => self.start_read(op),
        }
    }

    fn start_read(&mut self, op: Opcode) {
        self.phase = Phase::Read { op };
        self.out = self.mem[self.addr as usize];
    }

    fn id_byte(&self, index: u32) -> u8 {
        (self.config.device_id >> (24 - 8 * (index % 4))) as u8
    }
}

impl FlashModel for FlashSim {
    fn word(&self, index: usize) -> u32 {
        let base = (index * 4) & self.mask() as usize;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.mem[base..base + 4]);
        u32::from_be_bytes(bytes)
    }

    fn set_word(&mut self, index: usize, value: u32) {
        let base = (index * 4) & self.mask() as usize;
        self.mem[base..base + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn load(&mut self, offset: usize, data: &[u8]) -> FlashResult<()> {
        let size = self.mem.len();
        if offset.checked_add(data.len()).map_or(true, |end| end > size) {
            return Err(FlashError::LoadOutOfRange {
                offset,
                len: data.len(),
                size,
            });
        }
        self.mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn shift(&mut self, cs_n: bool, sck: bool, dat: u8) -> u8 {
        self.busy_ticks = self.busy_ticks.saturating_sub(1);

        if cs_n {
            if self.selected {
                self.selected = false;
                self.end_frame();
            }
            self.last_sck = sck;
            return self.drive();
        }

        if !self.selected {
            self.begin_frame();
        }
        if sck && !self.last_sck {
            self.rising(dat);
        } else if !sck && self.last_sck {
            self.falling();
        }
        self.last_sck = sck;
        self.drive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> FlashSim {
        FlashSim::new(FlashSimConfig {
            geometry: FlashGeometry {
                size: 1 << 20,
                ..Default::default()
            },
            erase_ticks: 100,
            program_ticks: 10,
            ..Default::default()
        })
    }

    /// Clock one byte over `lanes` lines the way a controller would:
    /// sample, then drop and raise the clock.
    fn xfer_lanes(flash: &mut FlashSim, byte: u8, lanes: u8) -> u8 {
        let mask = (1u8 << lanes) - 1;
        let mut out = byte;
        let mut rx = 0u8;
        for _ in 0..(8 / lanes) {
            let dat = out >> (8 - lanes);
            out <<= lanes;
            let sample = flash.shift(false, true, dat);
            let bits = if lanes == 1 { (sample >> 1) & 1 } else { sample & mask };
            rx = (rx << lanes) | bits;
            flash.shift(false, false, dat);
            flash.shift(false, true, dat);
        }
        rx
    }

    fn xfer(flash: &mut FlashSim, byte: u8) -> u8 {
        xfer_lanes(flash, byte, 1)
    }

    fn frame(flash: &mut FlashSim, bytes: &[u8]) -> Vec<u8> {
        let rx = bytes.iter().map(|&b| xfer(flash, b)).collect();
        flash.shift(true, true, 0);
        rx
    }

    #[test]
    fn test_read_id_and_status() {
        let mut flash = small();
        let rx = frame(&mut flash, &[0x9f, 0, 0, 0, 0]);
        assert_eq!(&rx[1..], &[0x20, 0xba, 0x18, 0x10]);

        let rx = frame(&mut flash, &[0x05, 0, 0]);
        assert_eq!(&rx[1..], &[0x1c, 0x1c]);
        assert_eq!(flash.frames(), 2);
    }

    #[test]
    fn test_write_enable_latches_on_deselect() {
        let mut flash = small();
        xfer(&mut flash, 0x06);
        assert!(!flash.write_enabled());
        flash.shift(true, true, 0);
        assert!(flash.write_enabled());
        assert_eq!(flash.status(), 0x1e);

        frame(&mut flash, &[0x04]);
        assert!(!flash.write_enabled());
    }

    #[test]
    fn test_read_command() {
        let mut flash = small();
        flash.load(0x1234, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let rx = frame(&mut flash, &[0x03, 0x00, 0x12, 0x34, 0, 0, 0, 0]);
        assert_eq!(&rx[4..], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(flash.word(0x1234 / 4), 0xdead_beef);
    }

    #[test]
    fn test_erase_needs_write_enable() {
        let mut flash = small();
        flash.set_word(0x4000, 0);
        frame(&mut flash, &[0xd8, 0x01, 0x00, 0x00]);
        assert_eq!(flash.word(0x4000), 0);
        assert!(!flash.is_busy());
    }

    #[test]
    fn test_erase_sector_and_busy() {
        let mut flash = small();
        flash.set_word(0x3fff, 0x1111_1111);
        flash.set_word(0x4000, 0);
        flash.set_word(0x7fff, 0);
        flash.set_word(0x8000, 0x2222_2222);

        frame(&mut flash, &[0x06]);
        frame(&mut flash, &[0xd8, 0x01, 0x80, 0x00]);
        assert!(flash.is_busy());
        assert!(!flash.write_enabled());
        assert_eq!(flash.word(0x4000), 0xffff_ffff);
        assert_eq!(flash.word(0x7fff), 0xffff_ffff);
        assert_eq!(flash.word(0x3fff), 0x1111_1111);
        assert_eq!(flash.word(0x8000), 0x2222_2222);

        // Busy flash only answers status reads.
        frame(&mut flash, &[0x06]);
        assert!(!flash.write_enabled());
        let rx = frame(&mut flash, &[0x05, 0]);
        assert_eq!(rx[1] & 0x01, 0x01);

        for _ in 0..100 {
            flash.shift(true, true, 0);
        }
        assert!(!flash.is_busy());
        let rx = frame(&mut flash, &[0x05, 0]);
        assert_eq!(rx[1], 0x1c);
    }

    #[test]
    fn test_page_program_ands_and_wraps() {
        let mut flash = small();
        frame(&mut flash, &[0x06]);
        frame(&mut flash, &[0x02, 0x00, 0x01, 0xfe, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&flash.bytes()[0x1fe..0x200], &[0x12, 0x34]);
        // The third byte wrapped to the start of the page.
        assert_eq!(&flash.bytes()[0x100..0x102], &[0x56, 0x78]);

        for _ in 0..10 {
            flash.shift(true, true, 0);
        }
        frame(&mut flash, &[0x06]);
        frame(&mut flash, &[0x02, 0x00, 0x01, 0xfe, 0xf0]);
        assert_eq!(flash.bytes()[0x1fe], 0x10);
    }

    #[test]
    fn test_dual_continuous_read() {
        let mut flash = small();
        flash.load(0, &[0xa1, 0xb2, 0xc3, 0xd4, 0x01, 0x02, 0x03, 0x04]).unwrap();

        xfer(&mut flash, 0xbb);
        for _ in 0..3 {
            xfer_lanes(&mut flash, 0x00, 2);
        }
        xfer_lanes(&mut flash, 0xa0, 2);
        xfer_lanes(&mut flash, 0x00, 2);
        assert_eq!(xfer_lanes(&mut flash, 0, 2), 0xa1);
        assert_eq!(xfer_lanes(&mut flash, 0, 2), 0xb2);
        flash.shift(true, true, 0);
        assert!(flash.continuous_mode());

        // Next frame starts straight at the address.
        for byte in [0x00, 0x00, 0x04, 0xa0, 0x00] {
            xfer_lanes(&mut flash, byte, 2);
        }
        assert_eq!(xfer_lanes(&mut flash, 0, 2), 0x01);
        assert_eq!(xfer_lanes(&mut flash, 0, 2), 0x02);
        flash.shift(true, true, 0);

        // Two single-line 0xff bytes land a non-0xAx mode byte.
        frame(&mut flash, &[0xff, 0xff]);
        assert!(!flash.continuous_mode());
        let rx = frame(&mut flash, &[0x05, 0]);
        assert_eq!(rx[1], 0x1c);
    }

    #[test]
    fn test_quad_continuous_read() {
        let mut flash = small();
        flash.load(0x40, &[0x5a, 0xc3]).unwrap();

        xfer(&mut flash, 0xeb);
        for byte in [0x00, 0x00, 0x40, 0xa0, 0x00, 0x00] {
            xfer_lanes(&mut flash, byte, 4);
        }
        assert_eq!(xfer_lanes(&mut flash, 0, 4), 0x5a);
        assert_eq!(xfer_lanes(&mut flash, 0, 4), 0xc3);
        flash.shift(true, true, 0);
        assert!(flash.continuous_mode());

        frame(&mut flash, &[0xff, 0xff]);
        assert!(!flash.continuous_mode());
    }

    #[test]
    fn test_load_out_of_range() {
        let mut flash = small();
        let err = flash.load((1 << 20) - 2, &[0; 4]).unwrap_err();
        assert!(matches!(err, FlashError::LoadOutOfRange { .. }));
    }

    #[test]
    fn test_config_with_bad_geometry_rejected() {
        let mut config = FlashConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(FlashSimConfig::from_config(&config).is_err());

        config.page_size = 256;
        config.size = "64KiB".to_string();
        config.sector_size = "128KiB".to_string();
        let err = FlashSimConfig::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Sector size"));
    }
}
