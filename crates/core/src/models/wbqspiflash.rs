// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Reference controller with a control register file.
//!
//! Erase, status and ID go through four control registers. Writes to the
//! memory window page-program the flash directly: consecutive word writes
//! within one bus cycle extend a single program frame, which closes when
//! the cycle drops. Reads use plain `READ` until the read configuration
//! register selects quad I/O, optionally kept in continuous mode.

use super::flexpress::WINDOW_MASK;
use super::wire::{Event, Lanes, Reply, Wire};
use crate::flash::{ControlReg, ContinuousRead, EraseFlags, Opcode, ReadConfig, StatusFlags};
use crate::signals::{SpiPins, WishboneRequest, WishboneResponse};
use crate::spi::LineWidth;
use crate::Dut;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct WbQspiFlash {
    request: WishboneRequest,
    response: WishboneResponse,
    wire: Wire,
    config: ReadConfig,
    /// Flash is in continuous quad read mode.
    xip_active: bool,
    /// Next byte address of the open program frame.
    programming: Option<u32>,
    abandoned: bool,
}

impl Default for WbQspiFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl WbQspiFlash {
    pub fn new() -> Self {
        Self {
            request: WishboneRequest::default(),
            response: WishboneResponse::default(),
            wire: Wire::new(LineWidth::Quad),
            config: ReadConfig::empty(),
            xip_active: false,
            programming: None,
            abandoned: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.wire.is_idle()
    }

    pub fn read_config(&self) -> ReadConfig {
        self.config
    }

    pub fn in_continuous_read(&self) -> bool {
        self.xip_active
    }

    fn frame(&mut self, bytes: &[u8]) {
        self.wire.select();
        for &byte in bytes {
            self.wire.shift(Lanes::Duplex, byte);
        }
        self.wire.deselect();
    }

    fn leave_xip(&mut self) {
        debug!("Leaving continuous read mode");
        let reset = u8::from(Opcode::ModeBitReset);
        self.frame(&[reset, reset]);
        self.xip_active = false;
    }

    fn close_program(&mut self) {
        if let Some(next) = self.programming.take() {
            trace!("Program frame closed at {:#08x}", next);
            self.wire.deselect();
        }
    }

    /// Leave any open frame or continuous mode before a register command.
    fn quiesce(&mut self) {
        self.close_program();
        if self.xip_active {
            self.leave_xip();
        }
    }

    fn queue_read(&mut self, byte_addr: u32) {
        self.close_program();
        let xip = self.config.contains(ReadConfig::QUAD | ReadConfig::XIP);
        if self.xip_active && !xip {
            self.leave_xip();
        }
        self.wire.clear_rx();
        let addr = byte_addr.to_be_bytes();
        let mode = ContinuousRead::QUAD_IO;
        self.wire.select();
        if self.xip_active || self.config.contains(ReadConfig::QUAD) {
            if !self.xip_active {
                self.wire.shift(Lanes::Duplex, mode.opcode.into());
            }
            for byte in &addr[1..] {
                self.wire.shift(Lanes::WideWrite, *byte);
            }
            let mode_byte = if xip { mode.mode_byte } else { 0 };
            self.wire.shift(Lanes::WideWrite, mode_byte);
            for _ in 0..mode.dummy_bytes + 4 {
                self.wire.shift(Lanes::WideRead, 0);
            }
            self.xip_active = xip;
        } else {
            self.wire.shift(Lanes::Duplex, Opcode::Read.into());
            for byte in &addr[1..] {
                self.wire.shift(Lanes::Duplex, *byte);
            }
            for _ in 0..4 {
                self.wire.shift(Lanes::Duplex, 0);
            }
        }
        self.wire.deselect();
        self.wire.respond(Reply::Word);
    }

    fn queue_program(&mut self, byte_addr: u32, word: u32) {
        if self.programming != Some(byte_addr) {
            self.quiesce();
            debug!("Program frame opened at {:#08x}", byte_addr);
            self.wire.select();
            self.wire.shift(Lanes::Duplex, Opcode::PageProgram.into());
            for byte in &byte_addr.to_be_bytes()[1..] {
                self.wire.shift(Lanes::Duplex, *byte);
            }
        }
        for byte in word.to_be_bytes() {
            self.wire.shift(Lanes::Duplex, byte);
        }
        self.programming = Some(byte_addr.wrapping_add(4));
        self.wire.respond(Reply::Nothing);
    }

    fn queue_ctrl_write(&mut self, reg: ControlReg, value: u32) {
        match reg {
            ControlReg::Erase => {
                self.quiesce();
                let flags = EraseFlags::from_bits_truncate(value);
                if flags.contains(EraseFlags::DISABLE_WP) {
                    self.frame(&[u8::from(Opcode::WriteEnable)]);
                }
                if flags.contains(EraseFlags::ERASE) {
                    let byte_addr = ((value & EraseFlags::ADDR_MASK) << 2) & WINDOW_MASK;
                    debug!("Sector erase at {:#08x}", byte_addr);
                    let [_, a2, a1, a0] = byte_addr.to_be_bytes();
                    self.frame(&[u8::from(Opcode::SectorErase), a2, a1, a0]);
                }
                if flags.is_empty() {
                    self.frame(&[u8::from(Opcode::WriteDisable)]);
                }
            }
            ControlReg::ReadConfig => {
                self.config = ReadConfig::from_bits_truncate(value);
                debug!("Read configuration {:?}", self.config);
            }
            ControlReg::Status | ControlReg::Id => {
                debug!("Write to read-only {:?} register ignored", reg);
            }
        }
        self.wire.respond(Reply::Nothing);
    }

    fn queue_ctrl_read(&mut self, reg: ControlReg) {
        if reg == ControlReg::ReadConfig {
            self.wire.respond(Reply::Value(self.config.bits()));
            return;
        }
        self.quiesce();
        self.wire.clear_rx();
        let status = u8::from(Opcode::ReadStatus);
        match reg {
            ControlReg::Erase => {
                self.frame(&[status, 0]);
                self.wire.respond(Reply::EraseStatus);
            }
            ControlReg::Status => {
                self.frame(&[status, 0]);
                self.wire.respond(Reply::LastByte);
            }
            _ => {
                self.frame(&[u8::from(Opcode::ReadId), 0, 0, 0, 0]);
                self.wire.respond(Reply::Word);
            }
        }
    }

    fn accept(&mut self) {
        let req = self.request;
        if req.data_stb {
            let byte_addr = (req.addr << 2) & WINDOW_MASK;
            if req.we {
                self.queue_program(byte_addr, req.data);
            } else {
                self.queue_read(byte_addr);
            }
        } else {
            // Four registers; upper address bits alias.
            let reg = ControlReg::try_from(req.addr & 3).unwrap_or(ControlReg::Erase);
            if req.we {
                self.queue_ctrl_write(reg, req.data);
            } else {
                self.queue_ctrl_read(reg);
            }
        }
        self.response.stall = true;
    }

    fn respond(&mut self, reply: Reply) {
        let value = match reply {
            Reply::Word => self.wire.rx(),
            Reply::LastByte => self.wire.last_rx() as u32,
            Reply::EraseStatus => {
                let status = StatusFlags::from_bits_retain(self.wire.last_rx());
                let mut flags = EraseFlags::empty();
                flags.set(EraseFlags::ERASE, status.contains(StatusFlags::BUSY));
                flags.set(EraseFlags::DISABLE_WP, status.contains(StatusFlags::WEL));
                flags.bits()
            }
            Reply::Value(value) => value,
            Reply::Nothing => 0,
        };
        if self.abandoned {
            trace!("Dropping reply to abandoned cycle");
        } else {
            self.response.ack = true;
            self.response.data = value;
        }
        self.abandoned = false;
        self.response.stall = false;
    }
}

impl Dut for WbQspiFlash {
    fn request(&self) -> &WishboneRequest {
        &self.request
    }

    fn request_mut(&mut self) -> &mut WishboneRequest {
        &mut self.request
    }

    fn response(&self) -> WishboneResponse {
        self.response
    }

    fn spi_pins(&self) -> SpiPins {
        self.wire.pins()
    }

    fn set_spi_input(&mut self, dat: u8) {
        self.wire.set_input(dat);
    }

    fn tick(&mut self) {
        let was_stalled = self.response.stall;
        self.response.ack = false;
        if !self.request.cyc {
            if self.wire.awaiting_reply() {
                self.abandoned = true;
            }
            self.close_program();
        }
        if let Some(Event::Reply(reply)) = self.wire.advance() {
            self.respond(reply);
        }
        if !was_stalled && self.request.cyc && self.request.strobe() {
            self.accept();
        }
    }

    fn line_width(&self) -> LineWidth {
        LineWidth::Quad
    }
}
