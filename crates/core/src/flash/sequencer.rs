// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! SPI NOR command sequencing over the controller's control port.
//!
//! Each command frame is a run of control-port writes, one byte per write,
//! closed by a de-select word. The flash never answers a frame directly;
//! state such as the write-enable latch and the busy bit is only visible
//! through later status reads.
//!
//! Controllers with a register command path take erase, status and ID
//! through dedicated control registers instead, and program through writes
//! to the memory window.

use super::opcodes::{
    CommandPath, ControlReg, Dialect, EraseFlags, Opcode, ReadConfig, StatusFlags,
};
use super::FlashGeometry;
use crate::bus::{BusResult, Transactor, WishbonePort};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct FlashDriver<P> {
    bus: Transactor<P>,
    dialect: Dialect,
    geometry: FlashGeometry,
    poll_limit: Option<u32>,
}

impl<P: WishbonePort> FlashDriver<P> {
    pub fn new(bus: Transactor<P>, dialect: Dialect, geometry: FlashGeometry) -> Self {
        Self {
            bus,
            dialect,
            geometry,
            poll_limit: None,
        }
    }

    pub fn with_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.poll_limit = limit;
        self
    }

    pub fn bus(&self) -> &Transactor<P> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Transactor<P> {
        &mut self.bus
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    fn registers(&self) -> bool {
        self.dialect.path == CommandPath::Registers
    }

    fn reg_write(&mut self, reg: ControlReg, value: u32) -> BusResult<()> {
        self.bus.ctrl_write(reg.byte_addr(), value)
    }

    fn reg_read(&mut self, reg: ControlReg) -> BusResult<u32> {
        self.bus.ctrl_read(reg.byte_addr())
    }

    fn cfg_write(&mut self, word: u32) -> BusResult<()> {
        self.bus.ctrl_write(0, word)
    }

    fn cfg_read(&mut self) -> BusResult<u8> {
        Ok((self.bus.ctrl_read(0)? & 0xff) as u8)
    }

    fn command(&mut self, op: Opcode) -> BusResult<()> {
        let word = self.dialect.command(op);
        self.cfg_write(word)
    }

    fn end_frame(&mut self) -> BusResult<()> {
        let word = self.dialect.end_frame();
        self.cfg_write(word)
    }

    fn send_data(&mut self, byte: u8) -> BusResult<()> {
        let word = self.dialect.data(byte);
        self.cfg_write(word)
    }

    /// Clock one dummy byte out and return what came back.
    fn exchange_dummy(&mut self) -> BusResult<u8> {
        let word = self.dialect.dummy();
        self.cfg_write(word)?;
        self.cfg_read()
    }

    fn send_address(&mut self, addr: u32) -> BusResult<()> {
        for shift in [16, 8, 0] {
            self.send_data((addr >> shift) as u8)?;
        }
        Ok(())
    }

    /// Drop the flash out of continuous-read mode so it accepts opcodes.
    pub fn take_offline(&mut self) -> BusResult<()> {
        if self.dialect.continuous_read.is_none() {
            return Ok(());
        }
        debug!("Taking flash offline");
        self.end_frame()?;
        self.command(Opcode::ModeBitReset)?;
        self.command(Opcode::ModeBitReset)?;
        self.end_frame()
    }

    /// Re-enter continuous-read mode and hand the flash back to the data port.
    pub fn place_online(&mut self) -> BusResult<()> {
        let Some(mode) = self.dialect.continuous_read else {
            return Ok(());
        };
        debug!("Placing flash online with {:?}", mode.opcode);
        self.command(mode.opcode)?;
        for _ in 0..3 {
            let word = self.dialect.wide_write(0);
            self.cfg_write(word)?;
        }
        let word = self.dialect.wide_write(mode.mode_byte);
        self.cfg_write(word)?;
        for _ in 0..mode.dummy_bytes {
            let word = self.dialect.wide_read();
            self.cfg_write(word)?;
        }
        let word = self.dialect.close();
        self.cfg_write(word)
    }

    /// JEDEC identification, first byte in the top bits.
    pub fn read_id(&mut self) -> BusResult<u32> {
        let id = if self.registers() {
            self.reg_read(ControlReg::Id)?
        } else {
            self.command(Opcode::ReadId)?;
            let mut id = 0u32;
            for _ in 0..4 {
                id = (id << 8) | self.exchange_dummy()? as u32;
            }
            self.end_frame()?;
            id
        };
        debug!("Flash ID {:#010x}", id);
        Ok(id)
    }

    pub fn read_status(&mut self) -> BusResult<u8> {
        let status = if self.registers() {
            (self.reg_read(ControlReg::Status)? & 0xff) as u8
        } else {
            self.command(Opcode::ReadStatus)?;
            let status = self.exchange_dummy()?;
            self.end_frame()?;
            status
        };
        debug!("Flash status {:#04x}", status);
        Ok(status)
    }

    /// Poll the status register within one frame until the busy bit clears.
    /// The register path polls the erase register instead.
    pub fn wait_until_ready(&mut self) -> BusResult<()> {
        if self.registers() {
            return self.wait_for_erase_register();
        }
        self.command(Opcode::ReadStatus)?;
        let mut polls = 0u32;
        loop {
            let status = StatusFlags::from_bits_retain(self.exchange_dummy()?);
            polls += 1;
            if !status.contains(StatusFlags::BUSY) || self.bus.bombed() {
                break;
            }
            if self.poll_limit.is_some_and(|limit| polls >= limit) {
                self.bus.bomb("status poll", 0);
                break;
            }
        }
        debug!("Flash ready after {} polls", polls);
        self.end_frame()
    }

    fn wait_for_erase_register(&mut self) -> BusResult<()> {
        let mut polls = 0u32;
        loop {
            let state = EraseFlags::from_bits_retain(self.reg_read(ControlReg::Erase)?);
            polls += 1;
            if !state.contains(EraseFlags::ERASE) || self.bus.bombed() {
                break;
            }
            if self.poll_limit.is_some_and(|limit| polls >= limit) {
                self.bus.bomb("erase register poll", ControlReg::Erase.byte_addr());
                break;
            }
        }
        debug!("Flash ready after {} polls", polls);
        Ok(())
    }

    pub fn write_enable(&mut self) -> BusResult<()> {
        if self.registers() {
            return self.reg_write(ControlReg::Erase, EraseFlags::DISABLE_WP.bits());
        }
        self.end_frame()?;
        self.command(Opcode::WriteEnable)?;
        self.end_frame()
    }

    pub fn write_disable(&mut self) -> BusResult<()> {
        if self.registers() {
            return self.reg_write(ControlReg::Erase, 0);
        }
        self.end_frame()?;
        self.command(Opcode::WriteDisable)?;
        self.end_frame()
    }

    pub fn erase_sector(&mut self, addr: u32) -> BusResult<()> {
        info!("Erasing sector at {:#08x}", addr);
        self.take_offline()?;
        self.write_enable()?;
        if self.registers() {
            let word = EraseFlags::ERASE.bits() | ((addr >> 2) & EraseFlags::ADDR_MASK);
            self.reg_write(ControlReg::Erase, word)?;
        } else {
            self.command(Opcode::SectorErase)?;
            self.send_address(addr)?;
            self.end_frame()?;
        }
        self.wait_until_ready()?;
        self.place_online()
    }

    /// Select the memory window read mode. Only register-path controllers
    /// have one; frame controllers keep their fixed mode.
    pub fn set_read_config(&mut self, config: ReadConfig) -> BusResult<()> {
        if !self.registers() {
            debug!(
                "No read configuration register, keeping {:?}",
                self.dialect.continuous_read
            );
            return Ok(());
        }
        debug!("Read configuration {:?}", config);
        self.reg_write(ControlReg::ReadConfig, config.bits())
    }

    pub fn read_config(&mut self) -> BusResult<Option<ReadConfig>> {
        if !self.registers() {
            return Ok(None);
        }
        let bits = self.reg_read(ControlReg::ReadConfig)?;
        Ok(Some(ReadConfig::from_bits_truncate(bits)))
    }

    /// Page program starting at `addr`. Data running past the end of the
    /// page is issued as a further page program rather than wrapping.
    /// Returns the number of page programs issued.
    pub fn page_program(&mut self, addr: u32, data: &[u8]) -> BusResult<usize> {
        if self.geometry.page_chunks(addr, data.len()).len() > 1 {
            warn!(
                "Page program {:#08x} x{} crosses a page boundary, splitting",
                addr,
                data.len()
            );
        }
        self.program_pages(addr, data)
    }

    /// Program an arbitrary range, one page program per page touched.
    /// Returns the number of page programs issued.
    pub fn program(&mut self, addr: u32, data: &[u8]) -> BusResult<usize> {
        info!("Programming {} bytes at {:#08x}", data.len(), addr);
        self.take_offline()?;
        let issued = self.program_pages(addr, data)?;
        self.wait_until_ready()?;
        self.place_online()?;
        Ok(issued)
    }

    fn program_pages(&mut self, addr: u32, data: &[u8]) -> BusResult<usize> {
        let mut issued = 0;
        for (start, range) in self.geometry.page_chunks(addr, data.len()) {
            if self.bus.bombed() {
                break;
            }
            self.program_page(start, &data[range])?;
            issued += 1;
        }
        Ok(issued)
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> BusResult<()> {
        debug!("Page program {:#08x} x{}", addr, data.len());
        self.wait_until_ready()?;
        self.write_enable()?;
        if self.registers() {
            return self.post_page(addr, data);
        }
        self.command(Opcode::PageProgram)?;
        self.send_address(addr)?;
        for &byte in data {
            self.send_data(byte)?;
        }
        self.end_frame()
    }

    /// Write the bytes through the memory window as whole words. Bytes
    /// around an unaligned range are padded with 0xff, which programs
    /// nothing.
    fn post_page(&mut self, addr: u32, data: &[u8]) -> BusResult<()> {
        let base = addr & !3;
        let mut bytes = vec![0xff; (addr - base) as usize];
        bytes.extend_from_slice(data);
        bytes.resize(bytes.len().div_ceil(4) * 4, 0xff);
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        match words.as_slice() {
            [] => Ok(()),
            [word] => self.bus.write(base, *word),
            _ => self.bus.burst_write(base, &words, 1),
        }
    }
}
