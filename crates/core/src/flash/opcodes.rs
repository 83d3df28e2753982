// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use wbflash_config::ControllerKind;

/// SPI NOR instruction bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    PageProgram = 0x02,
    Read = 0x03,
    WriteDisable = 0x04,
    ReadStatus = 0x05,
    WriteEnable = 0x06,
    ReadId = 0x9f,
    DualIoRead = 0xbb,
    SectorErase = 0xd8,
    QuadIoRead = 0xeb,
    /// Clocked in place of an address to drop continuous-read mode.
    ModeBitReset = 0xff,
}

impl Opcode {
    pub fn continuous_read(self) -> Option<ContinuousRead> {
        match self {
            Opcode::DualIoRead => Some(ContinuousRead::DUAL_IO),
            Opcode::QuadIoRead => Some(ContinuousRead::QUAD_IO),
            _ => None,
        }
    }
}

bitflags! {
    /// Control-port word layout. The low byte is the SPI byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CfgFlags: u32 {
        /// Word belongs to a user command frame.
        const USER_MODE = 0x1000;
        /// Move the byte over all data lines.
        const WIDE = 0x0400;
        /// With `WIDE`: the controller drives the lines.
        const WRITE_DIR = 0x0200;
        /// De-select the flash.
        const CS_N = 0x0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const BUSY = 0x01;
        const WEL = 0x02;
        const BP0 = 0x04;
        const BP1 = 0x08;
        const BP2 = 0x10;
    }
}

/// Parameters of an execute-in-place read mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousRead {
    pub opcode: Opcode,
    /// Mode byte that keeps the flash in continuous mode (`0xAx`).
    pub mode_byte: u8,
    pub dummy_bytes: u8,
}

impl ContinuousRead {
    pub const DUAL_IO: ContinuousRead = ContinuousRead {
        opcode: Opcode::DualIoRead,
        mode_byte: 0xa0,
        dummy_bytes: 1,
    };

    pub const QUAD_IO: ContinuousRead = ContinuousRead {
        opcode: Opcode::QuadIoRead,
        mode_byte: 0xa0,
        dummy_bytes: 2,
    };

    pub fn keeps_mode(mode: u8) -> bool {
        mode & 0xf0 == 0xa0
    }
}

/// Control registers of the register-driven controller, by word index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ControlReg {
    /// Erase command and write-protect release; reads back busy state.
    Erase = 0,
    /// Flash status register.
    Status = 1,
    Id = 2,
    /// Read mode for the memory window.
    ReadConfig = 3,
}

impl ControlReg {
    pub fn byte_addr(self) -> u32 {
        u32::from(self) << 2
    }
}

bitflags! {
    /// Erase register layout. The low bits carry a word address.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EraseFlags: u32 {
        /// Start a sector erase; reads back as busy.
        const ERASE = 0x8000_0000;
        /// Set write-enable before the next erase or program.
        const DISABLE_WP = 0x1000_0000;
    }
}

impl EraseFlags {
    pub const ADDR_MASK: u32 = 0x003f_ffff;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadConfig: u32 {
        /// Quad-I/O reads instead of plain `READ`.
        const QUAD = 0x04;
        /// With `QUAD`: keep the flash in continuous read mode.
        const XIP = 0x08;
    }
}

/// How erase, program and status commands reach the flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPath {
    /// Byte-by-byte user frames on the control port.
    UserFrames,
    /// Dedicated control registers; programming goes through the memory window.
    Registers,
}

/// How one controller family expects command frames to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Flags carried by address, payload and dummy bytes.
    pub data_flags: CfgFlags,
    /// Read mode the controller keeps the flash in between commands.
    pub continuous_read: Option<ContinuousRead>,
    pub path: CommandPath,
}

impl Dialect {
    /// Bare payload bytes; every access is a plain `READ`.
    pub const SPIXPRESS: Dialect = Dialect {
        data_flags: CfgFlags::empty(),
        continuous_read: None,
        path: CommandPath::UserFrames,
    };

    pub const DUALFLEXPRESS: Dialect = Dialect {
        data_flags: CfgFlags::USER_MODE,
        continuous_read: Some(ContinuousRead::DUAL_IO),
        path: CommandPath::UserFrames,
    };

    pub const QFLEXPRESS: Dialect = Dialect {
        data_flags: CfgFlags::USER_MODE,
        continuous_read: Some(ContinuousRead::QUAD_IO),
        path: CommandPath::UserFrames,
    };

    /// Commands through control registers, reads in the mode last configured.
    pub const WBQSPIFLASH: Dialect = Dialect {
        data_flags: CfgFlags::empty(),
        continuous_read: None,
        path: CommandPath::Registers,
    };

    pub fn for_controller(kind: ControllerKind) -> Self {
        match kind {
            ControllerKind::SpiXpress => Self::SPIXPRESS,
            ControllerKind::DualFlexPress => Self::DUALFLEXPRESS,
            ControllerKind::QFlexPress => Self::QFLEXPRESS,
            ControllerKind::WbQspiFlash => Self::WBQSPIFLASH,
        }
    }

    pub fn command(&self, op: Opcode) -> u32 {
        CfgFlags::USER_MODE.bits() | u8::from(op) as u32
    }

    pub fn data(&self, byte: u8) -> u32 {
        self.data_flags.bits() | byte as u32
    }

    pub fn dummy(&self) -> u32 {
        self.data(0)
    }

    pub fn end_frame(&self) -> u32 {
        (CfgFlags::USER_MODE | CfgFlags::CS_N).bits()
    }

    pub fn wide_write(&self, byte: u8) -> u32 {
        (CfgFlags::USER_MODE | CfgFlags::WIDE | CfgFlags::WRITE_DIR).bits() | byte as u32
    }

    pub fn wide_read(&self) -> u32 {
        (CfgFlags::USER_MODE | CfgFlags::WIDE).bits()
    }

    /// Leave user mode and hand the flash back to memory-mapped reads.
    pub fn close(&self) -> u32 {
        0
    }
}
