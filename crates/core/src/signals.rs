// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Lines driven by the bus master.
///
/// `addr` is a word address; the transactor shifts byte addresses right by
/// two before driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct WishboneRequest {
    pub cyc: bool,
    pub data_stb: bool,
    pub ctrl_stb: bool,
    pub we: bool,
    pub addr: u32,
    pub data: u32,
}

impl WishboneRequest {
    pub fn strobe(&self) -> bool {
        self.data_stb || self.ctrl_stb
    }

    /// Drop cycle and both strobes, leaving address and data as they were.
    pub fn release(&mut self) {
        self.cyc = false;
        self.data_stb = false;
        self.ctrl_stb = false;
        self.we = false;
    }
}

/// Lines driven by the slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct WishboneResponse {
    pub stall: bool,
    pub ack: bool,
    pub data: u32,
}

/// `mode` value for plain SPI: line 0 out, line 1 in.
pub const SPI_MODE_NORMAL: u8 = 0b00;
/// `mode` value for a wide transfer driven by the controller.
pub const SPI_MODE_WIDE_WRITE: u8 = 0b10;
/// `mode` value for a wide transfer driven by the flash.
pub const SPI_MODE_WIDE_READ: u8 = 0b11;

/// Flash-side lines of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SpiPins {
    pub cs_n: bool,
    pub sck: bool,
    pub mode: u8,
    pub dat: u8,
}

impl Default for SpiPins {
    fn default() -> Self {
        Self {
            cs_n: true,
            sck: false,
            mode: SPI_MODE_NORMAL,
            dat: 0,
        }
    }
}

impl SpiPins {
    pub fn is_wide(&self) -> bool {
        self.mode & 0b10 != 0
    }

    pub fn is_wide_read(&self) -> bool {
        self.mode & 0b11 == SPI_MODE_WIDE_READ
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_keeps_address() {
        let mut req = WishboneRequest {
            cyc: true,
            data_stb: true,
            ctrl_stb: false,
            we: true,
            addr: 0x40,
            data: 0xdead_beef,
        };
        assert!(req.strobe());
        req.release();
        assert!(!req.cyc);
        assert!(!req.strobe());
        assert!(!req.we);
        assert_eq!(req.addr, 0x40);
        assert_eq!(req.data, 0xdead_beef);
    }

    #[test]
    fn test_spi_mode_decoding() {
        let mut pins = SpiPins::default();
        assert!(pins.cs_n);
        assert!(!pins.is_wide());
        pins.mode = SPI_MODE_WIDE_WRITE;
        assert!(pins.is_wide());
        assert!(!pins.is_wide_read());
        pins.mode = SPI_MODE_WIDE_READ;
        assert!(pins.is_wide_read());
    }
}
