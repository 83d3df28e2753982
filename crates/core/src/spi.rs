// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::SpiPins;
use crate::FlashModel;

/// Number of data lines between controller and flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LineWidth {
    Single,
    Dual,
    Quad,
}

impl LineWidth {
    /// Bits moved per clock in a wide transfer.
    pub fn lanes(self) -> u8 {
        match self {
            LineWidth::Single => 1,
            LineWidth::Dual => 2,
            LineWidth::Quad => 4,
        }
    }

    pub fn mask(self) -> u8 {
        (1 << self.lanes()) - 1
    }

    /// Map the flash's output lines onto the controller's input lines.
    ///
    /// A single-line controller has one MISO input fed from flash line 1.
    /// Wider controllers share their lines: a wide read passes the flash
    /// through, a wide write sees its own lines, and plain SPI mixes flash
    /// line 1 with the controller's own line 0.
    pub fn route(self, pins: &SpiPins, sample: u8) -> u8 {
        match self {
            LineWidth::Single => (sample >> 1) & 1,
            LineWidth::Dual | LineWidth::Quad => {
                if pins.is_wide_read() {
                    sample & self.mask()
                } else if pins.is_wide() {
                    pins.dat & self.mask()
                } else {
                    (sample & 0b10) | (pins.dat & 0b01)
                }
            }
        }
    }
}

/// Turns per-tick controller pins into flash shift calls.
#[derive(Debug, Clone)]
pub struct SpiAdapter {
    width: LineWidth,
    last_sck: bool,
}

impl SpiAdapter {
    pub fn new(width: LineWidth) -> Self {
        Self {
            width,
            last_sck: false,
        }
    }

    pub fn width(&self) -> LineWidth {
        self.width
    }

    /// Run once per tick, before the controller is clocked.
    ///
    /// The flash sees a full clock pulse only when the controller's clock
    /// was high on the previous tick, so data is sampled half a cycle late
    /// the way a registered shift stage would.
    pub fn exchange<F: FlashModel + ?Sized>(&mut self, pins: &SpiPins, flash: &mut F) -> u8 {
        if self.last_sck {
            flash.shift(pins.cs_n, false, pins.dat);
        }
        let sample = flash.shift(pins.cs_n, true, pins.dat);
        self.last_sck = pins.sck;
        self.width.route(pins, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SPI_MODE_NORMAL, SPI_MODE_WIDE_READ, SPI_MODE_WIDE_WRITE};
    use crate::FlashResult;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<(bool, bool, u8)>,
        reply: u8,
    }

    impl FlashModel for Recorder {
        fn word(&self, _index: usize) -> u32 {
            0
        }

        fn set_word(&mut self, _index: usize, _value: u32) {}

        fn load(&mut self, _offset: usize, _data: &[u8]) -> FlashResult<()> {
            Ok(())
        }

        fn shift(&mut self, cs_n: bool, sck: bool, dat: u8) -> u8 {
            self.calls.push((cs_n, sck, dat));
            self.reply
        }
    }

    fn pins(sck: bool, mode: u8, dat: u8) -> SpiPins {
        SpiPins {
            cs_n: false,
            sck,
            mode,
            dat,
        }
    }

    #[test]
    fn test_pulse_only_after_high_clock() {
        let mut adapter = SpiAdapter::new(LineWidth::Single);
        let mut flash = Recorder::default();

        adapter.exchange(&pins(true, SPI_MODE_NORMAL, 1), &mut flash);
        assert_eq!(flash.calls, vec![(false, true, 1)]);

        flash.calls.clear();
        adapter.exchange(&pins(false, SPI_MODE_NORMAL, 0), &mut flash);
        assert_eq!(flash.calls, vec![(false, false, 0), (false, true, 0)]);

        flash.calls.clear();
        adapter.exchange(&pins(false, SPI_MODE_NORMAL, 0), &mut flash);
        assert_eq!(flash.calls, vec![(false, true, 0)]);
    }

    #[test]
    fn test_single_line_routes_miso() {
        let mut adapter = SpiAdapter::new(LineWidth::Single);
        let mut flash = Recorder {
            reply: 0b10,
            ..Default::default()
        };
        assert_eq!(adapter.exchange(&pins(false, SPI_MODE_NORMAL, 0), &mut flash), 1);
        flash.reply = 0b01;
        assert_eq!(adapter.exchange(&pins(false, SPI_MODE_NORMAL, 1), &mut flash), 0);
    }

    #[test]
    fn test_dual_direction_switching() {
        let width = LineWidth::Dual;
        assert_eq!(width.route(&pins(false, SPI_MODE_WIDE_READ, 0b00), 0b1110), 0b10);
        assert_eq!(width.route(&pins(false, SPI_MODE_WIDE_WRITE, 0b01), 0b1110), 0b01);
        assert_eq!(width.route(&pins(false, SPI_MODE_NORMAL, 0b01), 0b0010), 0b11);
        assert_eq!(width.route(&pins(false, SPI_MODE_NORMAL, 0b00), 0b0001), 0b00);
    }

    #[test]
    fn test_quad_routes_four_lines() {
        let width = LineWidth::Quad;
        assert_eq!(width.mask(), 0xf);
        assert_eq!(width.route(&pins(false, SPI_MODE_WIDE_READ, 0), 0xfa), 0xa);
        assert_eq!(width.route(&pins(false, SPI_MODE_WIDE_WRITE, 0x5), 0xfa), 0x5);
        assert_eq!(width.route(&pins(false, SPI_MODE_NORMAL, 0x1), 0x8), 0x1);
    }
}
