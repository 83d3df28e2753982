// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Pin-level SPI engine shared by the reference controllers.
//!
//! Work is queued as steps and run one clock at a time. Selecting and
//! de-selecting take one tick each and a byte takes two ticks per bit
//! period. Bytes received along the way are kept for the reply.

use crate::signals::{SpiPins, SPI_MODE_NORMAL, SPI_MODE_WIDE_READ, SPI_MODE_WIDE_WRITE};
use crate::spi::LineWidth;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lanes {
    /// MOSI out, MISO in.
    Duplex,
    WideWrite,
    WideRead,
}

/// One byte on the wire.
#[derive(Debug, Clone)]
struct Shifter {
    lanes: Lanes,
    out: u8,
    rx: u8,
    sent: u8,
    high: bool,
}

impl Shifter {
    fn new(lanes: Lanes, out: u8) -> Self {
        Self {
            lanes,
            out,
            rx: 0,
            sent: 0,
            high: false,
        }
    }

    /// Returns the received byte on the tick that finishes it.
    fn tick(&mut self, pins: &mut SpiPins, dat_in: u8, width: LineWidth) -> Option<u8> {
        let n = match self.lanes {
            Lanes::Duplex => 1,
            _ => width.lanes(),
        };
        if self.high {
            pins.sck = false;
            self.high = false;
            self.sent += n;
            return (self.sent >= 8).then_some(self.rx);
        }

        let sample = match (self.lanes, width) {
            (Lanes::Duplex, LineWidth::Single) => dat_in & 1,
            (Lanes::Duplex, _) => (dat_in >> 1) & 1,
            _ => dat_in & width.mask(),
        };
        self.rx = (self.rx << n) | sample;
        let bits = self.out >> (8 - n);
        self.out <<= n;
        pins.sck = true;
        match self.lanes {
            Lanes::Duplex => {
                pins.mode = SPI_MODE_NORMAL;
                pins.dat = bits & 1;
            }
            Lanes::WideWrite => {
                pins.mode = SPI_MODE_WIDE_WRITE;
                pins.dat = bits;
            }
            Lanes::WideRead => {
                pins.mode = SPI_MODE_WIDE_READ;
                pins.dat = 0;
            }
        }
        self.high = true;
        None
    }
}

/// What the controller answers once the queued work is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    /// Bytes shifted since the request, big-endian.
    Word,
    /// Last byte received.
    LastByte,
    /// Erase register view of the status byte just read.
    EraseStatus,
    Value(u32),
    Nothing,
}

#[derive(Debug, Clone)]
enum Step {
    Select,
    Deselect,
    Shift(Shifter),
    Respond(Reply),
    /// End of the power-on sequence.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Reply(Reply),
    Ready,
}

enum Outcome {
    Free,
    Tick,
    Byte(u8),
    Event(Event),
}

#[derive(Debug, Clone)]
pub(crate) struct Wire {
    width: LineWidth,
    pins: SpiPins,
    dat_in: u8,
    steps: VecDeque<Step>,
    rx: u32,
    last_rx: u8,
}

impl Wire {
    pub(crate) fn new(width: LineWidth) -> Self {
        Self {
            width,
            pins: SpiPins::default(),
            dat_in: 0,
            steps: VecDeque::new(),
            rx: 0,
            last_rx: 0,
        }
    }

    pub(crate) fn width(&self) -> LineWidth {
        self.width
    }

    pub(crate) fn pins(&self) -> SpiPins {
        self.pins
    }

    pub(crate) fn set_input(&mut self, dat: u8) {
        self.dat_in = dat;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn rx(&self) -> u32 {
        self.rx
    }

    pub(crate) fn last_rx(&self) -> u8 {
        self.last_rx
    }

    pub(crate) fn clear_rx(&mut self) {
        self.rx = 0;
    }

    pub(crate) fn select(&mut self) {
        self.steps.push_back(Step::Select);
    }

    pub(crate) fn deselect(&mut self) {
        self.steps.push_back(Step::Deselect);
    }

    pub(crate) fn shift(&mut self, lanes: Lanes, byte: u8) {
        self.steps.push_back(Step::Shift(Shifter::new(lanes, byte)));
    }

    pub(crate) fn respond(&mut self, reply: Reply) {
        self.steps.push_back(Step::Respond(reply));
    }

    pub(crate) fn ready(&mut self) {
        self.steps.push_back(Step::Ready);
    }

    pub(crate) fn awaiting_reply(&self) -> bool {
        self.steps.iter().any(|step| matches!(step, Step::Respond(_)))
    }

    /// Run zero-time steps, then one tick of the step at the head.
    pub(crate) fn advance(&mut self) -> Option<Event> {
        loop {
            let step = self.steps.front_mut()?;
            let outcome = match step {
                Step::Select => {
                    if self.pins.cs_n {
                        self.pins.cs_n = false;
                        self.pins.mode = SPI_MODE_NORMAL;
                        Outcome::Tick
                    } else {
                        Outcome::Free
                    }
                }
                Step::Deselect => {
                    if self.pins.cs_n {
                        Outcome::Free
                    } else {
                        self.pins.cs_n = true;
                        self.pins.sck = false;
                        self.pins.mode = SPI_MODE_NORMAL;
                        Outcome::Tick
                    }
                }
                Step::Shift(shifter) => {
                    match shifter.tick(&mut self.pins, self.dat_in, self.width) {
                        Some(byte) => Outcome::Byte(byte),
                        None => return None,
                    }
                }
                Step::Respond(reply) => Outcome::Event(Event::Reply(*reply)),
                Step::Ready => Outcome::Event(Event::Ready),
            };
            self.steps.pop_front();
            match outcome {
                Outcome::Free => continue,
                Outcome::Tick => return None,
                Outcome::Byte(byte) => {
                    self.rx = (self.rx << 8) | byte as u32;
                    self.last_rx = byte;
                    return None;
                }
                Outcome::Event(event) => return Some(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(wire: &mut Wire) -> (Vec<SpiPins>, Vec<Event>) {
        let mut trace = Vec::new();
        let mut events = Vec::new();
        while !wire.is_idle() {
            if let Some(event) = wire.advance() {
                events.push(event);
            }
            trace.push(wire.pins());
            assert!(trace.len() < 200, "steps never drained");
        }
        (trace, events)
    }

    #[test]
    fn test_select_shift_deselect() {
        let mut wire = Wire::new(LineWidth::Single);
        wire.select();
        wire.shift(Lanes::Duplex, 0x81);
        wire.deselect();
        wire.respond(Reply::LastByte);

        let (trace, events) = run(&mut wire);
        // Select, 16 clock ticks, de-select, reply.
        assert_eq!(trace.len(), 19);
        assert!(!trace[0].cs_n);
        let rising: Vec<u8> = trace.iter().filter(|p| p.sck).map(|p| p.dat).collect();
        assert_eq!(rising, vec![1, 0, 0, 0, 0, 0, 0, 1]);
        assert!(wire.pins().cs_n);
        assert_eq!(events, vec![Event::Reply(Reply::LastByte)]);
    }

    #[test]
    fn test_received_bytes_pack_big_endian() {
        let mut wire = Wire::new(LineWidth::Single);
        wire.set_input(1);
        wire.select();
        for _ in 0..5 {
            wire.shift(Lanes::Duplex, 0);
        }
        run(&mut wire);
        assert_eq!(wire.rx(), u32::MAX);
        assert_eq!(wire.last_rx(), 0xff);
        wire.clear_rx();
        assert_eq!(wire.rx(), 0);
    }

    #[test]
    fn test_quad_read_samples_four_lines() {
        let mut wire = Wire::new(LineWidth::Quad);
        wire.set_input(0xa);
        wire.select();
        wire.shift(Lanes::WideRead, 0);
        let (trace, _) = run(&mut wire);
        assert_eq!(trace.iter().filter(|p| p.sck).count(), 2);
        assert_eq!(wire.last_rx(), 0xaa);
    }
}
