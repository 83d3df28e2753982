// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Cycle-level reference controller.
//!
//! Each accepted bus request becomes a queue of pin-level steps. The
//! controller stalls while the queue drains and answers with a single ack
//! once the reply step runs.

use super::wire::{Event, Lanes, Reply, Wire};
use crate::flash::{CfgFlags, ContinuousRead, Opcode};
use crate::signals::{SpiPins, WishboneRequest, WishboneResponse};
use crate::spi::LineWidth;
use crate::Dut;
use tracing::{debug, trace};
use wbflash_config::ControllerKind;

/// Byte addresses the memory window decodes.
pub(crate) const WINDOW_MASK: u32 = 0x00ff_ffff;

/// Controllers driven through user-mode command frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexVariant {
    SpiXpress,
    DualFlexPress,
    QFlexPress,
}

impl FlexVariant {
    pub fn from_kind(kind: ControllerKind) -> Option<Self> {
        match kind {
            ControllerKind::SpiXpress => Some(FlexVariant::SpiXpress),
            ControllerKind::DualFlexPress => Some(FlexVariant::DualFlexPress),
            ControllerKind::QFlexPress => Some(FlexVariant::QFlexPress),
            ControllerKind::WbQspiFlash => None,
        }
    }

    pub fn kind(self) -> ControllerKind {
        match self {
            FlexVariant::SpiXpress => ControllerKind::SpiXpress,
            FlexVariant::DualFlexPress => ControllerKind::DualFlexPress,
            FlexVariant::QFlexPress => ControllerKind::QFlexPress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlexPress {
    variant: FlexVariant,
    continuous: Option<ContinuousRead>,
    request: WishboneRequest,
    response: WishboneResponse,
    wire: Wire,
    user_selected: bool,
    abandoned: bool,
}

impl FlexPress {
    pub fn new(variant: FlexVariant) -> Self {
        let (width, continuous) = match variant {
            FlexVariant::SpiXpress => (LineWidth::Single, None),
            FlexVariant::DualFlexPress => (LineWidth::Dual, Some(ContinuousRead::DUAL_IO)),
            FlexVariant::QFlexPress => (LineWidth::Quad, Some(ContinuousRead::QUAD_IO)),
        };
        let mut dut = Self {
            variant,
            continuous,
            request: WishboneRequest::default(),
            response: WishboneResponse::default(),
            wire: Wire::new(width),
            user_selected: false,
            abandoned: false,
        };
        if let Some(mode) = continuous {
            dut.queue_startup(mode);
        }
        dut
    }

    pub fn kind(&self) -> ControllerKind {
        self.variant.kind()
    }

    /// Still running the power-on sequence or a request.
    pub fn is_busy(&self) -> bool {
        !self.wire.is_idle()
    }

    /// Puts the flash into continuous read mode before the first request.
    fn queue_startup(&mut self, mode: ContinuousRead) {
        self.response.stall = true;
        self.wire.select();
        self.wire.shift(Lanes::Duplex, mode.opcode.into());
        for _ in 0..3 {
            self.wire.shift(Lanes::WideWrite, 0);
        }
        self.wire.shift(Lanes::WideWrite, mode.mode_byte);
        for _ in 0..mode.dummy_bytes {
            self.wire.shift(Lanes::WideRead, 0);
        }
        self.wire.deselect();
        self.wire.ready();
    }

    fn queue_read(&mut self, byte_addr: u32) {
        self.wire.clear_rx();
        self.user_selected = false;
        self.wire.deselect();
        self.wire.select();
        let addr = byte_addr.to_be_bytes();
        match self.continuous {
            None => {
                self.wire.shift(Lanes::Duplex, Opcode::Read.into());
                for byte in &addr[1..] {
                    self.wire.shift(Lanes::Duplex, *byte);
                }
                for _ in 0..4 {
                    self.wire.shift(Lanes::Duplex, 0);
                }
            }
            Some(mode) => {
                for byte in &addr[1..] {
                    self.wire.shift(Lanes::WideWrite, *byte);
                }
                self.wire.shift(Lanes::WideWrite, mode.mode_byte);
                for _ in 0..mode.dummy_bytes + 4 {
                    self.wire.shift(Lanes::WideRead, 0);
                }
            }
        }
        self.wire.deselect();
        self.wire.respond(Reply::Word);
    }

    fn queue_config_write(&mut self, value: u32) {
        let flags = CfgFlags::from_bits_truncate(value);
        // Without a user-mode bit the single-line controller keeps a frame
        // open once a command started it.
        let sticky = self.continuous.is_none() && self.user_selected;
        if flags.contains(CfgFlags::CS_N) {
            self.wire.deselect();
            self.user_selected = false;
        } else if flags.contains(CfgFlags::USER_MODE) || sticky {
            let wide = flags.contains(CfgFlags::WIDE) && self.wire.width() != LineWidth::Single;
            let lanes = match (wide, flags.contains(CfgFlags::WRITE_DIR)) {
                (true, true) => Lanes::WideWrite,
                (true, false) => Lanes::WideRead,
                (false, _) => Lanes::Duplex,
            };
            self.wire.select();
            self.wire.shift(lanes, value as u8);
            self.user_selected = true;
        } else {
            self.wire.deselect();
            self.user_selected = false;
        }
        self.wire.respond(Reply::LastByte);
    }

    fn accept(&mut self) {
        let req = self.request;
        if req.data_stb {
            if req.we {
                debug!("Write to memory window at {:#08x} ignored", req.addr << 2);
                self.wire.respond(Reply::Nothing);
            } else {
                self.queue_read((req.addr << 2) & WINDOW_MASK);
            }
        } else if req.we {
            self.queue_config_write(req.data);
        } else {
            self.wire.respond(Reply::LastByte);
        }
        self.response.stall = true;
    }

    fn respond(&mut self, reply: Reply) {
        let value = match reply {
            Reply::Word => self.wire.rx(),
            Reply::LastByte | Reply::EraseStatus => self.wire.last_rx() as u32,
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

    fn advance(&mut self) {
        match self.wire.advance() {
            Some(Event::Reply(reply)) => self.respond(reply),
            Some(Event::Ready) => {
                debug!("{} startup complete", self.kind());
                self.response.stall = false;
            }
            None => {}
        }
    }
}

impl Dut for FlexPress {
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
        if !self.request.cyc && self.wire.awaiting_reply() {
            self.abandoned = true;
        }
        self.advance();
        if !was_stalled && self.request.cyc && self.request.strobe() {
            self.accept();
        }
    }

    fn line_width(&self) -> LineWidth {
        self.wire.width()
    }
}
