// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod flash_sim;
pub mod flexpress;
pub mod wbqspiflash;
mod wire;

pub use flash_sim::{FlashSim, FlashSimConfig};
pub use flexpress::{FlexPress, FlexVariant};
pub use wbqspiflash::WbQspiFlash;

use crate::signals::{SpiPins, WishboneRequest, WishboneResponse};
use crate::spi::LineWidth;
use crate::Dut;
use wbflash_config::ControllerKind;

/// Any of the reference controllers, picked by kind at run time.
#[derive(Debug, Clone)]
pub enum Controller {
    Flex(FlexPress),
    Registers(WbQspiFlash),
}

impl Controller {
    pub fn new(kind: ControllerKind) -> Self {
        match FlexVariant::from_kind(kind) {
            Some(variant) => Controller::Flex(FlexPress::new(variant)),
            None => Controller::Registers(WbQspiFlash::new()),
        }
    }

    pub fn kind(&self) -> ControllerKind {
        match self {
            Controller::Flex(dut) => dut.kind(),
            Controller::Registers(_) => ControllerKind::WbQspiFlash,
        }
    }

    pub fn is_busy(&self) -> bool {
        match self {
            Controller::Flex(dut) => dut.is_busy(),
            Controller::Registers(dut) => dut.is_busy(),
        }
    }

    fn as_dut(&self) -> &dyn Dut {
        match self {
            Controller::Flex(dut) => dut,
            Controller::Registers(dut) => dut,
        }
    }

    fn as_dut_mut(&mut self) -> &mut dyn Dut {
        match self {
            Controller::Flex(dut) => dut,
            Controller::Registers(dut) => dut,
        }
    }
}

impl Dut for Controller {
    fn request(&self) -> &WishboneRequest {
        self.as_dut().request()
    }

    fn request_mut(&mut self) -> &mut WishboneRequest {
        self.as_dut_mut().request_mut()
    }

    fn response(&self) -> WishboneResponse {
        self.as_dut().response()
    }

    fn spi_pins(&self) -> SpiPins {
        self.as_dut().spi_pins()
    }

    fn set_spi_input(&mut self, dat: u8) {
        self.as_dut_mut().set_spi_input(dat);
    }

    fn tick(&mut self) {
        self.as_dut_mut().tick();
    }

    fn line_width(&self) -> LineWidth {
        self.as_dut().line_width()
    }
}
