// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bench;
pub mod bus;
pub mod config;
pub mod flash;
pub mod metrics;
pub mod models;
pub mod scenario;
pub mod signals;
pub mod spi;

pub use bench::Bench;
pub use bus::{BusError, BusResult, Transactor, WishbonePort};
pub use signals::{SpiPins, WishboneRequest, WishboneResponse};
pub use spi::{LineWidth, SpiAdapter};


/// Errors raised by the behavioral flash model outside of SPI traffic.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("Load of {len} bytes at {offset:#x} runs past the {size:#x} byte array")]
    LoadOutOfRange { offset: usize, len: usize, size: usize },
}

pub type FlashResult<T> = Result<T, FlashError>;

/// Signal-level view of a controller under test.
///
/// The bench owns the request lines and writes them through `request_mut`;
/// everything else is driven by the device itself on `tick`.
pub trait Dut {
    fn request(&self) -> &WishboneRequest;
    fn request_mut(&mut self) -> &mut WishboneRequest;
    fn response(&self) -> WishboneResponse;
    fn spi_pins(&self) -> SpiPins;
    /// Data lines sampled by the device on the next clock edge.
    fn set_spi_input(&mut self, dat: u8);
    /// One rising clock edge.
    fn tick(&mut self);
    fn line_width(&self) -> LineWidth;
}

/// Behavioral flash reached through a serial shift interface.
pub trait FlashModel {
    /// Big-endian word at byte offset `index * 4`.
    fn word(&self, index: usize) -> u32;
    fn set_word(&mut self, index: usize, value: u32);
    fn load(&mut self, offset: usize, data: &[u8]) -> FlashResult<()>;
    /// One call per clock level. Returns the lines the flash drives.
    fn shift(&mut self, cs_n: bool, sck: bool, dat: u8) -> u8;
}

/// Trait for observing the bench clock in a modular way.
pub trait TickObserver: std::fmt::Debug + Send + Sync {
    fn on_tick(
        &self,
        _tick: u64,
        _request: &WishboneRequest,
        _response: &WishboneResponse,
        _spi: &SpiPins,
    ) {
    }
    fn on_bomb(&self, _tick: u64) {}
}
