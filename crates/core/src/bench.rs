// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::WishbonePort;
use crate::models::{Controller, FlashSim, FlashSimConfig};
use crate::signals::{WishboneRequest, WishboneResponse};
use crate::spi::SpiAdapter;
use crate::{Dut, FlashModel, TickObserver};
use std::sync::Arc;
use wbflash_config::BenchManifest;

/// A controller wired to a flash model through the SPI adapter.
///
/// One [`WishbonePort::tick`] exchanges the pins with the flash, clocks the
/// controller and then reports the new state to every observer.
#[derive(Debug)]
pub struct Bench<D, F> {
    dut: D,
    flash: F,
    adapter: SpiAdapter,
    ticks: u64,
    observers: Vec<Arc<dyn TickObserver>>,
}

pub type ReferenceBench = Bench<Controller, FlashSim>;

impl<D: Dut, F: FlashModel> Bench<D, F> {
    pub fn new(dut: D, flash: F) -> Self {
        let adapter = SpiAdapter::new(dut.line_width());
        Self {
            dut,
            flash,
            adapter,
            ticks: 0,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TickObserver>) {
        self.observers.push(observer);
    }

    pub fn dut(&self) -> &D {
        &self.dut
    }

    pub fn dut_mut(&mut self) -> &mut D {
        &mut self.dut
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }
}

impl ReferenceBench {
    pub fn from_manifest(manifest: &BenchManifest) -> anyhow::Result<Self> {
        let flash = FlashSim::new(FlashSimConfig::from_config(&manifest.flash)?);
        Ok(Self::new(Controller::new(manifest.controller), flash))
    }
}

impl<D: Dut, F: FlashModel> WishbonePort for Bench<D, F> {
    fn request(&self) -> &WishboneRequest {
        self.dut.request()
    }

    fn request_mut(&mut self) -> &mut WishboneRequest {
        self.dut.request_mut()
    }

    fn response(&self) -> WishboneResponse {
        self.dut.response()
    }

    fn tick(&mut self) {
        let pins = self.dut.spi_pins();
        let dat = self.adapter.exchange(&pins, &mut self.flash);
        self.dut.set_spi_input(dat);
        self.dut.tick();
        self.ticks += 1;

        if self.observers.is_empty() {
            return;
        }
        let request = *self.dut.request();
        let response = self.dut.response();
        let pins = self.dut.spi_pins();
        for observer in &self.observers {
            observer.on_tick(self.ticks, &request, &response, &pins);
        }
    }

    fn tick_count(&self) -> u64 {
        self.ticks
    }

    fn on_bomb(&mut self) {
        for observer in &self.observers {
            observer.on_bomb(self.ticks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlexPress, FlexVariant};
    use crate::signals::SpiPins;
    use std::sync::atomic::{AtomicU64, Ordering};
    use wbflash_config::ControllerKind;

    #[derive(Debug, Default)]
    struct Counter {
        ticks: AtomicU64,
        last: AtomicU64,
        bombs: AtomicU64,
    }

    impl TickObserver for Counter {
        fn on_tick(&self, tick: u64, _: &WishboneRequest, _: &WishboneResponse, _: &SpiPins) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            self.last.store(tick, Ordering::SeqCst);
        }

        fn on_bomb(&self, _tick: u64) {
            self.bombs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_observers_see_every_tick() {
        let mut bench = Bench::new(
            FlexPress::new(FlexVariant::SpiXpress),
            FlashSim::default(),
        );
        let counter = Arc::new(Counter::default());
        bench.add_observer(counter.clone());

        for _ in 0..5 {
            bench.tick();
        }
        bench.on_bomb();
        assert_eq!(bench.tick_count(), 5);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 5);
        assert_eq!(counter.last.load(Ordering::SeqCst), 5);
        assert_eq!(counter.bombs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bench_from_manifest() {
        let mut manifest = BenchManifest::default();
        manifest.controller = ControllerKind::QFlexPress;
        manifest.flash.size = "1MiB".to_string();
        let bench = ReferenceBench::from_manifest(&manifest).unwrap();
        assert_eq!(bench.flash().bytes().len(), 1 << 20);
        assert_eq!(bench.dut().kind(), ControllerKind::QFlexPress);
        assert!(bench.response().stall);
    }

    #[test]
    fn test_register_controller_bench_is_quad() {
        let mut manifest = BenchManifest::default();
        manifest.controller = ControllerKind::WbQspiFlash;
        let bench = ReferenceBench::from_manifest(&manifest).unwrap();
        assert_eq!(bench.dut().kind(), ControllerKind::WbQspiFlash);
        assert_eq!(bench.dut().line_width(), crate::LineWidth::Quad);
        assert!(!bench.response().stall);
    }
}
