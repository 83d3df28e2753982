// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::{SpiPins, WishboneRequest, WishboneResponse};
use crate::TickObserver;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct BusMetrics {
    ticks: AtomicU64,
    stall_ticks: AtomicU64,
    acks: AtomicU64,
    spi_frames: AtomicU64,
    bombs: AtomicU64,
    cs_n: AtomicBool,
    start_time: Instant,
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub stall_ticks: u64,
    pub acks: u64,
    pub spi_frames: u64,
    pub bombs: u64,
    pub ticks_per_second: f64,
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            stall_ticks: AtomicU64::new(0),
            acks: AtomicU64::new(0),
            spi_frames: AtomicU64::new(0),
            bombs: AtomicU64::new(0),
            cs_n: AtomicBool::new(true),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::SeqCst);
        self.stall_ticks.store(0, Ordering::SeqCst);
        self.acks.store(0, Ordering::SeqCst);
        self.spi_frames.store(0, Ordering::SeqCst);
        self.bombs.store(0, Ordering::SeqCst);
    }

    pub fn get_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Ticks inside a cycle with stall asserted.
    pub fn get_stall_ticks(&self) -> u64 {
        self.stall_ticks.load(Ordering::SeqCst)
    }

    pub fn get_acks(&self) -> u64 {
        self.acks.load(Ordering::SeqCst)
    }

    /// Chip-select assertions.
    pub fn get_spi_frames(&self) -> u64 {
        self.spi_frames.load(Ordering::SeqCst)
    }

    pub fn get_bombs(&self) -> u64 {
        self.bombs.load(Ordering::SeqCst)
    }

    pub fn get_tps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_ticks() as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.get_ticks(),
            stall_ticks: self.get_stall_ticks(),
            acks: self.get_acks(),
            spi_frames: self.get_spi_frames(),
            bombs: self.get_bombs(),
            ticks_per_second: self.get_tps(),
        }
    }
}

impl TickObserver for BusMetrics {
    fn on_tick(
        &self,
        _tick: u64,
        request: &WishboneRequest,
        response: &WishboneResponse,
        spi: &SpiPins,
    ) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if request.cyc && response.stall {
            self.stall_ticks.fetch_add(1, Ordering::SeqCst);
        }
        if response.ack {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }
        let was_deselected = self.cs_n.swap(spi.cs_n, Ordering::SeqCst);
        if was_deselected && !spi.cs_n {
            self.spi_frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_bomb(&self, _tick: u64) {
        self.bombs.fetch_add(1, Ordering::SeqCst);
    }
}
