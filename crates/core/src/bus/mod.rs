// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Single-master Wishbone transactor.
//!
//! Every primitive blocks by advancing the clock until the slave answers or
//! the tick budget runs out. Running out latches [`Transactor::bombed`] and
//! hands back whatever was captured; protocol violations are returned as
//! [`BusError`].

use crate::config::TransactorConfig;
use crate::signals::{WishboneRequest, WishboneResponse};
use tracing::{debug, error, warn};
use wbflash_config::TrailingStall;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Acknowledge asserted with cycle low at tick {tick}")]
    AckWithoutCycle { tick: u64 },
    #[error("Stall still asserted after the cycle was released at tick {tick}")]
    TrailingStall { tick: u64 },
}

pub type BusResult<T> = Result<T, BusError>;

/// Something with Wishbone slave lines and a clock.
pub trait WishbonePort {
    fn request(&self) -> &WishboneRequest;
    fn request_mut(&mut self) -> &mut WishboneRequest;
    fn response(&self) -> WishboneResponse;
    /// Advance one clock edge.
    fn tick(&mut self);
    fn tick_count(&self) -> u64;
    /// Called once, the first time the transactor bombs.
    fn on_bomb(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strobe {
    Data,
    Ctrl,
}

impl Strobe {
    fn op_name(self, write: bool) -> &'static str {
        match (self, write) {
            (Strobe::Data, false) => "read",
            (Strobe::Data, true) => "write",
            (Strobe::Ctrl, false) => "ctrl read",
            (Strobe::Ctrl, true) => "ctrl write",
        }
    }
}

#[derive(Debug)]
struct TickBudget {
    left: u64,
}

impl TickBudget {
    fn new(limit: u64) -> Self {
        Self { left: limit }
    }

    fn spend(&mut self) -> bool {
        if self.left == 0 {
            return false;
        }
        self.left -= 1;
        true
    }
}

#[derive(Debug)]
pub struct Transactor<P> {
    port: P,
    config: TransactorConfig,
    bombed: bool,
}

impl<P: WishbonePort> Transactor<P> {
    pub fn new(port: P, config: TransactorConfig) -> Self {
        Self {
            port,
            config,
            bombed: false,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    pub fn config(&self) -> &TransactorConfig {
        &self.config
    }

    /// Latched: once set it stays set for the life of the transactor.
    pub fn bombed(&self) -> bool {
        self.bombed
    }

    pub fn ticks(&self) -> u64 {
        self.port.tick_count()
    }

    /// Mark the run failed from outside the bus, e.g. a poll limit.
    pub fn bomb(&mut self, what: &str, addr: u32) {
        if !self.bombed {
            warn!(
                tick = self.port.tick_count(),
                "Bus timeout during {} at {:#010x}", what, addr
            );
            self.port.on_bomb();
        }
        self.bombed = true;
    }

    fn budget(&self) -> TickBudget {
        TickBudget::new(self.config.bomb_count as u64)
    }

    /// Advance one clock and check that no acknowledge is seen outside a cycle.
    pub fn tick(&mut self) -> BusResult<()> {
        self.port.tick();
        if !self.port.request().cyc && self.port.response().ack {
            let tick = self.port.tick_count();
            error!(tick, "Acknowledge asserted without an active cycle");
            return Err(BusError::AckWithoutCycle { tick });
        }
        Ok(())
    }

    pub fn read(&mut self, addr: u32) -> BusResult<u32> {
        self.single(Strobe::Data, addr, None)
    }

    pub fn write(&mut self, addr: u32, value: u32) -> BusResult<()> {
        self.single(Strobe::Data, addr, Some(value)).map(|_| ())
    }

    pub fn ctrl_read(&mut self, addr: u32) -> BusResult<u32> {
        self.single(Strobe::Ctrl, addr, None)
    }

    pub fn ctrl_write(&mut self, addr: u32, value: u32) -> BusResult<()> {
        self.single(Strobe::Ctrl, addr, Some(value)).map(|_| ())
    }

    fn single(&mut self, strobe: Strobe, addr: u32, value: Option<u32>) -> BusResult<u32> {
        let mut budget = self.budget();
        {
            let req = self.port.request_mut();
            req.cyc = true;
            req.data_stb = strobe == Strobe::Data;
            req.ctrl_stb = strobe == Strobe::Ctrl;
            req.we = value.is_some();
            req.addr = addr >> 2;
            if let Some(v) = value {
                req.data = v;
            }
        }

        while self.port.response().stall && budget.spend() {
            self.tick()?;
        }

        // The request is registered on this edge.
        self.tick()?;
        {
            let req = self.port.request_mut();
            req.data_stb = false;
            req.ctrl_stb = false;
        }

        while !self.port.response().ack && budget.spend() {
            self.tick()?;
        }

        let resp = self.port.response();
        self.port.request_mut().release();

        let name = strobe.op_name(value.is_some());
        if !resp.ack {
            self.bomb(name, addr);
        }

        self.tick()?;
        self.drain_stall(addr)?;

        debug!(
            "WB {} {:#010x} -> {:#010x}",
            name,
            addr,
            value.unwrap_or(resp.data)
        );
        Ok(resp.data)
    }

    /// Read `len` words starting at `addr`, advancing `stride` words per
    /// accepted request. A bombed burst returns the words collected so far.
    pub fn burst_read(&mut self, addr: u32, len: usize, stride: u32) -> BusResult<Vec<u32>> {
        let mut words = Vec::with_capacity(len);
        if len == 0 {
            return Ok(words);
        }

        // Let the slave go idle before claiming the bus.
        let mut idle = self.budget();
        while self.port.response().stall {
            if !idle.spend() {
                self.bomb("burst read", addr);
                return Ok(words);
            }
            self.tick()?;
        }

        let mut budget = TickBudget::new(self.config.bomb_count as u64 * len as u64);
        {
            let req = self.port.request_mut();
            req.cyc = true;
            req.data_stb = true;
            req.ctrl_stb = false;
            req.we = false;
            req.addr = addr >> 2;
        }

        let mut issued = 0;
        while issued < len && budget.spend() {
            let stalled = self.port.response().stall;
            self.tick()?;
            if !stalled {
                issued += 1;
                let req = self.port.request_mut();
                req.addr = req.addr.wrapping_add(stride);
            }
            let resp = self.port.response();
            if resp.ack && words.len() < len {
                words.push(resp.data);
            }
        }

        self.port.request_mut().data_stb = false;
        while words.len() < len && budget.spend() {
            self.tick()?;
            let resp = self.port.response();
            if resp.ack {
                words.push(resp.data);
            }
        }

        self.port.request_mut().release();
        if words.len() < len {
            self.bomb("burst read", addr);
        }

        self.tick()?;
        self.drain_stall(addr)?;

        debug!("WB burst read {:#010x} x{} (stride {})", addr, len, stride);
        Ok(words)
    }

    /// Post `words` starting at `addr`, advancing `stride` words per post.
    /// Acknowledges are counted as they arrive and may lag the posts.
    pub fn burst_write(&mut self, addr: u32, words: &[u32], stride: u32) -> BusResult<()> {
        if words.is_empty() {
            return Ok(());
        }

        {
            let req = self.port.request_mut();
            req.cyc = true;
            req.data_stb = true;
            req.ctrl_stb = false;
            req.we = true;
            req.addr = addr >> 2;
        }

        let mut acks = 0;
        let mut stuck = false;
        for &word in words {
            self.port.request_mut().data = word;

            let mut budget = self.budget();
            while self.port.response().stall {
                if !budget.spend() {
                    stuck = true;
                    break;
                }
                self.tick()?;
                if self.port.response().ack {
                    acks += 1;
                }
            }
            if stuck {
                break;
            }

            self.tick()?;
            if self.port.response().ack {
                acks += 1;
            }
            let req = self.port.request_mut();
            req.addr = req.addr.wrapping_add(stride);
        }

        self.port.request_mut().data_stb = false;
        let mut budget = self.budget();
        while !stuck && acks < words.len() && budget.spend() {
            self.tick()?;
            if self.port.response().ack {
                acks += 1;
                budget = self.budget();
            }
        }

        self.port.request_mut().release();
        if acks < words.len() {
            self.bomb("burst write", addr);
        }

        self.tick()?;
        self.drain_stall(addr)?;

        debug!("WB burst write {:#010x} x{} (stride {})", addr, words.len(), stride);
        Ok(())
    }

    fn drain_stall(&mut self, addr: u32) -> BusResult<()> {
        if !self.port.response().stall {
            return Ok(());
        }
        match self.config.trailing_stall {
            TrailingStall::Reject => {
                let tick = self.port.tick_count();
                error!(tick, "Stall lingered after release at {:#010x}", addr);
                Err(BusError::TrailingStall { tick })
            }
            TrailingStall::Drain => {
                let mut budget = self.budget();
                while self.port.response().stall {
                    if !budget.spend() {
                        self.bomb("stall drain", addr);
                        break;
                    }
                    self.tick()?;
                }
                Ok(())
            }
        }
    }
}
