// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Mutex;
use vcd::{IdCode, TimescaleUnit, Value, Writer};
use wbflash_core::{SpiPins, TickObserver, WishboneRequest, WishboneResponse};

/// (scope, name, width) of every traced line, in `sample` order.
const SIGNALS: [(&str, &str, u32); 13] = [
    ("wb", "cyc", 1),
    ("wb", "data_stb", 1),
    ("wb", "ctrl_stb", 1),
    ("wb", "we", 1),
    ("wb", "addr", 32),
    ("wb", "wdata", 32),
    ("wb", "stall", 1),
    ("wb", "ack", 1),
    ("wb", "rdata", 32),
    ("spi", "cs_n", 1),
    ("spi", "sck", 1),
    ("spi", "mode", 2),
    ("spi", "dat", 4),
];

type Sample = [u64; SIGNALS.len()];

fn sample(req: &WishboneRequest, resp: &WishboneResponse, spi: &SpiPins) -> Sample {
    [
        req.cyc as u64,
        req.data_stb as u64,
        req.ctrl_stb as u64,
        req.we as u64,
        req.addr as u64,
        req.data as u64,
        resp.stall as u64,
        resp.ack as u64,
        resp.data as u64,
        spi.cs_n as u64,
        spi.sck as u64,
        spi.mode as u64,
        spi.dat as u64,
    ]
}

pub struct VcdObserver {
    state: Mutex<VcdState>,
    ids: Vec<IdCode>,
}

struct VcdState {
    writer: Writer<BufWriter<File>>,
    last: Sample,
}

impl VcdObserver {
    pub fn new(path: std::path::PathBuf) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        let buf = BufWriter::new(file);
        let mut writer = Writer::new(buf);

        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module("bench")?;

        let mut ids = Vec::with_capacity(SIGNALS.len());
        let mut scope = None;
        for (module, name, width) in SIGNALS {
            if scope != Some(module) {
                if scope.is_some() {
                    writer.upscope()?;
                }
                writer.add_module(module)?;
                scope = Some(module);
            }
            ids.push(writer.add_wire(width, name)?);
        }
        writer.upscope()?; // last scope
        writer.upscope()?; // bench
        writer.enddefinitions()?;

        let last = sample(
            &WishboneRequest::default(),
            &WishboneResponse::default(),
            &SpiPins::default(),
        );
        writer.timestamp(0)?;
        for (i, &value) in last.iter().enumerate() {
            write_value(&mut writer, ids[i], SIGNALS[i].2, value)?;
        }

        Ok(Self {
            state: Mutex::new(VcdState { writer, last }),
            ids,
        })
    }
}

fn write_value(
    writer: &mut Writer<BufWriter<File>>,
    id: IdCode,
    width: u32,
    value: u64,
) -> std::io::Result<()> {
    if width == 1 {
        writer.change_scalar(id, if value != 0 { Value::V1 } else { Value::V0 })
    } else {
        writer.change_vector(id, u64_to_vec(value, width))
    }
}

// Helper to convert u64 to Vec<Value> (MSB first)
fn u64_to_vec(val: u64, width: u32) -> Vec<Value> {
    let mut bits = Vec::with_capacity(width as usize);
    for i in (0..width).rev() {
        let bit = (val >> i) & 1;
        bits.push(if bit == 1 { Value::V1 } else { Value::V0 });
    }
    bits
}

impl core::fmt::Debug for VcdObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "VcdObserver")
    }
}

impl TickObserver for VcdObserver {
    fn on_tick(
        &self,
        tick: u64,
        request: &WishboneRequest,
        response: &WishboneResponse,
        spi: &SpiPins,
    ) {
        let now = sample(request, response, spi);
        if let Ok(mut state) = self.state.lock() {
            if now == state.last {
                return;
            }
            let _ = state.writer.timestamp(tick);
            for (i, &value) in now.iter().enumerate() {
                if value != state.last[i] {
                    let _ = write_value(&mut state.writer, self.ids[i], SIGNALS[i].2, value);
                }
            }
            state.last = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_changes_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.vcd");
        let observer = VcdObserver::new(path.clone()).unwrap();

        let mut req = WishboneRequest::default();
        let resp = WishboneResponse::default();
        let spi = SpiPins::default();
        observer.on_tick(1, &req, &resp, &spi);
        req.cyc = true;
        observer.on_tick(2, &req, &resp, &spi);
        observer.on_tick(3, &req, &resp, &spi);
        drop(observer);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("$timescale"));
        assert!(content.contains("$var wire 32"));
        assert!(content.contains("#2"));
        assert!(!content.contains("#1\n"));
        assert!(!content.contains("#3"));
    }
}
