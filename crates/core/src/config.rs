// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use wbflash_config::{BusConfig, TrailingStall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactorConfig {
    /// Tick budget of a single transfer. Burst reads scale it by length.
    pub bomb_count: u32,
    /// DUT quirk: whether stall may linger once the cycle is released.
    pub trailing_stall: TrailingStall,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            bomb_count: 2048,
            trailing_stall: TrailingStall::Drain,
        }
    }
}

impl From<&BusConfig> for TransactorConfig {
    fn from(bus: &BusConfig) -> Self {
        Self {
            bomb_count: bus.bomb_count,
            trailing_stall: bus.trailing_stall,
        }
    }
}
