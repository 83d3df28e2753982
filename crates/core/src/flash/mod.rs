// WbFlash - Wishbone Flash Controller Test Bench
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod opcodes;
pub mod sequencer;

pub use opcodes::{
    CfgFlags, CommandPath, ContinuousRead, ControlReg, Dialect, EraseFlags, Opcode, ReadConfig,
    StatusFlags,
};
pub use sequencer::FlashDriver;

use anyhow::Context;
use std::ops::Range;
use wbflash_config::FlashConfig;

/// Size, sector and page layout of the flash array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FlashGeometry {
    pub size: u32,
    pub sector_size: u32,
    pub page_size: u32,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self {
            size: 1 << 24,
            sector_size: 1 << 16,
            page_size: 256,
        }
    }
}

impl FlashGeometry {
    pub fn from_config(config: &FlashConfig) -> anyhow::Result<Self> {
        let size = config.size_bytes()?;
        let sector_size = config.sector_bytes()?;
        let geometry = Self {
            size: u32::try_from(size).context("Flash size does not fit 32 bits")?,
            sector_size: u32::try_from(sector_size).context("Sector size does not fit 32 bits")?,
            page_size: config.page_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Pages and sectors must be power-of-two slices that nest inside the array.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.size.is_power_of_two() || self.size > 1 << 24 {
            anyhow::bail!(
                "Flash size must be a power of two no larger than 16MiB, got {}",
                self.size
            );
        }
        if !self.page_size.is_power_of_two() || self.page_size < 4 {
            anyhow::bail!(
                "Page size must be a power of two of at least 4, got {}",
                self.page_size
            );
        }
        if !self.sector_size.is_power_of_two()
            || self.sector_size < self.page_size
            || self.sector_size > self.size
        {
            anyhow::bail!(
                "Sector size {} must be a power of two between the page size {} and the flash size {}",
                self.sector_size,
                self.page_size,
                self.size
            );
        }
        Ok(())
    }

    pub fn page_of(&self, addr: u32) -> u32 {
        addr & !(self.page_size - 1)
    }

    pub fn sector_of(&self, addr: u32) -> u32 {
        addr & !(self.sector_size - 1)
    }

    pub fn address_mask(&self) -> u32 {
        self.size - 1
    }

    pub fn pages_per_sector(&self) -> usize {
        (self.sector_size / self.page_size) as usize
    }

    pub fn sector_words(&self) -> usize {
        (self.sector_size / 4) as usize
    }

    /// Split `[addr, addr + len)` into runs that each stay inside one page.
    ///
    /// Yields `(flash address, range into the source buffer)`. A run ending
    /// exactly on a page end is not split.
    pub fn page_chunks(&self, addr: u32, len: usize) -> Vec<(u32, Range<usize>)> {
        let mut chunks = Vec::new();
        if len == 0 {
            return chunks;
        }
        let end = addr as u64 + len as u64;
        let last_page = self.page_of((end - 1) as u32);
        let mut start = addr;
        while (start as u64) < end {
            let run = if self.page_of(start) != last_page {
                self.page_of(start) + self.page_size - start
            } else {
                (end - start as u64) as u32
            };
            let offset = (start - addr) as usize;
            chunks.push((start, offset..offset + run as usize));
            start = self.page_of(start) + self.page_size;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_and_sector_masks() {
        let geo = FlashGeometry::default();
        assert_eq!(geo.page_of(0x0123_45), 0x0123_00);
        assert_eq!(geo.sector_of(0x01_2345), 0x01_0000);
        assert_eq!(geo.pages_per_sector(), 256);
        assert_eq!(geo.sector_words(), 16384);
        assert_eq!(geo.address_mask(), 0x00ff_ffff);
    }

    #[test]
    fn test_chunk_inside_one_page() {
        let geo = FlashGeometry::default();
        assert_eq!(geo.page_chunks(0x10004, 4), vec![(0x10004, 0..4)]);
    }

    #[test]
    fn test_chunk_ending_on_page_boundary_not_split() {
        let geo = FlashGeometry::default();
        assert_eq!(geo.page_chunks(0x100, 256), vec![(0x100, 0..256)]);
        assert_eq!(geo.page_chunks(0x1f0, 0x10), vec![(0x1f0, 0..0x10)]);
    }

    #[test]
    fn test_chunk_straddling_boundary() {
        let geo = FlashGeometry::default();
        assert_eq!(
            geo.page_chunks(0x1f0, 0x20),
            vec![(0x1f0, 0..0x10), (0x200, 0x10..0x20)]
        );
    }

    #[test]
    fn test_chunks_k_boundaries() {
        let geo = FlashGeometry::default();
        // Starts mid-page and crosses three page boundaries.
        let chunks = geo.page_chunks(0x2080, 3 * 256 + 16);
        assert_eq!(chunks.len(), 4);
        let mut covered = 0;
        for (start, range) in &chunks {
            assert_eq!(range.start, covered);
            assert_eq!(*start as usize, 0x2080 + range.start);
            let last = start + range.len() as u32 - 1;
            assert_eq!(geo.page_of(*start), geo.page_of(last));
            covered = range.end;
        }
        assert_eq!(covered, 3 * 256 + 16);
    }

    #[test]
    fn test_empty_chunk_list() {
        assert!(FlashGeometry::default().page_chunks(0x100, 0).is_empty());
    }

    #[test]
    fn test_geometry_from_config() {
        let config = FlashConfig {
            size: "8MiB".to_string(),
            sector_size: "4KiB".to_string(),
            page_size: 128,
            ..Default::default()
        };
        let geo = FlashGeometry::from_config(&config).unwrap();
        assert_eq!(geo.size, 8 << 20);
        assert_eq!(geo.sector_size, 4096);
        assert_eq!(geo.pages_per_sector(), 32);
    }

    #[test]
    fn test_geometry_rejects_zero_page() {
        let config = FlashConfig {
            page_size: 0,
            ..Default::default()
        };
        let err = FlashGeometry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Page size"), "{err}");
    }

    #[test]
    fn test_geometry_rejects_sector_larger_than_flash() {
        let config = FlashConfig {
            size: "64KiB".to_string(),
            sector_size: "128KiB".to_string(),
            ..Default::default()
        };
        let err = FlashGeometry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Sector size"), "{err}");
        assert!(FlashGeometry::default().validate().is_ok());
    }
}
