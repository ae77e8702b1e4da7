//! Synthetic target process for tests.
//!
//! Builds an address space from explicit regions with backing buffers, then
//! answers queries, reads, writes and protection changes the way a live
//! process would. Unmapped gaps report as free space; regions can be marked
//! to fail reads so scanner error paths are exercisable.

use super::{protect, ProcessMemory, RegionInfo, RegionState, PAGE_SIZE};
use crate::error::{Error, Result};

struct MockRegion {
    base: u64,
    data: Vec<u8>,
    protect: u32,
    state: RegionState,
    fail_reads: bool,
}

pub struct MockProcess {
    min_address: u64,
    max_address: u64,
    regions: Vec<MockRegion>,
}

#[derive(Default)]
pub struct MockProcessBuilder {
    bounds: Option<(u64, u64)>,
    regions: Vec<MockRegion>,
}

impl MockProcessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the application address bounds. Defaults to covering the
    /// declared regions.
    pub fn bounds(mut self, min: u64, max: u64) -> Self {
        self.bounds = Some((min, max));
        self
    }

    /// Add a committed region backed by `data`.
    pub fn region(mut self, base: u64, data: Vec<u8>, protect: u32) -> Self {
        self.regions.push(MockRegion {
            base,
            data,
            protect,
            state: RegionState::Committed,
            fail_reads: false,
        });
        self
    }

    /// Add a reserved (uncommitted) region.
    pub fn reserved(mut self, base: u64, size: u64) -> Self {
        self.regions.push(MockRegion {
            base,
            data: vec![0; size as usize],
            protect: protect::NOACCESS,
            state: RegionState::Reserved,
            fail_reads: false,
        });
        self
    }

    /// Add a committed region that claims to be readable but fails every
    /// read, like a page that vanished between query and read.
    pub fn unreadable_region(mut self, base: u64, size: u64) -> Self {
        self.regions.push(MockRegion {
            base,
            data: vec![0; size as usize],
            protect: protect::READONLY,
            state: RegionState::Committed,
            fail_reads: true,
        });
        self
    }

    pub fn build(mut self) -> MockProcess {
        self.regions.sort_by_key(|r| r.base);
        let (min, max) = self.bounds.unwrap_or_else(|| {
            let min = self.regions.first().map(|r| r.base).unwrap_or(PAGE_SIZE);
            let max = self
                .regions
                .last()
                .map(|r| r.base + r.data.len() as u64)
                .unwrap_or(PAGE_SIZE * 2);
            (min, max)
        });
        MockProcess {
            min_address: min,
            max_address: max,
            regions: self.regions,
        }
    }
}

impl MockProcess {
    fn region_at(&self, address: u64) -> Option<&MockRegion> {
        self.regions
            .iter()
            .find(|r| address >= r.base && address < r.base + r.data.len() as u64)
    }

    fn region_at_mut(&mut self, address: u64) -> Option<&mut MockRegion> {
        self.regions
            .iter_mut()
            .find(|r| address >= r.base && address < r.base + r.data.len() as u64)
    }

    /// Raw view of a region's backing bytes, for post-patch assertions.
    pub fn bytes_at(&self, address: u64, len: usize) -> &[u8] {
        let region = self.region_at(address).expect("address not mapped");
        let offset = (address - region.base) as usize;
        &region.data[offset..offset + len]
    }
}

impl ProcessMemory for MockProcess {
    fn min_address(&self) -> u64 {
        self.min_address
    }

    fn max_address(&self) -> u64 {
        self.max_address
    }

    fn query(&self, address: u64) -> Option<RegionInfo> {
        if let Some(region) = self.region_at(address) {
            return Some(RegionInfo {
                base: region.base,
                size: region.data.len() as u64,
                protect: region.protect,
                state: region.state,
            });
        }

        // Gap between allocations: report free space up to the next region,
        // the way a live query does.
        let next_base = self
            .regions
            .iter()
            .map(|r| r.base)
            .filter(|&b| b > address)
            .min()
            .unwrap_or(self.max_address);
        if address >= self.max_address {
            return None;
        }
        Some(RegionInfo {
            base: address,
            size: next_base - address,
            protect: protect::NOACCESS,
            state: RegionState::Free,
        })
    }

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let region = self
            .region_at(address)
            .ok_or_else(|| Error::region_unreadable(address, "address not mapped"))?;
        if region.fail_reads || region.state != RegionState::Committed {
            return Err(Error::region_unreadable(address, "read failed"));
        }
        let offset = (address - region.base) as usize;
        let available = region.data.len() - offset;
        Ok(region.data[offset..offset + size.min(available)].to_vec())
    }

    fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> Result<usize> {
        let region = self
            .region_at_mut(address)
            .ok_or_else(|| Error::region_unwritable(address, "address not mapped"))?;
        if region.state != RegionState::Committed {
            return Err(Error::region_unwritable(address, "region not committed"));
        }
        if region.protect & (protect::READWRITE | protect::EXECUTE_READWRITE) == 0 {
            return Err(Error::region_unwritable(address, "region not writable"));
        }
        let offset = (address - region.base) as usize;
        let available = region.data.len() - offset;
        let count = bytes.len().min(available);
        region.data[offset..offset + count].copy_from_slice(&bytes[..count]);
        Ok(count)
    }

    fn set_protection(&mut self, address: u64, _size: usize, protect: u32) -> Result<u32> {
        let region = self
            .region_at_mut(address)
            .ok_or_else(|| Error::region_unwritable(address, "address not mapped"))?;
        let old = region.protect;
        region.protect = protect;
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let mut process = MockProcessBuilder::new()
            .region(0x1000, vec![0u8; 64], protect::READWRITE)
            .build();

        assert_eq!(process.write_bytes(0x1010, b"hello").unwrap(), 5);
        assert_eq!(process.read_bytes(0x1010, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_write_respects_protection() {
        let mut process = MockProcessBuilder::new()
            .region(0x1000, vec![0u8; 64], protect::READONLY)
            .build();

        assert!(process.write_bytes(0x1000, b"x").is_err());
        let old = process.set_protection(0x1000, 64, protect::READWRITE).unwrap();
        assert_eq!(old, protect::READONLY);
        assert!(process.write_bytes(0x1000, b"x").is_ok());
    }

    #[test]
    fn test_unreadable_region_fails_reads_only() {
        let process = MockProcessBuilder::new()
            .unreadable_region(0x1000, 0x1000)
            .build();

        let info = process.query(0x1000).unwrap();
        assert!(info.is_scannable());
        assert!(process.read_bytes(0x1000, 16).is_err());
    }
}
