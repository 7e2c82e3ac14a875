//! Emulated physical memory shared between the CPU side (DMA regions handed
//! to the driver) and the bus-master engine.

use std::sync::{Arc, Mutex};

use pata_driver::hal::{DmaRegion, DmaAllocator};
use pata_driver::{AtaError, Result};

pub struct PhysMemory {
    data: Mutex<Vec<u8>>,
}

impl PhysMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    pub fn read(&self, paddr: u32, out: &mut [u8]) {
        let data = self.data.lock().unwrap();
        let start = paddr as usize;
        out.copy_from_slice(&data[start..start + out.len()]);
    }

    pub fn write(&self, paddr: u32, bytes: &[u8]) {
        let mut data = self.data.lock().unwrap();
        let start = paddr as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_u32(&self, paddr: u32) -> u32 {
        let mut b = [0u8; 4];
        self.read(paddr, &mut b);
        u32::from_le_bytes(b)
    }

    pub fn read_u16(&self, paddr: u32) -> u16 {
        let mut b = [0u8; 2];
        self.read(paddr, &mut b);
        u16::from_le_bytes(b)
    }
}

/// A carve-out of [`PhysMemory`] exposed to the driver as a DMA region.
pub struct TestDmaRegion {
    mem: Arc<PhysMemory>,
    base: u32,
    len: usize,
}

impl DmaRegion for TestDmaRegion {
    fn phys_addr(&self) -> u32 {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.len, "DMA region read out of bounds");
        self.mem.read(self.base + offset as u32, out);
    }

    fn write(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "DMA region write out of bounds");
        self.mem.write(self.base + offset as u32, data);
    }
}

/// Bump allocator over a fixed window of physical memory. Nothing is ever
/// freed, matching the driver's init-once DMA discipline.
pub struct BumpDmaAllocator {
    mem: Arc<PhysMemory>,
    next: Mutex<u32>,
    limit: u32,
}

impl BumpDmaAllocator {
    pub fn new(mem: Arc<PhysMemory>, base: u32, limit: u32) -> Self {
        Self {
            mem,
            next: Mutex::new(base),
            limit,
        }
    }
}

impl DmaAllocator for BumpDmaAllocator {
    fn alloc(&self, len: usize) -> Result<Box<dyn DmaRegion>> {
        let mut next = self.next.lock().unwrap();
        let base = (*next + 0xF) & !0xF;
        let end = base as usize + len;
        if end > self.limit as usize {
            return Err(AtaError::DmaAllocFailed);
        }
        *next = end as u32;
        Ok(Box::new(TestDmaRegion {
            mem: Arc::clone(&self.mem),
            base,
            len,
        }))
    }
}
