use std::collections::HashMap;

/// The simulator's real (concrete) memory.
pub trait Bus {
    fn load_byte(&mut self, addr: u32) -> u8;
    fn store_byte(&mut self, addr: u32, value: u8);

    /// Little-endian load of `bits` (a multiple of 8, at most 32).
    fn load(&mut self, addr: u32, bits: u8) -> u32 {
        debug_assert!(bits % 8 == 0 && bits <= 32, "load width must be 8..=32 in bytes");
        let bytes = (bits / 8).max(1) as u32;
        let mut value = 0u32;
        for i in 0..bytes {
            let byte = self.load_byte(addr.wrapping_add(i));
            value |= (byte as u32) << (i * 8);
        }
        value
    }

    fn store(&mut self, addr: u32, bits: u8, value: u32) {
        debug_assert!(bits % 8 == 0 && bits <= 32, "store width must be 8..=32 in bytes");
        let bytes = (bits / 8).max(1) as u32;
        for i in 0..bytes {
            let byte = ((value >> (i * 8)) & 0xFF) as u8;
            self.store_byte(addr.wrapping_add(i), byte);
        }
    }
}

/// Sparse flat address space; unwritten bytes read as zero.
#[derive(Debug, Default, Clone)]
pub struct MemoryBus {
    mem: HashMap<u32, u8>,
}

impl MemoryBus {
    pub fn preload(&mut self, pairs: impl IntoIterator<Item = (u32, u8)>) {
        for (addr, value) in pairs {
            self.mem.insert(addr, value);
        }
    }

    /// Sorted by address.
    pub fn dump(&self) -> Vec<(u32, u8)> {
        let mut out: Vec<_> = self.mem.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_unstable();
        out
    }
}

impl Bus for MemoryBus {
    fn load_byte(&mut self, addr: u32) -> u8 {
        *self.mem.get(&addr).unwrap_or(&0)
    }

    fn store_byte(&mut self, addr: u32, value: u8) {
        self.mem.insert(addr, value);
    }
}
