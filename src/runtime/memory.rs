//! WebAssembly linear memory instances
//!
//! Page-granular, bounds-checked byte buffers. All access is validated
//! before touching the underlying data; out-of-bounds access traps.
//! A shared memory carries the same representation with the `shared` flag
//! set; its interior lock mediates the atomic opcode family, which needs
//! read-modify-write steps indivisible across threads.
//!
//! Memory layout follows the WebAssembly specification:
//! - Page size: 64KB (65,536 bytes)
//! - Address space: 32-bit (max 4GB)
//! - Out-of-bounds access: traps

use crate::ast::types::MemoryType;
use crate::runtime::Trap;
use std::sync::RwLock;

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (2^16 = 64K pages = 4GB total)
pub const MAX_PAGES: u32 = 65536;

/// A WebAssembly linear memory instance.
///
/// All mutation goes through the interior lock, so instances are shared
/// freely behind `Arc` between importing modules and threads.
#[derive(Debug)]
pub struct MemoryInstance {
    data: RwLock<Vec<u8>>,
    ty: MemoryType,
    /// Configured hard cap, applied on top of the declared maximum
    page_cap: u32,
}

impl MemoryInstance {
    /// Create a memory from its declared type.
    ///
    /// # Errors
    /// - Initial pages exceed the declared maximum or the configured cap
    pub fn new(ty: MemoryType, page_cap: u32) -> Result<MemoryInstance, Trap> {
        let cap = page_cap.min(MAX_PAGES);
        if ty.limits.min > cap {
            return Err(Trap::MemOutOfMaxLimit);
        }
        if let Some(max) = ty.limits.max {
            if ty.limits.min > max {
                return Err(Trap::MemOutOfMaxLimit);
            }
        }
        let data = vec![0u8; ty.limits.min as usize * PAGE_SIZE];
        Ok(MemoryInstance {
            data: RwLock::new(data),
            ty,
            page_cap: cap,
        })
    }

    pub fn ty(&self) -> MemoryType {
        self.ty
    }

    /// Whether this is a shared (multithreaded) memory.
    pub fn is_shared(&self) -> bool {
        self.ty.limits.shared
    }

    /// Current size in pages.
    pub fn size(&self) -> u32 {
        (self.data.read().unwrap().len() / PAGE_SIZE) as u32
    }

    /// Current size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Grow by `delta` pages, zero-filling the new range.
    ///
    /// Returns the previous size in pages, or `None` when growth would
    /// exceed the declared maximum, the configured cap, or available
    /// memory. On failure nothing changes.
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let mut data = self.data.write().unwrap();
        let current = (data.len() / PAGE_SIZE) as u32;
        let new_pages = current.checked_add(delta)?;
        let effective_max = self.ty.limits.max.unwrap_or(MAX_PAGES).min(self.page_cap);
        if new_pages > effective_max {
            return None;
        }
        let new_bytes = new_pages as usize * PAGE_SIZE;
        let additional = new_bytes - data.len();
        if data.try_reserve(additional).is_err() {
            return None;
        }
        data.resize(new_bytes, 0);
        Some(current)
    }

    /// Check that `addr + size` falls inside the current byte length.
    #[inline]
    fn check_bounds(data: &[u8], addr: u32, size: usize) -> Result<usize, Trap> {
        let addr = addr as usize;
        let end = addr.checked_add(size).ok_or(Trap::OutOfBoundsMemAccess)?;
        if end > data.len() {
            return Err(Trap::OutOfBoundsMemAccess);
        }
        Ok(addr)
    }

    /// Read `N` bytes at `addr`.
    pub fn read_array<const N: usize>(&self, addr: u32) -> Result<[u8; N], Trap> {
        let data = self.data.read().unwrap();
        let addr = Self::check_bounds(&data, addr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&data[addr..addr + N]);
        Ok(out)
    }

    /// Write `N` bytes at `addr`.
    pub fn write_array<const N: usize>(&self, addr: u32, bytes: [u8; N]) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, N)?;
        data[addr..addr + N].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn read_u8(&self, addr: u32) -> Result<u8, Trap> {
        Ok(self.read_array::<1>(addr)?[0])
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16, Trap> {
        Ok(u16::from_le_bytes(self.read_array(addr)?))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, Trap> {
        Ok(u32::from_le_bytes(self.read_array(addr)?))
    }

    pub fn read_u64(&self, addr: u32) -> Result<u64, Trap> {
        Ok(u64::from_le_bytes(self.read_array(addr)?))
    }

    pub fn write_u8(&self, addr: u32, value: u8) -> Result<(), Trap> {
        self.write_array(addr, [value])
    }

    pub fn write_u16(&self, addr: u32, value: u16) -> Result<(), Trap> {
        self.write_array(addr, value.to_le_bytes())
    }

    pub fn write_u32(&self, addr: u32, value: u32) -> Result<(), Trap> {
        self.write_array(addr, value.to_le_bytes())
    }

    pub fn write_u64(&self, addr: u32, value: u64) -> Result<(), Trap> {
        self.write_array(addr, value.to_le_bytes())
    }

    /// Read a byte range as a fresh vector.
    pub fn read_bytes(&self, addr: u32, len: usize) -> Result<Vec<u8>, Trap> {
        let data = self.data.read().unwrap();
        let addr = Self::check_bounds(&data, addr, len)?;
        Ok(data[addr..addr + len].to_vec())
    }

    /// Write a byte slice. The whole range is validated before any byte
    /// is stored.
    pub fn write_bytes(&self, addr: u32, bytes: &[u8]) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, bytes.len())?;
        data[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Fill `len` bytes at `addr` with `value`, validating first.
    pub fn fill(&self, addr: u32, value: u8, len: usize) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, len)?;
        data[addr..addr + len].fill(value);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst` within this memory, handling
    /// overlap. Both ranges are validated before any byte moves.
    pub fn copy_within(&self, dst: u32, src: u32, len: usize) -> Result<(), Trap> {
        let mut data = self.data.write().unwrap();
        let dst = Self::check_bounds(&data, dst, len)?;
        let src = Self::check_bounds(&data, src, len)?;
        data.copy_within(src..src + len, dst);
        Ok(())
    }

    /// Copy between two distinct memories, validating both ranges first.
    pub fn copy_between(dst_mem: &MemoryInstance, dst: u32, src_mem: &MemoryInstance, src: u32, len: usize) -> Result<(), Trap> {
        if std::ptr::eq(dst_mem, src_mem) {
            return dst_mem.copy_within(dst, src, len);
        }
        let bytes = src_mem.read_bytes(src, len)?;
        dst_mem.write_bytes(dst, &bytes)
    }

    /// Atomically apply `f` to the 32-bit cell at `addr`, returning the
    /// old value. The interior write lock makes the read-modify-write
    /// indivisible; with every atomic access taking the same lock this is
    /// sequentially consistent.
    pub fn atomic_rmw_u32(&self, addr: u32, f: impl FnOnce(u32) -> u32) -> Result<u32, Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, 4)?;
        let old = u32::from_le_bytes([data[addr], data[addr + 1], data[addr + 2], data[addr + 3]]);
        data[addr..addr + 4].copy_from_slice(&f(old).to_le_bytes());
        Ok(old)
    }

    /// Atomically apply `f` to the 64-bit cell at `addr`.
    pub fn atomic_rmw_u64(&self, addr: u32, f: impl FnOnce(u64) -> u64) -> Result<u64, Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[addr..addr + 8]);
        let old = u64::from_le_bytes(bytes);
        data[addr..addr + 8].copy_from_slice(&f(old).to_le_bytes());
        Ok(old)
    }

    /// Atomically apply `f` to the 8-bit cell at `addr`.
    pub fn atomic_rmw_u8(&self, addr: u32, f: impl FnOnce(u8) -> u8) -> Result<u8, Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, 1)?;
        let old = data[addr];
        data[addr] = f(old);
        Ok(old)
    }

    /// Atomically apply `f` to the 16-bit cell at `addr`.
    pub fn atomic_rmw_u16(&self, addr: u32, f: impl FnOnce(u16) -> u16) -> Result<u16, Trap> {
        let mut data = self.data.write().unwrap();
        let addr = Self::check_bounds(&data, addr, 2)?;
        let old = u16::from_le_bytes([data[addr], data[addr + 1]]);
        data[addr..addr + 2].copy_from_slice(&f(old).to_le_bytes());
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::types::Limits;

    fn mem(min: u32, max: Option<u32>) -> MemoryInstance {
        MemoryInstance::new(
            MemoryType {
                limits: Limits::new(min, max),
            },
            MAX_PAGES,
        )
        .unwrap()
    }

    #[test]
    fn test_memory_creation() {
        let m = mem(1, None);
        assert_eq!(m.size(), 1);
        assert_eq!(m.byte_len(), PAGE_SIZE);

        let m = mem(1, Some(10));
        assert_eq!(m.ty().limits.max, Some(10));
    }

    #[test]
    fn test_memory_creation_errors() {
        // Initial exceeds max
        assert!(MemoryInstance::new(
            MemoryType {
                limits: Limits::new(10, Some(5)),
            },
            MAX_PAGES,
        )
        .is_err());
        // Initial exceeds configured cap
        assert!(MemoryInstance::new(
            MemoryType {
                limits: Limits::new(10, None),
            },
            5,
        )
        .is_err());
    }

    #[test]
    fn test_memory_grow() {
        let m = mem(1, Some(10));

        assert_eq!(m.grow(2), Some(1)); // Returns previous size
        assert_eq!(m.size(), 3);
        assert_eq!(m.byte_len(), 3 * PAGE_SIZE);

        assert_eq!(m.grow(7), Some(3));
        assert_eq!(m.size(), 10);

        // Beyond max: fails, size unchanged
        assert_eq!(m.grow(1), None);
        assert_eq!(m.size(), 10);
    }

    #[test]
    fn test_memory_grow_overflow() {
        let m = mem(1, None);
        assert_eq!(m.grow(u32::MAX), None);
        assert_eq!(m.size(), 1);
    }

    #[test]
    fn test_grow_respects_configured_cap() {
        let m = MemoryInstance::new(
            MemoryType {
                limits: Limits::new(1, None),
            },
            2,
        )
        .unwrap();
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.grow(1), None);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let m = mem(1, None);

        m.write_u32(100, 0x12345678).unwrap();
        assert_eq!(m.read_u32(100).unwrap(), 0x12345678);

        // Little-endian layout
        assert_eq!(m.read_u8(100).unwrap(), 0x78);
        assert_eq!(m.read_u8(103).unwrap(), 0x12);

        m.write_u64(200, 0x123456789ABCDEF0).unwrap();
        assert_eq!(m.read_u64(200).unwrap(), 0x123456789ABCDEF0);
    }

    #[test]
    fn test_bounds_checking() {
        let m = mem(1, None);
        let last = PAGE_SIZE as u32 - 1;

        assert!(m.read_u8(last).is_ok());
        assert!(m.read_u8(last + 1).is_err());
        assert!(m.read_u32(last - 3).is_ok());
        assert!(m.read_u32(last - 2).is_err());
        assert!(m.write_u64(last - 7, 0).is_ok());
        assert!(m.write_u64(last - 6, 0).is_err());
        // Overflowing address computation
        assert!(m.read_u32(u32::MAX).is_err());
    }

    #[test]
    fn test_zero_initialisation_on_grow() {
        let m = mem(1, None);
        m.write_u32(0, 0xDEADBEEF).unwrap();
        m.grow(1).unwrap();
        assert_eq!(m.read_u32(0).unwrap(), 0xDEADBEEF);
        assert_eq!(m.read_u32(PAGE_SIZE as u32).unwrap(), 0);
    }

    #[test]
    fn test_fill_and_copy() {
        let m = mem(1, None);
        m.fill(10, 0xAB, 4).unwrap();
        assert_eq!(m.read_u32(10).unwrap(), 0xABABABAB);

        m.copy_within(100, 10, 4).unwrap();
        assert_eq!(m.read_u32(100).unwrap(), 0xABABABAB);

        // Overlapping copy
        m.write_u32(0, 0x01020304).unwrap();
        m.copy_within(2, 0, 4).unwrap();
        assert_eq!(m.read_u16(2).unwrap(), 0x0304);

        // Failed fill writes nothing
        assert!(m.fill(PAGE_SIZE as u32 - 2, 0xFF, 4).is_err());
        assert_eq!(m.read_u16(PAGE_SIZE as u32 - 2).unwrap(), 0);
    }

    #[test]
    fn test_atomic_rmw() {
        let m = mem(1, None);
        m.write_u32(0, 40).unwrap();
        let old = m.atomic_rmw_u32(0, |v| v + 2).unwrap();
        assert_eq!(old, 40);
        assert_eq!(m.read_u32(0).unwrap(), 42);

        m.write_u64(8, u64::MAX).unwrap();
        let old = m.atomic_rmw_u64(8, |v| v.wrapping_add(1)).unwrap();
        assert_eq!(old, u64::MAX);
        assert_eq!(m.read_u64(8).unwrap(), 0);
    }
}
