//! Circular byte storage for the ring buffer
//!
//! Positions are addressed by `sequence & mask`, so capacity must be a power
//! of two. Storage is either a plain heap slice or an anonymous memory map
//! (useful for multi-megabyte rings that should not sit on the allocator).
//!
//! The storage itself does no synchronization. The ring buffer guarantees that
//! the producer and the consumer never touch the same position concurrently.

use std::cell::UnsafeCell;
use std::io;
use std::ptr;

use memmap2::MmapMut;

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Heap,
    Mmap,
}

enum Region {
    Heap(Box<[UnsafeCell<u8>]>),
    // Pointer taken once at map time; the map outlives it.
    Mmap { _map: MmapMut, base: *mut u8 },
}

pub(crate) struct RingStorage {
    region: Region,
    mask: u64,
}

// SAFETY: RingStorage hanya diakses lewat pointer mentah, dan ring buffer
// menjamin producer dan consumer tidak pernah menyentuh posisi yang sama.
unsafe impl Send for RingStorage {}
unsafe impl Sync for RingStorage {}

impl RingStorage {
    /// Allocate zeroed storage. `capacity` must already be a validated power of two.
    pub(crate) fn allocate(capacity: usize, backing: Backing) -> io::Result<Self> {
        debug_assert!(capacity.is_power_of_two());

        let region = match backing {
            Backing::Heap => Region::Heap((0..capacity).map(|_| UnsafeCell::new(0)).collect()),
            Backing::Mmap => {
                let mut map = MmapMut::map_anon(capacity)?;
                let base = map.as_mut_ptr();
                Region::Mmap { _map: map, base }
            }
        };

        Ok(Self {
            region,
            mask: capacity as u64 - 1,
        })
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    #[inline(always)]
    fn base(&self) -> *mut u8 {
        match &self.region {
            Region::Heap(cells) => UnsafeCell::raw_get(cells.as_ptr()),
            Region::Mmap { base, .. } => *base,
        }
    }

    /// Copy `src` into the positions starting at sequence `seq`, wrapping once
    /// if needed.
    ///
    /// # Safety
    /// The caller must own positions `seq..seq + src.len()` and
    /// `src.len() <= capacity`.
    #[inline(always)]
    pub(crate) unsafe fn store(&self, seq: u64, src: &[u8]) {
        let offset = (seq & self.mask) as usize;
        let first = (self.capacity() - offset).min(src.len());
        let base = self.base();

        ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), first);
        if first < src.len() {
            ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
        }
    }

    /// Copy the positions starting at sequence `seq` into `dst`.
    ///
    /// # Safety
    /// The caller must own positions `seq..seq + dst.len()` and
    /// `dst.len() <= capacity`.
    #[inline(always)]
    pub(crate) unsafe fn load(&self, seq: u64, dst: &mut [u8]) {
        let offset = (seq & self.mask) as usize;
        let first = (self.capacity() - offset).min(dst.len());
        let base = self.base();

        ptr::copy_nonoverlapping(base.add(offset), dst.as_mut_ptr(), first);
        if first < dst.len() {
            ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    /// Raw image of the storage, in position order. Test-only: racing a writer
    /// makes this a data race.
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.capacity()];
        unsafe { ptr::copy_nonoverlapping(self.base(), out.as_mut_ptr(), out.len()) };
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_wraps() {
        let storage = RingStorage::allocate(8, Backing::Heap).unwrap();

        unsafe {
            storage.store(6, b"abcd");
        }
        assert_eq!(&storage.snapshot(), b"cd\0\0\0\0ab");

        let mut out = [0u8; 4];
        unsafe { storage.load(6, &mut out) };
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_mmap_backing_matches_heap() {
        let heap = RingStorage::allocate(16, Backing::Heap).unwrap();
        let mmap = RingStorage::allocate(16, Backing::Mmap).unwrap();

        for (seq, chunk) in [(1u64, &b"Hello, "[..]), (8, &b"streamed"[..]), (16, &b"wrap"[..])] {
            unsafe {
                heap.store(seq, chunk);
                mmap.store(seq, chunk);
            }
        }
        assert_eq!(heap.snapshot(), mmap.snapshot());
        assert_eq!(mmap.capacity(), 16);
    }
}
