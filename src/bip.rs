//! The lock-free single-producer/single-consumer ring ("bip buffer") that
//! underlies both [`crate::pack::Pack`] (element type `u8`) and
//! [`crate::buffer::Buffer`] (element type `f32`).
//!
//! A bip buffer differs from a plain ring in that it hands its writer and
//! reader *contiguous* regions to work with, even across the wrap point,
//! by packing a "second region active" flag into the high bit of the write
//! cursor. Only the writer ever sets that flag; only the reader ever clears
//! it, so there is no ABA hazard between the two sides.
//!
//! All cursor traffic uses `SeqCst` ordering: getting the memory model
//! wrong here corrupts audio instead of merely tearing a parameter read.
//!
//! The ring is generic over its element type so that the pack's byte ring
//! and the buffer's float ring share one implementation of the cursor
//! arithmetic instead of reinterpreting a byte slice as `f32` (which would
//! need an alignment guarantee `Vec<u8>` doesn't give).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Error;

const SECOND_REGION_FLAG: u32 = 1 << 31;
const CURSOR_MASK: u32 = !SECOND_REGION_FLAG;

/// Backing storage for a [`Bip`]: either owned, or borrowed from another
/// ring's storage (a *virtual* buffer, see [`crate::distribute::Distribute`]).
enum Storage<T> {
    Owned(Vec<T>),
    Virtual(Arc<Vec<T>>),
}

impl<T> Storage<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Storage::Owned(v) => v,
            Storage::Virtual(v) => v,
        }
    }
}

/// A fixed-capacity lock-free SPSC ring over elements of type `T`.
pub struct Bip<T> {
    data: Storage<T>,
    capacity: u32,
    read: AtomicU32,
    write: AtomicU32,
    reserved: AtomicU32,
    virtual_ring: bool,
}

impl<T: Copy + Default> Bip<T> {
    /// Allocates a new ring with the given element capacity.
    pub fn new(capacity: usize) -> Self {
        Bip {
            data: Storage::Owned(vec![T::default(); capacity]),
            capacity: capacity as u32,
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
            reserved: AtomicU32::new(0),
            virtual_ring: false,
        }
    }

    /// Whether this ring's storage is borrowed from another ring (see
    /// [`crate::distribute::Distribute`]). Virtual rings must not be
    /// resized or independently freed.
    pub fn is_virtual(&self) -> bool {
        self.virtual_ring
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    fn read_cursor(&self) -> u32 {
        self.read.load(Ordering::SeqCst)
    }

    #[inline]
    fn write_state(&self) -> (u32, bool) {
        let raw = self.write.load(Ordering::SeqCst);
        (raw & CURSOR_MASK, raw & SECOND_REGION_FLAG != 0)
    }

    /// Total readable elements across both regions, `[R, C) ∪ [0, W)` when
    /// wrapped. This is the introspection query used by callers such as
    /// [`crate::distribute::Distribute`] to compare consumer progress; a
    /// single [`Bip::request_read`] may still only grant a contiguous
    /// prefix of this total.
    pub fn available_read(&self) -> usize {
        let r = self.read_cursor();
        let (w, second) = self.write_state();
        if second {
            (self.capacity - r + w) as usize
        } else {
            (w - r) as usize
        }
    }

    /// Total writable elements: capacity minus what is currently live and
    /// reserved. Kept consistent with [`Bip::available_read`] by
    /// construction so that `available_read + available_write == capacity -
    /// reserved` always holds.
    pub fn available_write(&self) -> usize {
        let reserved = self.reserved.load(Ordering::SeqCst) as usize;
        self.capacity as usize - self.available_read() - reserved
    }

    /// Requests up to `size` contiguous writable elements. Returns the
    /// offset and the number actually reserved, which may be less than
    /// requested (or zero, meaning "no progress possible this tick").
    pub fn request_write(&self, size: usize) -> (usize, usize) {
        let r = self.read_cursor();
        let (w, second) = self.write_state();
        let (offset, available) = if second {
            (w, r.saturating_sub(w))
        } else {
            let tail = self.capacity - w;
            if tail == 0 {
                // Wrap: the writable region resets to [0, r) and the flag is set.
                self.write.store(SECOND_REGION_FLAG, Ordering::SeqCst);
                (0, r)
            } else {
                (w, tail)
            }
        };
        let granted = (size as u32).min(available);
        self.reserved.store(granted, Ordering::SeqCst);
        (offset as usize, granted as usize)
    }

    /// Advances the write cursor by exactly `size` elements, which must not
    /// exceed the last reservation.
    pub fn finish_write(&self, size: usize) -> Result<(), Error> {
        let reserved = self.reserved.load(Ordering::SeqCst);
        if size as u32 > reserved {
            return Err(Error::BufferOvercommit);
        }
        loop {
            let raw = self.write.load(Ordering::SeqCst);
            let second = raw & SECOND_REGION_FLAG;
            let cur = raw & CURSOR_MASK;
            let next = (cur + size as u32) | second;
            if self
                .write
                .compare_exchange(raw, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        self.reserved.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Requests up to `size` contiguous readable elements. Returns the
    /// offset and the number actually available.
    pub fn request_read(&self, size: usize) -> (usize, usize) {
        let r = self.read_cursor();
        let (w, second) = self.write_state();
        let available = if second { self.capacity - r } else { w - r };
        let granted = (size as u32).min(available);
        (r as usize, granted as usize)
    }

    /// Advances the read cursor by exactly `size` elements. If this
    /// exhausts the upper region (reader reaches capacity while the
    /// second-region flag is set), the reader resets its own cursor to
    /// zero and clears the flag.
    pub fn finish_read(&self, size: usize) {
        let new_r = self.read_cursor() + size as u32;
        if new_r == self.capacity {
            // Might be exhausting the upper region; try to clear the flag.
            // The writer may be concurrently advancing the cursor bits of
            // this same atomic (inside its own finish_write) while leaving
            // the flag set, so a single compare_exchange can lose the race;
            // reload and retry until either the CAS succeeds or we observe
            // the flag already clear. A single lost attempt would otherwise
            // leave the flag set while read is forced to 0, overcounting
            // available_read by a full capacity's worth.
            loop {
                let raw = self.write.load(Ordering::SeqCst);
                if raw & SECOND_REGION_FLAG == 0 {
                    break;
                }
                if self
                    .write
                    .compare_exchange(raw, raw & CURSOR_MASK, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    self.read.store(0, Ordering::SeqCst);
                    return;
                }
            }
        }
        self.read.store(new_r, Ordering::SeqCst);
    }

    /// Resets both cursors to empty. Only safe when both producer and
    /// consumer are quiesced (see the crate's concurrency model notes).
    pub fn discard(&self) {
        self.read.store(0, Ordering::SeqCst);
        self.write.store(0, Ordering::SeqCst);
        self.reserved.store(0, Ordering::SeqCst);
    }

    /// Raw element access for the writer, given an offset/size pair
    /// returned by [`Bip::request_write`].
    #[allow(clippy::mut_from_ref)]
    pub fn write_slice(&self, offset: usize, size: usize) -> &mut [T] {
        // SAFETY: the bip discipline guarantees the writer is the sole
        // accessor of [offset, offset+size) between request_write and
        // finish_write, and that range never overlaps the reader's
        // currently-granted region. Virtual (aliased) rings never expose
        // write_slice through their owner (see Buffer::as_virtual), so the
        // aliasing here is always exclusive in practice.
        unsafe {
            let ptr = self.data.as_slice().as_ptr().add(offset) as *mut T;
            std::slice::from_raw_parts_mut(ptr, size)
        }
    }

    /// Raw element access for the reader, given an offset/size pair
    /// returned by [`Bip::request_read`].
    pub fn read_slice(&self, offset: usize, size: usize) -> &[T] {
        &self.data.as_slice()[offset..offset + size]
    }

    /// Allocates a new ring whose storage is already behind an `Arc`, so
    /// that it can later be [`Bip::alias`]ed by a [`crate::distribute::Distribute`]
    /// processor without ever needing `&mut self` to do so (which would
    /// require `unsafe` given callers only ever hold an `Arc<Buffer>`).
    /// Ordinary (non-distributed) buffers use [`Bip::new`] instead; there
    /// is no behavioral difference apart from aliasability.
    pub fn new_shareable(capacity: usize) -> Self {
        Bip {
            data: Storage::Virtual(Arc::new(vec![T::default(); capacity])),
            capacity: capacity as u32,
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
            reserved: AtomicU32::new(0),
            virtual_ring: false,
        }
    }

    /// Re-publishes a cursor snapshot from another ring into this one.
    /// Used by [`crate::distribute::Distribute`] on every mix to keep
    /// virtual outputs in sync with the input ring.
    pub(crate) fn republish_cursors(&self, read: u32, write: u32) {
        self.read.store(read, Ordering::SeqCst);
        self.write.store(write, Ordering::SeqCst);
    }

    /// Raw cursor snapshot, used by [`crate::distribute::Distribute`] to
    /// read the input ring's current position without going through
    /// request/finish bookkeeping.
    pub(crate) fn raw_cursors(&self) -> (u32, u32) {
        (self.read.load(Ordering::SeqCst), self.write.load(Ordering::SeqCst))
    }

    /// Builds a new ring that aliases this ring's storage at the given
    /// cursor snapshot. Only possible when this ring was itself built
    /// [`Bip::new_shareable`] (or is already an alias of one); an ordinary
    /// owned ring cannot be aliased after the fact since doing so would
    /// require mutating storage out from under a live `Arc<Buffer>`.
    pub(crate) fn alias(&self, read: u32, write: u32) -> Result<Bip<T>, Error> {
        match &self.data {
            Storage::Virtual(arc) => Ok(Bip {
                data: Storage::Virtual(Arc::clone(arc)),
                capacity: self.capacity,
                read: AtomicU32::new(read),
                write: AtomicU32::new(write),
                reserved: AtomicU32::new(0),
                virtual_ring: true,
            }),
            Storage::Owned(_) => Err(Error::BufferAllocated),
        }
    }
}

// SAFETY: `Bip` is designed for exactly one producer thread and one
// consumer thread operating concurrently; the cursor protocol in this
// module is what makes that safe, not interior mutability via a lock.
unsafe impl<T> Sync for Bip<T> {}
unsafe impl<T> Send for Bip<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    /// A caller wanting to move `total` elements through the ring loops
    /// over request/finish until satisfied, since a single request only
    /// ever grants one contiguous region (possibly less than asked for).
    fn write_n(bip: &Bip<u8>, mut total: usize) {
        while total > 0 {
            let (_, n) = bip.request_write(total);
            assert!(n > 0, "writer made no progress with {total} elements left");
            bip.finish_write(n).unwrap();
            total -= n;
        }
    }

    fn read_n(bip: &Bip<u8>, mut total: usize) {
        while total > 0 {
            let (_, n) = bip.request_read(total);
            assert!(n > 0, "reader made no progress with {total} elements left");
            bip.finish_read(n);
            total -= n;
        }
    }

    #[test]
    fn wrap_scenario_matches_spec() {
        let bip: Bip<u8> = Bip::new(1024);
        write_n(&bip, 512);
        read_n(&bip, 512);
        write_n(&bip, 700);
        read_n(&bip, 700);

        assert_eq!(bip.available_read(), 0);
        assert_eq!(bip.available_write(), 1024);
    }

    #[test]
    fn available_read_plus_write_bounds_capacity() {
        let bip: Bip<u8> = Bip::new(256);
        let (_, n) = bip.request_write(100);
        bip.finish_write(n).unwrap();
        assert!(bip.available_read() + bip.available_write() <= bip.capacity());
    }

    #[test]
    fn zero_request_signals_no_progress() {
        let bip: Bip<u8> = Bip::new(16);
        let (_, n) = bip.request_write(16);
        bip.finish_write(n).unwrap();
        // Ring is full: writer should see zero available (no wrap possible
        // yet since nothing has been read).
        let (_, n2) = bip.request_write(1);
        assert_eq!(n2, 0);
    }

    #[test]
    fn overcommit_is_rejected() {
        let bip: Bip<u8> = Bip::new(16);
        let (_, n) = bip.request_write(8);
        assert_eq!(n, 8);
        assert_eq!(bip.finish_write(9), Err(Error::BufferOvercommit));
    }

    #[test]
    fn discard_resets_to_empty() {
        let bip: Bip<u8> = Bip::new(64);
        let (_, n) = bip.request_write(32);
        bip.finish_write(n).unwrap();
        bip.discard();
        assert_eq!(bip.available_read(), 0);
        assert_eq!(bip.available_write(), 64);
    }

    #[test]
    fn float_ring_round_trips_samples() {
        let bip: Bip<f32> = Bip::new(8);
        let (off, n) = bip.request_write(4);
        assert_eq!(n, 4);
        bip.write_slice(off, n).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        bip.finish_write(n).unwrap();

        let (off, n) = bip.request_read(4);
        assert_eq!(bip.read_slice(off, n), &[1.0, 2.0, 3.0, 4.0]);
        bip.finish_read(n);
    }
}
