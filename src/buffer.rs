//! The float buffer: a mono stream of normalized `f32` samples flowing
//! between processors.
//!
//! A buffer wraps a [`Bip<f32>`]. It may also be *virtual*: a
//! [`crate::distribute::Distribute`] processor stamps its outputs with
//! storage borrowed from its single input so that fan-out to many
//! consumers costs no copies. A virtual buffer must never be resized or
//! freed independently of the buffer it aliases.

use crate::bip::Bip;
use crate::error::{Error, Result};

/// A mono stream of `f32` samples.
pub struct Buffer {
    ring: Bip<f32>,
}

impl Buffer {
    /// Allocates a new buffer with room for `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Buffer {
            ring: Bip::new(capacity),
        }
    }

    /// Allocates a new buffer whose storage can later be [`Buffer::alias`]ed
    /// by a [`crate::distribute::Distribute`] processor. Use this instead
    /// of [`Buffer::new`] for any buffer that will be fed into a
    /// Distribute as its single input.
    pub fn new_shareable(capacity: usize) -> Self {
        Buffer {
            ring: Bip::new_shareable(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn is_virtual(&self) -> bool {
        self.ring.is_virtual()
    }

    /// Resets the buffer to empty. Called by a processor's `start`.
    pub fn clear(&self) {
        self.ring.discard();
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }

    /// Requests up to `count` contiguous writable samples.
    pub fn request_write(&self, count: usize) -> (usize, usize) {
        self.ring.request_write(count)
    }

    pub fn finish_write(&self, count: usize) -> Result<()> {
        self.ring.finish_write(count)
    }

    /// Requests up to `count` contiguous readable samples.
    pub fn request_read(&self, count: usize) -> (usize, usize) {
        self.ring.request_read(count)
    }

    pub fn finish_read(&self, count: usize) {
        self.ring.finish_read(count)
    }

    /// Raw sample access for the writer, given an offset/size pair from
    /// [`Buffer::request_write`].
    pub fn write_slice(&self, offset: usize, count: usize) -> &mut [f32] {
        self.ring.write_slice(offset, count)
    }

    /// Raw sample access for the reader, given an offset/size pair from
    /// [`Buffer::request_read`].
    pub fn read_slice(&self, offset: usize, count: usize) -> &[f32] {
        self.ring.read_slice(offset, count)
    }

    /// Writes `samples` into the buffer in one shot, looping over
    /// request/finish as needed. Used by tests and by the packer/unpacker
    /// fast paths; fails only if the ring can never accept the data.
    pub fn write_all(&self, mut samples: &[f32]) -> Result<()> {
        while !samples.is_empty() {
            let (offset, n) = self.request_write(samples.len());
            if n == 0 {
                return Err(Error::BufferOvercommit);
            }
            self.write_slice(offset, n).copy_from_slice(&samples[..n]);
            self.finish_write(n)?;
            samples = &samples[n..];
        }
        Ok(())
    }

    /// Reads exactly `out.len()` samples into `out`, looping over
    /// request/finish as needed. Returns the number of samples actually
    /// copied, which is less than `out.len()` if the buffer runs dry.
    pub fn read_all(&self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            let (offset, n) = self.request_read(out.len() - filled);
            if n == 0 {
                break;
            }
            out[filled..filled + n].copy_from_slice(self.read_slice(offset, n));
            self.finish_read(n);
            filled += n;
        }
        filled
    }

    /// Returns a fresh virtual buffer reading/writing this buffer's
    /// storage at the given cursor snapshot. Used by
    /// [`crate::distribute::Distribute`] at start. Fails with
    /// `BufferAllocated` unless this buffer was built with
    /// [`Buffer::new_shareable`].
    pub(crate) fn alias(&self, read: u32, write: u32) -> Result<Buffer> {
        Ok(Buffer {
            ring: self.ring.alias(read, write)?,
        })
    }

    pub(crate) fn republish_cursors(&self, read: u32, write: u32) {
        self.ring.republish_cursors(read, write);
    }

    pub(crate) fn raw_cursors(&self) -> (u32, u32) {
        self.ring.raw_cursors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_all_then_read_all_round_trips() {
        let buf = Buffer::new(16);
        buf.write_all(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut out = [0.0f32; 4];
        assert_eq!(buf.read_all(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn read_all_stops_when_buffer_runs_dry() {
        let buf = Buffer::new(16);
        buf.write_all(&[1.0, 2.0]).unwrap();
        let mut out = [0.0f32; 4];
        assert_eq!(buf.read_all(&mut out), 2);
    }

    #[test]
    fn alias_shares_storage_with_original() {
        let buf = Buffer::new_shareable(8);
        buf.write_all(&[5.0, 6.0]).unwrap();
        let (r, w) = buf.raw_cursors();
        let alias = buf.alias(r, w).unwrap();
        assert!(alias.is_virtual());
        let mut out = [0.0f32; 2];
        assert_eq!(alias.read_all(&mut out), 2);
        assert_eq!(out, [5.0, 6.0]);
    }

    #[test]
    fn alias_of_non_shareable_buffer_fails() {
        let buf = Buffer::new(8);
        assert_eq!(buf.alias(0, 0).unwrap_err(), Error::BufferAllocated);
    }
}
