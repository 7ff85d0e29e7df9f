//! The pack: an interleaved, encoded byte stream with a channel count and
//! sample rate attached, sitting at the edge of the pipeline where raw PCM
//! enters or leaves.

use crate::bip::Bip;
use crate::encoding::Encoding;
use crate::error::Result;

/// An interleaved PCM byte ring plus its format metadata.
pub struct Pack {
    ring: Bip<u8>,
    encoding: Encoding,
    channels: u32,
    sample_rate: u32,
}

impl Pack {
    /// Allocates a pack with room for `capacity_frames` frames at the
    /// given encoding/channel count/sample rate.
    pub fn new(capacity_frames: usize, encoding: Encoding, channels: u32, sample_rate: u32) -> Self {
        let frame_size = encoding.sample_size() * channels as usize;
        Pack {
            ring: Bip::new(capacity_frames * frame_size),
            encoding,
            channels,
            sample_rate,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bytes per interleaved frame (`channels · bytes(encoding)`).
    pub fn frame_size(&self) -> usize {
        self.encoding.sample_size() * self.channels as usize
    }

    pub fn clear(&self) {
        self.ring.discard();
    }

    pub fn available_read(&self) -> usize {
        self.ring.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.ring.available_write()
    }

    /// Readable whole frames currently in the ring.
    pub fn available_read_frames(&self) -> usize {
        self.available_read() / self.frame_size()
    }

    /// Writable whole frames currently available in the ring.
    pub fn available_write_frames(&self) -> usize {
        self.available_write() / self.frame_size()
    }

    pub fn request_write(&self, bytes: usize) -> (usize, usize) {
        self.ring.request_write(bytes)
    }

    pub fn finish_write(&self, bytes: usize) -> Result<()> {
        self.ring.finish_write(bytes)
    }

    pub fn request_read(&self, bytes: usize) -> (usize, usize) {
        self.ring.request_read(bytes)
    }

    pub fn finish_read(&self, bytes: usize) {
        self.ring.finish_read(bytes)
    }

    pub fn write_slice(&self, offset: usize, bytes: usize) -> &mut [u8] {
        self.ring.write_slice(offset, bytes)
    }

    pub fn read_slice(&self, offset: usize, bytes: usize) -> &[u8] {
        self.ring.read_slice(offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_accounts_for_channels_and_encoding() {
        let pack = Pack::new(64, Encoding::Int16, 2, 44100);
        assert_eq!(pack.frame_size(), 4);
    }

    #[test]
    fn write_then_read_whole_frames() {
        let pack = Pack::new(4, Encoding::Int16, 2, 44100);
        let (offset, n) = pack.request_write(pack.frame_size());
        assert_eq!(n, pack.frame_size());
        pack.write_slice(offset, n).fill(0xAB);
        pack.finish_write(n).unwrap();
        assert_eq!(pack.available_read_frames(), 1);

        let (offset, n) = pack.request_read(pack.frame_size());
        assert!(pack.read_slice(offset, n).iter().all(|&b| b == 0xAB));
        pack.finish_read(n);
        assert_eq!(pack.available_read_frames(), 0);
    }
}
