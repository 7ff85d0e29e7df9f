//! Conversion between a [`Pack`](crate::pack::Pack) (interleaved, encoded
//! bytes) and a set of per-channel [`Buffer`](crate::buffer::Buffer)s
//! (deinterleaved, normalized floats), in both directions, with per-channel
//! volume ramping so that a gain change never produces an audible click.

use crate::buffer::Buffer;
use crate::encoding::{read_sample, write_sample};
use crate::pack::Pack;

/// Per-channel volume ramp state: a current value that chases a target,
/// stepping only at a zero crossing of the signal it's scaling.
#[derive(Debug, Clone, Copy)]
pub struct VolumeRamp {
    pub current: f32,
    pub target: f32,
}

impl VolumeRamp {
    pub fn new(volume: f32) -> Self {
        VolumeRamp {
            current: volume,
            target: volume,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Advances the ramp one sample given the *previous* raw sample value,
    /// stepping to the target only when the new raw sample crosses zero
    /// relative to the previous one (or on the very first sample, where
    /// there is no previous-sample basis for a crossing).
    #[inline]
    fn step(&mut self, prev_raw: Option<f32>, raw: f32) {
        if self.current != self.target {
            let crossed = match prev_raw {
                None => true,
                Some(p) => (p <= 0.0 && raw >= 0.0) || (p >= 0.0 && raw <= 0.0),
            };
            if crossed {
                self.current = self.target;
            }
        }
    }
}

/// Converts the pack's readable bytes into the buffers' writable floats,
/// one buffer per channel, applying each channel's volume ramp. Returns
/// the number of frames actually transferred, bounded by both the pack's
/// readable frames and the minimum writable samples across all buffers.
pub fn pack_to_buffers(pack: &Pack, buffers: &[&Buffer], ramps: &mut [VolumeRamp]) -> usize {
    let channels = pack.channels() as usize;
    debug_assert_eq!(buffers.len(), channels);
    debug_assert_eq!(ramps.len(), channels);

    let frame_size = pack.frame_size();
    let sample_size = pack.encoding().sample_size();

    let readable_frames = pack.available_read() / frame_size;
    let writable_frames = buffers
        .iter()
        .map(|b| b.available_write())
        .min()
        .unwrap_or(0);
    let frames = readable_frames.min(writable_frames);
    if frames == 0 {
        return 0;
    }

    let bytes_needed = frames * frame_size;
    let (read_offset, granted_bytes) = pack.request_read(bytes_needed);
    let granted_frames = granted_bytes / frame_size;
    if granted_frames == 0 {
        return 0;
    }

    for (c, (buffer, ramp)) in buffers.iter().zip(ramps.iter_mut()).enumerate() {
        let (write_offset, granted_write) = buffer.request_write(granted_frames);
        let n = granted_write.min(granted_frames);
        let out = buffer.write_slice(write_offset, n);
        let mut prev_raw = None;
        for (i, out_sample) in out.iter_mut().enumerate().take(n) {
            let byte_offset = read_offset + i * frame_size + c * sample_size;
            let raw = read_sample(pack.read_slice(byte_offset, sample_size), 0, pack.encoding())
                .unwrap_or(0.0);
            ramp.step(prev_raw, raw);
            prev_raw = Some(raw);
            *out_sample = raw * ramp.current;
        }
        let _ = buffer.finish_write(n);
    }
    pack.finish_read(granted_frames * frame_size);
    granted_frames
}

/// The reverse direction: deinterleaves the buffers' readable floats into
/// the pack's writable bytes, applying each channel's volume ramp.
pub fn buffers_to_pack(buffers: &[&Buffer], pack: &Pack, ramps: &mut [VolumeRamp]) -> usize {
    let channels = pack.channels() as usize;
    debug_assert_eq!(buffers.len(), channels);
    debug_assert_eq!(ramps.len(), channels);

    let frame_size = pack.frame_size();
    let sample_size = pack.encoding().sample_size();

    let readable_frames = buffers
        .iter()
        .map(|b| b.available_read())
        .min()
        .unwrap_or(0);
    let writable_frames = pack.available_write() / frame_size;
    let frames = readable_frames.min(writable_frames);
    if frames == 0 {
        return 0;
    }

    let (write_offset, granted_bytes) = pack.request_write(frames * frame_size);
    let granted_frames = granted_bytes / frame_size;
    if granted_frames == 0 {
        return 0;
    }

    for (c, (buffer, ramp)) in buffers.iter().zip(ramps.iter_mut()).enumerate() {
        let (read_offset, granted_read) = buffer.request_read(granted_frames);
        let n = granted_read.min(granted_frames);
        let input = buffer.read_slice(read_offset, n);
        let mut prev_raw = None;
        for (i, &raw) in input.iter().enumerate().take(n) {
            ramp.step(prev_raw, raw);
            prev_raw = Some(raw);
            let scaled = raw * ramp.current;
            let byte_offset = write_offset + i * frame_size + c * sample_size;
            let _ = write_sample(
                pack.write_slice(byte_offset, sample_size),
                0,
                pack.encoding(),
                scaled,
            );
        }
        buffer.finish_read(n);
    }
    let _ = pack.finish_write(granted_frames * frame_size);
    granted_frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;

    #[test]
    fn round_trips_stereo_through_pack_and_back() {
        let pack = Pack::new(8, Encoding::Int16, 2, 44100);
        let left = Buffer::new(8);
        let right = Buffer::new(8);
        left.write_all(&[0.5, -0.5]).unwrap();
        right.write_all(&[0.25, -0.25]).unwrap();

        let mut write_ramps = [VolumeRamp::new(1.0), VolumeRamp::new(1.0)];
        let frames = buffers_to_pack(&[&left, &right], &pack, &mut write_ramps);
        assert_eq!(frames, 2);

        let out_left = Buffer::new(8);
        let out_right = Buffer::new(8);
        let mut read_ramps = [VolumeRamp::new(1.0), VolumeRamp::new(1.0)];
        let frames = pack_to_buffers(&pack, &[&out_left, &out_right], &mut read_ramps);
        assert_eq!(frames, 2);

        let mut lbuf = [0.0f32; 2];
        let mut rbuf = [0.0f32; 2];
        out_left.read_all(&mut lbuf);
        out_right.read_all(&mut rbuf);
        assert!((lbuf[0] - 0.5).abs() < 0.01);
        assert!((rbuf[0] - 0.25).abs() < 0.01);
    }

    #[test]
    fn volume_ramp_only_steps_at_zero_crossing() {
        let mut ramp = VolumeRamp::new(1.0);
        ramp.set_target(0.0);
        ramp.step(Some(1.0), 0.5);
        assert_eq!(ramp.current, 1.0);
        ramp.step(Some(0.5), -0.1);
        assert_eq!(ramp.current, 0.0);
    }
}
