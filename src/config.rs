//! Crate-wide defaults for ring sizing, FFT framing, and table capacities.
//!
//! These are the sizes a caller gets if it doesn't override them
//! explicitly; none of them are load-bearing for correctness, only for
//! how much slack the pipeline has before `mix` starts reporting "no
//! progress this tick".

/// Default ring capacity, in frames, for a newly constructed pack or
/// buffer when the caller doesn't specify one.
pub const DEFAULT_RING_FRAMES: usize = 4096;

/// Default FFT framesize used by convolution, pitch shift, and the
/// equalizer (must be a power of two).
pub const DEFAULT_FRAMESIZE: usize = 2048;

/// Default oversampling factor for the FFT windowing scaffold.
pub const DEFAULT_OVERSAMPLING: usize = 4;

/// Ceiling on FFT framesize accepted by any component that frames audio.
pub const MAX_FRAMESIZE: usize = 8192;

/// Fixed capacity of the plugin/segment registry's name table.
pub const MAX_REGISTERED_SEGMENTS: usize = 256;

/// Maximum addressable speaker position, matching [`crate::speaker::MAX_SPEAKER_COUNT`].
pub const MAX_SPEAKER_COUNT: usize = crate::speaker::MAX_SPEAKER_COUNT;

/// Compressor block size in samples (`update chunk` in the original
/// design); fixed, not user-configurable.
pub const COMPRESSOR_CHUNK_SIZE: usize = 32;

/// Compressor predelay ring capacity ceiling in samples.
pub const COMPRESSOR_MAX_PREDELAY: usize = 1024;

/// Chunk size used by additive mixers (Basic mixer, Space mixer, Plane
/// mixer) for their on-stack accumulation scratch. Mixing happens in
/// chunks of at most this many frames so the accumulator never needs a
/// heap allocation, matching "no allocation on the audio path."
pub const MIX_CHUNK: usize = 1024;
