//! Error taxonomy shared by every fallible operation in the crate.
//!
//! The system this engine is modeled on reports failures through a
//! thread-local "last error" slot so that a uniform C-style vtable can stay
//! uniform. Rust lets every fallible entry point return a `Result` directly,
//! so that is what this crate does; the externally observable set of error
//! kinds is preserved unchanged.

use thiserror::Error;

/// The complete error taxonomy produced by the engine core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,
    #[error("unknown sample encoding")]
    UnknownEncoding,
    #[error("unknown channel layout")]
    UnknownLayout,
    #[error("mixing failed")]
    MixingFailed,
    #[error("operation not implemented by this processor")]
    NotImplemented,
    #[error("processor not initialized")]
    NotInitialized,
    #[error("invalid port location")]
    InvalidLocation,
    #[error("invalid or unsupported field")]
    InvalidField,
    #[error("invalid value for field")]
    InvalidValue,
    #[error("a required buffer is not bound")]
    BufferMissing,
    #[error("buffer is already allocated and cannot be aliased")]
    BufferAllocated,
    #[error("write exceeded the buffer's reservation")]
    BufferOvercommit,
    #[error("buffer is empty")]
    BufferEmpty,
    #[error("processor is already started")]
    AlreadyStarted,
    #[error("processor has already ended")]
    AlreadyEnded,
    #[error("resample factor out of supported range")]
    BadResampleFactor,
    #[error("resampling failed")]
    ResampleFailed,
    #[error("no such registered segment")]
    BadSegment,
    #[error("a segment with that name is already registered")]
    DuplicateSegment,
    #[error("segment name is invalid")]
    BadName,
    #[error("wrong number of construction arguments")]
    BadArgumentCount,
    #[error("dynamic library could not be used")]
    BadDynamicLibrary,
    #[error("LADSPA library failed to open")]
    LadspaOpenFailed,
    #[error("LADSPA library is malformed")]
    LadspaBadLibrary,
    #[error("no LADSPA plugin at the given index")]
    LadspaNoPluginAtIndex,
    #[error("LADSPA plugin instantiation failed")]
    LadspaInstantiationFailed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
