//! Real-time audio mixing and effects engine core.
//!
//! The pipeline runs on three layers: a lock-free [`bip`] ring at the very
//! bottom, [`pack`]/[`buffer`] wrapping it with format and float-stream
//! semantics, and a uniform [`processor`] graph built out of [`container`]s,
//! [`distribute`], and the concrete DSP stages (mixing, filtering,
//! spatialization, and so on) above that.

pub mod bip;
pub mod biquad;
pub mod buffer;
pub mod compressor;
pub mod config;
pub mod container;
pub mod convolution;
pub mod delay;
pub mod distribute;
pub mod encoding;
pub mod equalizer;
pub mod error;
pub mod fft_window;
pub mod field;
pub mod generator;
pub mod mixer;
pub mod mixsource;
pub mod pack;
pub mod packer;
pub mod pitch;
pub mod plane;
pub mod ports;
pub mod processor;
pub mod registry;
pub mod resampler;
pub mod space;
pub mod speaker;
pub mod speed;
pub mod transfer;
pub mod vbap;
pub mod volume;
