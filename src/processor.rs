//! The uniform processor contract every mixing stage implements.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use std::sync::Arc;

/// A processor's lifecycle state. Wiring (`set_in`/`set_out`) is only
/// permitted while `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
}

bitflags::bitflags! {
    /// Capability flags a processor reports via [`Processor::info`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Processor can operate with input and output bound to the same buffer.
        const INPLACE = 0b01;
        /// Processor overwrites its input buffer's contents as a side effect.
        const MODIFIES_INPUT = 0b10;
    }
}

/// Static metadata returned by [`Processor::info`].
#[derive(Debug, Clone)]
pub struct Info {
    pub name: &'static str,
    pub description: &'static str,
    pub capabilities: Capabilities,
    pub min_inputs: u32,
    pub max_inputs: u32,
    pub outputs: u32,
    pub fields: &'static [Field],
}

/// The contract every mixing stage implements: port wiring, parameter
/// access, and the start/mix/end lifecycle.
///
/// `mix` must never block and never allocate; if an input is empty it
/// produces zero output frames and returns `Ok(())`, matching the "ring
/// underflow is not an error" recovery policy.
pub trait Processor {
    fn info(&self) -> Info;

    fn state(&self) -> State;

    /// Binds an output-side buffer to `port`. Fails with `InvalidLocation`
    /// for a port index beyond the processor's output count, and
    /// `AlreadyStarted` if called while running.
    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()>;

    /// Binds an input-side buffer to `port`, with the same failure modes
    /// as [`Processor::set_in`].
    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()>;

    fn set(&mut self, field: Field, value: Value) -> Result<()>;

    fn get(&self, field: Field) -> Result<Value>;

    /// Called once before a run of `mix` calls. Fails with `BufferMissing`
    /// if a required port is unbound, and `AlreadyStarted` if already
    /// running.
    fn start(&mut self) -> Result<()>;

    /// Advances the pipeline by reading from inputs and writing to
    /// outputs. Never blocks, never allocates.
    fn mix(&mut self) -> Result<()>;

    /// Mirrors `start`; releases per-run state and returns to `Idle`.
    /// Fails with `AlreadyEnded` if already idle.
    fn end(&mut self) -> Result<()>;

    /// Returns the buffer currently bound to input `port`, if any.
    /// Containers (see [`crate::container::Chain`]) use this to reach
    /// into a member's wiring for bypass transfers without a get/set
    /// round trip. Unsupported by default.
    fn input_buffer(&self, _port: u32) -> Option<Arc<Buffer>> {
        None
    }

    /// Returns the buffer currently bound to output `port`, if any.
    fn output_buffer(&self, _port: u32) -> Option<Arc<Buffer>> {
        None
    }
}

/// Copies as many samples as both sides allow from `src` into `dst`.
/// Shared by every processor's bypass path and by [`crate::container::Chain`]'s
/// bypass transfer, which skip straight from a head's input to a tail's
/// output one channel at a time.
pub fn transfer_samples(src: &Buffer, dst: &Buffer) -> usize {
    let n = src.available_read().min(dst.available_write());
    if n == 0 {
        return 0;
    }
    let (ro, rn) = src.request_read(n);
    let (wo, wn) = dst.request_write(rn);
    let wn = wn.min(rn);
    dst.write_slice(wo, wn).copy_from_slice(&src.read_slice(ro, wn));
    let _ = dst.finish_write(wn);
    src.finish_read(wn);
    wn
}

/// Shared guard used by `start`/`end` implementations: fails fast on a
/// redundant transition, otherwise flips `state` and returns `Ok`.
pub(crate) fn transition_start(state: &mut State) -> Result<()> {
    if *state == State::Running {
        return Err(Error::AlreadyStarted);
    }
    *state = State::Running;
    Ok(())
}

pub(crate) fn transition_end(state: &mut State) -> Result<()> {
    if *state == State::Idle {
        return Err(Error::AlreadyEnded);
    }
    *state = State::Idle;
    Ok(())
}

pub(crate) fn require_idle(state: State) -> Result<()> {
    if state == State::Running {
        return Err(Error::AlreadyStarted);
    }
    Ok(())
}
