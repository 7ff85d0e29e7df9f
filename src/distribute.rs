//! One-input → N-output multiplexer sharing a single underlying ring: the
//! input is never copied, only its cursor snapshot is republished into
//! every virtual output so each downstream consumer sees the same bytes.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::processor::{
    self, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use crate::ports::Ports;
use std::sync::Arc;

pub struct Distribute {
    input: Ports,
    /// Owning copies of the virtual output buffers this processor
    /// stamped at `start`; `outputs` (in `Ports`) holds the caller-handed
    /// `Arc`s used for wiring identity, these are the actual virtual
    /// rings this processor republishes cursors into every mix.
    virtual_outputs: Vec<Arc<Buffer>>,
    outputs: Ports,
    state: State,
}

impl Distribute {
    pub fn new(max_outputs: usize) -> Self {
        Distribute {
            input: Ports::fixed(1),
            virtual_outputs: Vec::new(),
            outputs: Ports::growable(0, max_outputs),
            state: State::Idle,
        }
    }
}

impl Processor for Distribute {
    fn info(&self) -> Info {
        Info {
            name: "Distribute",
            description: "One input fanned out, zero-copy, to N virtual outputs",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: self.outputs.len() as u32,
            fields: &[],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.input.set(port, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.outputs.set(port, buffer)
    }

    fn set(&mut self, _field: Field, _value: Value) -> Result<()> {
        Err(Error::InvalidField)
    }

    fn get(&self, _field: Field) -> Result<Value> {
        Err(Error::InvalidField)
    }

    fn start(&mut self) -> Result<()> {
        let input = self.input.get_arc(0).ok_or(Error::BufferMissing)?;
        if !self.outputs.all_bound() || self.outputs.len() == 0 {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        log::debug!("distribute: aliasing input into {} virtual outputs", self.outputs.len());
        // Stamp every output buffer's storage as an alias of the input's,
        // starting all of them at the input's current cursor snapshot.
        // Requires the caller to have built `input` with
        // `Buffer::new_shareable`; an ordinary buffer fails to alias.
        let (r, w) = input.raw_cursors();
        self.virtual_outputs.clear();
        for _ in 0..self.outputs.len() {
            self.virtual_outputs.push(Arc::new(input.alias(r, w)?));
        }
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.input.get_arc(0).ok_or(Error::BufferMissing)?;
        // Advance by the slowest consumer's lag: the *least* progress any
        // output's reader has made since the last republish, expressed as
        // the largest still-readable amount among the virtual outputs.
        let max_readable = self
            .virtual_outputs
            .iter()
            .map(|o| o.available_read())
            .max()
            .unwrap_or(0);
        let total = input.available_read();
        let advance = total.saturating_sub(max_readable);
        if advance > 0 {
            let (_, n) = input.request_read(advance);
            input.finish_read(n);
        }
        let (r, w) = input.raw_cursors();
        for output in &self.virtual_outputs {
            output.republish_cursors(r, w);
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)?;
        self.virtual_outputs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slowest_reader_bounds_input_advance() {
        let input = Arc::new(Buffer::new_shareable(2048));
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        input.write_all(&samples).unwrap();

        let mut dist = Distribute::new(2);
        dist.set_in(0, Some(input.clone())).unwrap();
        dist.set_out(0, Some(Arc::new(Buffer::new(2048)))).unwrap();
        dist.set_out(1, Some(Arc::new(Buffer::new(2048)))).unwrap();
        dist.start().unwrap();
        dist.mix().unwrap();

        let out0 = dist.virtual_outputs[0].clone();
        let out1 = dist.virtual_outputs[1].clone();

        let mut buf = [0.0f32; 400];
        assert_eq!(out0.read_all(&mut buf), 400);
        let mut buf = [0.0f32; 600];
        assert_eq!(out1.read_all(&mut buf), 600);

        dist.mix().unwrap();
        assert_eq!(input.available_read(), 400);
        assert_eq!(out0.available_read(), 400);
        assert_eq!(out1.available_read(), 400);
    }
}
