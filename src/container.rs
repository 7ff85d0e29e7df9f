//! Ordered processor containers: [`Sequence`] (plain ordered invocation)
//! and [`Chain`] (a sequence that is itself a [`Processor`], exposing its
//! head's inputs and tail's outputs as its own).

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::processor::{
    self, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::sync::Arc;

/// An ordered list of processor references, invoked in insertion order.
/// Carries no I/O contract of its own.
#[derive(Default)]
pub struct Sequence {
    members: Vec<Box<dyn Processor>>,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence::default()
    }

    pub fn add(&mut self, processor: Box<dyn Processor>) {
        self.members.push(processor);
    }

    /// Inserts at `index`, clamping to the current length (append).
    pub fn add_at(&mut self, index: usize, processor: Box<dyn Processor>) {
        let index = index.min(self.members.len());
        self.members.insert(index, processor);
    }

    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Processor>> {
        if index < self.members.len() {
            Some(self.members.remove(index))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Processor> {
        self.members.get(index).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Box<dyn Processor>> {
        self.members.get_mut(index)
    }

    /// Starts every member in order. A failure partway through is
    /// reported to the caller; already-started members are left running
    /// (the caller is expected to `end` the whole sequence on error).
    pub fn start(&mut self) -> Result<()> {
        for member in &mut self.members {
            member.start()?;
        }
        Ok(())
    }

    /// Invokes each member's `mix` exactly once, in insertion order. A
    /// failing member aborts the rest of the sequence for this call.
    pub fn mix(&mut self) -> Result<()> {
        for member in &mut self.members {
            member.mix()?;
        }
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        for member in &mut self.members {
            member.end()?;
        }
        Ok(())
    }
}

/// A [`Sequence`] that also implements [`Processor`]: wiring forwards to
/// the first member (inputs) and last member (outputs), and setting
/// `Bypass` replaces the whole chain's `mix` with a direct head-to-tail
/// transfer, one channel at a time, skipping every interior processor.
pub struct Chain {
    sequence: Sequence,
    state: State,
    bypass: bool,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            sequence: Sequence::new(),
            state: State::Idle,
            bypass: false,
        }
    }

    pub fn add(&mut self, processor: Box<dyn Processor>) {
        self.sequence.add(processor);
    }

    pub fn add_at(&mut self, index: usize, processor: Box<dyn Processor>) {
        self.sequence.add_at(index, processor);
    }

    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Processor>> {
        self.sequence.remove(index)
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    fn head(&self) -> Option<&dyn Processor> {
        self.sequence.get(0)
    }

    fn tail(&self) -> Option<&dyn Processor> {
        let n = self.sequence.len();
        if n == 0 {
            None
        } else {
            self.sequence.get(n - 1)
        }
    }
}

impl Processor for Chain {
    fn info(&self) -> Info {
        let (min_inputs, max_inputs) = self
            .head()
            .map(|p| {
                let i = p.info();
                (i.min_inputs, i.max_inputs)
            })
            .unwrap_or((0, 0));
        let outputs = self.tail().map(|p| p.info().outputs).unwrap_or(0);
        Info {
            name: "Chain",
            description: "Composite processor exposing its first member's inputs and last member's outputs",
            capabilities: Capabilities::empty(),
            min_inputs,
            max_inputs,
            outputs,
            fields: &[Field::Bypass],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.sequence
            .get_mut(0)
            .ok_or(Error::InvalidLocation)?
            .set_in(port, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        let last = self.sequence.len().checked_sub(1).ok_or(Error::InvalidLocation)?;
        self.sequence
            .get_mut(last)
            .ok_or(Error::InvalidLocation)?
            .set_out(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Bypass => {
                self.bypass = value.as_bool().ok_or(Error::InvalidValue)?;
                Ok(())
            }
            _ => Err(Error::InvalidField),
        }
    }

    fn get(&self, field: Field) -> Result<Value> {
        match field {
            Field::Bypass => Ok(Value::Bool(self.bypass)),
            _ => Err(Error::InvalidField),
        }
    }

    fn start(&mut self) -> Result<()> {
        transition_start(&mut self.state)?;
        self.sequence.start()
    }

    fn mix(&mut self) -> Result<()> {
        if self.bypass {
            let head = self.sequence.get(0).ok_or(Error::BufferMissing)?;
            let tail_index = self.sequence.len().checked_sub(1).ok_or(Error::BufferMissing)?;
            let tail = self.sequence.get(tail_index).ok_or(Error::BufferMissing)?;
            let outputs = tail.info().outputs;
            for port in 0..outputs {
                if let (Some(src), Some(dst)) = (head.input_buffer(port), tail.output_buffer(port)) {
                    processor::transfer_samples(&src, &dst);
                }
            }
            Ok(())
        } else {
            self.sequence.mix()
        }
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)?;
        self.sequence.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    #[test]
    fn sequence_mixes_members_in_insertion_order() {
        let mut seq = Sequence::new();
        seq.add(Box::new(Volume::new(1)));
        seq.add(Box::new(Volume::new(1)));
        assert_eq!(seq.len(), 2);
        seq.start().unwrap();
        seq.mix().unwrap();
        seq.end().unwrap();
    }

    #[test]
    fn chain_forwards_wiring_to_head_and_tail() {
        let mut chain = Chain::new();
        chain.add(Box::new(Volume::new(1)));
        chain.add(Box::new(Volume::new(1)));
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        chain.set_in(0, Some(input)).unwrap();
        chain.set_out(0, Some(output)).unwrap();
    }

    #[test]
    fn chain_bypass_skips_interior_members() {
        let mut chain = Chain::new();
        chain.add(Box::new(Volume::new(1)));
        chain.add(Box::new(Volume::new(1)));
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        chain.set_in(0, Some(input.clone())).unwrap();
        chain.set_out(0, Some(output.clone())).unwrap();
        chain.set(Field::Bypass, Value::Bool(true)).unwrap();
        chain.start().unwrap();
        input.write_all(&[0.5, 0.25]).unwrap();
        chain.mix().unwrap();
        let mut out = [0.0f32; 2];
        assert_eq!(output.read_all(&mut out), 2);
        assert_eq!(out, [0.5, 0.25]);
    }
}
