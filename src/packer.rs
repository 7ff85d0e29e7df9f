//! Packer and Unpacker: ordinary processors sitting at the boundary between
//! a [`Pack`](crate::pack::Pack) and the per-channel float [`Buffer`]s the
//! rest of the engine works in.
//!
//! Both wrap the forward/reverse [`crate::transfer`] functions; neither
//! binds the pack through `set_in`/`set_out` since a pack isn't a
//! [`Buffer`]; it is bound separately with [`Unpacker::bind_pack`] /
//! [`Packer::bind_pack`] while the processor is `Idle`.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::pack::Pack;
use crate::ports::Ports;
use crate::processor::{self, transition_end, transition_start, Capabilities, Info, Processor, State};
use crate::transfer::{buffers_to_pack, pack_to_buffers, VolumeRamp};
use std::sync::Arc;

/// Unpacks a bound [`Pack`] into one [`Buffer`] output per channel.
pub struct Unpacker {
    pack: Option<Arc<Pack>>,
    outputs: Ports,
    ramps: Vec<VolumeRamp>,
    volume: f32,
    state: State,
}

impl Unpacker {
    pub fn new(channels: u32) -> Self {
        Unpacker {
            pack: None,
            outputs: Ports::fixed(channels as usize),
            ramps: vec![VolumeRamp::new(1.0); channels as usize],
            volume: 1.0,
            state: State::Idle,
        }
    }

    /// Binds the pack this unpacker reads from. Fails with `AlreadyStarted`
    /// once running, and `InvalidValue` if its channel count doesn't match
    /// the number of output ports this unpacker was built with.
    pub fn bind_pack(&mut self, pack: Arc<Pack>) -> Result<()> {
        processor::require_idle(self.state)?;
        if pack.channels() as usize != self.outputs.len() {
            return Err(Error::InvalidValue);
        }
        self.pack = Some(pack);
        Ok(())
    }
}

impl Processor for Unpacker {
    fn info(&self) -> Info {
        Info {
            name: "Unpacker",
            description: "Deinterleaves and decodes a pack into per-channel buffers",
            capabilities: Capabilities::empty(),
            min_inputs: 0,
            max_inputs: 0,
            outputs: self.outputs.len() as u32,
            fields: &[Field::Volume],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, _port: u32, _buffer: Option<Arc<Buffer>>) -> Result<()> {
        Err(Error::InvalidLocation)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.outputs.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Volume => {
                self.volume = value.as_float().ok_or(Error::InvalidValue)?;
                for ramp in &mut self.ramps {
                    ramp.set_target(self.volume);
                }
            }
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Volume => Value::Float(self.volume),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.pack.is_none() {
            return Err(Error::BufferMissing);
        }
        if !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)
    }

    fn mix(&mut self) -> Result<()> {
        let Some(pack) = &self.pack else {
            return Err(Error::BufferMissing);
        };
        let buffers: Vec<Arc<Buffer>> = (0..self.outputs.len())
            .map(|i| self.outputs.get_arc(i as u32).unwrap())
            .collect();
        let refs: Vec<&Buffer> = buffers.iter().map(|b| b.as_ref()).collect();
        pack_to_buffers(pack, &refs, &mut self.ramps);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }

    fn output_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.outputs.get_arc(port)
    }
}

/// Packs one [`Buffer`] input per channel into a bound [`Pack`].
pub struct Packer {
    pack: Option<Arc<Pack>>,
    inputs: Ports,
    ramps: Vec<VolumeRamp>,
    volume: f32,
    state: State,
}

impl Packer {
    pub fn new(channels: u32) -> Self {
        Packer {
            pack: None,
            inputs: Ports::fixed(channels as usize),
            ramps: vec![VolumeRamp::new(1.0); channels as usize],
            volume: 1.0,
            state: State::Idle,
        }
    }

    pub fn bind_pack(&mut self, pack: Arc<Pack>) -> Result<()> {
        processor::require_idle(self.state)?;
        if pack.channels() as usize != self.inputs.len() {
            return Err(Error::InvalidValue);
        }
        self.pack = Some(pack);
        Ok(())
    }
}

impl Processor for Packer {
    fn info(&self) -> Info {
        Info {
            name: "Packer",
            description: "Encodes and interleaves per-channel buffers into a pack",
            capabilities: Capabilities::empty(),
            min_inputs: self.inputs.len() as u32,
            max_inputs: self.inputs.len() as u32,
            outputs: 0,
            fields: &[Field::Volume],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.inputs.set(port, buffer)
    }

    fn set_out(&mut self, _port: u32, _buffer: Option<Arc<Buffer>>) -> Result<()> {
        Err(Error::InvalidLocation)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Volume => {
                self.volume = value.as_float().ok_or(Error::InvalidValue)?;
                for ramp in &mut self.ramps {
                    ramp.set_target(self.volume);
                }
            }
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Volume => Value::Float(self.volume),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.pack.is_none() {
            return Err(Error::BufferMissing);
        }
        if !self.inputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)
    }

    fn mix(&mut self) -> Result<()> {
        let Some(pack) = &self.pack else {
            return Err(Error::BufferMissing);
        };
        let buffers: Vec<Arc<Buffer>> = (0..self.inputs.len())
            .map(|i| self.inputs.get_arc(i as u32).unwrap())
            .collect();
        let refs: Vec<&Buffer> = buffers.iter().map(|b| b.as_ref()).collect();
        buffers_to_pack(&refs, pack, &mut self.ramps);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }

    fn input_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.inputs.get_arc(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;

    #[test]
    fn unpacker_decodes_a_pack_into_per_channel_buffers() {
        let pack = Arc::new(Pack::new(8, Encoding::Int16, 2, 44100));
        let left_in = [0.5f32, -0.5];
        let right_in = [0.25f32, -0.25];
        {
            let left_buf = Buffer::new(8);
            let right_buf = Buffer::new(8);
            left_buf.write_all(&left_in).unwrap();
            right_buf.write_all(&right_in).unwrap();
            let mut ramps = [VolumeRamp::new(1.0), VolumeRamp::new(1.0)];
            buffers_to_pack(&[&left_buf, &right_buf], &pack, &mut ramps);
        }

        let mut unpacker = Unpacker::new(2);
        let left_out = Arc::new(Buffer::new(8));
        let right_out = Arc::new(Buffer::new(8));
        unpacker.set_out(0, Some(left_out.clone())).unwrap();
        unpacker.set_out(1, Some(right_out.clone())).unwrap();
        unpacker.bind_pack(pack).unwrap();
        unpacker.start().unwrap();
        unpacker.mix().unwrap();

        let mut lbuf = [0.0f32; 2];
        let mut rbuf = [0.0f32; 2];
        left_out.read_all(&mut lbuf);
        right_out.read_all(&mut rbuf);
        assert!((lbuf[0] - 0.5).abs() < 0.01);
        assert!((rbuf[0] - 0.25).abs() < 0.01);
    }

    #[test]
    fn packer_encodes_per_channel_buffers_into_a_pack() {
        let pack = Arc::new(Pack::new(8, Encoding::Int16, 1, 44100));
        let mut packer = Packer::new(1);
        let input = Arc::new(Buffer::new(8));
        input.write_all(&[0.5, -0.25]).unwrap();
        packer.set_in(0, Some(input)).unwrap();
        packer.bind_pack(pack.clone()).unwrap();
        packer.start().unwrap();
        packer.mix().unwrap();
        assert_eq!(pack.available_read_frames(), 2);
    }

    #[test]
    fn binding_a_pack_with_the_wrong_channel_count_fails() {
        let pack = Arc::new(Pack::new(8, Encoding::Int16, 2, 44100));
        let mut unpacker = Unpacker::new(1);
        assert_eq!(unpacker.bind_pack(pack).unwrap_err(), Error::InvalidValue);
    }
}
