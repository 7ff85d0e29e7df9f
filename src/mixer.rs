//! N-channel additive mixer with a global volume.
//!
//! Sources are grouped by channel: `buffers = source_count / channels`,
//! and source `b * channels + c` feeds channel `c`. The first source per
//! channel is copied in (scaled by volume); the rest are added.

use crate::buffer::Buffer;
use crate::config::MIX_CHUNK;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::mixsource::MixSource;
use crate::ports::Ports;
use crate::processor::{
    self, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::sync::Arc;

pub struct BasicMixer {
    channels: u32,
    sources: Vec<MixSource>,
    outputs: Ports,
    volume: f32,
    state: State,
}

impl BasicMixer {
    pub fn new(channels: u32, max_sources: usize) -> Self {
        BasicMixer {
            channels,
            sources: Vec::new(),
            outputs: Ports::fixed(channels as usize),
            volume: 1.0,
            state: State::Idle,
        }
        .with_capacity(max_sources)
    }

    fn with_capacity(self, max_sources: usize) -> Self {
        let mut s = self;
        s.sources.reserve(max_sources);
        s
    }

    /// Binds source `index`'s buffer. Beyond the current source count
    /// this appends (and any channel gap in between is filled with
    /// unbound sources); setting a bound source to `None` removes it if
    /// it is the last source.
    pub fn set_source(&mut self, index: usize, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        if index >= self.sources.len() {
            if buffer.is_none() {
                return Ok(());
            }
            self.sources.resize_with(index + 1, MixSource::new);
        }
        log::debug!("mixer: source {index} {}", if buffer.is_some() { "bound" } else { "cleared" });
        self.sources[index].buffer = buffer;
        while matches!(self.sources.last(), Some(s) if s.buffer.is_none() && s.upstream.is_none()) {
            self.sources.pop();
        }
        Ok(())
    }

    /// Attaches (or clears) an upstream processor for source `index`,
    /// mixed before that source's buffer is read each cycle.
    pub fn set_upstream(&mut self, index: usize, upstream: Option<Box<dyn Processor>>) -> Result<()> {
        processor::require_idle(self.state)?;
        if index >= self.sources.len() {
            self.sources.resize_with(index + 1, MixSource::new);
        }
        self.sources[index].upstream = upstream;
        Ok(())
    }

    fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn buffers_per_channel(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.source_count() / self.channels as usize
        }
    }
}

impl Processor for BasicMixer {
    fn info(&self) -> Info {
        Info {
            name: "BasicMixer",
            description: "N-channel additive mixer with a global volume",
            capabilities: Capabilities::empty(),
            min_inputs: 0,
            max_inputs: u32::MAX,
            outputs: self.channels,
            fields: &[Field::Volume],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        self.set_source(port as usize, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.outputs.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Volume => {
                self.volume = value.as_float().ok_or(Error::InvalidValue)?;
                Ok(())
            }
            _ => Err(Error::InvalidField),
        }
    }

    fn get(&self, field: Field) -> Result<Value> {
        match field {
            Field::Volume => Ok(Value::Float(self.volume)),
            _ => Err(Error::InvalidField),
        }
    }

    fn start(&mut self) -> Result<()> {
        if !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        for source in &mut self.sources {
            source.start()?;
        }
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let buffers_per_channel = self.buffers_per_channel();
        if buffers_per_channel == 0 || self.channels == 0 {
            return Ok(());
        }
        for source in &mut self.sources {
            source.refresh();
        }
        for c in 0..self.channels as usize {
            let output = self.outputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
            let mut frames = output.available_write();
            for b in 0..buffers_per_channel {
                if let Some(buf) = &self.sources[b * self.channels as usize + c].buffer {
                    frames = frames.min(buf.available_read());
                }
            }
            let mut remaining = frames;
            while remaining > 0 {
                let chunk = remaining.min(MIX_CHUNK);
                let mut acc = [0.0f32; MIX_CHUNK];
                for b in 0..buffers_per_channel {
                    let idx = b * self.channels as usize + c;
                    let Some(buf) = self.sources[idx].buffer.as_ref() else {
                        continue;
                    };
                    let (ro, rn) = buf.request_read(chunk);
                    let rn = rn.min(chunk);
                    let slice = buf.read_slice(ro, rn);
                    if b == 0 {
                        for i in 0..rn {
                            acc[i] = slice[i] * self.volume;
                        }
                    } else {
                        for i in 0..rn {
                            acc[i] += slice[i] * self.volume;
                        }
                    }
                    buf.finish_read(rn);
                }
                let (wo, wn) = output.request_write(chunk);
                let wn = wn.min(chunk);
                output.write_slice(wo, wn).copy_from_slice(&acc[..wn]);
                let _ = output.finish_write(wn);
                remaining -= chunk;
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)?;
        for source in &mut self.sources {
            source.end()?;
        }
        Ok(())
    }

    fn output_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.outputs.get_arc(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixes_two_mono_sources_additively() {
        let mut mixer = BasicMixer::new(1, 4);
        let s0 = Arc::new(Buffer::new(16));
        let s1 = Arc::new(Buffer::new(16));
        let out = Arc::new(Buffer::new(16));
        mixer.set_in(0, Some(s0.clone())).unwrap();
        mixer.set_in(1, Some(s1.clone())).unwrap();
        mixer.set_out(0, Some(out.clone())).unwrap();
        mixer.start().unwrap();
        s0.write_all(&[0.2, 0.2]).unwrap();
        s1.write_all(&[0.3, 0.3]).unwrap();
        mixer.mix().unwrap();
        let mut result = [0.0f32; 2];
        out.read_all(&mut result);
        assert!((result[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_grouping_splits_sources_by_channel() {
        let mut mixer = BasicMixer::new(2, 4);
        let l = Arc::new(Buffer::new(16));
        let r = Arc::new(Buffer::new(16));
        let out_l = Arc::new(Buffer::new(16));
        let out_r = Arc::new(Buffer::new(16));
        mixer.set_in(0, Some(l.clone())).unwrap();
        mixer.set_in(1, Some(r.clone())).unwrap();
        mixer.set_out(0, Some(out_l.clone())).unwrap();
        mixer.set_out(1, Some(out_r.clone())).unwrap();
        mixer.start().unwrap();
        l.write_all(&[1.0]).unwrap();
        r.write_all(&[0.5]).unwrap();
        mixer.mix().unwrap();
        let mut lo = [0.0f32; 1];
        let mut ro = [0.0f32; 1];
        out_l.read_all(&mut lo);
        out_r.read_all(&mut ro);
        assert_eq!(lo[0], 1.0);
        assert_eq!(ro[0], 0.5);
    }
}
