//! Sample-rate conversion between mismatched input/output rates, wrapping
//! `rubato`'s windowed-sinc resampler.
//!
//! Unlike [`crate::speed::SpeedChange`], this changes the *sample rate*
//! without altering the apparent pitch of the content: `rubato` handles
//! the anti-aliasing filter design, this module only handles feeding it
//! fixed-size chunks and draining its variable-size output into a ring.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use std::sync::Arc;

const CHUNK_SIZE: usize = 1024;
const MAX_RELATIVE_RATIO: f64 = 8.0;

pub struct Resampler {
    channels: u32,
    inputs: Ports,
    outputs: Ports,
    state: State,
    bypass: bool,
    input_rate: f32,
    output_rate: f32,

    engine: Option<SincFixedIn<f32>>,
    input_scratch: Vec<Vec<f32>>,
    input_fill: usize,
    output_queue: Vec<Vec<f32>>,
    queue_read: usize,
    queue_len: usize,
}

impl Resampler {
    pub fn new(channels: u32, input_rate: f32, output_rate: f32) -> Self {
        log::debug!(
            "resampler: constructing {channels}-channel resampler {input_rate} Hz -> {output_rate} Hz"
        );
        let mut r = Resampler {
            channels,
            inputs: Ports::fixed(channels as usize),
            outputs: Ports::fixed(channels as usize),
            state: State::Idle,
            bypass: false,
            input_rate,
            output_rate,
            engine: None,
            input_scratch: (0..channels).map(|_| vec![0.0; CHUNK_SIZE]).collect(),
            input_fill: 0,
            output_queue: (0..channels).map(|_| Vec::new()).collect(),
            queue_read: 0,
            queue_len: 0,
        };
        let _ = r.rebuild_engine();
        r
    }

    fn rebuild_engine(&mut self) -> Result<()> {
        if self.channels == 0 || self.input_rate <= 0.0 || self.output_rate <= 0.0 {
            self.engine = None;
            return Ok(());
        }
        let ratio = (self.output_rate / self.input_rate) as f64;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::BadResampleFactor);
        }
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let engine = SincFixedIn::<f32>::new(
            ratio,
            MAX_RELATIVE_RATIO,
            params,
            CHUNK_SIZE,
            self.channels as usize,
        )
        .map_err(|_| Error::BadResampleFactor)?;
        self.engine = Some(engine);
        self.input_fill = 0;
        for q in &mut self.output_queue {
            q.clear();
        }
        self.queue_read = 0;
        self.queue_len = 0;
        Ok(())
    }

    fn process_chunk(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let output = engine
            .process(&self.input_scratch, None)
            .map_err(|_| Error::ResampleFailed)?;
        for (c, chan_out) in output.into_iter().enumerate() {
            self.output_queue[c].clear();
            self.output_queue[c].extend_from_slice(&chan_out);
        }
        self.queue_len = self.output_queue.first().map_or(0, Vec::len);
        self.queue_read = 0;
        Ok(())
    }
}

impl Processor for Resampler {
    fn info(&self) -> Info {
        Info {
            name: "Resampler",
            description: "Sample-rate conversion via a windowed-sinc resampling engine",
            capabilities: Capabilities::empty(),
            min_inputs: self.channels,
            max_inputs: self.channels,
            outputs: self.channels,
            fields: &[Field::Samplerate, Field::Bypass],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.inputs.set(port, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.outputs.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Samplerate => {
                self.output_rate = value.as_float().ok_or(Error::InvalidValue)?;
                self.rebuild_engine()?;
            }
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Samplerate => Value::Float(self.output_rate),
            Field::Bypass => Value::Bool(self.bypass),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.inputs.all_bound() || !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.rebuild_engine()
    }

    fn mix(&mut self) -> Result<()> {
        if self.bypass || (self.input_rate - self.output_rate).abs() < 1e-6 || self.engine.is_none() {
            for c in 0..self.channels {
                if let (Some(input), Some(output)) =
                    (self.inputs.get_arc(c), self.outputs.get_arc(c))
                {
                    transfer_samples(&input, &output);
                }
            }
            return Ok(());
        }

        let channels = self.channels as usize;
        loop {
            if self.queue_read < self.queue_len {
                let mut wrote_any = false;
                for c in 0..channels {
                    let output = self.outputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
                    let (wo, wn) = output.request_write(1);
                    if wn == 0 {
                        continue;
                    }
                    output.write_slice(wo, 1)[0] = self.output_queue[c][self.queue_read];
                    let _ = output.finish_write(1);
                    wrote_any = true;
                }
                if !wrote_any {
                    break;
                }
                self.queue_read += 1;
                continue;
            }

            let mut pulled_any = false;
            for c in 0..channels {
                let input = self.inputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
                let (ro, rn) = input.request_read(1);
                if rn == 0 {
                    continue;
                }
                let x = input.read_slice(ro, 1)[0];
                input.finish_read(1);
                self.input_scratch[c][self.input_fill] = x;
                pulled_any = true;
            }
            if !pulled_any {
                break;
            }
            self.input_fill += 1;
            if self.input_fill == CHUNK_SIZE {
                self.process_chunk()?;
                self.input_fill = 0;
            }
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }

    fn input_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.inputs.get_arc(port)
    }

    fn output_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.outputs.get_arc(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_bypass_the_resampling_engine() {
        let mut r = Resampler::new(1, 44100.0, 44100.0);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        r.set_in(0, Some(input.clone())).unwrap();
        r.set_out(0, Some(output.clone())).unwrap();
        r.start().unwrap();
        input.write_all(&[0.1, 0.2]).unwrap();
        r.mix().unwrap();
        let mut out = [0.0f32; 2];
        output.read_all(&mut out);
        assert_eq!(out, [0.1, 0.2]);
    }

    #[test]
    fn upsampling_produces_roughly_double_the_frames() {
        let mut r = Resampler::new(1, 22050.0, 44100.0);
        let input = Arc::new(Buffer::new(8192));
        let output = Arc::new(Buffer::new(8192));
        r.set_in(0, Some(input.clone())).unwrap();
        r.set_out(0, Some(output.clone())).unwrap();
        r.start().unwrap();
        let samples: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.05).sin()).collect();
        input.write_all(&samples).unwrap();
        r.mix().unwrap();
        let mut out = vec![0.0f32; 8192];
        let n = output.read_all(&mut out);
        assert!(n > 1500, "n={n}");
    }
}
