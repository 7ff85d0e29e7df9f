//! Playback speed change (varispeed): reads from a history ring at a
//! fractional rate set by `SpeedFactor`, trading faster/slower playback
//! for a correspondingly shifted pitch.
//!
//! Unlike most processors here, input and output sample counts are not
//! equal per `mix()` call; a speed factor above 1.0 consumes more input
//! per output sample, and below 1.0 consumes less. The history ring and
//! its running write count exist precisely to let the fractional read
//! pointer look arbitrarily far back without reallocating.

use crate::buffer::Buffer;
use crate::config::DEFAULT_RING_FRAMES;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationKind {
    Linear,
    Cubic,
}

pub struct SpeedChange {
    channels: u32,
    inputs: Ports,
    outputs: Ports,
    state: State,
    bypass: bool,
    speed: f32,
    interpolation: InterpolationKind,
    sample_rate: f32,

    rings: Vec<Vec<f32>>,
    write_count: u64,
    read_pos: f64,
}

impl SpeedChange {
    pub fn new(channels: u32, sample_rate: f32) -> Self {
        SpeedChange {
            channels,
            inputs: Ports::fixed(channels as usize),
            outputs: Ports::fixed(channels as usize),
            state: State::Idle,
            bypass: false,
            speed: 1.0,
            interpolation: InterpolationKind::Linear,
            sample_rate,
            rings: (0..channels).map(|_| vec![0.0; DEFAULT_RING_FRAMES]).collect(),
            write_count: 0,
            read_pos: 0.0,
        }
    }

    fn lookahead(&self) -> i64 {
        match self.interpolation {
            InterpolationKind::Linear => 2,
            InterpolationKind::Cubic => 3,
        }
    }

    fn sample_at(&self, channel: usize, base: i64, frac: f32) -> f32 {
        let len = self.rings[channel].len() as i64;
        let at = |i: i64| self.rings[channel][i.rem_euclid(len) as usize];
        match self.interpolation {
            InterpolationKind::Linear => {
                let a = at(base);
                let b = at(base + 1);
                a + (b - a) * frac
            }
            InterpolationKind::Cubic => {
                let p0 = at(base - 1);
                let p1 = at(base);
                let p2 = at(base + 1);
                let p3 = at(base + 2);
                let t = frac;
                // Catmull-Rom spline through the four surrounding samples.
                let a0 = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
                let a1 = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
                let a2 = -0.5 * p0 + 0.5 * p2;
                let a3 = p1;
                ((a0 * t + a1) * t + a2) * t + a3
            }
        }
    }
}

impl Processor for SpeedChange {
    fn info(&self) -> Info {
        Info {
            name: "SpeedChange",
            description: "Varispeed playback rate change with shifted pitch",
            capabilities: Capabilities::empty(),
            min_inputs: self.channels,
            max_inputs: self.channels,
            outputs: self.channels,
            fields: &[Field::SpeedFactor, Field::ResampleType, Field::Samplerate, Field::Bypass],
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
            Field::SpeedFactor => {
                self.speed = value.as_float().ok_or(Error::InvalidValue)?.max(0.01);
            }
            Field::ResampleType => {
                self.interpolation = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => InterpolationKind::Linear,
                    1 => InterpolationKind::Cubic,
                    _ => return Err(Error::InvalidValue),
                };
            }
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::SpeedFactor => Value::Float(self.speed),
            Field::ResampleType => Value::Int(match self.interpolation {
                InterpolationKind::Linear => 0,
                InterpolationKind::Cubic => 1,
            }),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::Bypass => Value::Bool(self.bypass),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.inputs.all_bound() || !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        for ring in &mut self.rings {
            ring.iter_mut().for_each(|s| *s = 0.0);
        }
        self.write_count = 0;
        self.read_pos = 0.0;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        if self.bypass || (self.speed - 1.0).abs() < 1e-6 {
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
        if channels == 0 {
            return Ok(());
        }
        let ring_len = self.rings.first().map_or(0, Vec::len) as i64;
        let lookahead = self.lookahead();

        loop {
            let mut out_room = usize::MAX;
            let mut outputs = Vec::new();
            for c in 0..self.channels {
                let output = self.outputs.get_arc(c).ok_or(Error::BufferMissing)?;
                out_room = out_room.min(output.available_write());
                outputs.push(output);
            }
            if out_room == 0 {
                break;
            }

            let needed = self.read_pos.floor() as i64 + lookahead;
            while (self.write_count as i64) < needed {
                let mut pulled_any = false;
                for c in 0..channels {
                    let input = self.inputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
                    let (ro, rn) = input.request_read(1);
                    if rn == 0 {
                        continue;
                    }
                    let x = input.read_slice(ro, 1)[0];
                    input.finish_read(1);
                    let idx = (self.write_count as i64).rem_euclid(ring_len) as usize;
                    self.rings[c][idx] = x;
                    pulled_any = true;
                }
                if pulled_any {
                    self.write_count += 1;
                } else {
                    break;
                }
            }
            if (self.write_count as i64) < needed {
                break;
            }

            let base = self.read_pos.floor() as i64;
            let frac = (self.read_pos - base as f64) as f32;
            for (c, output) in outputs.iter().enumerate() {
                let sample = self.sample_at(c, base, frac);
                let (wo, wn) = output.request_write(1);
                if wn == 0 {
                    continue;
                }
                output.write_slice(wo, 1)[0] = sample;
                let _ = output.finish_write(1);
            }
            self.read_pos += self.speed as f64;
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
    fn unity_speed_bypasses_interpolation() {
        let mut sc = SpeedChange::new(1, 44100.0);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        sc.set_in(0, Some(input.clone())).unwrap();
        sc.set_out(0, Some(output.clone())).unwrap();
        sc.start().unwrap();
        input.write_all(&[0.1, 0.2, 0.3]).unwrap();
        sc.mix().unwrap();
        let mut out = [0.0f32; 3];
        output.read_all(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn double_speed_produces_roughly_half_the_output_samples() {
        let mut sc = SpeedChange::new(1, 44100.0);
        sc.set(Field::SpeedFactor, Value::Float(2.0)).unwrap();
        let input = Arc::new(Buffer::new(256));
        let output = Arc::new(Buffer::new(256));
        sc.set_in(0, Some(input.clone())).unwrap();
        sc.set_out(0, Some(output.clone())).unwrap();
        sc.start().unwrap();
        let samples: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        input.write_all(&samples).unwrap();
        sc.mix().unwrap();
        let mut out = [0.0f32; 256];
        let n = output.read_all(&mut out);
        assert!(n >= 45 && n <= 52, "n={n}");
    }
}
