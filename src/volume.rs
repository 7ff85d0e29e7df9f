//! Gain, equal-power pan, and time-parameterized fade curves: the
//! "general" per-channel processor.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::processor::{
    self, transition_end, transition_start, transfer_samples, Capabilities, Info, Processor, State,
};
use crate::ports::Ports;
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCurve {
    Linear,
    Exponential,
}

/// N-channel gain/pan/fade stage. One input buffer and one output buffer
/// per channel.
pub struct Volume {
    inputs: Ports,
    outputs: Ports,
    state: State,
    bypass: bool,
    volume: f32,
    pan: f32,
    fade_from: f32,
    fade_to: f32,
    fade_time: f32,
    fade_curve: FadeCurve,
    sample_rate: f32,
    elapsed_samples: u64,
}

impl Volume {
    pub fn new(channels: u32) -> Self {
        Volume {
            inputs: Ports::fixed(channels as usize),
            outputs: Ports::fixed(channels as usize),
            state: State::Idle,
            bypass: false,
            volume: 1.0,
            pan: 0.0,
            fade_from: 1.0,
            fade_to: 1.0,
            fade_time: 0.0,
            fade_curve: FadeCurve::Linear,
            sample_rate: 44100.0,
            elapsed_samples: 0,
        }
    }

    fn channel_gain(&self, channel: usize) -> f32 {
        if self.outputs.len() == 2 {
            let angle = (self.pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
            if channel == 0 {
                angle.cos()
            } else {
                angle.sin()
            }
        } else {
            1.0
        }
    }

    fn fade_value(&self, t: f32) -> f32 {
        if self.fade_time <= 0.0 {
            return self.fade_to;
        }
        let frac = (t / self.fade_time).clamp(0.0, 1.0);
        match self.fade_curve {
            FadeCurve::Linear => self.fade_from + (self.fade_to - self.fade_from) * frac,
            FadeCurve::Exponential => {
                if self.fade_from > 0.0 && self.fade_to > 0.0 {
                    self.fade_from * (self.fade_to / self.fade_from).powf(frac)
                } else {
                    self.fade_from + (self.fade_to - self.fade_from) * frac
                }
            }
        }
    }
}

impl Processor for Volume {
    fn info(&self) -> Info {
        Info {
            name: "Volume",
            description: "Per-channel gain, equal-power pan (stereo), and time-parameterized fade",
            capabilities: Capabilities::INPLACE,
            min_inputs: self.inputs.len() as u32,
            max_inputs: self.inputs.len() as u32,
            outputs: self.outputs.len() as u32,
            fields: &[
                Field::Volume,
                Field::Pan,
                Field::Bypass,
                Field::FadeFrom,
                Field::FadeTo,
                Field::FadeTime,
                Field::FadeType,
                Field::Samplerate,
            ],
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
            Field::Volume => self.volume = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Pan => self.pan = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            Field::FadeFrom => self.fade_from = value.as_float().ok_or(Error::InvalidValue)?,
            Field::FadeTo => self.fade_to = value.as_float().ok_or(Error::InvalidValue)?,
            Field::FadeTime => {
                self.fade_time = value.as_float().ok_or(Error::InvalidValue)?;
                self.elapsed_samples = 0;
            }
            Field::FadeType => {
                self.fade_curve = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => FadeCurve::Linear,
                    1 => FadeCurve::Exponential,
                    _ => return Err(Error::InvalidValue),
                };
            }
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Volume => Value::Float(self.volume),
            Field::Pan => Value::Float(self.pan),
            Field::Bypass => Value::Bool(self.bypass),
            Field::FadeFrom => Value::Float(self.fade_from),
            Field::FadeTo => Value::Float(self.fade_to),
            Field::FadeTime => Value::Float(self.fade_time),
            Field::FadeType => Value::Int(match self.fade_curve {
                FadeCurve::Linear => 0,
                FadeCurve::Exponential => 1,
            }),
            Field::Samplerate => Value::Float(self.sample_rate),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.inputs.all_bound() || !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.elapsed_samples = 0;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let mut max_advanced = 0u64;
        for c in 0..self.inputs.len() {
            let input = self.inputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
            let output = self.outputs.get_arc(c as u32).ok_or(Error::BufferMissing)?;
            if self.bypass {
                transfer_samples(&input, &output);
                continue;
            }
            let n = input.available_read().min(output.available_write());
            if n == 0 {
                continue;
            }
            let (ri, _) = input.request_read(n);
            let (wo, _) = output.request_write(n);
            let gain = self.channel_gain(c);
            let spc = if self.sample_rate > 0.0 { 1.0 / self.sample_rate } else { 0.0 };
            let base = self.elapsed_samples;
            {
                let in_slice = input.read_slice(ri, n);
                let out_slice = output.write_slice(wo, n);
                for i in 0..n {
                    let t = (base + i as u64) as f32 * spc;
                    out_slice[i] = in_slice[i] * self.volume * gain * self.fade_value(t);
                }
            }
            input.finish_read(n);
            let _ = output.finish_write(n);
            max_advanced = max_advanced.max(n as u64);
        }
        self.elapsed_samples += max_advanced;
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
    fn volume_scales_samples() {
        let mut v = Volume::new(1);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        v.set_in(0, Some(input.clone())).unwrap();
        v.set_out(0, Some(output.clone())).unwrap();
        v.set(Field::Volume, Value::Float(0.5)).unwrap();
        v.start().unwrap();
        input.write_all(&[1.0, 1.0]).unwrap();
        v.mix().unwrap();
        let mut out = [0.0f32; 2];
        assert_eq!(output.read_all(&mut out), 2);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn stereo_pan_favors_right_channel() {
        let mut v = Volume::new(2);
        let l_in = Arc::new(Buffer::new(16));
        let r_in = Arc::new(Buffer::new(16));
        let l_out = Arc::new(Buffer::new(16));
        let r_out = Arc::new(Buffer::new(16));
        v.set_in(0, Some(l_in.clone())).unwrap();
        v.set_in(1, Some(r_in.clone())).unwrap();
        v.set_out(0, Some(l_out.clone())).unwrap();
        v.set_out(1, Some(r_out.clone())).unwrap();
        v.set(Field::Pan, Value::Float(1.0)).unwrap();
        v.start().unwrap();
        l_in.write_all(&[1.0]).unwrap();
        r_in.write_all(&[1.0]).unwrap();
        v.mix().unwrap();
        let mut l = [0.0f32; 1];
        let mut r = [0.0f32; 1];
        l_out.read_all(&mut l);
        r_out.read_all(&mut r);
        assert!(r[0] > l[0]);
    }

    #[test]
    fn bypass_transfers_without_scaling() {
        let mut v = Volume::new(1);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        v.set_in(0, Some(input.clone())).unwrap();
        v.set_out(0, Some(output.clone())).unwrap();
        v.set(Field::Volume, Value::Float(0.1)).unwrap();
        v.set(Field::Bypass, Value::Bool(true)).unwrap();
        v.start().unwrap();
        input.write_all(&[0.7]).unwrap();
        v.mix().unwrap();
        let mut out = [0.0f32; 1];
        output.read_all(&mut out);
        assert_eq!(out[0], 0.7);
    }
}
