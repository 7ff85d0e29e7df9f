//! Biquad filter: lowpass, highpass, bandpass, notch, peaking, allpass,
//! and low/high shelf, selected by the `BiquadFilter` field and driven by
//! the RBJ Audio EQ Cookbook formulas.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transition_end, transition_start, transfer_samples, Capabilities, Info, Processor, State,
};
use std::f32::consts::TAU;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peaking,
    Allpass,
    LowShelf,
    HighShelf,
}

/// Direct Form I coefficients, normalized so `a0 == 1`.
#[derive(Debug, Clone, Copy, Default)]
struct Coefs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefs {
    /// RBJ cookbook formulas. `kind == Bandpass/Notch` with `q <= 0` uses
    /// the passthrough shortcut the testable properties call for.
    fn compute(kind: Kind, sample_rate: f32, frequency: f32, q: f32, gain_db: f32) -> Coefs {
        let nyquist = sample_rate * 0.5;
        match kind {
            Kind::Lowpass if frequency >= nyquist => {
                return Coefs { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
            }
            Kind::Highpass if frequency >= nyquist => {
                return Coefs { b0: 0.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
            }
            Kind::Bandpass | Kind::Notch if q <= 0.0 => {
                return Coefs { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
            }
            _ => {}
        }
        let w0 = TAU * (frequency.max(1.0) / sample_rate.max(1.0)).min(0.4999);
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let q = q.max(1e-6);
        let alpha = sin_w0 / (2.0 * q);
        let a = 10f32.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            Kind::Lowpass => {
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            Kind::Highpass => {
                let b1 = -(1.0 + cos_w0);
                let b0 = -b1 / 2.0;
                let b2 = b0;
                (b0, b1, b2, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            Kind::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            Kind::Notch => (1.0, -2.0 * cos_w0, 1.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            Kind::Allpass => (
                1.0 - alpha,
                -2.0 * cos_w0,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            Kind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            Kind::LowShelf => {
                let sqrt_a = a.sqrt();
                let two_sqrt_a_alpha = 2.0 * sqrt_a * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            Kind::HighShelf => {
                let sqrt_a = a.sqrt();
                let two_sqrt_a_alpha = 2.0 * sqrt_a * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            Kind::Lowpass | Kind::Highpass | Kind::Bandpass | Kind::Notch => unreachable!(),
        };
        Coefs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// A single channel's Direct Form I state.
#[derive(Default, Clone, Copy)]
struct Channel {
    history: History,
}

impl Channel {
    #[inline]
    fn tick(&mut self, coefs: &Coefs, x: f32) -> f32 {
        let h = &mut self.history;
        let y = coefs.b0 * x + coefs.b1 * h.x1 + coefs.b2 * h.x2 - coefs.a1 * h.y1 - coefs.a2 * h.y2;
        h.x2 = h.x1;
        h.x1 = x;
        h.y2 = h.y1;
        h.y1 = y;
        y
    }
}

pub struct Biquad {
    inputs: Ports,
    outputs: Ports,
    channels: Vec<Channel>,
    state: State,
    bypass: bool,
    kind: Kind,
    frequency: f32,
    q: f32,
    gain_db: f32,
    sample_rate: f32,
    coefs: Coefs,
}

impl Biquad {
    pub fn new(channels: u32) -> Self {
        let mut b = Biquad {
            inputs: Ports::fixed(channels as usize),
            outputs: Ports::fixed(channels as usize),
            channels: vec![Channel::default(); channels as usize],
            state: State::Idle,
            bypass: false,
            kind: Kind::Lowpass,
            frequency: 1000.0,
            q: std::f32::consts::FRAC_1_SQRT_2,
            gain_db: 0.0,
            sample_rate: 44100.0,
            coefs: Coefs::default(),
        };
        b.recompute();
        b
    }

    fn recompute(&mut self) {
        self.coefs = Coefs::compute(self.kind, self.sample_rate, self.frequency, self.q, self.gain_db);
    }
}

impl Processor for Biquad {
    fn info(&self) -> Info {
        Info {
            name: "Biquad",
            description: "Lowpass/highpass/bandpass/notch/peaking/allpass/shelf biquad filter",
            capabilities: Capabilities::INPLACE,
            min_inputs: self.inputs.len() as u32,
            max_inputs: self.inputs.len() as u32,
            outputs: self.outputs.len() as u32,
            fields: &[
                Field::BiquadFilter,
                Field::Frequency,
                Field::Q,
                Field::Gain,
                Field::Samplerate,
                Field::Bypass,
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
            Field::BiquadFilter => {
                self.kind = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => Kind::Lowpass,
                    1 => Kind::Highpass,
                    2 => Kind::Bandpass,
                    3 => Kind::Notch,
                    4 => Kind::Peaking,
                    5 => Kind::Allpass,
                    6 => Kind::LowShelf,
                    7 => Kind::HighShelf,
                    _ => return Err(Error::InvalidValue),
                };
            }
            Field::Frequency => self.frequency = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Q => self.q = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Gain => self.gain_db = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        self.recompute();
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::BiquadFilter => Value::Int(match self.kind {
                Kind::Lowpass => 0,
                Kind::Highpass => 1,
                Kind::Bandpass => 2,
                Kind::Notch => 3,
                Kind::Peaking => 4,
                Kind::Allpass => 5,
                Kind::LowShelf => 6,
                Kind::HighShelf => 7,
            }),
            Field::Frequency => Value::Float(self.frequency),
            Field::Q => Value::Float(self.q),
            Field::Gain => Value::Float(self.gain_db),
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
        for c in &mut self.channels {
            *c = Channel::default();
        }
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
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
            let channel = &mut self.channels[c];
            {
                let in_slice = input.read_slice(ri, n);
                let out_slice = output.write_slice(wo, n);
                for i in 0..n {
                    out_slice[i] = channel.tick(&self.coefs, in_slice[i]);
                }
            }
            input.finish_read(n);
            let _ = output.finish_write(n);
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

    fn run_sine(biquad: &mut Biquad, freq: f32, sr: f32, n: usize) -> f32 {
        let input = Arc::new(Buffer::new(n + 16));
        let output = Arc::new(Buffer::new(n + 16));
        biquad.set_in(0, Some(input.clone())).unwrap();
        biquad.set_out(0, Some(output.clone())).unwrap();
        biquad.set(Field::Samplerate, Value::Float(sr)).unwrap();
        biquad.start().unwrap();
        let samples: Vec<f32> = (0..n)
            .map(|i| (TAU * freq * i as f32 / sr).sin())
            .collect();
        input.write_all(&samples).unwrap();
        biquad.mix().unwrap();
        let mut out = vec![0.0f32; n];
        output.read_all(&mut out);
        // Settle past the filter's transient, then report peak amplitude.
        out[n / 2..].iter().fold(0.0f32, |m, &v| m.max(v.abs()))
    }

    #[test]
    fn lowpass_passes_low_frequency_and_attenuates_high() {
        let mut lp_low = Biquad::new(1);
        lp_low.set(Field::BiquadFilter, Value::Int(0)).unwrap();
        lp_low.set(Field::Frequency, Value::Float(1000.0)).unwrap();
        let low_amp = run_sine(&mut lp_low, 100.0, 48000.0, 4096);
        assert!(low_amp >= 0.9, "low_amp={low_amp}");

        let mut lp_high = Biquad::new(1);
        lp_high.set(Field::BiquadFilter, Value::Int(0)).unwrap();
        lp_high.set(Field::Frequency, Value::Float(1000.0)).unwrap();
        let high_amp = run_sine(&mut lp_high, 10000.0, 48000.0, 4096);
        assert!(high_amp <= 0.15, "high_amp={high_amp}");
    }

    #[test]
    fn lowpass_at_or_above_nyquist_is_unity() {
        let coefs = Coefs::compute(Kind::Lowpass, 48000.0, 24000.0, 0.707, 0.0);
        assert_eq!(coefs.b0, 1.0);
        assert_eq!(coefs.a1, 0.0);
    }

    #[test]
    fn highpass_at_or_above_nyquist_is_zero() {
        let coefs = Coefs::compute(Kind::Highpass, 48000.0, 24000.0, 0.707, 0.0);
        assert_eq!(coefs.b0, 0.0);
    }

    #[test]
    fn bandpass_with_nonpositive_q_is_passthrough() {
        let coefs = Coefs::compute(Kind::Bandpass, 48000.0, 1000.0, 0.0, 0.0);
        assert_eq!(coefs.b0, 1.0);
        assert_eq!(coefs.b1, 0.0);
        assert_eq!(coefs.a1, 0.0);
    }

    #[test]
    fn bypass_transfers_without_filtering() {
        let mut biquad = Biquad::new(1);
        biquad.set(Field::Bypass, Value::Bool(true)).unwrap();
        let input = Arc::new(Buffer::new(8));
        let output = Arc::new(Buffer::new(8));
        biquad.set_in(0, Some(input.clone())).unwrap();
        biquad.set_out(0, Some(output.clone())).unwrap();
        biquad.start().unwrap();
        input.write_all(&[0.3, -0.4]).unwrap();
        biquad.mix().unwrap();
        let mut out = [0.0f32; 2];
        output.read_all(&mut out);
        assert_eq!(out, [0.3, -0.4]);
    }
}
