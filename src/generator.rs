//! Signal sources: sine/square/triangle/sawtooth oscillators and
//! white/pink/brown noise.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{self, transition_end, transition_start, Capabilities, Info, Processor, State};
use std::f32::consts::TAU;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    Noise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

/// A small xorshift64* PRNG. Deterministic from its seed; good enough for
/// audio-rate noise, not for anything cryptographic.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform sample in [-1, 1].
    fn next_f32(&mut self) -> f32 {
        let bits = (self.next_u64() >> 40) as u32;
        (bits as f32 / (1u32 << 24) as f32) * 2.0 - 1.0
    }
}

/// Paul Kellet's refined pink noise filter: a bank of leaky integrators
/// at geometrically spaced time constants summed to approximate 1/f.
#[derive(Default)]
struct PinkFilter {
    b: [f32; 7],
}

impl PinkFilter {
    fn process(&mut self, white: f32) -> f32 {
        self.b[0] = 0.99886 * self.b[0] + white * 0.0555179;
        self.b[1] = 0.99332 * self.b[1] + white * 0.0750759;
        self.b[2] = 0.96900 * self.b[2] + white * 0.1538520;
        self.b[3] = 0.86650 * self.b[3] + white * 0.3104856;
        self.b[4] = 0.55000 * self.b[4] + white * 0.5329522;
        self.b[5] = -0.7616 * self.b[5] - white * 0.0168980;
        let out = self.b[0] + self.b[1] + self.b[2] + self.b[3] + self.b[4] + self.b[5] + self.b[6]
            + white * 0.5362;
        self.b[6] = white * 0.115926;
        out * 0.11
    }
}

pub struct Generator {
    output: Ports,
    state: State,
    waveform: Waveform,
    noise_color: NoiseColor,
    frequency: f32,
    sample_rate: f32,
    phase: f32,
    rng: Rng,
    pink: PinkFilter,
    brown_state: f32,
}

impl Generator {
    pub fn new() -> Self {
        Generator {
            output: Ports::fixed(1),
            state: State::Idle,
            waveform: Waveform::Sine,
            noise_color: NoiseColor::White,
            frequency: 440.0,
            sample_rate: 44100.0,
            phase: 0.0,
            rng: Rng::new(0x9E37_79B9_7F4A_7C15),
            pink: PinkFilter::default(),
            brown_state: 0.0,
        }
    }

    fn next_sample(&mut self) -> f32 {
        match self.waveform {
            Waveform::Noise => {
                let white = self.rng.next_f32();
                match self.noise_color {
                    NoiseColor::White => white,
                    NoiseColor::Pink => self.pink.process(white).clamp(-1.0, 1.0),
                    NoiseColor::Brown => {
                        self.brown_state = (self.brown_state + white * 0.02).clamp(-1.0, 1.0);
                        self.brown_state
                    }
                }
            }
            _ => {
                let step = if self.sample_rate > 0.0 {
                    self.frequency / self.sample_rate
                } else {
                    0.0
                };
                self.phase = (self.phase + step).rem_euclid(1.0);
                match self.waveform {
                    Waveform::Sine => (TAU * self.phase).sin(),
                    Waveform::Square => {
                        if self.phase < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Waveform::Triangle => 4.0 * (self.phase - (self.phase + 0.5).floor()).abs() - 1.0,
                    Waveform::Sawtooth => 2.0 * self.phase - 1.0,
                    Waveform::Noise => unreachable!(),
                }
            }
        }
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Generator {
    fn info(&self) -> Info {
        Info {
            name: "Generator",
            description: "Sine/square/triangle/sawtooth oscillator or white/pink/brown noise source",
            capabilities: Capabilities::empty(),
            min_inputs: 0,
            max_inputs: 0,
            outputs: 1,
            fields: &[
                Field::GeneratorFrequency,
                Field::GeneratorType,
                Field::NoiseType,
                Field::Samplerate,
            ],
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
        self.output.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::GeneratorFrequency => self.frequency = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::GeneratorType => {
                self.waveform = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => Waveform::Sine,
                    1 => Waveform::Square,
                    2 => Waveform::Triangle,
                    3 => Waveform::Sawtooth,
                    4 => Waveform::Noise,
                    _ => return Err(Error::InvalidValue),
                };
            }
            Field::NoiseType => {
                self.noise_color = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => NoiseColor::White,
                    1 => NoiseColor::Pink,
                    2 => NoiseColor::Brown,
                    _ => return Err(Error::InvalidValue),
                };
            }
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::GeneratorFrequency => Value::Float(self.frequency),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::GeneratorType => Value::Int(match self.waveform {
                Waveform::Sine => 0,
                Waveform::Square => 1,
                Waveform::Triangle => 2,
                Waveform::Sawtooth => 3,
                Waveform::Noise => 4,
            }),
            Field::NoiseType => Value::Int(match self.noise_color {
                NoiseColor::White => 0,
                NoiseColor::Pink => 1,
                NoiseColor::Brown => 2,
            }),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.output.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.phase = 0.0;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let output = self.output.get_arc(0).ok_or(Error::BufferMissing)?;
        let n = output.available_write();
        if n == 0 {
            return Ok(());
        }
        let (wo, wn) = output.request_write(n);
        {
            let out = output.write_slice(wo, wn);
            for sample in out.iter_mut() {
                *sample = self.next_sample();
            }
        }
        let _ = output.finish_write(wn);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }

    fn output_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.output.get_arc(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_generator_stays_in_unit_range() {
        let mut gen = Generator::new();
        let out = Arc::new(Buffer::new(256));
        gen.set_out(0, Some(out.clone())).unwrap();
        gen.set(Field::GeneratorFrequency, Value::Float(440.0)).unwrap();
        gen.set(Field::Samplerate, Value::Float(44100.0)).unwrap();
        gen.start().unwrap();
        gen.mix().unwrap();
        let mut buf = [0.0f32; 256];
        let n = out.read_all(&mut buf);
        assert!(buf[..n].iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn white_noise_is_bounded_and_varies() {
        let mut gen = Generator::new();
        let out = Arc::new(Buffer::new(256));
        gen.set_out(0, Some(out.clone())).unwrap();
        gen.set(Field::GeneratorType, Value::Int(4)).unwrap();
        gen.start().unwrap();
        gen.mix().unwrap();
        let mut buf = [0.0f32; 256];
        let n = out.read_all(&mut buf);
        assert!(buf[..n].iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!(buf[..n].windows(2).any(|w| w[0] != w[1]));
    }
}
