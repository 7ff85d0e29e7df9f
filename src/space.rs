//! 3D spatializer: distance attenuation, equal-power pan, and Doppler
//! pitch shift, additively mixed down to a stereo pair.
//!
//! Each source is carried by its own [`PitchShift`](crate::pitch::PitchShift)
//! instance so that a moving source's Doppler ratio can be applied before
//! the panned, attenuated signal is added into the output accumulator,
//! the engine's only processor that owns a nested processor per input
//! rather than reading bound buffers directly.

use crate::buffer::Buffer;
use crate::config::{DEFAULT_RING_FRAMES, MIX_CHUNK};
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::pitch::PitchShift;
use crate::ports::Ports;
use crate::processor::{self, transition_end, transition_start, Capabilities, Info, Processor, State};
use std::sync::Arc;

/// Distance attenuation curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attenuation {
    None,
    Inverse,
    Linear,
    Exponential,
}

impl Attenuation {
    fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => Attenuation::None,
            1 => Attenuation::Inverse,
            2 => Attenuation::Linear,
            3 => Attenuation::Exponential,
            _ => return Err(Error::InvalidValue),
        })
    }

    fn to_code(self) -> i64 {
        match self {
            Attenuation::None => 0,
            Attenuation::Inverse => 1,
            Attenuation::Linear => 2,
            Attenuation::Exponential => 3,
        }
    }

    fn factor(self, min: f32, max: f32, distance: f32, rolloff: f32) -> f32 {
        let min = min.max(1e-4);
        let d = distance.clamp(min, max.max(min));
        match self {
            Attenuation::None => 1.0,
            Attenuation::Inverse => min / (min + rolloff * (d - min)),
            Attenuation::Linear => {
                if max <= min {
                    1.0
                } else {
                    (1.0 - rolloff * (d - min) / (max - min)).max(0.0)
                }
            }
            Attenuation::Exponential => (d / min).powf(-rolloff),
        }
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len > 1e-9 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}

/// A listener: the point and orientation every source is mixed relative
/// to. Set through the processor's `Space*` fields.
#[derive(Debug, Clone, Copy)]
pub struct Listener {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    pub forward: [f32; 3],
    pub up: [f32; 3],
    pub sound_speed: f32,
    pub doppler_factor: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub rolloff: f32,
    pub attenuation: Attenuation,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            position: [0.0, 0.0, 0.0],
            velocity: [0.0, 0.0, 0.0],
            forward: [0.0, 0.0, 1.0],
            up: [0.0, 1.0, 0.0],
            sound_speed: 34330.0,
            doppler_factor: 1.0,
            min_distance: 10.0,
            max_distance: 100000.0,
            rolloff: 0.5,
            attenuation: Attenuation::Exponential,
        }
    }
}

struct Source {
    position: [f32; 3],
    velocity: [f32; 3],
    min_distance: Option<f32>,
    max_distance: Option<f32>,
    rolloff: Option<f32>,
    pitch: PitchShift,
    shifted: Option<Arc<Buffer>>,
}

impl Source {
    fn new(sample_rate: f32) -> Self {
        Source {
            position: [0.0, 0.0, 0.0],
            velocity: [0.0, 0.0, 0.0],
            min_distance: None,
            max_distance: None,
            rolloff: None,
            pitch: PitchShift::new(sample_rate, 1024, 4),
            shifted: None,
        }
    }
}

/// 3D spatializer with `n` mono inputs and a fixed stereo output pair.
pub struct SpaceMixer {
    inputs: Ports,
    sources: Vec<Source>,
    outputs: Ports,
    listener: Listener,
    volume: f32,
    sample_rate: f32,
    state: State,
}

impl SpaceMixer {
    pub fn new(max_sources: usize) -> Self {
        SpaceMixer {
            inputs: Ports::growable(0, max_sources),
            sources: Vec::new(),
            outputs: Ports::fixed(2),
            listener: Listener::default(),
            volume: 1.0,
            sample_rate: 44100.0,
            state: State::Idle,
        }
    }

    fn ensure_source_slot(&mut self, index: usize) {
        if index >= self.sources.len() {
            self.sources
                .resize_with(index + 1, || Source::new(self.sample_rate));
        }
    }

    pub fn set_source_location(&mut self, index: usize, position: [f32; 3]) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].position = position;
        Ok(())
    }

    pub fn set_source_velocity(&mut self, index: usize, velocity: [f32; 3]) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].velocity = velocity;
        Ok(())
    }

    pub fn set_source_distance_range(&mut self, index: usize, min: Option<f32>, max: Option<f32>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].min_distance = min;
        self.sources[index].max_distance = max;
        Ok(())
    }

    pub fn set_source_rolloff(&mut self, index: usize, rolloff: Option<f32>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].rolloff = rolloff;
        Ok(())
    }

    fn mix_one_source(&mut self, index: usize, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        let Some(buffer) = self.inputs.get_arc(index as u32) else {
            return Ok(());
        };
        self.ensure_source_slot(index);
        let listener = self.listener;

        let to_listener = sub(listener.position, self.sources[index].position);
        let distance = dot(to_listener, to_listener).sqrt();
        let min = self.sources[index].min_distance.unwrap_or(listener.min_distance);
        let max = self.sources[index].max_distance.unwrap_or(listener.max_distance);
        let rolloff = self.sources[index].rolloff.unwrap_or(listener.rolloff);
        let attenuation = listener.attenuation.factor(min, max, distance, rolloff);

        let right_axis = norm(cross(listener.up, listener.forward));
        let to_source = norm(sub(self.sources[index].position, listener.position));
        let pan = dot(right_axis, norm(to_listener)).clamp(-1.0, 1.0);
        let phase_sign = dot(listener.forward, to_source);

        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
        let mut left_gain = attenuation * angle.cos();
        let mut right_gain = attenuation * angle.sin();
        if phase_sign < 0.0 {
            right_gain = -right_gain;
        }
        left_gain *= self.volume;
        right_gain *= self.volume;

        let source_radial = dot(self.sources[index].velocity, norm(sub(listener.position, self.sources[index].position)));
        let listener_radial = dot(listener.velocity, norm(to_listener));
        let denom = listener.sound_speed - listener.doppler_factor * source_radial;
        let pitch_ratio = if denom.abs() > 1e-6 {
            ((listener.sound_speed - listener.doppler_factor * listener_radial) / denom).clamp(0.5, 2.0)
        } else {
            1.0
        };

        let src = &mut self.sources[index];
        src.pitch.set(Field::PitchShift, Value::Float(pitch_ratio))?;
        src.pitch.mix()?;

        let Some(shifted) = &src.shifted else {
            return Ok(());
        };
        let n = left.len().min(shifted.available_read());
        if n == 0 {
            return Ok(());
        }
        let (ro, rn) = shifted.request_read(n);
        let rn = rn.min(n);
        let samples = shifted.read_slice(ro, rn);
        for i in 0..rn {
            left[i] += samples[i] * left_gain;
            right[i] += samples[i] * right_gain;
        }
        shifted.finish_read(rn);
        let _ = buffer;
        Ok(())
    }
}

impl Processor for SpaceMixer {
    fn info(&self) -> Info {
        Info {
            name: "SpaceMixer",
            description: "3D spatializer: distance attenuation, equal-power pan, Doppler pitch shift",
            capabilities: Capabilities::empty(),
            min_inputs: 0,
            max_inputs: u32::MAX,
            outputs: 2,
            fields: &[
                Field::Volume,
                Field::SpaceLocation,
                Field::SpaceVelocity,
                Field::SpaceDirection,
                Field::SpaceUp,
                Field::SpaceSoundspeed,
                Field::SpaceDopplerFactor,
                Field::SpaceMinDistance,
                Field::SpaceMaxDistance,
                Field::SpaceRolloff,
                Field::SpaceAttenuation,
                Field::Samplerate,
            ],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(port as usize);
        self.inputs.set(port, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.outputs.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::Volume => self.volume = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceLocation => {
                let (x, y, z) = value.as_vec3().ok_or(Error::InvalidValue)?;
                self.listener.position = [x, y, z];
            }
            Field::SpaceVelocity => {
                let (x, y, z) = value.as_vec3().ok_or(Error::InvalidValue)?;
                self.listener.velocity = [x, y, z];
            }
            Field::SpaceDirection => {
                let (x, y, z) = value.as_vec3().ok_or(Error::InvalidValue)?;
                self.listener.forward = [x, y, z];
            }
            Field::SpaceUp => {
                let (x, y, z) = value.as_vec3().ok_or(Error::InvalidValue)?;
                self.listener.up = [x, y, z];
            }
            Field::SpaceSoundspeed => self.listener.sound_speed = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceDopplerFactor => self.listener.doppler_factor = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceMinDistance => self.listener.min_distance = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceMaxDistance => self.listener.max_distance = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceRolloff => self.listener.rolloff = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceAttenuation => {
                self.listener.attenuation = Attenuation::from_code(value.as_int().ok_or(Error::InvalidValue)?)?
            }
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Volume => Value::Float(self.volume),
            Field::SpaceLocation => Value::Vec3(
                self.listener.position[0],
                self.listener.position[1],
                self.listener.position[2],
            ),
            Field::SpaceVelocity => Value::Vec3(
                self.listener.velocity[0],
                self.listener.velocity[1],
                self.listener.velocity[2],
            ),
            Field::SpaceDirection => Value::Vec3(
                self.listener.forward[0],
                self.listener.forward[1],
                self.listener.forward[2],
            ),
            Field::SpaceUp => Value::Vec3(self.listener.up[0], self.listener.up[1], self.listener.up[2]),
            Field::SpaceSoundspeed => Value::Float(self.listener.sound_speed),
            Field::SpaceDopplerFactor => Value::Float(self.listener.doppler_factor),
            Field::SpaceMinDistance => Value::Float(self.listener.min_distance),
            Field::SpaceMaxDistance => Value::Float(self.listener.max_distance),
            Field::SpaceRolloff => Value::Float(self.listener.rolloff),
            Field::SpaceAttenuation => Value::Int(self.listener.attenuation.to_code()),
            Field::Samplerate => Value::Float(self.sample_rate),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.outputs.all_bound() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        for index in 0..self.inputs.len() {
            let Some(buffer) = self.inputs.get_arc(index as u32) else {
                continue;
            };
            self.ensure_source_slot(index);
            let shifted = Arc::new(Buffer::new(DEFAULT_RING_FRAMES));
            let source = &mut self.sources[index];
            source.pitch.set_in(0, Some(buffer))?;
            source.pitch.set_out(0, Some(shifted.clone()))?;
            source.pitch.start()?;
            source.shifted = Some(shifted);
        }
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let left_out = self.outputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let right_out = self.outputs.get_arc(1).ok_or(Error::BufferMissing)?;
        let frames = left_out.available_write().min(right_out.available_write());
        if frames == 0 {
            return Ok(());
        }
        let mut remaining = frames;
        while remaining > 0 {
            let chunk = remaining.min(MIX_CHUNK);
            let mut left = [0.0f32; MIX_CHUNK];
            let mut right = [0.0f32; MIX_CHUNK];
            for index in 0..self.inputs.len() {
                self.mix_one_source(index, &mut left[..chunk], &mut right[..chunk])?;
            }
            let (lo, ln) = left_out.request_write(chunk);
            let ln = ln.min(chunk);
            left_out.write_slice(lo, ln).copy_from_slice(&left[..ln]);
            let _ = left_out.finish_write(ln);
            let (ro, rn) = right_out.request_write(chunk);
            let rn = rn.min(chunk);
            right_out.write_slice(ro, rn).copy_from_slice(&right[..rn]);
            let _ = right_out.finish_write(rn);
            remaining -= chunk;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)?;
        for source in &mut self.sources {
            if source.shifted.is_some() {
                source.pitch.end()?;
                source.shifted = None;
            }
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
    fn source_on_the_right_favors_the_right_channel() {
        let mut mixer = SpaceMixer::new(1);
        mixer
            .set(Field::SpaceAttenuation, Value::Int(Attenuation::Linear.to_code()))
            .unwrap();
        mixer.set(Field::SpaceMinDistance, Value::Float(10.0)).unwrap();
        mixer.set(Field::SpaceMaxDistance, Value::Float(10000.0)).unwrap();
        mixer.set(Field::SpaceRolloff, Value::Float(1.0)).unwrap();

        let input = Arc::new(Buffer::new(4096));
        let left = Arc::new(Buffer::new(4096));
        let right = Arc::new(Buffer::new(4096));
        mixer.set_in(0, Some(input.clone())).unwrap();
        mixer.set_out(0, Some(left.clone())).unwrap();
        mixer.set_out(1, Some(right.clone())).unwrap();
        mixer.set_source_location(0, [100.0, 0.0, 0.0]).unwrap();
        mixer.start().unwrap();

        let samples: Vec<f32> = (0..2048).map(|i| ((i as f32) * 0.1).sin() * 0.5).collect();
        input.write_all(&samples).unwrap();
        mixer.mix().unwrap();

        let mut lbuf = vec![0.0f32; 2048];
        let mut rbuf = vec![0.0f32; 2048];
        left.read_all(&mut lbuf);
        right.read_all(&mut rbuf);
        let l_energy: f32 = lbuf.iter().map(|s| s * s).sum();
        let r_energy: f32 = rbuf.iter().map(|s| s * s).sum();
        assert!(r_energy > l_energy, "r_energy={r_energy} l_energy={l_energy}");
    }

    #[test]
    fn attenuation_models_agree_at_the_minimum_distance() {
        assert_eq!(Attenuation::None.factor(10.0, 1000.0, 10.0, 1.0), 1.0);
        assert!((Attenuation::Linear.factor(10.0, 1000.0, 10.0, 1.0) - 1.0).abs() < 1e-6);
        assert!((Attenuation::Inverse.factor(10.0, 1000.0, 10.0, 1.0) - 1.0).abs() < 1e-6);
        assert!((Attenuation::Exponential.factor(10.0, 1000.0, 10.0, 1.0) - 1.0).abs() < 1e-6);
    }
}
