//! 2D simplification of [`crate::space::SpaceMixer`]: sources and the
//! listener live in a horizontal plane, so distance/pan collapse to
//! 2-vectors while the Doppler pitch shift is identical.

use crate::buffer::Buffer;
use crate::config::{DEFAULT_RING_FRAMES, MIX_CHUNK};
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::pitch::PitchShift;
use crate::ports::Ports;
use crate::processor::{self, transition_end, transition_start, Capabilities, Info, Processor, State};
use std::sync::Arc;

fn sub2(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn dot2(a: [f32; 2], b: [f32; 2]) -> f32 {
    a[0] * b[0] + a[1] * b[1]
}

fn norm2(v: [f32; 2]) -> [f32; 2] {
    let len = dot2(v, v).sqrt();
    if len > 1e-9 {
        [v[0] / len, v[1] / len]
    } else {
        [0.0, 0.0]
    }
}

struct Source {
    location: [f32; 2],
    velocity: [f32; 2],
    pitch: PitchShift,
    shifted: Option<Arc<Buffer>>,
}

impl Source {
    fn new(sample_rate: f32) -> Self {
        Source {
            location: [0.0, 0.0],
            velocity: [0.0, 0.0],
            pitch: PitchShift::new(sample_rate, 1024, 4),
            shifted: None,
        }
    }
}

/// 2D spatializer with `n` mono inputs and a fixed stereo output pair.
/// The listener is fixed at the origin facing `+y`; only source location
/// and velocity are configurable.
pub struct PlaneMixer {
    inputs: Ports,
    sources: Vec<Source>,
    outputs: Ports,
    listener_velocity: [f32; 2],
    sound_speed: f32,
    doppler_factor: f32,
    volume: f32,
    sample_rate: f32,
    state: State,
}

impl PlaneMixer {
    pub fn new(max_sources: usize) -> Self {
        PlaneMixer {
            inputs: Ports::growable(0, max_sources),
            sources: Vec::new(),
            outputs: Ports::fixed(2),
            listener_velocity: [0.0, 0.0],
            sound_speed: 34330.0,
            doppler_factor: 1.0,
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

    pub fn set_source_location(&mut self, index: usize, location: [f32; 2]) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].location = location;
        Ok(())
    }

    pub fn set_source_velocity(&mut self, index: usize, velocity: [f32; 2]) -> Result<()> {
        processor::require_idle(self.state)?;
        self.ensure_source_slot(index);
        self.sources[index].velocity = velocity;
        Ok(())
    }

    fn mix_one_source(&mut self, index: usize, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        if self.inputs.get_arc(index as u32).is_none() {
            return Ok(());
        }
        self.ensure_source_slot(index);

        let location = self.sources[index].location;
        // Horizontal delta from the listener (fixed at the origin), clamped
        // to the pan law's domain.
        let pan = location[0].clamp(-1.0, 1.0);
        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
        let left_gain = self.volume * angle.cos();
        let right_gain = self.volume * angle.sin();

        let to_source = norm2(sub2(location, [0.0, 0.0]));
        let source_radial = dot2(self.sources[index].velocity, norm2(sub2([0.0, 0.0], location)));
        let listener_radial = dot2(self.listener_velocity, to_source);
        let denom = self.sound_speed - self.doppler_factor * source_radial;
        let pitch_ratio = if denom.abs() > 1e-6 {
            ((self.sound_speed - self.doppler_factor * listener_radial) / denom).clamp(0.5, 2.0)
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
        Ok(())
    }
}

impl Processor for PlaneMixer {
    fn info(&self) -> Info {
        Info {
            name: "PlaneMixer",
            description: "2D spatializer: horizontal pan and Doppler pitch shift",
            capabilities: Capabilities::empty(),
            min_inputs: 0,
            max_inputs: u32::MAX,
            outputs: 2,
            fields: &[
                Field::Volume,
                Field::SpaceSoundspeed,
                Field::SpaceDopplerFactor,
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
            Field::SpaceSoundspeed => self.sound_speed = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceDopplerFactor => self.doppler_factor = value.as_float().ok_or(Error::InvalidValue)?,
            Field::SpaceVelocity => {
                let (x, y, _) = value.as_vec3().ok_or(Error::InvalidValue)?;
                self.listener_velocity = [x, y];
            }
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::Volume => Value::Float(self.volume),
            Field::SpaceSoundspeed => Value::Float(self.sound_speed),
            Field::SpaceDopplerFactor => Value::Float(self.doppler_factor),
            Field::SpaceVelocity => Value::Vec3(self.listener_velocity[0], self.listener_velocity[1], 0.0),
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
    fn source_to_the_right_favors_right_channel() {
        let mut mixer = PlaneMixer::new(1);
        let input = Arc::new(Buffer::new(4096));
        let left = Arc::new(Buffer::new(4096));
        let right = Arc::new(Buffer::new(4096));
        mixer.set_in(0, Some(input.clone())).unwrap();
        mixer.set_out(0, Some(left.clone())).unwrap();
        mixer.set_out(1, Some(right.clone())).unwrap();
        mixer.set_source_location(0, [1.0, 0.0]).unwrap();
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
        assert!(r_energy > l_energy);
    }
}
