//! Simple stateful single-channel effects: delay line, one-shot/looping
//! repeat, noise gate, and step quantizer.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::sync::Arc;

/// A simple feedback-free delay line: `DelayTime` seconds of silence
/// before the signal starts appearing at the output.
pub struct Delay {
    inputs: Ports,
    outputs: Ports,
    state: State,
    bypass: bool,
    delay_time: f32,
    sample_rate: f32,
    line: Vec<f32>,
    write_pos: usize,
}

impl Delay {
    pub fn new(max_seconds: f32, sample_rate: f32) -> Self {
        let capacity = ((max_seconds * sample_rate).max(1.0)) as usize;
        Delay {
            inputs: Ports::fixed(1),
            outputs: Ports::fixed(1),
            state: State::Idle,
            bypass: false,
            delay_time: 0.0,
            sample_rate,
            line: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    fn delay_samples(&self) -> usize {
        ((self.delay_time * self.sample_rate).max(0.0) as usize).min(self.line.len().saturating_sub(1))
    }
}

impl Processor for Delay {
    fn info(&self) -> Info {
        Info {
            name: "Delay",
            description: "Fixed-length feedback-free delay line",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[Field::DelayTime, Field::Samplerate, Field::Bypass],
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
            Field::DelayTime => self.delay_time = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::DelayTime => Value::Float(self.delay_time),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::Bypass => Value::Bool(self.bypass),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.inputs.get_arc(0).is_none() || self.outputs.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.line.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.inputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.outputs.get_arc(0).ok_or(Error::BufferMissing)?;
        if self.bypass {
            transfer_samples(&input, &output);
            return Ok(());
        }
        let n = input.available_read().min(output.available_write());
        if n == 0 {
            return Ok(());
        }
        let (ri, _) = input.request_read(n);
        let (wo, _) = output.request_write(n);
        let delay = self.delay_samples();
        let len = self.line.len();
        {
            let in_slice = input.read_slice(ri, n);
            let out_slice = output.write_slice(wo, n);
            for i in 0..n {
                let read_pos = (self.write_pos + len - delay) % len;
                out_slice[i] = self.line[read_pos];
                self.line[self.write_pos] = in_slice[i];
                self.write_pos = (self.write_pos + 1) % len;
            }
        }
        input.finish_read(n);
        let _ = output.finish_write(n);
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    /// Records `RepeatTime` seconds once and plays them back a single
    /// time, then resumes passing live input through.
    Once,
    /// Records once, then loops the recording forever.
    Loop,
}

/// Records the first `RepeatTime` seconds of input, then replays them
/// according to `RepeatMode` instead of passing live input through.
pub struct Repeat {
    inputs: Ports,
    outputs: Ports,
    state: State,
    repeat_time: f32,
    sample_rate: f32,
    mode: RepeatMode,
    recording: Vec<f32>,
    recorded: usize,
    playback_pos: usize,
    played_once: bool,
}

impl Repeat {
    pub fn new(max_seconds: f32, sample_rate: f32) -> Self {
        let capacity = ((max_seconds * sample_rate).max(1.0)) as usize;
        Repeat {
            inputs: Ports::fixed(1),
            outputs: Ports::fixed(1),
            state: State::Idle,
            repeat_time: 0.0,
            sample_rate,
            mode: RepeatMode::Once,
            recording: vec![0.0; capacity],
            recorded: 0,
            playback_pos: 0,
            played_once: false,
        }
    }

    fn target_len(&self) -> usize {
        ((self.repeat_time * self.sample_rate).max(0.0) as usize).min(self.recording.len())
    }
}

impl Processor for Repeat {
    fn info(&self) -> Info {
        Info {
            name: "Repeat",
            description: "Records a window of input then replays it once or in a loop",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[Field::RepeatTime, Field::RepeatMode, Field::Samplerate],
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
            Field::RepeatTime => self.repeat_time = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::RepeatMode => {
                self.mode = match value.as_int().ok_or(Error::InvalidValue)? {
                    0 => RepeatMode::Once,
                    1 => RepeatMode::Loop,
                    _ => return Err(Error::InvalidValue),
                };
            }
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::RepeatTime => Value::Float(self.repeat_time),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::RepeatMode => Value::Int(match self.mode {
                RepeatMode::Once => 0,
                RepeatMode::Loop => 1,
            }),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.inputs.get_arc(0).is_none() || self.outputs.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.recorded = 0;
        self.playback_pos = 0;
        self.played_once = false;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.inputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.outputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let target = self.target_len();
        let n = input.available_read().min(output.available_write());
        if n == 0 {
            return Ok(());
        }
        let (ri, _) = input.request_read(n);
        let (wo, _) = output.request_write(n);
        {
            let in_slice = input.read_slice(ri, n);
            let out_slice = output.write_slice(wo, n);
            for i in 0..n {
                if self.recorded < target {
                    self.recording[self.recorded] = in_slice[i];
                    self.recorded += 1;
                    out_slice[i] = in_slice[i];
                } else if self.played_once && self.mode == RepeatMode::Once {
                    out_slice[i] = in_slice[i];
                } else if target > 0 {
                    out_slice[i] = self.recording[self.playback_pos];
                    self.playback_pos += 1;
                    if self.playback_pos >= target {
                        self.playback_pos = 0;
                        self.played_once = true;
                    }
                } else {
                    out_slice[i] = in_slice[i];
                }
            }
        }
        input.finish_read(n);
        let _ = output.finish_write(n);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }
}

/// A hysteresis noise gate: opens when the envelope rises above
/// `GateOpenThreshold`, stays open through `GateHold` after it falls
/// below `GateCloseThreshold`, then ramps shut over `GateRelease`.
pub struct Gate {
    inputs: Ports,
    outputs: Ports,
    state: State,
    open_threshold: f32,
    close_threshold: f32,
    attack: f32,
    hold: f32,
    release: f32,
    sample_rate: f32,
    envelope: f32,
    gain: f32,
    is_open: bool,
    hold_remaining: f32,
}

impl Gate {
    pub fn new() -> Self {
        Gate {
            inputs: Ports::fixed(1),
            outputs: Ports::fixed(1),
            state: State::Idle,
            open_threshold: 0.1,
            close_threshold: 0.05,
            attack: 0.001,
            hold: 0.05,
            release: 0.1,
            sample_rate: 44100.0,
            envelope: 0.0,
            gain: 0.0,
            is_open: false,
            hold_remaining: 0.0,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Gate {
    fn info(&self) -> Info {
        Info {
            name: "Gate",
            description: "Hysteresis noise gate with attack/hold/release",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[
                Field::GateOpenThreshold,
                Field::GateCloseThreshold,
                Field::GateAttack,
                Field::GateHold,
                Field::GateRelease,
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
            Field::GateOpenThreshold => {
                self.open_threshold = value.as_float().ok_or(Error::InvalidValue)?
            }
            Field::GateCloseThreshold => {
                self.close_threshold = value.as_float().ok_or(Error::InvalidValue)?
            }
            Field::GateAttack => self.attack = value.as_float().ok_or(Error::InvalidValue)?,
            Field::GateHold => self.hold = value.as_float().ok_or(Error::InvalidValue)?,
            Field::GateRelease => self.release = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::GateOpenThreshold => Value::Float(self.open_threshold),
            Field::GateCloseThreshold => Value::Float(self.close_threshold),
            Field::GateAttack => Value::Float(self.attack),
            Field::GateHold => Value::Float(self.hold),
            Field::GateRelease => Value::Float(self.release),
            Field::Samplerate => Value::Float(self.sample_rate),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.inputs.get_arc(0).is_none() || self.outputs.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.envelope = 0.0;
        self.gain = 0.0;
        self.is_open = false;
        self.hold_remaining = 0.0;
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.inputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.outputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let n = input.available_read().min(output.available_write());
        if n == 0 {
            return Ok(());
        }
        let (ri, _) = input.request_read(n);
        let (wo, _) = output.request_write(n);
        let spc = if self.sample_rate > 0.0 { 1.0 / self.sample_rate } else { 0.0 };
        let attack_rate = if self.attack > 0.0 { spc / self.attack } else { 1.0 };
        let release_rate = if self.release > 0.0 { spc / self.release } else { 1.0 };
        {
            let in_slice = input.read_slice(ri, n);
            let out_slice = output.write_slice(wo, n);
            for i in 0..n {
                let x = in_slice[i];
                self.envelope += (x.abs() - self.envelope) * 0.01;
                if !self.is_open && self.envelope >= self.open_threshold {
                    self.is_open = true;
                    self.hold_remaining = self.hold;
                } else if self.is_open && self.envelope < self.close_threshold {
                    if self.hold_remaining > 0.0 {
                        self.hold_remaining -= spc;
                    } else {
                        self.is_open = false;
                    }
                } else if self.is_open {
                    self.hold_remaining = self.hold;
                }
                let target = if self.is_open { 1.0 } else { 0.0 };
                let rate = if target > self.gain { attack_rate } else { release_rate };
                self.gain += (target - self.gain) * rate.clamp(0.0, 1.0);
                out_slice[i] = x * self.gain;
            }
        }
        input.finish_read(n);
        let _ = output.finish_write(n);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }
}

/// Rounds each sample to the nearest of `QuantizeSteps` evenly spaced
/// levels across `[-1, 1]`.
pub struct Quantize {
    inputs: Ports,
    outputs: Ports,
    state: State,
    steps: u32,
}

impl Quantize {
    pub fn new() -> Self {
        Quantize {
            inputs: Ports::fixed(1),
            outputs: Ports::fixed(1),
            state: State::Idle,
            steps: 256,
        }
    }
}

impl Default for Quantize {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Quantize {
    fn info(&self) -> Info {
        Info {
            name: "Quantize",
            description: "Rounds samples to a fixed number of evenly spaced levels",
            capabilities: Capabilities::INPLACE,
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[Field::QuantizeSteps],
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
            Field::QuantizeSteps => {
                let steps = value.as_int().ok_or(Error::InvalidValue)?;
                if steps < 2 {
                    return Err(Error::InvalidValue);
                }
                self.steps = steps as u32;
            }
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        match field {
            Field::QuantizeSteps => Ok(Value::Int(self.steps as i64)),
            _ => Err(Error::InvalidField),
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.inputs.get_arc(0).is_none() || self.outputs.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.inputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.outputs.get_arc(0).ok_or(Error::BufferMissing)?;
        let n = input.available_read().min(output.available_write());
        if n == 0 {
            return Ok(());
        }
        let (ri, _) = input.request_read(n);
        let (wo, _) = output.request_write(n);
        let half_steps = (self.steps as f32 - 1.0) / 2.0;
        {
            let in_slice = input.read_slice(ri, n);
            let out_slice = output.write_slice(wo, n);
            for i in 0..n {
                out_slice[i] = (in_slice[i].clamp(-1.0, 1.0) * half_steps).round() / half_steps;
            }
        }
        input.finish_read(n);
        let _ = output.finish_write(n);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_line_delays_by_configured_samples() {
        let mut delay = Delay::new(1.0, 10.0);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        delay.set_in(0, Some(input.clone())).unwrap();
        delay.set_out(0, Some(output.clone())).unwrap();
        delay.set(Field::DelayTime, Value::Float(0.3)).unwrap();
        delay.start().unwrap();
        input.write_all(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        delay.mix().unwrap();
        let mut out = [0.0f32; 5];
        output.read_all(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn repeat_once_plays_back_then_resumes_live_input() {
        let mut repeat = Repeat::new(1.0, 4.0);
        let input = Arc::new(Buffer::new(32));
        let output = Arc::new(Buffer::new(32));
        repeat.set_in(0, Some(input.clone())).unwrap();
        repeat.set_out(0, Some(output.clone())).unwrap();
        repeat.set(Field::RepeatTime, Value::Float(0.5)).unwrap();
        repeat.start().unwrap();
        input.write_all(&[1.0, 2.0, 3.0, 4.0, 9.0]).unwrap();
        repeat.mix().unwrap();
        let mut out = [0.0f32; 5];
        output.read_all(&mut out);
        assert_eq!(out, [1.0, 2.0, 1.0, 2.0, 9.0]);
    }

    #[test]
    fn quantize_snaps_to_nearest_level() {
        let mut q = Quantize::new();
        let input = Arc::new(Buffer::new(8));
        let output = Arc::new(Buffer::new(8));
        q.set_in(0, Some(input.clone())).unwrap();
        q.set_out(0, Some(output.clone())).unwrap();
        q.set(Field::QuantizeSteps, Value::Int(3)).unwrap();
        q.start().unwrap();
        input.write_all(&[0.9, -0.9, 0.1]).unwrap();
        q.mix().unwrap();
        let mut out = [0.0f32; 3];
        output.read_all(&mut out);
        assert_eq!(out, [1.0, -1.0, 0.0]);
    }
}
