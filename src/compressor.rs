//! Feed-forward multi-channel compressor with knee, predelay, and an
//! adaptive attack/release envelope.
//!
//! Channels are gain-linked: the detector tracks the loudest channel each
//! sample and the same gain reduction is applied to every channel, the
//! usual stereo-bus compressor behavior.

use crate::buffer::Buffer;
use crate::config::{COMPRESSOR_CHUNK_SIZE, COMPRESSOR_MAX_PREDELAY};
use crate::error::{Error, Result};
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

const SPACING_DB: f32 = 5.0;

fn db2lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn lin2db(lin: f32) -> f32 {
    20.0 * lin.max(1e-8).log10()
}

/// Evaluates the cubic polynomial through `(0, y1) (1, y2) (2, y3) (3, y4)`
/// at `t` via Lagrange interpolation, matching the adaptive release curve.
fn release_curve(points: [f32; 4], t: f32) -> f32 {
    let xs = [0.0f32, 1.0, 2.0, 3.0];
    let mut acc = 0.0;
    for i in 0..4 {
        let mut term = points[i];
        for j in 0..4 {
            if i != j {
                term *= (t - xs[j]) / (xs[i] - xs[j]);
            }
        }
        acc += term;
    }
    acc
}

pub struct Compressor {
    channels: u32,
    inputs: Ports,
    outputs: Ports,
    state: State,
    bypass: bool,

    pregain_db: f32,
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_s: f32,
    release_s: f32,
    predelay_s: f32,
    postgain_db: f32,
    releasezone: [f32; 4],
    mix: f32,
    sample_rate: f32,

    knee_coefficient: f32,
    full_level_curve: f32,
    master_gain: f32,
    linear_threshold: f32,

    predelay_lines: Vec<Vec<f32>>,
    predelay_write: usize,
    detector_avg: f32,
    comp_gain: f32,
    chunk_remaining: usize,
    attack_rate: f32,
    release_rate: f32,
    desired_gain: f32,
}

impl Compressor {
    pub fn new(channels: u32, sample_rate: f32) -> Self {
        let mut c = Compressor {
            channels,
            inputs: Ports::fixed(channels as usize),
            outputs: Ports::fixed(channels as usize),
            state: State::Idle,
            bypass: false,
            pregain_db: 0.0,
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack_s: 0.003,
            release_s: 0.25,
            predelay_s: 0.006,
            postgain_db: 0.0,
            releasezone: [0.09, 0.16, 0.42, 0.96],
            mix: 1.0,
            sample_rate,
            knee_coefficient: 1.0,
            full_level_curve: 1.0,
            master_gain: 1.0,
            linear_threshold: db2lin(-24.0),
            predelay_lines: (0..channels)
                .map(|_| vec![0.0; COMPRESSOR_MAX_PREDELAY])
                .collect(),
            predelay_write: 0,
            detector_avg: 0.0,
            comp_gain: 1.0,
            chunk_remaining: 0,
            attack_rate: 1.0,
            release_rate: 1.0,
            desired_gain: 1.0,
        };
        c.reinit();
        c
    }

    fn predelay_samples(&self) -> usize {
        ((self.predelay_s * self.sample_rate) as usize).min(COMPRESSOR_MAX_PREDELAY - 1)
    }

    /// Recomputes `knee_coefficient`, `full_level_curve`, and `master_gain`
    /// from the current threshold/knee/ratio/postgain.
    fn reinit(&mut self) {
        self.linear_threshold = db2lin(self.threshold_db);
        let threshold_knee_linear = db2lin(self.threshold_db + self.knee_db);
        let target_slope = 1.0 / self.ratio.max(1.0001);
        let diff = (threshold_knee_linear - self.linear_threshold).max(1e-8);
        let mut lo = 0.1f32;
        let mut hi = 10000f32;
        for _ in 0..40 {
            let mid = 0.5 * (lo + hi);
            let slope = (-mid * diff).exp();
            if slope > target_slope {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        self.knee_coefficient = (0.5 * (lo + hi)).clamp(0.1, 10000.0);
        self.full_level_curve = self.curve(1.0).max(1e-8);
        self.master_gain = db2lin(self.postgain_db) * (1.0 / self.full_level_curve).powf(0.6);
    }

    /// Static compression curve: linear below threshold, a soft knee
    /// blending into the straight-line ratio segment above it.
    fn curve(&self, x: f32) -> f32 {
        if x < self.linear_threshold {
            return x;
        }
        let threshold_knee_linear = db2lin(self.threshold_db + self.knee_db);
        if x < threshold_knee_linear {
            self.linear_threshold
                + (1.0 - (-self.knee_coefficient * (x - self.linear_threshold)).exp())
                    / self.knee_coefficient
        } else {
            let knee_curve_db = lin2db(
                self.linear_threshold
                    + (1.0 - (-self.knee_coefficient * (threshold_knee_linear - self.linear_threshold)).exp())
                        / self.knee_coefficient,
            );
            let slope = 1.0 / self.ratio.max(1.0001);
            db2lin(knee_curve_db + slope * (lin2db(x) - self.threshold_db - self.knee_db))
        }
    }

    /// Recomputes the attack/release envelope rates once per 32-sample
    /// chunk from the current detector state.
    fn update_chunk_rates(&mut self) {
        let desired_gain = (self.detector_avg.clamp(-1.0, 1.0)).asin() * (2.0 / PI);
        self.desired_gain = desired_gain.max(1e-8);
        let comp_diff_db = lin2db(self.comp_gain / self.desired_gain);

        if comp_diff_db < 0.0 {
            let clamped = comp_diff_db.clamp(-12.0, 0.0);
            let t = (clamped + 12.0) / 12.0 * 3.0;
            let release_frac = release_curve(self.releasezone, t).max(1e-4);
            let release_samples = (release_frac * self.release_s * self.sample_rate).max(1.0);
            self.release_rate = db2lin(SPACING_DB / release_samples);
        }
        let attack_samples = (self.attack_s * self.sample_rate).max(1.0);
        let attenuate = comp_diff_db.max(0.5);
        self.attack_rate = 1.0 - (0.25 / attenuate).powf(1.0 / attack_samples);
    }

    fn process_sample(&mut self, x: f32) -> f32 {
        let pre = x * db2lin(self.pregain_db);
        let abs_x = pre.abs().max(1e-8);
        let y = self.curve(abs_x);
        let attenuation = (y / abs_x).clamp(0.0, 1.0);

        let rate = if attenuation > self.detector_avg {
            self.attack_rate
        } else {
            self.release_rate
        };
        self.detector_avg += (attenuation - self.detector_avg) * rate;
        self.comp_gain += (self.desired_gain - self.comp_gain) * rate;

        let wet = self.mix;
        let dry = 1.0 - wet;
        self.master_gain * (dry + wet * (FRAC_PI_2 * self.comp_gain.clamp(0.0, 1.0)).sin())
    }
}

impl Processor for Compressor {
    fn info(&self) -> Info {
        Info {
            name: "Compressor",
            description: "Feed-forward compressor with knee, predelay, and adaptive release",
            capabilities: Capabilities::empty(),
            min_inputs: self.channels,
            max_inputs: self.channels,
            outputs: self.channels,
            fields: &[
                Field::CompressorPregain,
                Field::CompressorThreshold,
                Field::CompressorKnee,
                Field::CompressorRatio,
                Field::CompressorAttack,
                Field::CompressorRelease,
                Field::CompressorPredelay,
                Field::CompressorPostgain,
                Field::CompressorReleasezone,
                Field::CompressorGain,
                Field::Mix,
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
            Field::CompressorPregain => self.pregain_db = value.as_float().ok_or(Error::InvalidValue)?,
            Field::CompressorThreshold => {
                self.threshold_db = value.as_float().ok_or(Error::InvalidValue)?;
                self.reinit();
            }
            Field::CompressorKnee => {
                self.knee_db = value.as_float().ok_or(Error::InvalidValue)?;
                self.reinit();
            }
            Field::CompressorRatio => {
                self.ratio = value.as_float().ok_or(Error::InvalidValue)?;
                self.reinit();
            }
            Field::CompressorAttack => self.attack_s = value.as_float().ok_or(Error::InvalidValue)?,
            Field::CompressorRelease => self.release_s = value.as_float().ok_or(Error::InvalidValue)?,
            Field::CompressorPredelay => self.predelay_s = value.as_float().ok_or(Error::InvalidValue)?,
            Field::CompressorPostgain => {
                self.postgain_db = value.as_float().ok_or(Error::InvalidValue)?;
                self.reinit();
            }
            Field::CompressorReleasezone => {
                let (a, b, c, d) = value.as_curve4().ok_or(Error::InvalidValue)?;
                self.releasezone = [a, b, c, d];
            }
            Field::Mix => self.mix = value.as_float().ok_or(Error::InvalidValue)?.clamp(0.0, 1.0),
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::CompressorPregain => Value::Float(self.pregain_db),
            Field::CompressorThreshold => Value::Float(self.threshold_db),
            Field::CompressorKnee => Value::Float(self.knee_db),
            Field::CompressorRatio => Value::Float(self.ratio),
            Field::CompressorAttack => Value::Float(self.attack_s),
            Field::CompressorRelease => Value::Float(self.release_s),
            Field::CompressorPredelay => Value::Float(self.predelay_s),
            Field::CompressorPostgain => Value::Float(self.postgain_db),
            Field::CompressorReleasezone => {
                let [a, b, c, d] = self.releasezone;
                Value::Curve4(a, b, c, d)
            }
            Field::CompressorGain => Value::Float(self.comp_gain),
            Field::Mix => Value::Float(self.mix),
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
        for line in &mut self.predelay_lines {
            line.iter_mut().for_each(|s| *s = 0.0);
        }
        self.predelay_write = 0;
        self.detector_avg = 0.0;
        self.comp_gain = 1.0;
        self.chunk_remaining = 0;
        self.reinit();
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        if self.bypass {
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
        let mut frames = usize::MAX;
        for c in 0..self.channels {
            let input = self.inputs.get_arc(c).ok_or(Error::BufferMissing)?;
            let output = self.outputs.get_arc(c).ok_or(Error::BufferMissing)?;
            frames = frames.min(input.available_read()).min(output.available_write());
        }
        if frames == 0 || frames == usize::MAX {
            return Ok(());
        }

        let delay = self.predelay_samples();
        let line_len = COMPRESSOR_MAX_PREDELAY;

        for _ in 0..frames {
            if self.chunk_remaining == 0 {
                self.update_chunk_rates();
                self.chunk_remaining = COMPRESSOR_CHUNK_SIZE;
            }
            self.chunk_remaining -= 1;

            let mut loudest = 0.0f32;
            let mut raw = [0.0f32; 32];
            for (c, buf_raw) in raw.iter_mut().enumerate().take(channels) {
                let input = self.inputs.get_arc(c as u32).unwrap();
                let (ro, rn) = input.request_read(1);
                if rn == 0 {
                    continue;
                }
                let x = input.read_slice(ro, 1)[0];
                input.finish_read(1);
                *buf_raw = x;
                loudest = loudest.max(x.abs());
                self.predelay_lines[c][self.predelay_write] = x;
            }

            let gain = self.process_sample(loudest);

            let read_pos = (self.predelay_write + line_len - delay) % line_len;
            for c in 0..channels {
                let output = self.outputs.get_arc(c as u32).unwrap();
                let (wo, wn) = output.request_write(1);
                if wn == 0 {
                    continue;
                }
                output.write_slice(wo, 1)[0] = self.predelay_lines[c][read_pos] * gain;
                let _ = output.finish_write(1);
            }
            self.predelay_write = (self.predelay_write + 1) % line_len;
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
    fn quiet_signal_passes_near_unity_gain() {
        let mut comp = Compressor::new(1, 44100.0);
        let input = Arc::new(Buffer::new(256));
        let output = Arc::new(Buffer::new(256));
        comp.set_in(0, Some(input.clone())).unwrap();
        comp.set_out(0, Some(output.clone())).unwrap();
        comp.start().unwrap();
        let samples = vec![0.01f32; 128];
        input.write_all(&samples).unwrap();
        comp.mix().unwrap();
        let mut out = vec![0.0f32; 128];
        let n = output.read_all(&mut out);
        assert!(n > 0);
        assert!(out[..n].iter().all(|s| s.abs() < 0.1));
    }

    #[test]
    fn loud_signal_is_attenuated_more_than_quiet_signal() {
        let mut quiet = Compressor::new(1, 44100.0);
        let mut loud = Compressor::new(1, 44100.0);
        let qi = Arc::new(Buffer::new(4096));
        let qo = Arc::new(Buffer::new(4096));
        let li = Arc::new(Buffer::new(4096));
        let lo = Arc::new(Buffer::new(4096));
        quiet.set_in(0, Some(qi.clone())).unwrap();
        quiet.set_out(0, Some(qo.clone())).unwrap();
        loud.set_in(0, Some(li.clone())).unwrap();
        loud.set_out(0, Some(lo.clone())).unwrap();
        quiet.start().unwrap();
        loud.start().unwrap();

        let quiet_signal = vec![0.05f32; 2000];
        let loud_signal = vec![0.9f32; 2000];
        qi.write_all(&quiet_signal).unwrap();
        li.write_all(&loud_signal).unwrap();
        quiet.mix().unwrap();
        loud.mix().unwrap();

        let mut qout = vec![0.0f32; 2000];
        let mut lout = vec![0.0f32; 2000];
        let qn = qo.read_all(&mut qout);
        let ln = lo.read_all(&mut lout);
        let quiet_ratio = qout[qn - 1].abs() / 0.05;
        let loud_ratio = lout[ln - 1].abs() / 0.9;
        assert!(loud_ratio < quiet_ratio);
    }

    #[test]
    fn bypass_transfers_without_compressing() {
        let mut comp = Compressor::new(1, 44100.0);
        let input = Arc::new(Buffer::new(16));
        let output = Arc::new(Buffer::new(16));
        comp.set_in(0, Some(input.clone())).unwrap();
        comp.set_out(0, Some(output.clone())).unwrap();
        comp.set(Field::Bypass, Value::Bool(true)).unwrap();
        comp.start().unwrap();
        input.write_all(&[0.9, -0.9]).unwrap();
        comp.mix().unwrap();
        let mut out = [0.0f32; 2];
        output.read_all(&mut out);
        assert_eq!(out, [0.9, -0.9]);
    }
}
