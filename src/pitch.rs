//! Phase-vocoder pitch shifting built on the overlaps-add FFT windowing
//! scaffold.
//!
//! Each hop's spectrum is analyzed into per-bin magnitude and a
//! phase-unwrapped true frequency, bins are remapped by the pitch ratio
//! (summing magnitude into shared destination bins and scaling their
//! frequency), and a fresh spectrum is resynthesized from a running phase
//! accumulator before the inverse transform.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::fft_window::Window;
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use num_complex::Complex32;
use std::f32::consts::TAU;
use std::sync::Arc;

fn wrap_phase(mut phase: f32) -> f32 {
    phase -= TAU * (phase / TAU).round();
    phase
}

pub struct PitchShift {
    input: Ports,
    output: Ports,
    state: State,
    bypass: bool,
    pitch: f32,
    sample_rate: f32,
    framesize: usize,
    hop: usize,
    window: Window,

    prev_phase: Vec<f32>,
    synth_phase: Vec<f32>,
    mag_scratch: Vec<f32>,
    phase_scratch: Vec<f32>,
    out_mag: Vec<f32>,
    out_freq: Vec<f32>,
}

impl PitchShift {
    pub fn new(sample_rate: f32, framesize: usize, oversampling: usize) -> Self {
        let bin_count = framesize / 2 + 1;
        PitchShift {
            input: Ports::fixed(1),
            output: Ports::fixed(1),
            state: State::Idle,
            bypass: false,
            pitch: 1.0,
            sample_rate,
            framesize,
            hop: framesize / oversampling,
            window: Window::new(framesize, oversampling),
            prev_phase: vec![0.0; bin_count],
            synth_phase: vec![0.0; bin_count],
            mag_scratch: vec![0.0; bin_count],
            phase_scratch: vec![0.0; bin_count],
            out_mag: vec![0.0; bin_count],
            out_freq: vec![0.0; bin_count],
        }
    }

    fn process_hop(
        spectrum: &mut [Complex32],
        prev_phase: &mut [f32],
        synth_phase: &mut [f32],
        mag_scratch: &mut [f32],
        phase_scratch: &mut [f32],
        out_mag: &mut [f32],
        out_freq: &mut [f32],
        framesize: usize,
        hop: usize,
        sample_rate: f32,
        pitch: f32,
    ) {
        let bin_count = spectrum.len();
        let bin_freq = sample_rate / framesize as f32;
        let expected_advance = TAU * hop as f32 / framesize as f32;

        for k in 0..bin_count {
            mag_scratch[k] = spectrum[k].norm();
            phase_scratch[k] = spectrum[k].arg();
        }

        for k in 0..bin_count {
            let delta = wrap_phase(phase_scratch[k] - prev_phase[k] - k as f32 * expected_advance);
            prev_phase[k] = phase_scratch[k];
            let deviation = delta * framesize as f32 / (TAU * hop as f32);
            let true_freq = (k as f32 + deviation) * bin_freq;

            out_mag[k] = 0.0;
            out_freq[k] = 0.0;

            let dest = (k as f32 * pitch).floor() as isize;
            if dest >= 0 && (dest as usize) < bin_count {
                out_mag[dest as usize] += mag_scratch[k];
                out_freq[dest as usize] = true_freq * pitch;
            }
        }

        for j in 0..bin_count {
            if out_mag[j] > 0.0 {
                synth_phase[j] += TAU * hop as f32 / sample_rate * out_freq[j];
                spectrum[j] = Complex32::from_polar(out_mag[j], synth_phase[j]);
            } else {
                spectrum[j] = Complex32::default();
                synth_phase[j] = 0.0;
            }
        }
    }
}

impl Processor for PitchShift {
    fn info(&self) -> Info {
        Info {
            name: "PitchShift",
            description: "Phase-vocoder pitch shift decoupled from playback speed",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[Field::PitchShift, Field::Samplerate, Field::Bypass],
        }
    }

    fn state(&self) -> State {
        self.state
    }

    fn set_in(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.input.set(port, buffer)
    }

    fn set_out(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        processor::require_idle(self.state)?;
        self.output.set(port, buffer)
    }

    fn set(&mut self, field: Field, value: Value) -> Result<()> {
        match field {
            Field::PitchShift => self.pitch = value.as_float().ok_or(Error::InvalidValue)?.max(0.01),
            Field::Samplerate => self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?,
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::PitchShift => Value::Float(self.pitch),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::Bypass => Value::Bool(self.bypass),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.input.get_arc(0).is_none() || self.output.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)?;
        self.prev_phase.iter_mut().for_each(|p| *p = 0.0);
        self.synth_phase.iter_mut().for_each(|p| *p = 0.0);
        Ok(())
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.input.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.output.get_arc(0).ok_or(Error::BufferMissing)?;

        if self.bypass || (self.pitch - 1.0).abs() < 1e-6 {
            transfer_samples(&input, &output);
            return Ok(());
        }

        let frames = input.available_read().min(output.available_write());
        if frames == 0 {
            return Ok(());
        }

        let framesize = self.framesize;
        let hop = self.hop;
        let sample_rate = self.sample_rate;
        let pitch = self.pitch;
        let prev_phase = &mut self.prev_phase;
        let synth_phase = &mut self.synth_phase;
        let mag_scratch = &mut self.mag_scratch;
        let phase_scratch = &mut self.phase_scratch;
        let out_mag = &mut self.out_mag;
        let out_freq = &mut self.out_freq;

        for _ in 0..frames {
            let (ro, rn) = input.request_read(1);
            if rn == 0 {
                break;
            }
            let x = input.read_slice(ro, 1)[0];
            input.finish_read(1);

            let y = self.window.process(x, |spectrum| {
                Self::process_hop(
                    spectrum,
                    prev_phase,
                    synth_phase,
                    mag_scratch,
                    phase_scratch,
                    out_mag,
                    out_freq,
                    framesize,
                    hop,
                    sample_rate,
                    pitch,
                );
            });

            let (wo, wn) = output.request_write(1);
            if wn == 0 {
                break;
            }
            output.write_slice(wo, 1)[0] = y;
            let _ = output.finish_write(1);
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        transition_end(&mut self.state)
    }

    fn input_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.input.get_arc(port)
    }

    fn output_buffer(&self, port: u32) -> Option<Arc<Buffer>> {
        self.output.get_arc(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_pitch_bypasses_fft_entirely() {
        let mut shift = PitchShift::new(44100.0, 256, 4);
        let input = Arc::new(Buffer::new(64));
        let output = Arc::new(Buffer::new(64));
        shift.set_in(0, Some(input.clone())).unwrap();
        shift.set_out(0, Some(output.clone())).unwrap();
        shift.start().unwrap();
        input.write_all(&[0.25, -0.25, 0.5]).unwrap();
        shift.mix().unwrap();
        let mut out = [0.0f32; 3];
        output.read_all(&mut out);
        assert_eq!(out, [0.25, -0.25, 0.5]);
    }

    #[test]
    fn pitch_shift_of_440hz_sine_settles_near_880hz_at_double_pitch() {
        let framesize = 2048;
        let oversampling = 4;
        let sample_rate = 44100.0f32;
        let mut shift = PitchShift::new(sample_rate, framesize, oversampling);
        shift.set(Field::PitchShift, Value::Float(2.0)).unwrap();
        let input = Arc::new(Buffer::new(16384));
        let output = Arc::new(Buffer::new(16384));
        shift.set_in(0, Some(input.clone())).unwrap();
        shift.set_out(0, Some(output.clone())).unwrap();
        shift.start().unwrap();

        let n = 8192;
        let freq = 440.0f32;
        let samples: Vec<f32> = (0..n)
            .map(|i| (TAU * freq * i as f32 / sample_rate).sin())
            .collect();
        input.write_all(&samples).unwrap();
        shift.mix().unwrap();
        let mut out = vec![0.0f32; n];
        let read = output.read_all(&mut out);
        assert!(read > 0);

        let latency = framesize - framesize / oversampling;
        let start = latency + framesize;
        if start < read {
            let settled = &out[start..read];
            let mut zero_crossings = 0;
            for w in settled.windows(2) {
                if w[0].signum() != w[1].signum() {
                    zero_crossings += 1;
                }
            }
            let seconds = settled.len() as f32 / sample_rate;
            let estimated_freq = zero_crossings as f32 / 2.0 / seconds;
            assert!(
                (estimated_freq - 880.0).abs() < 150.0,
                "estimated_freq={estimated_freq}"
            );
        }
    }
}
