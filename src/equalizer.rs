//! Multi-band parametric equalizer applied directly in the frequency
//! domain on top of the FFT windowing scaffold.
//!
//! Each band contributes a Gaussian bump (in log2-frequency space, width
//! set by Q) to a per-bin gain curve; the curve is rebuilt whenever a band
//! changes and then just multiplied into every hop's spectrum, so the
//! audio-rate path does no trigonometry of its own.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::fft_window::Window;
use crate::field::{Field, Value};
use crate::ports::Ports;
use crate::processor::{
    self, transfer_samples, transition_end, transition_start, Capabilities, Info, Processor, State,
};
use std::sync::Arc;

const MAX_BANDS: usize = 16;

#[derive(Clone, Copy)]
struct Band {
    freq: f32,
    q: f32,
    gain_db: f32,
    active: bool,
}

impl Default for Band {
    fn default() -> Self {
        Band { freq: 1000.0, q: 1.0, gain_db: 0.0, active: false }
    }
}

pub struct Equalizer {
    input: Ports,
    output: Ports,
    state: State,
    bypass: bool,
    sample_rate: f32,
    framesize: usize,
    window: Window,

    bands: [Band; MAX_BANDS],
    bin_gain: Vec<f32>,
}

impl Equalizer {
    pub fn new(sample_rate: f32, framesize: usize, oversampling: usize) -> Self {
        let bin_count = framesize / 2 + 1;
        let mut eq = Equalizer {
            input: Ports::fixed(1),
            output: Ports::fixed(1),
            state: State::Idle,
            bypass: false,
            sample_rate,
            framesize,
            window: Window::new(framesize, oversampling),
            bands: [Band::default(); MAX_BANDS],
            bin_gain: vec![1.0; bin_count],
        };
        eq.rebuild_curve();
        eq
    }

    fn rebuild_curve(&mut self) {
        let bin_count = self.bin_gain.len();
        for k in 0..bin_count {
            let bin_freq = (k as f32 * self.sample_rate / self.framesize as f32).max(1.0);
            let mut gain_db = 0.0f32;
            for band in self.bands.iter().filter(|b| b.active) {
                let octaves = (bin_freq / band.freq).log2();
                let width = (1.0 / band.q.max(0.01)).max(1e-3);
                gain_db += band.gain_db * (-(octaves * octaves) / (2.0 * width * width)).exp();
            }
            self.bin_gain[k] = 10f32.powf(gain_db / 20.0);
        }
    }
}

impl Processor for Equalizer {
    fn info(&self) -> Info {
        Info {
            name: "Equalizer",
            description: "Multi-band parametric equalizer applied in the frequency domain",
            capabilities: Capabilities::empty(),
            min_inputs: 1,
            max_inputs: 1,
            outputs: 1,
            fields: &[Field::EqualizerBand, Field::Samplerate, Field::Bypass],
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
            Field::EqualizerBand => {
                let (index, freq, q, gain_db) = value.as_curve4().ok_or(Error::InvalidValue)?;
                let index = index as usize;
                if index >= MAX_BANDS {
                    return Err(Error::InvalidValue);
                }
                self.bands[index] = Band { freq: freq.max(1.0), q: q.max(0.01), gain_db, active: true };
                self.rebuild_curve();
            }
            Field::Samplerate => {
                self.sample_rate = value.as_float().ok_or(Error::InvalidValue)?;
                self.rebuild_curve();
            }
            Field::Bypass => self.bypass = value.as_bool().ok_or(Error::InvalidValue)?,
            _ => return Err(Error::InvalidField),
        }
        Ok(())
    }

    fn get(&self, field: Field) -> Result<Value> {
        Ok(match field {
            Field::EqualizerBand => Value::Int(self.bands.iter().filter(|b| b.active).count() as i64),
            Field::Samplerate => Value::Float(self.sample_rate),
            Field::Bypass => Value::Bool(self.bypass),
            _ => return Err(Error::InvalidField),
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.input.get_arc(0).is_none() || self.output.get_arc(0).is_none() {
            return Err(Error::BufferMissing);
        }
        transition_start(&mut self.state)
    }

    fn mix(&mut self) -> Result<()> {
        let input = self.input.get_arc(0).ok_or(Error::BufferMissing)?;
        let output = self.output.get_arc(0).ok_or(Error::BufferMissing)?;

        if self.bypass || self.bands.iter().all(|b| !b.active) {
            transfer_samples(&input, &output);
            return Ok(());
        }

        let frames = input.available_read().min(output.available_write());
        if frames == 0 {
            return Ok(());
        }

        let bin_gain = &self.bin_gain;
        for _ in 0..frames {
            let (ro, rn) = input.request_read(1);
            if rn == 0 {
                break;
            }
            let x = input.read_slice(ro, 1)[0];
            input.finish_read(1);

            let y = self.window.process(x, |spectrum| {
                for (bin, gain) in spectrum.iter_mut().zip(bin_gain.iter()) {
                    *bin *= *gain;
                }
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
    fn no_active_bands_bypasses_fft() {
        let mut eq = Equalizer::new(44100.0, 256, 4);
        let input = Arc::new(Buffer::new(64));
        let output = Arc::new(Buffer::new(64));
        eq.set_in(0, Some(input.clone())).unwrap();
        eq.set_out(0, Some(output.clone())).unwrap();
        eq.start().unwrap();
        input.write_all(&[0.1, -0.2, 0.3]).unwrap();
        eq.mix().unwrap();
        let mut out = [0.0f32; 3];
        output.read_all(&mut out);
        assert_eq!(out, [0.1, -0.2, 0.3]);
    }

    #[test]
    fn boosting_a_band_raises_bin_gain_near_its_center_frequency() {
        let mut eq = Equalizer::new(44100.0, 256, 4);
        eq.set(Field::EqualizerBand, Value::Curve4(0.0, 1000.0, 1.0, 12.0)).unwrap();
        let bin_count = 256 / 2 + 1;
        let center_bin = (1000.0 * 256.0 / 44100.0).round() as usize;
        assert!(center_bin < bin_count);
        assert!(eq.bin_gain[center_bin] > 1.5);
        assert!(eq.bin_gain[0] < eq.bin_gain[center_bin]);
    }
}
