//! The overlap-add FFT windowing scaffold shared by convolution, pitch
//! shift, and the equalizer.
//!
//! Framing, windowing, and the hop/overlap bookkeeping live here; callers
//! supply only a frequency-domain operator via [`Window::process`].

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

/// A reusable overlap-add buffer parameterized by framesize *N* (a power
/// of two, at most [`crate::config::MAX_FRAMESIZE`]) and oversampling
/// factor *O*.
pub struct Window {
    framesize: usize,
    hop: usize,
    overlap: usize,
    window: Vec<f32>,
    input_fifo: Vec<f32>,
    output_fifo: Vec<f32>,
    accumulator: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    time_scratch: Vec<f32>,
    freq_scratch: Vec<Complex32>,
    scale: f32,
}

impl Window {
    pub fn new(framesize: usize, oversampling: usize) -> Self {
        assert!(framesize.is_power_of_two());
        assert!(oversampling >= 1);
        let hop = framesize / oversampling;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(framesize);
        let inverse = planner.plan_fft_inverse(framesize);
        let window = hann_window(framesize);
        Window {
            framesize,
            hop,
            overlap: framesize - hop,
            window,
            input_fifo: vec![0.0; framesize],
            output_fifo: vec![0.0; framesize],
            accumulator: vec![0.0; 2 * framesize],
            time_scratch: forward.make_input_vec(),
            freq_scratch: forward.make_output_vec(),
            forward,
            inverse,
            scale: 2.0 / (framesize as f32 / 2.0 * oversampling as f32),
        }
    }

    /// Latency introduced by the scaffold, in samples: `N - H`.
    pub fn latency(&self) -> usize {
        self.framesize - self.hop
    }

    /// Processes one input sample through the scaffold, invoking `op` on
    /// the frequency-domain spectrum once per hop, and returns the
    /// corresponding output sample (delayed by [`Window::latency`]).
    pub fn process<F: FnMut(&mut [Complex32])>(&mut self, input: f32, mut op: F) -> f32 {
        let n = self.framesize;
        let h = self.hop;

        self.input_fifo[self.overlap] = input;
        let out = self.output_fifo[self.overlap - (n - h)];
        self.overlap += 1;

        if self.overlap == n {
            for i in 0..n {
                self.time_scratch[i] = self.input_fifo[i] * self.window[i];
            }
            self.forward
                .process(&mut self.time_scratch, &mut self.freq_scratch)
                .expect("forward FFT shape mismatch");

            op(&mut self.freq_scratch);

            self.inverse
                .process(&mut self.freq_scratch, &mut self.time_scratch)
                .expect("inverse FFT shape mismatch");

            for i in 0..n {
                self.accumulator[i] += self.time_scratch[i] * self.window[i] * self.scale;
            }

            self.output_fifo[..h].copy_from_slice(&self.accumulator[..h]);
            let acc_len = self.accumulator.len();
            self.accumulator.copy_within(h..acc_len, 0);
            for v in &mut self.accumulator[acc_len - h..] {
                *v = 0.0;
            }

            self.input_fifo.copy_within(h..n, 0);
            self.overlap = n - h;
        }

        out
    }
}

/// A symmetric Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_operator_reconstructs_after_latency() {
        let mut window = Window::new(64, 4);
        let latency = window.latency();
        let n = 256;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 5.0 * i as f32 / 64.0).sin())
            .collect();
        let mut output = Vec::with_capacity(n);
        for &x in &input {
            output.push(window.process(x, |_spectrum| {}));
        }
        // After the latency settles, output should track the (delayed)
        // input reasonably closely for an identity frequency-domain op.
        let start = latency + 64;
        if start < n {
            let mut max_err = 0.0f32;
            for i in start..n {
                let err = (output[i] - input[i - latency]).abs();
                max_err = max_err.max(err);
            }
            assert!(max_err < 0.5, "max_err={max_err}");
        }
    }
}
