//! Vector base amplitude panning: per-speaker gains for a source direction
//! given a ring of speaker azimuths.
//!
//! The full VBAP formulation triangulates an arbitrary 3D speaker layout
//! and solves a 3x3 system per source direction. This engine's space/plane
//! mixers only ever need a horizontal speaker ring (the common case for
//! >2-channel playback layouts such as 5.1/7.1), so the implementation
//! here is the 2D specialization: speakers are sorted by azimuth, the pair
//! that brackets the source direction is found, and gains for that pair
//! alone are solved and normalized for equal power. A source that falls
//! outside of every pair (shouldn't happen once speakers wrap a full
//! circle, but can with a partial arc layout) is handed entirely to the
//! nearest speaker.

use std::f32::consts::TAU;

/// A horizontal speaker layout: unit direction vectors in the XZ plane
/// (Y, elevation, is ignored), given in any order; they are sorted by
/// azimuth internally.
pub struct SpeakerLayout {
    /// `(original_index, azimuth_radians)`, sorted by azimuth ascending.
    speakers: Vec<(usize, f32)>,
}

fn azimuth(direction: [f32; 3]) -> f32 {
    direction[0].atan2(direction[2]).rem_euclid(TAU)
}

impl SpeakerLayout {
    /// Builds a layout from speaker positions (need not be normalized or
    /// pre-sorted; height is dropped).
    pub fn new(positions: &[[f32; 3]]) -> Self {
        let mut speakers: Vec<(usize, f32)> = positions
            .iter()
            .enumerate()
            .map(|(i, &p)| (i, azimuth(p)))
            .collect();
        speakers.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        SpeakerLayout { speakers }
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    /// Computes a gain per original speaker index for a source at
    /// `direction` (need not be normalized). At most two entries are
    /// non-zero. Gains are equal-power normalized: the sum of their
    /// squares is 1 whenever at least one speaker brackets the source.
    pub fn gains(&self, direction: [f32; 3]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.speakers.len()];
        if self.speakers.is_empty() {
            return out;
        }
        if self.speakers.len() == 1 {
            out[self.speakers[0].0] = 1.0;
            return out;
        }

        let target = azimuth(direction);
        let n = self.speakers.len();
        let mut pair = None;
        for i in 0..n {
            let (_, a0) = self.speakers[i];
            let (_, a1) = self.speakers[(i + 1) % n];
            let span = if a1 > a0 { a1 - a0 } else { a1 + TAU - a0 };
            let rel = if target >= a0 { target - a0 } else { target + TAU - a0 };
            if rel <= span {
                pair = Some((i, (i + 1) % n, rel, span));
                break;
            }
        }

        let Some((i0, i1, rel, span)) = pair else {
            // Degenerate (zero-span pair, e.g. duplicate speaker angles);
            // fall back to the nearest single speaker.
            let (idx, _) = self
                .speakers
                .iter()
                .min_by(|a, b| {
                    let da = (a.1 - target).abs().min(TAU - (a.1 - target).abs());
                    let db = (b.1 - target).abs().min(TAU - (b.1 - target).abs());
                    da.partial_cmp(&db).unwrap()
                })
                .unwrap();
            out[*idx] = 1.0;
            return out;
        };

        if span <= 1e-6 {
            out[self.speakers[i0].0] = 1.0;
            return out;
        }

        // Within the pair, pan linearly by fraction then equal-power
        // normalize, matching the equal-power pan law used elsewhere in
        // the engine (e.g. crate::volume).
        let frac = (rel / span).clamp(0.0, 1.0);
        let g0 = (1.0 - frac).sqrt();
        let g1 = frac.sqrt();
        out[self.speakers[i0].0] = g0;
        out[self.speakers[i1].0] = g1;
        out
    }
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 1e-9 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}

fn mat3_inverse(rows: [[f32; 3]; 3]) -> Option<[[f32; 3]; 3]> {
    let [a, b, c] = rows;
    let det = a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
        + a[2] * (b[0] * c[1] - b[1] * c[0]);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv_det = 1.0 / det;
    // Cofactor matrix, transposed (adjugate), scaled by 1/det: the
    // inverse of the matrix whose *rows* are a, b, c.
    let cof = [
        [
            b[1] * c[2] - b[2] * c[1],
            a[2] * c[1] - a[1] * c[2],
            a[1] * b[2] - a[2] * b[1],
        ],
        [
            b[2] * c[0] - b[0] * c[2],
            a[0] * c[2] - a[2] * c[0],
            a[2] * b[0] - a[0] * b[2],
        ],
        [
            b[0] * c[1] - b[1] * c[0],
            a[1] * c[0] - a[0] * c[1],
            a[0] * b[1] - a[1] * b[0],
        ],
    ];
    Some([
        [cof[0][0] * inv_det, cof[1][0] * inv_det, cof[2][0] * inv_det],
        [cof[0][1] * inv_det, cof[1][1] * inv_det, cof[2][1] * inv_det],
        [cof[0][2] * inv_det, cof[1][2] * inv_det, cof[2][2] * inv_det],
    ])
}

/// A non-coplanar (3D) speaker layout, triangulated into candidate speaker
/// triples. Unlike [`SpeakerLayout`], which assumes a horizontal ring, this
/// solves the full VBAP system: for a source direction, it searches its
/// triples for one whose inverted base matrix yields all non-negative
/// gains, per Pulkki's vector base amplitude panning.
///
/// Triangulation here is exhaustive over every combination of three
/// speakers rather than a proper convex-hull triangulation, which is fine
/// for the small (`<= 32`, [`crate::config::MAX_SPEAKER_COUNT`]) speaker
/// counts this engine addresses and is only ever evaluated when a source's
/// direction changes, not per audio frame.
pub struct Triangulation {
    directions: Vec<[f32; 3]>,
    triples: Vec<[usize; 3]>,
}

impl Triangulation {
    pub fn new(positions: &[[f32; 3]]) -> Self {
        let directions: Vec<[f32; 3]> = positions.iter().map(|&p| normalize(p)).collect();
        let n = directions.len();
        let mut triples = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                for k in (j + 1)..n {
                    triples.push([i, j, k]);
                }
            }
        }
        Triangulation { directions, triples }
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }

    /// Computes a gain per original speaker index for a source at
    /// `direction` (need not be normalized). At most three entries are
    /// non-zero. Falls back to the nearest single speaker if no triple (or
    /// pair, for a 2-speaker layout) brackets the direction.
    pub fn gains(&self, direction: [f32; 3]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.directions.len()];
        if self.directions.is_empty() {
            return out;
        }
        let p = normalize(direction);

        for &[i, j, k] in &self.triples {
            let rows = [self.directions[i], self.directions[j], self.directions[k]];
            let Some(inv) = mat3_inverse(rows) else {
                continue;
            };
            // g = p * L^-1, i.e. column c of the inverse dotted with p.
            let g = [
                p[0] * inv[0][0] + p[1] * inv[1][0] + p[2] * inv[2][0],
                p[0] * inv[0][1] + p[1] * inv[1][1] + p[2] * inv[2][1],
                p[0] * inv[0][2] + p[1] * inv[1][2] + p[2] * inv[2][2],
            ];
            const EPS: f32 = -1e-4;
            if g[0] >= EPS && g[1] >= EPS && g[2] >= EPS {
                let norm = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]).sqrt().max(1e-9);
                out[i] = (g[0].max(0.0)) / norm;
                out[j] = (g[1].max(0.0)) / norm;
                out[k] = (g[2].max(0.0)) / norm;
                return out;
            }
        }

        // No triple brackets this direction (e.g. a sparse or degenerate
        // layout): hand the source entirely to its nearest speaker.
        let (idx, _) = self
            .directions
            .iter()
            .enumerate()
            .map(|(idx, &d)| (idx, d[0] * p[0] + d[1] * p[1] + d[2] * p[2]))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        out[idx] = 1.0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_at_speaker_direction_is_fully_that_speaker() {
        let layout = SpeakerLayout::new(&[[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]]);
        let gains = layout.gains([1.0, 0.0, 0.0]);
        let idx = gains.iter().position(|&g| g > 0.99).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn gains_are_equal_power_normalized_between_a_bracketing_pair() {
        let layout = SpeakerLayout::new(&[[-1.0, 0.0, 1.0], [1.0, 0.0, 1.0]]);
        let gains = layout.gains([0.0, 0.0, 1.0]);
        let sum_sq: f32 = gains.iter().map(|g| g * g).sum();
        assert!((sum_sq - 1.0).abs() < 1e-4, "sum_sq={sum_sq}");
    }

    #[test]
    fn single_speaker_layout_gets_all_the_gain() {
        let layout = SpeakerLayout::new(&[[0.0, 0.0, 1.0]]);
        let gains = layout.gains([1.0, 0.0, 0.0]);
        assert_eq!(gains, vec![1.0]);
    }

    #[test]
    fn triangulation_concentrates_gain_on_the_nearest_speaker() {
        let speakers = [
            [-1.0, 0.5, -1.0],
            [1.0, 0.5, -1.0],
            [0.0, 0.5, 1.0],
            [0.0, -1.0, 0.0],
        ];
        let tri = Triangulation::new(&speakers);
        let gains = tri.gains([0.0, 0.5, 1.0]);
        let idx = gains.iter().position(|&g| g > 0.9).unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn triangulation_gains_are_non_negative_and_power_normalized() {
        let speakers = [
            [-1.0, 0.5, -1.0],
            [1.0, 0.5, -1.0],
            [0.0, 0.5, 1.0],
            [0.0, -1.0, 0.0],
        ];
        let tri = Triangulation::new(&speakers);
        let gains = tri.gains([0.3, 0.2, 0.5]);
        assert!(gains.iter().all(|&g| g >= 0.0));
        let sum_sq: f32 = gains.iter().map(|g| g * g).sum();
        assert!((sum_sq - 1.0).abs() < 1e-3, "sum_sq={sum_sq}");
    }
}
