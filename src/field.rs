//! Named parameter fields exposed across the processor set.
//!
//! Every [`crate::processor::Processor::set`]/`get` call is keyed by one of
//! these. Not every processor accepts every field; an unsupported field
//! fails with `InvalidField`.

/// A parameter value carried alongside a [`Field`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Vec3(f32, f32, f32),
    Curve4(f32, f32, f32, f32),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f32),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_vec3(self) -> Option<(f32, f32, f32)> {
        match self {
            Value::Vec3(x, y, z) => Some((x, y, z)),
            _ => None,
        }
    }

    pub fn as_curve4(self) -> Option<(f32, f32, f32, f32)> {
        match self {
            Value::Curve4(a, b, c, d) => Some((a, b, c, d)),
            _ => None,
        }
    }
}

/// Every field name known to a built-in processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Buffer,
    Source,
    Volume,
    Pan,
    Bypass,
    FadeFrom,
    FadeTo,
    FadeTime,
    FadeType,
    GeneratorFrequency,
    GeneratorType,
    NoiseType,
    DelayTime,
    RepeatTime,
    RepeatMode,
    SpaceLocation,
    SpaceVelocity,
    SpaceDirection,
    SpaceUp,
    SpaceSoundspeed,
    SpaceDopplerFactor,
    SpaceMinDistance,
    SpaceMaxDistance,
    SpaceRolloff,
    SpaceAttenuation,
    BiquadFilter,
    Frequency,
    Q,
    Gain,
    Samplerate,
    Framesize,
    Oversampling,
    Mix,
    CompressorPregain,
    CompressorThreshold,
    CompressorKnee,
    CompressorRatio,
    CompressorAttack,
    CompressorRelease,
    CompressorPredelay,
    CompressorPostgain,
    CompressorReleasezone,
    CompressorGain,
    EqualizerBand,
    GateOpenThreshold,
    GateCloseThreshold,
    GateAttack,
    GateHold,
    GateRelease,
    QuantizeSteps,
    SpeedFactor,
    ResampleType,
    PitchShift,
    PlaneLocation,
    PlaneVelocity,
}
