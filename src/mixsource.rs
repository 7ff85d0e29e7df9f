//! A mixer input slot that may optionally own an upstream processor:
//! "mix my upstream, then read my buffer."

use crate::buffer::Buffer;
use crate::error::Result;
use crate::processor::Processor;
use std::sync::Arc;

/// One mixer input: a bound buffer, optionally fed by an upstream
/// processor that this slot mixes before the buffer is read each cycle.
/// If the upstream invocation fails, the slot falls back to whatever is
/// already (or isn't) in the buffer rather than propagating the error.
#[derive(Default)]
pub struct MixSource {
    pub buffer: Option<Arc<Buffer>>,
    pub upstream: Option<Box<dyn Processor>>,
}

impl MixSource {
    pub fn new() -> Self {
        MixSource::default()
    }

    pub fn start(&mut self) -> Result<()> {
        if let Some(upstream) = &mut self.upstream {
            upstream.start()?;
        }
        Ok(())
    }

    /// Mixes the upstream processor, if any, swallowing its error (a
    /// failed upstream contributes silence rather than aborting the
    /// whole mixer).
    pub fn refresh(&mut self) {
        if let Some(upstream) = &mut self.upstream {
            let _ = upstream.mix();
        }
    }

    pub fn end(&mut self) -> Result<()> {
        if let Some(upstream) = &mut self.upstream {
            upstream.end()?;
        }
        Ok(())
    }
}
