//! Shared port-binding storage used by every concrete [`crate::processor::Processor`].
//!
//! Most processors hold a small fixed or growable list of optional buffer
//! bindings for their inputs and, separately, their outputs. This is that
//! list, factored out so `set_in`/`set_out`/`info` bounds-checking isn't
//! reimplemented per module.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use std::sync::Arc;

/// A fixed- or growable-size list of optional buffer bindings.
#[derive(Default, Clone)]
pub struct Ports {
    slots: Vec<Option<Arc<Buffer>>>,
    /// If set, `set` beyond the current length grows the list up to this
    /// cap instead of failing with `InvalidLocation` (used by Distribute
    /// and the Basic mixer, whose port counts are open-ended).
    growable_to: Option<usize>,
}

impl Ports {
    pub fn fixed(count: usize) -> Self {
        Ports {
            slots: vec![None; count],
            growable_to: None,
        }
    }

    pub fn growable(initial: usize, cap: usize) -> Self {
        Ports {
            slots: vec![None; initial],
            growable_to: Some(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, port: u32) -> Result<&Option<Arc<Buffer>>> {
        self.slots.get(port as usize).ok_or(Error::InvalidLocation)
    }

    pub fn get_arc(&self, port: u32) -> Option<Arc<Buffer>> {
        self.slots.get(port as usize).and_then(|s| s.clone())
    }

    pub fn set(&mut self, port: u32, buffer: Option<Arc<Buffer>>) -> Result<()> {
        let idx = port as usize;
        if idx >= self.slots.len() {
            match self.growable_to {
                Some(cap) if idx < cap => self.slots.resize(idx + 1, None),
                _ => return Err(Error::InvalidLocation),
            }
        }
        self.slots[idx] = buffer;
        Ok(())
    }

    pub fn all_bound(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Option<Arc<Buffer>>> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Option<Arc<Buffer>>> {
        self.slots.iter_mut()
    }

    /// Number of trailing ports with no bound buffer trimmed away. Used by
    /// the Basic mixer, where "setting a bound source to an unbound
    /// buffer removes it" only matters for the last source.
    pub fn trim_trailing_unbound(&mut self) {
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rejects_out_of_range_port() {
        let mut ports = Ports::fixed(2);
        assert_eq!(ports.set(2, None), Err(Error::InvalidLocation));
    }

    #[test]
    fn growable_extends_up_to_cap() {
        let mut ports = Ports::growable(0, 4);
        ports.set(3, Some(Arc::new(Buffer::new(4)))).unwrap();
        assert_eq!(ports.len(), 4);
        assert_eq!(ports.set(4, None), Err(Error::InvalidLocation));
    }
}
