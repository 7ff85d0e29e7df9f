//! Process-wide, name-keyed processor registry: factories, argument
//! metadata, and dynamic construction from a parsed argument vector
//!.
//!
//! LADSPA hosting (loading a shared object and wrapping its plugin
//! descriptors as segments) is an external collaborator; this module
//! exposes only the registration surface a LADSPA host would call into,
//! via the `Ladspa*` error variants and the same `register_segment`
//! entry point any other processor family uses.

use crate::config::MAX_REGISTERED_SEGMENTS;
use crate::error::{Error, Result};
use crate::processor::Processor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The type of a single constructor argument, used to validate and parse
/// the argument vector passed to [`Registry::make_segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Bool,
    Int,
    Float,
    String,
}

/// Metadata for one constructor argument.
#[derive(Debug, Clone)]
pub struct ArgDescriptor {
    pub name: &'static str,
    pub kind: ArgKind,
}

/// A parsed constructor argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(String),
}

impl Arg {
    fn kind(&self) -> ArgKind {
        match self {
            Arg::Bool(_) => ArgKind::Bool,
            Arg::Int(_) => ArgKind::Int,
            Arg::Float(_) => ArgKind::Float,
            Arg::String(_) => ArgKind::String,
        }
    }
}

type Factory = Arc<dyn Fn(&[Arg]) -> Result<Box<dyn Processor>> + Send + Sync>;

struct Segment {
    args: Vec<ArgDescriptor>,
    factory: Factory,
}

/// A fixed-capacity table mapping a processor name to its argument
/// descriptors and construction factory. One instance is meant to be
/// shared process-wide; registration mutations are expected to happen
/// before any audio-thread use.
#[derive(Default)]
pub struct Registry {
    segments: RwLock<HashMap<String, Segment>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `name` with its argument descriptor list and factory.
    /// Fails with `DuplicateSegment` on a name collision and `BadName`
    /// for an empty name. The table's capacity is fixed at
    /// [`MAX_REGISTERED_SEGMENTS`]; beyond that, registration fails with
    /// `OutOfMemory`.
    pub fn register_segment<F>(&self, name: &str, args: Vec<ArgDescriptor>, factory: F) -> Result<()>
    where
        F: Fn(&[Arg]) -> Result<Box<dyn Processor>> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(Error::BadName);
        }
        let mut segments = self.segments.write().unwrap();
        if segments.contains_key(name) {
            log::warn!("registry: refusing duplicate segment registration for {name:?}");
            return Err(Error::DuplicateSegment);
        }
        if segments.len() >= MAX_REGISTERED_SEGMENTS {
            log::warn!("registry: segment table full at {MAX_REGISTERED_SEGMENTS} entries");
            return Err(Error::OutOfMemory);
        }
        segments.insert(
            name.to_string(),
            Segment {
                args,
                factory: Arc::new(factory),
            },
        );
        log::debug!("registry: registered segment {name:?}");
        Ok(())
    }

    /// Nulls the entry for `name`. Fails with `BadSegment` if unregistered.
    pub fn deregister_segment(&self, name: &str) -> Result<()> {
        let mut segments = self.segments.write().unwrap();
        segments.remove(name).map(|_| ()).ok_or(Error::BadSegment)
    }

    /// Lists every currently registered name.
    pub fn list_segments(&self) -> Vec<String> {
        let segments = self.segments.read().unwrap();
        segments.keys().cloned().collect()
    }

    /// Returns `name`'s argument descriptor list, used to report field
    /// metadata to a caller before construction.
    pub fn make_segment_info(&self, name: &str) -> Result<Vec<ArgDescriptor>> {
        let segments = self.segments.read().unwrap();
        segments
            .get(name)
            .map(|s| s.args.clone())
            .ok_or(Error::BadSegment)
    }

    /// Constructs a new processor named `name`, validating `args` against
    /// the registered descriptor list (count and kind, positionally)
    /// before invoking the factory.
    pub fn make_segment(&self, name: &str, args: &[Arg]) -> Result<Box<dyn Processor>> {
        let factory = {
            let segments = self.segments.read().unwrap();
            let segment = segments.get(name).ok_or(Error::BadSegment)?;
            if segment.args.len() != args.len() {
                return Err(Error::BadArgumentCount);
            }
            for (descriptor, arg) in segment.args.iter().zip(args.iter()) {
                if descriptor.kind != arg.kind() {
                    return Err(Error::InvalidValue);
                }
            }
            segment.factory.clone()
        };
        (factory)(args)
    }
}

/// A loaded LADSPA shared object, kept alive for as long as any segment it
/// registered might still be constructed. Behind the `dylib` feature since
/// most embeddings never load third-party plugins.
#[cfg(feature = "dylib")]
pub struct PluginHandle {
    library: libloading::Library,
}

#[cfg(feature = "dylib")]
impl Registry {
    /// Opens the shared object at `path` and looks up its `ladspa_descriptor`
    /// entry point, the convention every LADSPA host dlopens. This stub
    /// stops at confirming the symbol resolves; translating the returned
    /// descriptor table into registered segments is host-specific plugin
    /// hosting, not part of this engine's core.
    pub fn load_plugin(&self, path: &std::path::Path) -> Result<PluginHandle> {
        log::debug!("registry: loading LADSPA library {path:?}");
        let library = unsafe { libloading::Library::new(path) }.map_err(|_| Error::LadspaOpenFailed)?;
        unsafe {
            library
                .get::<unsafe extern "C" fn(u64) -> *const std::ffi::c_void>(b"ladspa_descriptor\0")
                .map_err(|_| Error::LadspaBadLibrary)?;
        }
        Ok(PluginHandle { library })
    }

    /// Closes a previously loaded plugin library. Any segment the library
    /// registered keeps working until its factory is next invoked; callers
    /// are responsible for deregistering those segments first.
    pub fn close_plugin(&self, handle: PluginHandle) -> Result<()> {
        log::debug!("registry: closing LADSPA library");
        drop(handle.library);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    #[test]
    fn register_then_construct_round_trips() {
        let registry = Registry::new();
        registry
            .register_segment(
                "volume",
                vec![ArgDescriptor {
                    name: "channels",
                    kind: ArgKind::Int,
                }],
                |args| {
                    let Arg::Int(channels) = args[0] else {
                        return Err(Error::InvalidValue);
                    };
                    Ok(Box::new(Volume::new(channels as u32)) as Box<dyn Processor>)
                },
            )
            .unwrap();

        assert_eq!(registry.list_segments(), vec!["volume".to_string()]);
        let info = registry.make_segment_info("volume").unwrap();
        assert_eq!(info.len(), 1);

        let processor = registry.make_segment("volume", &[Arg::Int(2)]).unwrap();
        assert_eq!(processor.info().name, "Volume");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        registry.register_segment("x", vec![], |_| Err(Error::NotImplemented)).unwrap();
        assert_eq!(
            registry.register_segment("x", vec![], |_| Err(Error::NotImplemented)),
            Err(Error::DuplicateSegment)
        );
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let registry = Registry::new();
        registry
            .register_segment(
                "needs_one",
                vec![ArgDescriptor {
                    name: "n",
                    kind: ArgKind::Int,
                }],
                |_| Err(Error::NotImplemented),
            )
            .unwrap();
        assert_eq!(
            registry.make_segment("needs_one", &[]).unwrap_err(),
            Error::BadArgumentCount
        );
    }

    #[test]
    fn deregistering_unknown_name_fails() {
        let registry = Registry::new();
        assert_eq!(registry.deregister_segment("nope"), Err(Error::BadSegment));
    }
}
