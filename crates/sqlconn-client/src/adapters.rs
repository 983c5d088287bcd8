//! Layered adapter lookup.
//!
//! An [`AdaptersMap`] is an ordered list of layers searched from the
//! outermost (most recently derived) to the innermost. Deriving a map is
//! cheap: the child shares every parent layer and only gets a private layer
//! of its own, so registrations on the child never leak into the parent.
//!
//! Value kinds are a closed set resolved at registration time; there is no
//! lookup by type hierarchy at dump time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{DumpFormat, Format, Oid, Value, ValueKind, oid_by_name};

/// Converts a [`Value`] to its wire representation.
pub trait Dumper: Send + Sync {
    /// Format produced by [`dump`](Dumper::dump).
    fn format(&self) -> Format;

    /// Oid of the produced data.
    fn oid(&self) -> Oid;

    /// Serialize a value.
    fn dump(&self, value: &Value) -> Result<Bytes>;

    /// Serialize a value as an SQL literal.
    fn quote(&self, value: &Value) -> Result<Bytes> {
        self.dump(value)
    }

    /// Name used as key in the optimised registry.
    fn name(&self) -> &'static str;
}

/// Converts wire data back into a [`Value`].
pub trait Loader: Send + Sync {
    /// Format consumed by [`load`](Loader::load).
    fn format(&self) -> Format;

    /// Deserialize wire data.
    fn load(&self, data: &[u8]) -> Result<Value>;

    /// Name used as key in the optimised registry.
    fn name(&self) -> &'static str;
}

/// One override layer.
#[derive(Clone, Default)]
pub struct AdapterLayer {
    dumpers: HashMap<(ValueKind, DumpFormat), Arc<dyn Dumper>>,
    loaders: HashMap<(Oid, Format), Arc<dyn Loader>>,
}

impl AdapterLayer {
    /// Number of entries in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dumpers.len() + self.loaders.len()
    }

    /// Whether the layer holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide registry of optimised adapter replacements.
///
/// Entries are keyed by the name of the adapter they replace. Reads take a
/// shared lock; a key can be written only once, later writes are ignored.
#[derive(Default)]
pub struct OptimisedAdapters {
    dumpers: RwLock<HashMap<&'static str, Arc<dyn Dumper>>>,
    loaders: RwLock<HashMap<&'static str, Arc<dyn Loader>>>,
}

static GLOBAL_OPTIMISED: Lazy<Arc<OptimisedAdapters>> =
    Lazy::new(|| Arc::new(OptimisedAdapters::default()));

impl OptimisedAdapters {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_OPTIMISED)
    }

    /// Register an optimised replacement for the dumper called `name`.
    ///
    /// Returns `false` if a replacement was already registered.
    pub fn register_dumper(&self, name: &'static str, dumper: Arc<dyn Dumper>) -> bool {
        let mut dumpers = self.dumpers.write();
        if dumpers.contains_key(name) {
            return false;
        }
        dumpers.insert(name, dumper);
        true
    }

    /// Register an optimised replacement for the loader called `name`.
    ///
    /// Returns `false` if a replacement was already registered.
    pub fn register_loader(&self, name: &'static str, loader: Arc<dyn Loader>) -> bool {
        let mut loaders = self.loaders.write();
        if loaders.contains_key(name) {
            return false;
        }
        loaders.insert(name, loader);
        true
    }

    fn dumper(&self, name: &str) -> Option<Arc<dyn Dumper>> {
        self.dumpers.read().get(name).cloned()
    }

    fn loader(&self, name: &str) -> Option<Arc<dyn Loader>> {
        self.loaders.read().get(name).cloned()
    }
}

impl fmt::Debug for OptimisedAdapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisedAdapters")
            .field("dumpers", &self.dumpers.read().len())
            .field("loaders", &self.loaders.read().len())
            .finish()
    }
}

/// Ordered stack of adapter layers.
#[derive(Clone)]
pub struct AdaptersMap {
    layers: Vec<Arc<AdapterLayer>>,
    registry: Arc<OptimisedAdapters>,
}

impl Default for AdaptersMap {
    fn default() -> Self {
        Self::new(OptimisedAdapters::global())
    }
}

impl fmt::Debug for AdaptersMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptersMap")
            .field("layers", &self.layers.len())
            .field("registry", &self.registry)
            .finish()
    }
}

impl AdaptersMap {
    /// Create an empty map consulting `registry` for optimised adapters.
    #[must_use]
    pub fn new(registry: Arc<OptimisedAdapters>) -> Self {
        Self {
            layers: vec![Arc::new(AdapterLayer::default())],
            registry,
        }
    }

    /// Create a map holding the built-in adapters.
    pub fn with_defaults() -> Result<Self> {
        let mut map = Self::default();
        crate::types::register_default_adapters(&mut map)?;
        Ok(map)
    }

    /// Make a child map. The child sees every parent registration; its own
    /// registrations stay private.
    #[must_use]
    pub fn derive(&self) -> Self {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.push(Arc::new(AdapterLayer::default()));
        layers.extend(self.layers.iter().cloned());
        Self {
            layers,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Number of layers searched on lookup.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    fn own_layer(&mut self) -> &mut AdapterLayer {
        if self.layers.is_empty() {
            self.layers.push(Arc::new(AdapterLayer::default()));
        }
        Arc::make_mut(&mut self.layers[0])
    }

    /// Register a dumper for `kind`, for its own format and for `Auto`.
    pub fn register_dumper(&mut self, kind: ValueKind, dumper: Arc<dyn Dumper>) {
        let format = DumpFormat::from(dumper.format());
        let layer = self.own_layer();
        layer.dumpers.insert((kind, format), Arc::clone(&dumper));
        layer.dumpers.insert((kind, DumpFormat::Auto), dumper);
    }

    /// Register a dumper for the kind called `name`.
    pub fn register_dumper_by_name(&mut self, name: &str, dumper: Arc<dyn Dumper>) -> Result<()> {
        let kind = ValueKind::from_name(name).ok_or_else(|| Error::UnknownType(name.into()))?;
        self.register_dumper(kind, dumper);
        Ok(())
    }

    /// Register a loader for `oid` in the loader's format.
    pub fn register_loader(&mut self, oid: Oid, loader: Arc<dyn Loader>) {
        let format = loader.format();
        self.own_layer().loaders.insert((oid, format), loader);
    }

    /// Register a loader for the type called `name`.
    pub fn register_loader_by_name(&mut self, name: &str, loader: Arc<dyn Loader>) -> Result<()> {
        let oid = oid_by_name(name).ok_or_else(|| Error::UnknownType(name.into()))?;
        self.register_loader(oid, loader);
        Ok(())
    }

    /// Find the dumper for `kind` in `format`.
    pub fn get_dumper(&self, kind: ValueKind, format: DumpFormat) -> Result<Arc<dyn Dumper>> {
        let found = self
            .layers
            .iter()
            .find_map(|layer| layer.dumpers.get(&(kind, format)))
            .ok_or(Error::Adapt {
                kind: kind.name(),
                format: format.name(),
            })?;
        Ok(self
            .registry
            .dumper(found.name())
            .unwrap_or_else(|| Arc::clone(found)))
    }

    /// Find the loader for `oid` in `format`.
    #[must_use]
    pub fn get_loader(&self, oid: Oid, format: Format) -> Option<Arc<dyn Loader>> {
        let found = self
            .layers
            .iter()
            .find_map(|layer| layer.loaders.get(&(oid, format)))?;
        Some(
            self.registry
                .loader(found.name())
                .unwrap_or_else(|| Arc::clone(found)),
        )
    }
}
