//! Plugin loading: artifacts, symbol resolution scopes, and the loader
//! interface the registry sees.
//!
//! Dynamic code loading is abstracted behind [`PluginLoader`]; the shipped
//! implementation is [`StaticPluginLoader`], where artifacts and their
//! constructible plugin types are registered ahead of time. Each installed
//! plugin gets its own [`ResolutionScope`], a child of the loader's host
//! symbol table, so identically named types in two artifacts stay distinct.

use crate::plugin::error::LoadError;
use crate::plugin::traits::Plugin;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameterless plugin constructor registered for a type name.
pub type PluginCtor = Arc<dyn Fn() -> Result<Box<dyn Plugin>, String> + Send + Sync>;

/// A type exported by an artifact.
#[derive(Clone)]
pub enum Symbol {
    /// A plugin type constructible through a parameterless factory.
    Plugin(PluginCtor),
    /// A plugin type registered without a parameterless factory.
    NonConstructible,
    /// A library type the artifact exports that is not a plugin.
    Library,
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin(_) => f.write_str("Symbol::Plugin"),
            Self::NonConstructible => f.write_str("Symbol::NonConstructible"),
            Self::Library => f.write_str("Symbol::Library"),
        }
    }
}

/// Symbol resolution order for a plugin's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Ask the host table first; fall back to the artifact's own symbols.
    /// The default, so shared contract types always resolve to the host's
    /// canonical definitions.
    #[default]
    ParentFirst,
    /// Prefer the artifact's own symbols, letting a plugin ship its own
    /// copy of a library; unresolved names still delegate to the host.
    ChildFirst,
}

/// Shared symbol table used as the parent of every resolution scope.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: RwLock<HashMap<String, Symbol>>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a symbol.
    pub fn insert(&self, type_name: impl Into<String>, symbol: Symbol) {
        self.symbols.write().insert(type_name.into(), symbol);
    }

    /// Look up a symbol by type name.
    pub fn get(&self, type_name: &str) -> Option<Symbol> {
        self.symbols.read().get(type_name).cloned()
    }
}

/// Per-plugin symbol namespace, child of the loader's host table.
///
/// Every isolation unit owns exactly one scope; scopes are never shared.
/// Closing the scope drops its symbol references so the memory backing the
/// registered factories can be reclaimed; lookups through a closed scope
/// fail.
#[derive(Debug)]
pub struct ResolutionScope {
    plugin: String,
    strategy: LoadStrategy,
    parent: Arc<SymbolTable>,
    local: RwLock<HashMap<String, Symbol>>,
    closed: AtomicBool,
}

impl ResolutionScope {
    fn new(
        plugin: &str,
        strategy: LoadStrategy,
        parent: Arc<SymbolTable>,
        local: HashMap<String, Symbol>,
    ) -> Self {
        debug!(plugin, strategy = ?strategy, "created resolution scope");
        Self {
            plugin: plugin.to_string(),
            strategy,
            parent,
            local: RwLock::new(local),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolve a type name through this scope, honoring its strategy.
    pub fn resolve(&self, type_name: &str) -> Result<Option<Symbol>, LoadError> {
        if self.is_closed() {
            return Err(LoadError::ScopeClosed { scope: self.plugin.clone() });
        }

        let resolved = match self.strategy {
            LoadStrategy::ParentFirst => self
                .parent
                .get(type_name)
                .or_else(|| self.local.read().get(type_name).cloned()),
            LoadStrategy::ChildFirst => self
                .local
                .read()
                .get(type_name)
                .cloned()
                .or_else(|| self.parent.get(type_name)),
        };
        Ok(resolved)
    }

    /// Close the scope, releasing every symbol reference it holds.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.local.write().clear();
            debug!(plugin = %self.plugin, "closed resolution scope");
        }
    }

    /// Whether the scope has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The resolution strategy this scope was created with.
    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }
}

/// Manifest metadata attached to an artifact, mirroring the discovery
/// contract: an explicit plugin name and primary plugin type, both
/// optional, with filename-stem and first-exported-type fallbacks.
#[derive(Debug, Clone, Default)]
pub struct ArtifactManifest {
    /// Declared plugin name, if any.
    pub plugin_name: Option<String>,
    /// Declared primary plugin type, if any.
    pub plugin_type: Option<String>,
}

/// An ahead-of-time registered artifact: manifest, exported symbols, and
/// provider-descriptor type list.
#[derive(Debug, Default)]
pub struct ArtifactDefinition {
    manifest: ArtifactManifest,
    symbols: HashMap<String, Symbol>,
    providers: Vec<String>,
}

impl ArtifactDefinition {
    /// Start an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the manifest plugin name.
    pub fn named(mut self, plugin_name: impl Into<String>) -> Self {
        self.manifest.plugin_name = Some(plugin_name.into());
        self
    }

    /// Declare the manifest primary plugin type.
    pub fn primary_type(mut self, type_name: impl Into<String>) -> Self {
        self.manifest.plugin_type = Some(type_name.into());
        self
    }

    /// Export a constructible plugin type.
    pub fn plugin<F>(mut self, type_name: impl Into<String>, ctor: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Plugin>, String> + Send + Sync + 'static,
    {
        self.symbols.insert(type_name.into(), Symbol::Plugin(Arc::new(ctor)));
        self
    }

    /// Export a plugin type that cannot be constructed by the host.
    pub fn non_constructible(mut self, type_name: impl Into<String>) -> Self {
        self.symbols.insert(type_name.into(), Symbol::NonConstructible);
        self
    }

    /// Export a non-plugin library type.
    pub fn library(mut self, type_name: impl Into<String>) -> Self {
        self.symbols.insert(type_name.into(), Symbol::Library);
        self
    }

    /// Attach a service-provider descriptor listing plugin types, one per
    /// line with `#` comments.
    pub fn providers_from_descriptor(mut self, descriptor: &str) -> Self {
        self.providers = parse_provider_descriptor(descriptor);
        self
    }

    /// The manifest metadata.
    pub fn manifest(&self) -> &ArtifactManifest {
        &self.manifest
    }
}

/// Parse a service-provider descriptor: one type name per line, `#`
/// starting a comment, blank lines ignored, invalid names skipped with a
/// warning.
pub fn parse_provider_descriptor(content: &str) -> Vec<String> {
    let mut types = Vec::new();
    for line in content.lines() {
        let line = match line.find('#') {
            Some(index) => &line[..index],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_valid_type_name(line) {
            types.push(line.to_string());
        } else {
            warn!(line, "invalid type name in provider descriptor");
        }
    }
    types
}

fn is_valid_type_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split(|c| c == '.' || c == ':').filter(|s| !s.is_empty()).all(|segment| {
        let mut chars = segment.chars();
        chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }) && !name.starts_with(':')
        && !name.ends_with(':')
        && !name.starts_with('.')
        && !name.ends_with('.')
}

/// A plugin derived from an artifact per the discovery contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Plugin name: manifest attribute or the locator's file stem.
    pub name: String,
    /// The artifact locator the descriptor was derived from.
    pub locator: String,
    /// Plugin type: manifest attribute, first provider entry, or the first
    /// constructible plugin symbol.
    pub type_name: String,
}

/// A freshly constructed plugin together with its resolution scope.
pub struct LoadedPlugin {
    /// The constructed, contract-verified plugin instance.
    pub plugin: Box<dyn Plugin>,
    /// The scope the plugin's types resolve through; owned by the
    /// isolation unit for the plugin's lifetime.
    pub scope: ResolutionScope,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin", &self.plugin.name())
            .field("scope", &self.scope)
            .finish()
    }
}

/// The loading capability the registry depends on: open an artifact,
/// resolve a type by name, verify the plugin contract, and construct an
/// instance. On any failure the scope created for the attempt is closed
/// before returning.
pub trait PluginLoader: Send + Sync {
    /// Load and construct the named plugin type from an artifact.
    fn load(
        &self,
        plugin_name: &str,
        locator: &str,
        type_name: &str,
        strategy: LoadStrategy,
    ) -> Result<LoadedPlugin, LoadError>;
}

/// Loader backed by ahead-of-time artifact registration.
#[derive(Debug, Default)]
pub struct StaticPluginLoader {
    artifacts: DashMap<String, Arc<ArtifactDefinition>>,
    host_symbols: Arc<SymbolTable>,
}

impl StaticPluginLoader {
    /// Create a loader with no registered artifacts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact under a locator, replacing any previous
    /// registration.
    pub fn register_artifact(&self, locator: impl Into<String>, definition: ArtifactDefinition) {
        let locator = locator.into();
        info!(locator = %locator, "registered artifact");
        self.artifacts.insert(locator, Arc::new(definition));
    }

    /// Remove an artifact registration.
    pub fn unregister_artifact(&self, locator: &str) {
        self.artifacts.remove(locator);
    }

    /// Register a symbol in the host table shared by all scopes.
    pub fn register_host_symbol(&self, type_name: impl Into<String>, symbol: Symbol) {
        self.host_symbols.insert(type_name, symbol);
    }

    /// Derive a plugin descriptor for an artifact per the discovery
    /// contract. Returns `Ok(None)` when no plugin type can be derived.
    pub fn discover(&self, locator: &str) -> Result<Option<PluginDescriptor>, LoadError> {
        let artifact = self
            .artifacts
            .get(locator)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| LoadError::ArtifactNotFound { locator: locator.to_string() })?;

        let name = artifact
            .manifest
            .plugin_name
            .clone()
            .unwrap_or_else(|| locator_stem(locator));

        let type_name = artifact
            .manifest
            .plugin_type
            .clone()
            .or_else(|| artifact.providers.first().cloned())
            .or_else(|| {
                let mut plugin_types: Vec<&String> = artifact
                    .symbols
                    .iter()
                    .filter(|(_, symbol)| matches!(symbol, Symbol::Plugin(_)))
                    .map(|(type_name, _)| type_name)
                    .collect();
                plugin_types.sort();
                plugin_types.first().map(|s| (*s).clone())
            });

        Ok(type_name.map(|type_name| PluginDescriptor {
            name,
            locator: locator.to_string(),
            type_name,
        }))
    }
}

fn locator_stem(locator: &str) -> String {
    Path::new(locator)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| locator.to_string())
}

impl PluginLoader for StaticPluginLoader {
    fn load(
        &self,
        plugin_name: &str,
        locator: &str,
        type_name: &str,
        strategy: LoadStrategy,
    ) -> Result<LoadedPlugin, LoadError> {
        let artifact = self
            .artifacts
            .get(locator)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| LoadError::ArtifactNotFound { locator: locator.to_string() })?;

        let scope = ResolutionScope::new(
            plugin_name,
            strategy,
            Arc::clone(&self.host_symbols),
            artifact.symbols.clone(),
        );

        let symbol = match scope.resolve(type_name) {
            Ok(symbol) => symbol,
            Err(err) => {
                scope.close();
                return Err(err);
            },
        };

        let Some(symbol) = symbol else {
            scope.close();
            return Err(LoadError::TypeNotFound {
                type_name: type_name.to_string(),
                locator: locator.to_string(),
            });
        };

        let ctor = match symbol {
            Symbol::Plugin(ctor) => ctor,
            Symbol::Library => {
                scope.close();
                return Err(LoadError::NotAPlugin { type_name: type_name.to_string() });
            },
            Symbol::NonConstructible => {
                scope.close();
                return Err(LoadError::NoDefaultConstructor { type_name: type_name.to_string() });
            },
        };

        match ctor() {
            Ok(plugin) => {
                debug!(plugin = plugin_name, type_name, locator, "constructed plugin instance");
                Ok(LoadedPlugin { plugin, scope })
            },
            Err(reason) => {
                scope.close();
                Err(LoadError::Instantiation { type_name: type_name.to_string(), reason })
            },
        }
    }
}
