//! Files, transform stages and the plugins that create them.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::catalog::PLUGIN_PREFIX;
use crate::lazy::Lazy;

/// A single file travelling through a pipeline.
#[derive(Clone, PartialEq, Eq)]
pub struct File {
    /// Location of the file. Stages may rewrite it to rename the output.
    pub path: Utf8PathBuf,
    /// Directory the output layout is computed from.
    pub base: Utf8PathBuf,
    /// Raw contents.
    pub contents: Vec<u8>,
}

impl File {
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        base: impl Into<Utf8PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
            contents: contents.into(),
        }
    }

    /// Path relative to [`File::base`]. Files living outside of the base keep
    /// only their file name.
    pub fn relative(&self) -> &Utf8Path {
        match self.path.strip_prefix(&self.base) {
            Ok(relative) => relative,
            Err(_) => self
                .path
                .file_name()
                .map(Utf8Path::new)
                .unwrap_or(self.path.as_path()),
        }
    }

    pub fn text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.contents)
            .map_err(|e| anyhow::anyhow!("{} is not valid UTF-8: {e}", self.path))
    }
}

impl Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("base", &self.base)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// One transform step of a pipeline.
pub trait Stage: Send + Sync {
    /// Name reported when the stage fails.
    fn name(&self) -> &str;

    /// Transforms a single file. Returning `None` drops it from the stream.
    fn transform(&self, file: File) -> anyhow::Result<Option<File>>;

    /// Transforms the whole set. Stages that aggregate files override this,
    /// the default runs [`Stage::transform`] on every file in parallel.
    fn process(&self, files: Vec<File>) -> anyhow::Result<Vec<File>> {
        let files = files
            .into_par_iter()
            .map(|file| self.transform(file))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(files.into_iter().flatten().collect())
    }
}

/// Factory of stages, looked up by short name in the [`Plugins`] map.
pub trait Plugin: Send + Sync {
    fn stage(&self, options: &Value) -> anyhow::Result<Box<dyn Stage>>;
}

impl<F> Plugin for F
where
    F: Fn(&Value) -> anyhow::Result<Box<dyn Stage>> + Send + Sync,
{
    fn stage(&self, options: &Value) -> anyhow::Result<Box<dyn Stage>> {
        self(options)
    }
}

/// Lazily resolved plugins keyed by short name.
pub type Plugins = Lazy<dyn Plugin>;

impl Lazy<dyn Plugin> {
    /// Resolves the plugin called `name` and creates a stage from it.
    pub fn stage(&self, name: &str, options: Value) -> anyhow::Result<Box<dyn Stage>> {
        Ok(self.get(name)?.stage(&options)?)
    }
}

/// Deserializes plugin options, treating `null` as the default value.
pub fn options<T>(value: &Value) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    match value {
        Value::Null => Ok(T::default()),
        value => T::deserialize(value).map_err(|e| anyhow::anyhow!("Malformed options:\n{e}")),
    }
}

type Constructor = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Table of plugin constructors keyed by identifier, the resolver behind
/// [`Plugins`].
#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, Constructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin registered under `sluice-<name>`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Registers a constructor for `identifier`. It runs at most once, the
    /// first time a task asks for the plugin.
    pub fn provide<F>(&mut self, identifier: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(identifier.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.constructors.contains_key(identifier)
    }

    pub fn resolve(&self, identifier: &str) -> anyhow::Result<Arc<dyn Plugin>> {
        match self.constructors.get(identifier) {
            Some(constructor) => constructor(),
            None => Err(anyhow::anyhow!(
                "no constructor registered for '{identifier}'"
            )),
        }
    }

    /// Catalog of the registered `sluice-` plugins together with
    /// `dependencies`. Registered plugins are listed first, so they keep
    /// their short names against later prefixed dependencies and plain
    /// dependencies never shadow them.
    pub fn catalog<'a>(
        &'a self,
        dependencies: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, String> {
        let mut registered: Vec<&str> = self
            .constructors
            .keys()
            .map(String::as_str)
            .filter(|id| id.starts_with(PLUGIN_PREFIX))
            .collect();
        registered.sort_unstable();

        crate::catalog::derive_catalog(registered.into_iter().chain(dependencies))
    }

    /// Builds the lazy plugin map for `catalog`.
    pub fn into_plugins(self, catalog: BTreeMap<String, String>) -> Plugins {
        Lazy::new(catalog, move |identifier| self.resolve(identifier))
    }
}

impl Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.constructors.keys().collect();
        keys.sort();
        f.debug_set().entries(keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[test]
    fn test_relative() {
        let file = File::new("src/css/a/b.css", "src/css", "");
        assert_eq!(file.relative(), "a/b.css");

        let outside = File::new("vendor/x.css", "src/css", "");
        assert_eq!(outside.relative(), "x.css");
    }

    #[test]
    fn builtins_are_catalogued() {
        let catalog = PluginRegistry::with_builtins().catalog([]);
        assert_eq!(catalog["rename"], "sluice-rename");
        assert_eq!(catalog["replace"], "sluice-replace");
        assert_eq!(catalog["concat"], "sluice-concat");
        assert_eq!(catalog["header"], "sluice-header");
    }

    #[test]
    fn dependencies_never_shadow_builtins() {
        let catalog = PluginRegistry::with_builtins().catalog(["header", "sluice-rename", "minify"]);
        assert_eq!(catalog["header"], "sluice-header");
        assert_eq!(catalog["rename"], "sluice-rename");
        assert_eq!(catalog["minify"], "minify");
    }

    #[test]
    fn constructor_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut registry = PluginRegistry::new();
        registry.provide("my-upper", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(|_: &Value| -> anyhow::Result<Box<dyn Stage>> {
                Ok(Box::new(builtin::Replace::new("a", "A")))
            }) as Arc<dyn Plugin>)
        });

        let plugins = registry.into_plugins([("upper".to_string(), "my-upper".to_string())].into());

        plugins.stage("upper", Value::Null).unwrap();
        plugins.stage("upper", Value::Null).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_identifier_fails_on_access() {
        let plugins = PluginRegistry::new()
            .into_plugins([("ghost".to_string(), "sluice-ghost".to_string())].into());

        let Err(err) = plugins.stage("ghost", json!({})) else {
            panic!("resolved a plugin without a constructor");
        };
        assert!(err.to_string().contains("sluice-ghost"));
    }
}
