use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::args::Args;
use crate::error::StageFailure;
use crate::notifier::{Notifier, OnError, TerminalNotifier};
use crate::plugin::{Plugin, PluginRegistry, Plugins, Stage};
use crate::registry::Registry;
use crate::ConfigError;

/// Builds the ordered list of stages for a run. `None` entries are skipped,
/// which makes conditional stages a one-liner:
///
/// ```rust,ignore
/// .pipes(|plugins, args| Ok(vec![
///     Some(plugins.stage("scss", json!({ "compressed": args.flag("minify") }))?),
///     args.flag("banner").then(|| plugins.stage("header", json!("/* hi */"))).transpose()?,
/// ]))
/// ```
pub type PipeBuilder =
    Arc<dyn Fn(&Plugins, &Args) -> anyhow::Result<Vec<Option<Box<dyn Stage>>>> + Send + Sync>;

/// What the browser should refresh once a task finishes in watch mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadScope {
    /// Reload the whole page.
    Page,
    /// Refresh only resources matching the glob, e.g. `*.css`.
    Files(String),
}

impl ReloadScope {
    /// Path sent to the browser, `*` for the whole page.
    pub fn target(&self) -> &str {
        match self {
            ReloadScope::Page => "*",
            ReloadScope::Files(glob) => glob,
        }
    }
}

/// Declaration of one file task.
#[derive(Clone, Default)]
pub struct TaskSpec {
    pub(crate) files: Vec<String>,
    pub(crate) base: Option<Utf8PathBuf>,
    pub(crate) dest: Option<Utf8PathBuf>,
    pub(crate) pipes: Option<PipeBuilder>,
    pub(crate) watch: Option<Vec<String>>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) do_one: bool,
    pub(crate) sync: Option<ReloadScope>,
}

impl TaskSpec {
    pub fn new(files: impl Into<String>) -> Self {
        Self {
            files: vec![files.into()],
            ..Default::default()
        }
    }

    /// Adds another source glob, `!` negates.
    pub fn glob(mut self, pattern: impl Into<String>) -> Self {
        self.files.push(pattern.into());
        self
    }

    pub fn base(mut self, base: impl Into<Utf8PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn dest(mut self, dest: impl Into<Utf8PathBuf>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn pipes<F>(mut self, pipes: F) -> Self
    where
        F: Fn(&Plugins, &Args) -> anyhow::Result<Vec<Option<Box<dyn Stage>>>>
            + Send
            + Sync
            + 'static,
    {
        self.pipes = Some(Arc::new(pipes));
        self
    }

    /// Globs watched for changes instead of the source globs.
    pub fn watch(mut self, pattern: impl Into<String>) -> Self {
        self.watch.get_or_insert_with(Vec::new).push(pattern.into());
        self
    }

    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&StageFailure) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// On change, rebuild only the changed file instead of the whole glob.
    pub fn do_one(mut self, do_one: bool) -> Self {
        self.do_one = do_one;
        self
    }

    /// Signal live reload after each watch rebuild.
    pub fn sync(mut self, scope: ReloadScope) -> Self {
        self.sync = Some(scope);
        self
    }
}

impl Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("files", &self.files)
            .field("base", &self.base)
            .field("dest", &self.dest)
            .field("pipes", &self.pipes.as_ref().map(|_| "*"))
            .field("watch", &self.watch)
            .field("do_one", &self.do_one)
            .field("sync", &self.sync)
            .finish()
    }
}

/// Fallback values for every task.
#[derive(Clone, Default)]
pub struct Defaults {
    pub base: Option<Utf8PathBuf>,
    pub dest: Option<Utf8PathBuf>,
    pub on_error: Option<OnError>,
}

/// Output directory used when neither the task nor the defaults set one.
pub const DEFAULT_DEST: &str = "public";

/// Settings of the `package` task.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    pub dest: Utf8PathBuf,
    /// Laid under the CLI arguments when `build` runs for `package`.
    pub args: Args,
    /// Extra globs appended to the built-in selection, `!` negates.
    pub files: Vec<String>,
    /// File holding the task declarations, left out of the package.
    pub entry: String,
}

impl Default for PackageSpec {
    fn default() -> Self {
        let mut args = Args::new();
        args.insert("minify", true);

        Self {
            dest: "_package".into(),
            args,
            files: vec![".htaccess".into()],
            entry: "sluicefile.rs".into(),
        }
    }
}

/// Names that can't be used for file tasks.
pub const RESERVED: &[&str] = &[
    "defaults", "plugins", "package", "clean", "build", "watch", "default",
];

/// Builder for a [`Registry`].
///
/// # Example
///
/// ```rust,no_run
/// use sluice::{Config, TaskSpec};
/// use serde_json::json;
///
/// let registry = Config::new()
///     .task(
///         "styles",
///         TaskSpec::new("assets/**/*.scss")
///             .dest("public/css")
///             .pipes(|plugins, args| {
///                 Ok(vec![Some(plugins.stage("scss", json!({ "compressed": args.flag("minify") }))?)])
///             }),
///     )
///     .finish()?;
///
/// registry.run("build", &Default::default())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Config {
    pub(crate) root: Option<Utf8PathBuf>,
    pub(crate) tasks: Vec<(String, TaskSpec)>,
    pub(crate) defaults: Defaults,
    pub(crate) plugins: Option<BTreeMap<String, String>>,
    pub(crate) package: PackageSpec,
    pub(crate) registry: PluginRegistry,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            root: None,
            tasks: Vec::new(),
            defaults: Defaults::default(),
            plugins: None,
            package: PackageSpec::default(),
            registry: PluginRegistry::with_builtins(),
            notifier: Arc::new(TerminalNotifier),
        }
    }

    /// Project directory; manifest, reload config and every relative path
    /// are resolved against it. Defaults to the current directory.
    pub fn root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Declares a file task. Tasks run in declaration order.
    pub fn task(mut self, name: impl Into<String>, spec: TaskSpec) -> Self {
        self.tasks.push((name.into(), spec));
        self
    }

    pub fn defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Explicit short name → identifier map, skipping the manifest scan.
    pub fn plugins<I, K, V>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.plugins = Some(
            plugins
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn package(mut self, package: PackageSpec) -> Self {
        self.package = package;
        self
    }

    /// Registers a plugin constructor under `identifier`.
    pub fn provide<F>(mut self, identifier: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.registry.provide(identifier, constructor);
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn finish(self) -> Result<Registry, ConfigError> {
        Registry::new(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
