//! The composite jobs and the order they run in.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt::Display;
use std::sync::mpsc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::args::Args;
use crate::config::{Config, DEFAULT_DEST, PackageSpec, PipeBuilder, RESERVED, ReloadScope};
use crate::io::{as_overhead, glob_base};
use crate::notifier::{OnError, default_on_error};
use crate::pipeline::{Completion, Pipeline};
use crate::plugin::Plugins;
use crate::utils::{STYLE_BUILD, STYLE_TASK};
use crate::{ConfigError, PipelineError, SluiceError};

/// A declared task merged with the defaults.
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub files: Vec<String>,
    pub base: Option<Utf8PathBuf>,
    pub dest: Utf8PathBuf,
    pub pipes: Option<PipeBuilder>,
    pub watch: Vec<String>,
    pub on_error: OnError,
    pub do_one: bool,
    pub sync: Option<ReloadScope>,
}

impl Task {
    /// Directory output paths are computed from, absolute.
    pub fn base(&self, root: &Utf8Path) -> Utf8PathBuf {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => self
                .files
                .iter()
                .find(|f| !f.starts_with('!'))
                .map(|f| glob_base(f))
                .unwrap_or_default(),
        };

        root.join(base)
    }

    pub fn dest(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(&self.dest)
    }

    /// Pipeline over `files`, stages built for `args`.
    pub(crate) fn pipeline(
        &self,
        root: &Utf8Path,
        plugins: &Plugins,
        args: &Args,
        files: Vec<String>,
    ) -> Result<Pipeline, PipelineError> {
        let stages = match &self.pipes {
            Some(pipes) => pipes(plugins, args).map_err(PipelineError::Pipes)?,
            None => Vec::new(),
        };

        Ok(Pipeline::new(files)
            .root(root)
            .base(self.base(root))
            .dest(self.dest(root))
            .stages(stages)
            .on_error(self.on_error.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Task(usize),
    Clean,
    Build,
    Watch,
    Package,
    Default,
}

/// Every job known to a [`Registry`], wired up and ready to run.
pub struct Registry {
    root: Utf8PathBuf,
    tasks: Vec<Task>,
    plugins: Plugins,
    package: PackageSpec,
    default_base: Option<Utf8PathBuf>,
    graph: DiGraph<Job, ()>,
    jobs: HashMap<String, NodeIndex>,
}

impl Registry {
    pub(crate) fn new(config: Config) -> Result<Self, ConfigError> {
        let root = match config.root {
            Some(root) if root.is_absolute() => root,
            Some(root) => Utf8PathBuf::try_from(env::current_dir()?)?.join(root),
            None => Utf8PathBuf::try_from(env::current_dir()?)?,
        };
        let root = root.canonicalize_utf8().unwrap_or(root);

        let mut seen = HashSet::new();
        for (name, spec) in &config.tasks {
            if RESERVED.contains(&name.as_str()) {
                return Err(ConfigError::Reserved(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::Duplicate(name.clone()));
            }
            if !spec.files.iter().any(|f| !f.starts_with('!')) {
                return Err(ConfigError::NoFiles(name.clone()));
            }
            let mut patterns = spec.files.iter().chain(spec.watch.iter().flatten());
            if let Some(pattern) = patterns.find(|p| p.contains(['{', '}'])) {
                return Err(ConfigError::Braces(name.clone(), pattern.clone()));
            }
        }

        let catalog = match config.plugins {
            Some(explicit) => {
                let mut catalog = config.registry.catalog([]);
                catalog.extend(explicit);
                catalog
            }
            None => {
                let dependencies = crate::catalog::manifest_dependencies(&root);
                config
                    .registry
                    .catalog(dependencies.iter().map(String::as_str))
            }
        };
        let plugins = config.registry.into_plugins(catalog);

        let defaults = config.defaults;
        let on_error = defaults
            .on_error
            .clone()
            .unwrap_or_else(|| default_on_error(config.notifier.clone()));

        let tasks: Vec<_> = config
            .tasks
            .into_iter()
            .map(|(name, spec)| Task {
                name,
                watch: spec.watch.unwrap_or_else(|| spec.files.clone()),
                files: spec.files,
                base: spec.base.or_else(|| defaults.base.clone()),
                dest: spec
                    .dest
                    .or_else(|| defaults.dest.clone())
                    .unwrap_or_else(|| DEFAULT_DEST.into()),
                pipes: spec.pipes,
                on_error: spec.on_error.unwrap_or_else(|| on_error.clone()),
                do_one: spec.do_one,
                sync: spec.sync,
            })
            .collect();

        let mut graph = DiGraph::new();
        let mut jobs = HashMap::new();

        for (i, task) in tasks.iter().enumerate() {
            jobs.insert(task.name.clone(), graph.add_node(Job::Task(i)));
        }

        let clean = graph.add_node(Job::Clean);
        let build = graph.add_node(Job::Build);
        let watch = graph.add_node(Job::Watch);
        let package = graph.add_node(Job::Package);
        let default = graph.add_node(Job::Default);

        graph.add_edge(clean, build, ());
        graph.add_edge(build, watch, ());
        graph.add_edge(build, package, ());
        graph.add_edge(watch, default, ());

        jobs.insert("clean".into(), clean);
        jobs.insert("build".into(), build);
        jobs.insert("watch".into(), watch);
        jobs.insert("package".into(), package);
        jobs.insert("default".into(), default);

        Ok(Self {
            root,
            tasks,
            plugins,
            package: config.package,
            default_base: defaults.base,
            graph,
            jobs,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Every job name with the names of the jobs it waits for, file tasks
    /// first in declared order.
    pub fn jobs(&self) -> Vec<(String, Vec<String>)> {
        let mut nodes: Vec<_> = self.graph.node_indices().collect();
        nodes.sort();

        nodes
            .into_iter()
            .map(|node| {
                let deps = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .map(|dep| self.name(dep).to_string())
                    .collect();

                (self.name(node).to_string(), deps)
            })
            .collect()
    }

    fn name(&self, node: NodeIndex) -> &str {
        match self.graph[node] {
            Job::Task(i) => &self.tasks[i].name,
            Job::Clean => "clean",
            Job::Build => "build",
            Job::Watch => "watch",
            Job::Package => "package",
            Job::Default => "default",
        }
    }

    /// Jobs executed by `run(name)`, prerequisites first.
    pub fn plan(&self, name: &str) -> Result<Vec<String>, SluiceError> {
        Ok(self
            .schedule(name)?
            .into_iter()
            .map(|node| self.name(node).to_string())
            .collect())
    }

    fn schedule(&self, name: &str) -> Result<Vec<NodeIndex>, SluiceError> {
        let target = *self
            .jobs
            .get(name)
            .ok_or_else(|| SluiceError::UnknownTask(name.to_string()))?;

        let reversed = Reversed(&self.graph);
        let mut needed = HashSet::new();
        let mut dfs = Dfs::new(reversed, target);
        while let Some(node) = dfs.next(reversed) {
            needed.insert(node);
        }

        let order = petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| SluiceError::Cycle(self.name(cycle.node_id()).to_string()))?;

        Ok(order.into_iter().filter(|n| needed.contains(n)).collect())
    }

    /// Runs the job called `name` after its prerequisites, each once.
    pub fn run(&self, name: &str, args: &Args) -> Result<(), SluiceError> {
        let plan = self.schedule(name)?;

        // Packaging builds with the package arguments underneath the CLI ones.
        let args = match name == "package" {
            true => self.package.args.overlay(args),
            false => args.clone(),
        };

        for node in plan {
            let start = Instant::now();
            tracing::info!("Starting '{}'", self.name(node));

            match self.graph[node] {
                Job::Task(i) => {
                    let task = &self.tasks[i];
                    self.run_task(task, &args)
                        .map_err(|e| SluiceError::Task(task.name.clone(), e))?;
                }
                Job::Clean => self.clean()?,
                Job::Build => self.build(&args)?,
                Job::Package => self.package()?,
                Job::Watch => self.watch(&args)?,
                Job::Default => {}
            }

            tracing::info!("Finished '{}' {}", self.name(node), as_overhead(start));
        }

        Ok(())
    }

    /// Runs a single file task over its whole glob.
    pub fn run_task(&self, task: &Task, args: &Args) -> Result<Completion, PipelineError> {
        let completion = task
            .pipeline(&self.root, &self.plugins, args, task.files.clone())?
            .run()?;

        tracing::debug!(
            task = %task.name,
            files = completion.files.len(),
            "pipeline ended{}",
            ended(&completion)
        );

        Ok(completion)
    }

    /// Output directories removed by `clean`.
    pub fn clean_targets(&self) -> Vec<String> {
        let mut seen = HashSet::new();

        self.tasks
            .iter()
            .map(|task| &task.dest)
            .chain([&self.package.dest])
            .map(|dest| format!("{}/**", dest.as_str().trim_end_matches('/')))
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }

    fn clean(&self) -> Result<(), SluiceError> {
        let removed = crate::io::delete(&self.root, &self.clean_targets()).map_err(SluiceError::Clean)?;

        for path in removed {
            tracing::debug!("removed {path}");
        }

        Ok(())
    }

    /// Starts every task in declared order and waits for all of them. The
    /// first failure is reported once every task has ended.
    fn build(&self, args: &Args) -> Result<(), SluiceError> {
        let span = tracing::span!(Level::INFO, "build");
        span.pb_set_style(&STYLE_BUILD);
        span.pb_set_length(self.tasks.len() as u64);
        span.pb_set_message("Building tasks...");
        let _enter = span.enter();

        let (tx, rx) = mpsc::channel();

        rayon::scope(|s| {
            for (i, task) in self.tasks.iter().enumerate() {
                let tx = tx.clone();
                let span = span.clone();

                s.spawn(move |_| {
                    let task_span = tracing::span!(parent: &span, Level::INFO, "task", name = %task.name);
                    task_span.pb_set_style(&STYLE_TASK);
                    task_span.pb_set_message(&task.name);

                    let result = task_span.in_scope(|| self.run_task(task, args));
                    span.pb_inc(1);

                    // The receiver outlives the scope.
                    let _ = tx.send((i, result));
                });
            }
        });

        drop(tx);

        let mut results: Vec<_> = rx.into_iter().collect();
        results.sort_by_key(|(i, _)| *i);

        let mut failure = None;
        for (i, result) in results {
            let task = &self.tasks[i];

            match result {
                Ok(completion) => tracing::info!(
                    "Built '{}' ({} files){} {}",
                    task.name,
                    completion.files.len(),
                    ended(&completion),
                    overhead(&completion)
                ),
                Err(error) if failure.is_none() => {
                    failure = Some(SluiceError::Task(task.name.clone(), error))
                }
                Err(error) => tracing::error!("Task '{}' failed: {error}", task.name),
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Selection copied by `package`, evaluated in order.
    pub fn package_globs(&self) -> Vec<String> {
        let mut globs: Vec<String> = [
            "**/*",
            "!.*",
            "!**/.*",
            "!**/.*/**",
            "!*.md",
            "!*.log",
            "!Cargo.toml",
            "!Cargo.lock",
            "!target",
            "!target/**",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        #[cfg(feature = "live")]
        globs.push(format!("!{}", crate::reload::RELOAD_CONFIG));
        #[cfg(not(feature = "live"))]
        globs.push("!livereload.json".into());

        globs.push(format!("!{}", self.package.entry));

        let package_dest = self.package.dest.as_str().trim_end_matches('/');
        globs.push(format!("!{package_dest}"));
        globs.push(format!("!{package_dest}/**"));

        if let Some(base) = &self.default_base {
            let base = base.as_str().trim_end_matches('/');
            globs.push(format!("!{base}"));
            globs.push(format!("!{base}/**"));
        }

        globs.extend(self.package.files.iter().cloned());
        globs
    }

    fn package(&self) -> Result<(), SluiceError> {
        let completion = Pipeline::new(self.package_globs())
            .root(&self.root)
            .base(&self.root)
            .dest(self.root.join(&self.package.dest))
            .run()?;

        tracing::info!(
            "Packaged {} files into {}",
            completion.files.len(),
            self.package.dest
        );

        Ok(())
    }

    #[cfg(feature = "live")]
    fn watch(&self, args: &Args) -> Result<(), SluiceError> {
        Ok(crate::watch::watch(self, args)?)
    }

    #[cfg(not(feature = "live"))]
    fn watch(&self, _: &Args) -> Result<(), SluiceError> {
        Err(SluiceError::WatchDisabled)
    }
}

fn ended(completion: &Completion) -> String {
    match &completion.ended {
        Some(failure) => format!(", ended early by {}", failure.title()),
        None => String::new(),
    }
}

pub(crate) fn overhead(completion: &Completion) -> impl Display {
    let start = Instant::now()
        .checked_sub(completion.elapsed)
        .unwrap_or_else(Instant::now);
    as_overhead(start)
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("root", &self.root)
            .field("tasks", &self.tasks.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("plugins", &self.plugins)
            .finish()
    }
}
