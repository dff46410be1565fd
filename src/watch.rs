//! Re-running tasks when their sources change.
//!
//! [`ChangeWatcher`] maps a batch of file changes onto the tasks watching
//! them and reruns their pipelines, either for the whole glob or for the
//! changed file alone (`do_one`). With the `live` feature, [`watch`] feeds
//! it from a debounced recursive filesystem watcher and signals the live
//! reload server once a task with `sync` finishes.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::args::Args;
use crate::config::ReloadScope;
use crate::io::{matches, split_patterns};
use crate::pipeline::{Completion, Pipeline};
use crate::plugin::File;
use crate::registry::{Registry, Task, overhead};
use crate::PipelineError;

#[cfg(feature = "live")]
pub(crate) use live::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Write,
    Remove,
}

/// A file that was written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: Utf8PathBuf,
    pub kind: ChangeKind,
}

impl Change {
    pub fn write(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Write,
        }
    }

    pub fn remove(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Remove,
        }
    }

    /// Classifies `path` by whether it still exists.
    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();

        match path.exists() {
            true => Self::write(path),
            false => Self::remove(path),
        }
    }
}

/// Receives the reload signal after a rebuild.
pub trait Reloader: Send + Sync {
    fn reload(&self, scope: &ReloadScope);
}

/// What happened to a task in response to a change.
#[derive(Debug)]
pub enum Rebuild {
    Built { task: String, completion: Completion },
    Removed { task: String, path: Utf8PathBuf },
    Failed { task: String, error: PipelineError },
}

impl Rebuild {
    pub fn task(&self) -> &str {
        match self {
            Rebuild::Built { task, .. } | Rebuild::Removed { task, .. } | Rebuild::Failed { task, .. } => task,
        }
    }
}

struct Matcher {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

pub struct ChangeWatcher<'a> {
    registry: &'a Registry,
    args: Args,
    matchers: Vec<Matcher>,
    hashes: HashMap<Utf8PathBuf, blake3::Hash>,
    reloader: Option<Arc<dyn Reloader>>,
}

impl<'a> ChangeWatcher<'a> {
    pub fn new(registry: &'a Registry, args: Args) -> Result<Self, glob::PatternError> {
        let matchers = registry
            .tasks()
            .iter()
            .map(|task| {
                let (include, exclude) = split_patterns(registry.root(), &task.watch)?;
                let include = include
                    .iter()
                    .map(|pattern| Pattern::new(pattern))
                    .collect::<Result<_, _>>()?;

                Ok(Matcher { include, exclude })
            })
            .collect::<Result<_, glob::PatternError>>()?;

        Ok(Self {
            registry,
            args,
            matchers,
            hashes: HashMap::new(),
            reloader: None,
        })
    }

    pub fn reloader(mut self, reloader: Arc<dyn Reloader>) -> Self {
        self.reloader = Some(reloader);
        self
    }

    /// Reruns every task affected by `changes`. Writes that leave a file's
    /// content unchanged are ignored. Only paths some task watches are
    /// hashed.
    pub fn handle(&mut self, changes: &[Change]) -> Vec<Rebuild> {
        let watched: Vec<&Change> = changes.iter().filter(|c| self.is_watched(&c.path)).collect();
        let changes: Vec<&Change> = watched.into_iter().filter(|c| self.is_fresh(c)).collect();

        let work: Vec<(&Task, Vec<&Change>)> = self
            .registry
            .tasks()
            .iter()
            .zip(&self.matchers)
            .filter_map(|(task, matcher)| {
                let hits: Vec<_> = changes
                    .iter()
                    .copied()
                    .filter(|c| matches(&matcher.include, &matcher.exclude, &c.path))
                    .collect();

                (!hits.is_empty()).then_some((task, hits))
            })
            .collect();

        if !work.is_empty() {
            tracing::info!("change detected, re-running {} task(s)...", work.len());
        }

        work.par_iter()
            .flat_map_iter(|(task, hits)| self.rebuild(task, hits))
            .collect()
    }

    fn is_watched(&self, path: &Utf8Path) -> bool {
        self.matchers
            .iter()
            .any(|matcher| matches(&matcher.include, &matcher.exclude, path))
    }

    fn is_fresh(&mut self, change: &Change) -> bool {
        if change.kind == ChangeKind::Remove {
            self.hashes.remove(&change.path);
            return true;
        }

        let hash = match fs::read(&change.path) {
            Ok(contents) => blake3::hash(&contents),
            Err(_) => return true,
        };

        self.hashes.insert(change.path.clone(), hash) != Some(hash)
    }

    fn rebuild(&self, task: &Task, changes: &[&Change]) -> Vec<Rebuild> {
        if !task.do_one {
            return vec![self.run(task, task.files.clone())];
        }

        let root = self.registry.root();

        changes
            .iter()
            .map(|change| match change.kind {
                ChangeKind::Write => self.run(task, vec![Pattern::escape(change.path.as_str())]),
                ChangeKind::Remove => {
                    let source = File::new(change.path.clone(), task.base(root), Vec::new());
                    let path = task.dest(root).join(source.relative());

                    match crate::io::remove(&path) {
                        Ok(_) => {
                            tracing::info!("Removed {path}");
                            Rebuild::Removed {
                                task: task.name.clone(),
                                path,
                            }
                        }
                        Err(error) => Rebuild::Failed {
                            task: task.name.clone(),
                            error: error.into(),
                        },
                    }
                }
            })
            .collect()
    }

    fn run(&self, task: &Task, files: Vec<String>) -> Rebuild {
        let result = task
            .pipeline(
                self.registry.root(),
                self.registry.plugins(),
                &self.args,
                files,
            )
            .and_then(Pipeline::run);

        match result {
            Ok(completion) => {
                tracing::info!("Finished '{}' {}", task.name, overhead(&completion));

                if let (Some(scope), Some(reloader)) = (&task.sync, &self.reloader) {
                    reloader.reload(scope);
                }

                Rebuild::Built {
                    task: task.name.clone(),
                    completion,
                }
            }
            Err(error) => {
                tracing::error!("Task '{}' failed: {error}", task.name);

                Rebuild::Failed {
                    task: task.name.clone(),
                    error,
                }
            }
        }
    }
}

#[cfg(feature = "live")]
mod live {
    use std::collections::HashSet;
    use std::sync::{Arc, mpsc};
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};
    use notify::{EventKind, RecursiveMode};
    use notify_debouncer_full::new_debouncer;

    use super::{Change, ChangeWatcher};
    use crate::args::Args;
    use crate::error::WatchError;
    use crate::registry::Registry;
    use crate::reload::{ReloadServer, load_config};

    pub(crate) fn watch(registry: &Registry, args: &Args) -> Result<(), WatchError> {
        let root = registry.root();
        let mut watcher = ChangeWatcher::new(registry, args.clone())?;

        let config = load_config(root);
        let server = config
            .as_ref()
            .and_then(|config| match ReloadServer::start(config) {
                Ok(server) => Some(server),
                Err(e) => {
                    tracing::warn!("live reload disabled: {e}");
                    None
                }
            });

        if let Some(server) = &server {
            watcher = watcher.reloader(Arc::new(server.clone()));
        }

        #[cfg(feature = "server")]
        let _http = config.as_ref().and_then(|config| {
            let dir = config.server.as_ref()?;
            Some(crate::http::start(root.join(dir), config.host(), config.http_port()))
        });

        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

        let mut roots = HashSet::new();
        for task in registry.tasks() {
            for glob in task.watch.iter().filter(|glob| !glob.starts_with('!')) {
                match watch_root(root, glob) {
                    Ok(dir) => {
                        roots.insert(dir);
                    }
                    Err(e) => tracing::error!("can't watch {glob} for '{}': {e}", task.name),
                }
            }
        }

        for path in collapse_watch_paths(roots) {
            tracing::info!("watching {path}");
            debouncer.watch(&path, RecursiveMode::Recursive)?;
        }

        tracing::info!("waiting for changes...");

        loop {
            match rx.recv()? {
                Ok(events) => {
                    let changes: Vec<_> = events
                        .iter()
                        .filter(|de| {
                            matches!(
                                de.event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            )
                        })
                        .flat_map(|de| &de.event.paths)
                        .filter_map(|path| Utf8Path::from_path(path))
                        .map(Change::at)
                        .collect();

                    tracing::debug!("{} changes received", changes.len());
                    watcher.handle(&changes);
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                }
            }
        }
    }

    /// Directory to watch for a glob: its static prefix, or the parent when
    /// the glob names a single file so that atomic saves are seen.
    fn watch_root(root: &Utf8Path, glob: &str) -> std::io::Result<Utf8PathBuf> {
        let path = root.join(glob);

        let components: Vec<_> = path.components().collect();
        let split = components
            .iter()
            .position(|c| c.as_str().contains(['*', '?', '[', '{']))
            .unwrap_or(components.len());

        let dir: Utf8PathBuf = components.iter().take(split).collect();
        let dir = dir.canonicalize_utf8()?;

        match dir.is_file() {
            true => Ok(dir.parent().map(Utf8Path::to_path_buf).unwrap_or(dir)),
            false => Ok(dir),
        }
    }

    /// Drops every path already covered by a recursive watch on one of its
    /// ancestors.
    fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = paths.into_iter().collect();
        paths.sort();

        let mut kept: Vec<Utf8PathBuf> = Vec::new();
        for path in paths {
            if kept.last().is_some_and(|last| path.starts_with(last)) {
                continue;
            }
            kept.push(path);
        }

        kept
    }

}
