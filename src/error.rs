#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use thiserror::Error;

/// Failure raised by a single transform stage (or by the destination writer)
/// while a pipeline was running.
#[derive(Debug)]
pub struct StageFailure {
    /// Name of the stage that failed, if it reported one.
    pub stage: Option<String>,
    /// The underlying error.
    pub error: anyhow::Error,
}

impl StageFailure {
    pub fn new(stage: impl AsRef<str>, error: impl Into<anyhow::Error>) -> Self {
        let stage = stage.as_ref();

        Self {
            stage: (!stage.is_empty()).then(|| stage.to_string()),
            error: error.into(),
        }
    }

    /// Stage name, or a generic label when the stage is anonymous.
    pub fn title(&self) -> &str {
        self.stage.as_deref().unwrap_or("Error")
    }

    /// Full error message including the chain of causes.
    pub fn message(&self) -> String {
        format!("{:#}", self.error)
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:#}", self.title(), self.error)
    }
}

impl std::error::Error for StageFailure {}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Plugin '{0}' is not in the catalog")]
    Unknown(String),

    #[error("Plugin '{name}' ({identifier}) failed to load:\n{error:#}")]
    Failed {
        name: String,
        identifier: String,
        error: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't build the pipe stages:\n{0:#}")]
    Pipes(anyhow::Error),

    #[error("Stage {0}")]
    Stage(#[from] StageFailure),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task name '{0}' is reserved")]
    Reserved(String),

    #[error("Task '{0}' is declared more than once")]
    Duplicate(String),

    #[error("Task '{0}' has no source files")]
    NoFiles(String),

    #[error("Task '{0}': brace expansion is not supported in '{1}', list the patterns separately")]
    Braces(String, String),

    #[error("Couldn't determine the project root.\n{0}")]
    Root(#[from] std::io::Error),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}':\n{1}")]
    Task(String, PipelineError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Error while cleaning output directories:\n{0}")]
    Clean(std::io::Error),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[cfg(not(feature = "live"))]
    #[error("Watch mode requires the `live` feature")]
    WatchDisabled,
}
