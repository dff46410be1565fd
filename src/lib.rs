#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod args;
pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
mod config;
mod error;
#[cfg(feature = "server")]
mod http;
mod io;
mod lazy;
mod notifier;
mod pipeline;
pub mod plugin;
mod registry;
#[cfg(feature = "live")]
pub mod reload;
mod utils;
pub mod watch;

pub use crate::args::Args;
pub use crate::config::{
    Config, DEFAULT_DEST, Defaults, PackageSpec, PipeBuilder, RESERVED, ReloadScope, TaskSpec,
};
pub use crate::error::*;
pub use crate::io::{delete, glob_base};
pub use crate::lazy::Lazy;
pub use crate::notifier::{Notifier, OnError, TerminalNotifier, default_on_error};
pub use crate::pipeline::{Completion, Pipeline};
pub use crate::plugin::{File, Plugin, PluginRegistry, Plugins, Stage};
pub use crate::registry::{Registry, Task};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::utils::LogLevel;
pub use crate::watch::{Change, ChangeKind, ChangeWatcher, Rebuild, Reloader};
