//! Command line front-end.
//!
//! ```text
//! sluice [TASK] [--tasks] [--log-level LEVEL] [FLAGS...]
//! ```
//!
//! Everything after the task name is forwarded to the pipe builders as
//! [`Args`], e.g. `sluice build --minify --env prod`.

use clap::Parser;
use console::style;

use crate::args::Args;
use crate::config::Config;
use crate::utils::LogLevel;

#[derive(Parser, Debug, Clone)]
#[command(name = "sluice", version, about = "Run declared build tasks")]
pub struct Cli {
    /// Job to run.
    #[arg(index = 1, default_value = "default")]
    pub task: String,

    /// List every job with its prerequisites and exit.
    #[arg(long)]
    pub tasks: bool,

    /// Overrides the `SLUICE_LOG` filter.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Flags handed to the pipe builders.
    #[arg(index = 2, trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
    pub flags: Vec<String>,
}

impl Cli {
    pub fn args(&self) -> Args {
        Args::parse(&self.flags)
    }
}

/// Parses the process arguments and runs the requested job.
pub fn run(config: Config) -> anyhow::Result<()> {
    run_with(Cli::parse(), config)
}

pub fn run_with(cli: Cli, config: Config) -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    crate::utils::init_logging(cli.log_level)?;

    let registry = config.finish()?;

    if cli.tasks {
        for (name, deps) in registry.jobs() {
            match deps.is_empty() {
                true => println!("{}", style(name).cyan()),
                false => println!("{} {}", style(name).cyan(), style(format!("<- {}", deps.join(", "))).dim()),
            }
        }
        return Ok(());
    }

    registry.run(&cli.task, &cli.args())?;

    Ok(())
}
