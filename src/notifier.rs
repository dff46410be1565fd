//! Error reporting for failing stages.

use std::sync::Arc;

use console::{Term, style};

use crate::error::StageFailure;

/// Callback invoked when a stage fails. Once it returns, the pipeline ends
/// gracefully instead of failing.
pub type OnError = Arc<dyn Fn(&StageFailure) + Send + Sync>;

/// Desktop notification service.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes a highlighted banner to the terminal and rings the bell.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, message: &str) {
        let term = Term::stderr();
        let banner = format!(
            "\x07{} {}\n{}",
            style("✖").red().bold(),
            style(title).red().bold(),
            style(message).dim()
        );

        // The log line already carries the message.
        let _ = term.write_line(&banner);
    }
}

/// Builds the default handler: log the failure, send a notification and let
/// the stream end.
pub fn default_on_error(notifier: Arc<dyn Notifier>) -> OnError {
    Arc::new(move |failure: &StageFailure| {
        let title = failure.title();
        let message = failure.message();

        tracing::error!(stage = title, "{message}");
        notifier.notify(title, &message);
    })
}
