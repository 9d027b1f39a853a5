//! Tracing subscriber setup for the `dlg` binary.
//!
//! Filter priority, highest first:
//!
//! 1. `DLG_LOG` (directives such as `dialog_harness=debug,warn`)
//! 2. `RUST_LOG`
//! 3. `-v` → debug, `-q` → error
//! 4. `info`
//!
//! Logs go to stderr so that command output on stdout stays parseable.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Project-specific filter variable.
pub const LOG_ENV: &str = "DLG_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// `-v` wins over `-q` when both are given.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else if quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    pub fn level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::INFO,
            Verbosity::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbosity: Verbosity) {
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(verbosity == Verbosity::Verbose);

    let _ = tracing_subscriber::registry()
        .with(build_filter(verbosity, std::env::var(LOG_ENV).ok()))
        .with(layer)
        .try_init();
}

fn build_filter(verbosity: Verbosity, project_directives: Option<String>) -> EnvFilter {
    if let Some(filter) = project_directives.and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(verbosity.level().as_str().to_ascii_lowercase())
}
