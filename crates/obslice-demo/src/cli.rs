#![forbid(unsafe_code)]

//! Command-line argument parsing for the demo.
//!
//! Parses args by hand. Environment variables with the `OBSLICE_DEMO_*`
//! prefix override defaults; explicit flags override both.

use std::env;
use std::path::PathBuf;
use std::process;

use obslice::{NotifyConfig, NotifyMode, SliceError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP_TEXT: &str = "\
obslice demo: scripted headless counter and todo apps

USAGE:
    obslice-demo [OPTIONS]

OPTIONS:
    --app=APP          Which app to run: 'count', 'todo' or 'all' (default: all)
    --clicks=N         Increment clicks for the count app (default: 12)
    --todos=N          Todos bulk-added by the todo app (default: 1000)
    --notify=MODE      'immediate', 'debounce' or 'coalesce' (default: immediate)
    --window-ms=N      Debounce window in milliseconds (default: 16)
    --config=PATH      Load notify settings from a .toml or .json file
    --help, -h         Show this help message
    --version, -V      Show version

ENVIRONMENT VARIABLES:
    OBSLICE_DEMO_APP        Override --app
    OBSLICE_DEMO_NOTIFY     Override --notify
    OBSLICE_DEMO_WINDOW_MS  Override --window-ms
    RUST_LOG                Log filter (default: info)";

/// Which scripted app to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppChoice {
    Count,
    Todo,
    All,
}

impl AppChoice {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "count" => Some(Self::Count),
            "todo" => Some(Self::Todo),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn runs_count(self) -> bool {
        matches!(self, Self::Count | Self::All)
    }

    pub fn runs_todo(self) -> bool {
        matches!(self, Self::Todo | Self::All)
    }
}

/// Parsed command-line options.
#[derive(Debug, Clone, PartialEq)]
pub struct Opts {
    pub app: AppChoice,
    /// Number of simulated clicks on the count app's button.
    pub clicks: u32,
    /// Number of todos added in one batch.
    pub todos: usize,
    pub notify: NotifyMode,
    pub window_ms: u64,
    /// Notify settings file; overrides `notify` and `window_ms`.
    pub config: Option<PathBuf>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            app: AppChoice::All,
            clicks: 12,
            todos: 1000,
            notify: NotifyMode::Immediate,
            window_ms: obslice::config::DEFAULT_WINDOW_MS,
            config: None,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(Opts),
    Help,
    Version,
}

impl Opts {
    /// Parse process arguments and environment, exiting on `--help`,
    /// `--version` or invalid input.
    pub fn parse() -> Self {
        match Self::parse_from(env::args().skip(1), |key| env::var(key).ok()) {
            Ok(Command::Run(opts)) => opts,
            Ok(Command::Help) => {
                println!("{HELP_TEXT}");
                process::exit(0);
            }
            Ok(Command::Version) => {
                println!("obslice-demo {VERSION}");
                process::exit(0);
            }
            Err(message) => {
                eprintln!("{message}");
                eprintln!("Run with --help for usage information.");
                process::exit(1);
            }
        }
    }

    /// Parse `args` with `var` as the environment lookup.
    pub fn parse_from(
        args: impl IntoIterator<Item = String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Command, String> {
        let mut opts = Self::default();

        // Environment first; flags below override it.
        if let Some(val) = var("OBSLICE_DEMO_APP")
            && let Some(app) = AppChoice::parse(&val)
        {
            opts.app = app;
        }
        if let Some(val) = var("OBSLICE_DEMO_NOTIFY")
            && let Ok(mode) = val.parse()
        {
            opts.notify = mode;
        }
        if let Some(val) = var("OBSLICE_DEMO_WINDOW_MS")
            && let Ok(n) = val.parse()
        {
            opts.window_ms = n;
        }

        for arg in args {
            match arg.as_str() {
                "--help" | "-h" => return Ok(Command::Help),
                "--version" | "-V" => return Ok(Command::Version),
                other => {
                    if let Some(val) = other.strip_prefix("--app=") {
                        opts.app = AppChoice::parse(val)
                            .ok_or_else(|| format!("Invalid --app value: {val}"))?;
                    } else if let Some(val) = other.strip_prefix("--clicks=") {
                        opts.clicks = val
                            .parse()
                            .map_err(|_| format!("Invalid --clicks value: {val}"))?;
                    } else if let Some(val) = other.strip_prefix("--todos=") {
                        opts.todos = val
                            .parse()
                            .map_err(|_| format!("Invalid --todos value: {val}"))?;
                    } else if let Some(val) = other.strip_prefix("--notify=") {
                        opts.notify = val
                            .parse()
                            .map_err(|_| format!("Invalid --notify value: {val}"))?;
                    } else if let Some(val) = other.strip_prefix("--window-ms=") {
                        opts.window_ms = val
                            .parse()
                            .map_err(|_| format!("Invalid --window-ms value: {val}"))?;
                    } else if let Some(val) = other.strip_prefix("--config=") {
                        opts.config = Some(PathBuf::from(val));
                    } else {
                        return Err(format!("Unknown argument: {other}"));
                    }
                }
            }
        }

        Ok(Command::Run(opts))
    }

    /// Notify settings for the demo slices.
    pub fn notify_config(&self) -> Result<NotifyConfig, SliceError> {
        if let Some(path) = &self.config {
            return NotifyConfig::load_from_file(path);
        }
        let config = NotifyConfig {
            label: None,
            mode: self.notify,
            window_ms: self.window_ms,
        };
        config.validate()?;
        Ok(config)
    }
}
