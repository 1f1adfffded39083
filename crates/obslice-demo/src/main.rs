#![forbid(unsafe_code)]

//! obslice demo binary.
//!
//! Runs the scripted counter and todo apps headlessly and prints how often
//! each view rendered.
//!
//! ```text
//! cargo run -p obslice-demo -- --app=todo --todos=1000 --notify=debounce
//! RUST_LOG=obslice=trace cargo run -p obslice-demo -- --app=count --clicks=3
//! ```

mod cli;
mod count_app;
mod todo_app;
mod view;

use std::process::ExitCode;

use obslice::TaskQueue;
use tracing::info;
use web_time::Instant;

use crate::cli::Opts;
use crate::count_app::CountApp;
use crate::todo_app::TodoApp;

fn main() -> ExitCode {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "demo failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(opts: &Opts) -> obslice::Result<()> {
    let config = opts.notify_config()?;
    let queue = TaskQueue::new();
    info!(
        app = ?opts.app,
        mode = %config.mode,
        window_ms = config.window_ms,
        "starting demo"
    );

    if opts.app.runs_count() {
        let started = Instant::now();
        let summary = CountApp::run(opts.clicks, &config, &queue)?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "count app finished");
        print!("{summary}");
    }

    if opts.app.runs_todo() {
        let started = Instant::now();
        let summary = TodoApp::run(opts.todos, &config, &queue)?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "todo app finished");
        print!("{summary}");
    }

    Ok(())
}
