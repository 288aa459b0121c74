use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use shale::interpreter::{self, Interpreter};
use shale::repl;

/// A small shell-oriented scripting language.
#[derive(Parser)]
#[command(name = "shale", version)]
struct Args {
    /// Script file to execute; starts an interactive session when omitted.
    file: Option<PathBuf>,
}

/// Filter comes from `SHALE_LOG` (falling back to `RUST_LOG`), default
/// `warn`; output goes to stderr so it never mixes with script output.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("SHALE_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let mut interpreter = Interpreter::new();
    match args.file {
        Some(path) => {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            if let Err(error) = interpreter.eval_source(&source) {
                interpreter::print_error(&error);
                return Ok(ExitCode::FAILURE);
            }
        }
        None => interpreter.exec_interactive(repl::stdin_reader()),
    }
    Ok(ExitCode::SUCCESS)
}
