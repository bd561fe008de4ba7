use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lumen::{EngineConfig, Flags, Interpreter, Repl};

#[derive(Parser)]
#[command(author, version, about = "Lumen script interpreter")]
struct Args {
    /// Run with strict-mode semantics
    #[arg(long, global = true)]
    strict: bool,
    /// Number of value stack slots
    #[arg(long, global = true, default_value_t = lumen::config::DEFAULT_STACK_SIZE)]
    stack_size: usize,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of code
    Eval { source: String },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("LUMEN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let flags = if args.strict { Flags::STRICT } else { Flags::NONE };
    let config = EngineConfig::default().with_stack_size(args.stack_size);

    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let Some(mut interpreter) = Interpreter::with_config(flags, config) else {
                eprintln!("cannot create interpreter");
                return ExitCode::FAILURE;
            };
            exit_status(interpreter.run_file(&script))
        }
        Command::Eval { source } => {
            let Some(mut interpreter) = Interpreter::with_config(flags, config) else {
                eprintln!("cannot create interpreter");
                return ExitCode::FAILURE;
            };
            exit_status(interpreter.run("[string]", &source))
        }
        Command::Repl => {
            let Some(mut repl) = Repl::new(flags, config) else {
                eprintln!("cannot create interpreter");
                return ExitCode::FAILURE;
            };
            match repl.run() {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{err}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn exit_status(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
