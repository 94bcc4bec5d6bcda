use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args as ClapArgs, Parser, Subcommand};

use hyacinth::{HyacinthError, Interpreter, Repl, compiler, init_tracing, interpreter_with_runner};

#[derive(Parser)]
#[command(author, version, about = "Hyacinth script interpreter")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and run a script file
    Run {
        script: PathBuf,
        #[command(flatten)]
        drives: DriveArgs,
    },
    /// Compile a script file to bytecode
    Compile {
        script: PathBuf,
        /// Output path (defaults to the script path with a `.hyb` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a precompiled bytecode file
    Exec {
        bytecode: PathBuf,
        #[command(flatten)]
        drives: DriveArgs,
    },
    /// Start an interactive REPL session
    Repl {
        #[command(flatten)]
        drives: DriveArgs,
    },
}

#[derive(ClapArgs, Default)]
struct DriveArgs {
    /// Map a drive name to a directory, as NAME=PATH (repeatable)
    #[arg(long = "drive", value_name = "NAME=PATH", value_parser = parse_drive)]
    drives: Vec<(String, PathBuf)>,
}

fn parse_drive(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, found `{raw}`")),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Repl {
        drives: DriveArgs::default(),
    });
    match dispatch(command) {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported through the interpreter's error sink.
        Err(HyacinthError::Halted) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command) -> Result<(), HyacinthError> {
    match command {
        Command::Run { script, drives } => {
            let source = fs::read_to_string(&script)?;
            let mut interpreter = host(&drives, script_dir(&script));
            interpreter.eval_source(&source)
        }
        Command::Compile { script, output } => {
            let source = fs::read_to_string(&script)?;
            let bytecode = compiler::compile(&source)?;
            let output = output.unwrap_or_else(|| script.with_extension("hyb"));
            fs::write(&output, bytecode)?;
            tracing::info!(output = %output.display(), "bytecode written");
            Ok(())
        }
        Command::Exec { bytecode, drives } => {
            let bytes = fs::read(&bytecode)?;
            let mut interpreter = host(&drives, script_dir(&bytecode));
            interpreter.run(bytes)
        }
        Command::Repl { drives } => {
            let mut repl = Repl::new(host(&drives, std::env::current_dir()?));
            repl.run()
        }
    }
}

/// The root interpreter: `runner` library registered, `scripts` drive mounted at
/// `default_root`, then every `--drive` mapping applied on top.
fn host(drives: &DriveArgs, default_root: PathBuf) -> Interpreter {
    let interpreter = interpreter_with_runner();
    interpreter.mount("scripts", default_root);
    for (name, path) in &drives.drives {
        interpreter.mount(name.clone(), path.clone());
    }
    interpreter
}

fn script_dir(script: &Path) -> PathBuf {
    match script.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
