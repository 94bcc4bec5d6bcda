//! Core library for the Hyacinth scripting runtime.
//! Implements literal values and dictionaries, the bytecode compiler and interpreter, and the
//! nested script runner library scripts reach through `import runner;`.

pub mod array;
pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostics;
pub mod dictionary;
pub mod drive;
pub mod interpreter;
pub mod lexer;
pub mod literal;
pub mod parser;
pub mod repl;
pub mod runner;
pub mod scope;

use std::sync::Once;

pub use array::LiteralArray;
pub use diagnostics::{Diagnostic, DiagnosticKind, HyacinthError, SourceSpan};
pub use dictionary::{DictionaryError, LiteralDictionary};
pub use drive::{DriveError, DriveTable};
pub use interpreter::Interpreter;
pub use literal::{Literal, LiteralKind, NativeStatus};
pub use repl::Repl;
pub use runner::{Executed, Loaded, Runner, RunnerError, hook_runner};

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber filtered by `RUST_LOG`. Does nothing when the variable is
/// unset or a subscriber was already installed by this function.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}

/// Creates an interpreter with the `runner` library registered.
pub fn interpreter_with_runner() -> Interpreter {
    let mut interpreter = Interpreter::new();
    interpreter.inject_native_hook("runner", hook_runner);
    interpreter
}
