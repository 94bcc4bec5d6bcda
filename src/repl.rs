use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    diagnostics::{HyacinthError, Result},
    interpreter::Interpreter,
};

pub struct Repl {
    interpreter: Interpreter,
}

impl Repl {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline(">> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    if trimmed == ":reset" {
                        self.interpreter.reset();
                        continue;
                    }
                    // Errors were already written to the error sink.
                    if let Err(err) = self.interpreter.eval_source(trimmed) {
                        tracing::debug!(error = %err, "repl line failed");
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

fn readline_error(err: ReadlineError) -> HyacinthError {
    HyacinthError::from(std::io::Error::other(err))
}
