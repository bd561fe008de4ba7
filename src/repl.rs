use std::io::Write;

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    config::{EngineConfig, Flags},
    diagnostics::{Error, ErrorName, Result},
    state::Interpreter,
    value::Value,
};

pub struct Repl {
    interpreter: Interpreter,
}

impl Repl {
    pub fn new(flags: Flags, config: EngineConfig) -> Option<Self> {
        Some(Self {
            interpreter: Interpreter::with_config(flags, config)?,
        })
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    /// Evaluates one line, returning the display text of its result. The
    /// text of the thrown value comes back as `Err`.
    pub fn eval_line(&mut self, line: &str) -> std::result::Result<String, String> {
        let outcome = self.interpreter.protect(|j| {
            let closure = j.load_text("[stdin]", line)?;
            let receiver = j.global();
            j.call(receiver, closure, &[])
        });
        match outcome {
            Ok(Value::Undefined) => Ok(String::new()),
            Ok(value) => Ok(self.interpreter.to_display_string(&value)),
            Err(_) => {
                let thrown = self.interpreter.pop();
                Err(self.interpreter.to_display_string(&thrown))
            }
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(editor_error)?;
        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    match self.eval_line(trimmed) {
                        Ok(text) if text.is_empty() => {}
                        Ok(text) => println!("{text}"),
                        Err(text) => {
                            let _ = writeln!(self.interpreter.diagnostics, "{text}");
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(editor_error(err)),
            }
        }
        Ok(())
    }
}

fn editor_error(err: ReadlineError) -> Error {
    Error::Runtime {
        name: ErrorName::Error,
        message: format!("line editor failed: {err}"),
    }
}
