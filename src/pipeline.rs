//! Source text to bound closure, and the convenience runners built on it.
//!
//! Parsing, compilation and binding all happen inside a protected scope, so
//! the syntax tree and any source buffer are released on every exit path
//! before an error becomes visible to the caller.

use std::{io::Write, path::Path};

use crate::{
    compiler,
    diagnostics::{Error, Result},
    environment::Environment,
    ingest, parser,
    state::Interpreter,
    value::Value,
};

/// How loaded code binds its declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Top-level code: binds into the global environment.
    Program,
    /// `eval` code: in a strict instance it gets a private scope nested in
    /// the current environment; otherwise it binds like a program.
    Eval,
}

impl Interpreter {
    /// Parses and compiles `source`, returning a closure ready to be called.
    pub fn load(&mut self, name: &str, source: &str, mode: LoadMode) -> Result<Value> {
        let _span = tracing::debug_span!("load", name, ?mode).entered();
        self.guarded(|j| j.load_unprotected(name, source, mode))
    }

    fn load_unprotected(&mut self, name: &str, source: &str, mode: LoadMode) -> Result<Value> {
        let tree = parser::parse(name, source, &self.resources).map_err(Error::Syntax)?;
        let unit = compiler::compile(&tree, self.strict);
        drop(tree);
        let unit = unit.map_err(Error::Compile)?;

        let target = match mode {
            LoadMode::Eval if self.strict => Environment::alloc(&mut self.heap, None, Some(self.env)),
            _ => self.global_env,
        };
        tracing::debug!(ops = unit.code.len(), "compiled");
        Ok(self.bind_closure(unit, target))
    }

    pub fn load_text(&mut self, name: &str, source: &str) -> Result<Value> {
        self.load(name, source, LoadMode::Program)
    }

    pub fn load_eval(&mut self, name: &str, source: &str) -> Result<Value> {
        self.load(name, source, LoadMode::Eval)
    }

    /// Non-throwing load. On success the closure is pushed; on failure the
    /// thrown value is left on top of the stack instead.
    pub fn try_load(&mut self, name: &str, source: &str, mode: LoadMode) -> bool {
        self.protect(|j| {
            let closure = j.load(name, source, mode)?;
            j.push(closure)
        })
        .is_ok()
    }

    /// Reads and loads a script file. The file is closed before this returns,
    /// whatever the outcome.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let name = path.display().to_string();
        self.guarded(|j| {
            let buffer = ingest::read_file(path, &j.resources)?;
            let loaded = j.load_text(&name, &buffer.text());
            drop(buffer);
            loaded
        })
    }

    /// Non-throwing [`Interpreter::load_file`], with the same stack contract
    /// as [`Interpreter::try_load`].
    pub fn try_load_file(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.protect(|j| {
            let closure = j.load_file(path)?;
            j.push(closure)
        })
        .is_ok()
    }

    /// Loads and runs `source` with the global object as `this`. Failures are
    /// reported to the diagnostics stream and answered with `false`.
    pub fn run(&mut self, name: &str, source: &str) -> bool {
        let outcome = self.protect(|j| {
            let closure = j.load_text(name, source)?;
            j.call_global(closure)
        });
        self.report(outcome)
    }

    pub fn run_file(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let outcome = self.protect(|j| {
            let closure = j.load_file(path)?;
            j.call_global(closure)
        });
        self.report(outcome)
    }

    fn call_global(&mut self, closure: Value) -> Result<()> {
        let receiver = self.global();
        self.call(receiver, closure, &[]).map(drop)
    }

    fn report(&mut self, outcome: Result<()>) -> bool {
        match outcome {
            Ok(()) => true,
            Err(err) => {
                let thrown = self.pop();
                let text = self.to_display_string(&thrown);
                tracing::warn!(error = %err, "script failed");
                let _ = writeln!(self.diagnostics, "{text}");
                let _ = self.diagnostics.flush();
                false
            }
        }
    }
}
