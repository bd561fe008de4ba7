#![allow(dead_code)]

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use lumen::{EngineConfig, Flags, Interpreter, Value};

/// In-memory sink for an interpreter's output streams.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub j: Interpreter,
    pub output: Capture,
    pub diagnostics: Capture,
}

pub fn harness(flags: Flags) -> Harness {
    harness_with(flags, EngineConfig::default())
}

pub fn harness_with(flags: Flags, config: EngineConfig) -> Harness {
    let mut j = Interpreter::with_config(flags, config).expect("create interpreter");
    let output = Capture::default();
    let diagnostics = Capture::default();
    j.set_output(Box::new(output.clone()));
    j.set_diagnostics(Box::new(diagnostics.clone()));
    Harness {
        j,
        output,
        diagnostics,
    }
}

/// Loads `source` as a program and calls it with the global object as `this`.
pub fn eval_in(j: &mut Interpreter, source: &str) -> lumen::Result<Value> {
    j.protect(|j| {
        let closure = j.load_text("test.js", source)?;
        let receiver = j.global();
        j.call(receiver, closure, &[])
    })
}

/// Display text of the program's completion value.
pub fn eval_text(source: &str) -> String {
    let mut h = harness(Flags::NONE);
    match eval_in(&mut h.j, source) {
        Ok(value) => h.j.to_display_string(&value),
        Err(err) => panic!("evaluation failed: {err}"),
    }
}

/// Display text of the value thrown by the program.
pub fn eval_thrown(flags: Flags, source: &str) -> String {
    let mut h = harness(flags);
    match eval_in(&mut h.j, source) {
        Ok(value) => panic!("expected a throw, got {}", h.j.to_display_string(&value)),
        Err(_) => {
            let thrown = h.j.pop();
            h.j.to_display_string(&thrown)
        }
    }
}
