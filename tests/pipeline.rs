mod common;

use std::{
    fs,
    io::{self, Cursor, Read, Seek, SeekFrom},
};

use common::{harness, Capture};
use lumen::{ingest::read_stream, resource::ResourceTracker, Error, Flags, IoReason, LoadMode};
use tempfile::tempdir;

#[test]
fn load_returns_a_callable_and_keeps_the_stack() {
    let mut h = harness(Flags::NONE);
    let closure = h.j.load_text("sum.js", "1 + 2").expect("load succeeds");
    assert!(h.j.is_callable(&closure));
    assert_eq!(h.j.stack_depth(), 0);
    assert_eq!(h.j.resources().syntax_trees, 0);

    let receiver = h.j.global();
    let value = h.j.call(receiver, closure, &[]).expect("call succeeds");
    assert_eq!(h.j.to_display_string(&value), "3");
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn try_load_pushes_closure_on_success() {
    let mut h = harness(Flags::NONE);
    assert!(h.j.try_load("ok.js", "var loaded = true;", LoadMode::Program));
    assert_eq!(h.j.stack_depth(), 1);
    let top = h.j.pop();
    assert!(h.j.is_callable(&top));
}

#[test]
fn try_load_leaves_syntax_error_on_the_stack() {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.try_load("bad.js", "var x = ;", LoadMode::Program));
    assert_eq!(h.j.stack_depth(), 1);
    let thrown = h.j.pop();
    let text = h.j.to_display_string(&thrown);
    assert!(text.starts_with("SyntaxError: bad.js:1:"), "got {text:?}");
    assert_eq!(h.j.resources().syntax_trees, 0);
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.diagnostics.text(), "");
}

#[test]
fn compile_errors_release_the_syntax_tree() {
    let mut h = harness(Flags::NONE);
    let err = h
        .j
        .protect(|j| j.load_text("top.js", "return 1;"))
        .expect_err("compile fails");
    match err.root() {
        Error::Compile(diag) => {
            assert_eq!(diag.to_string(), "top.js:1: return not in function");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
    assert_eq!(h.j.resources().syntax_trees, 0);
    h.j.pop();
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn strict_compile_rejects_duplicate_parameters() {
    let mut h = harness(Flags::STRICT);
    assert!(!h.j.try_load("dup.js", "function f(a, a) {}", LoadMode::Program));
    let thrown = h.j.pop();
    assert_eq!(
        h.j.to_display_string(&thrown),
        "SyntaxError: dup.js:1: duplicate formal parameter 'a'"
    );

    let mut sloppy = harness(Flags::NONE);
    assert!(sloppy.j.try_load("dup.js", "function f(a, a) {}", LoadMode::Program));
}

#[test]
fn strict_eval_code_gets_its_own_scope() {
    let mut h = harness(Flags::STRICT);
    let closure = h.j.load_eval("eval.js", "var x = 41; x + 1").expect("load eval code");
    let receiver = h.j.global();
    let value = h.j.call(receiver, closure, &[]).expect("run eval code");
    assert_eq!(h.j.to_display_string(&value), "42");

    let global = h.j.global();
    let leaked = h.j.get_property(&global, "x").expect("read global");
    assert!(leaked.is_undefined());
    assert!(!h.j.run("check.js", "x;"));
    assert_eq!(h.diagnostics.text(), "ReferenceError: 'x' is not defined\n");
}

#[test]
fn sloppy_eval_code_binds_globally() {
    let mut h = harness(Flags::NONE);
    let closure = h.j.load_eval("eval.js", "var x = 41;").expect("load eval code");
    let receiver = h.j.global();
    h.j.call(receiver, closure, &[]).expect("run eval code");

    let global = h.j.global();
    let bound = h.j.get_property(&global, "x").expect("read global");
    assert_eq!(h.j.to_display_string(&bound), "41");
}

#[test]
fn missing_file_reports_open_failure() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("missing.js");
    let mut h = harness(Flags::NONE);

    let err = h.j.protect(|j| j.load_file(&path)).expect_err("open fails");
    match err.root() {
        Error::Io { reason, path: reported } => {
            assert_eq!(*reason, IoReason::Open);
            assert_eq!(*reported, path.display().to_string());
        }
        other => panic!("expected open failure, got {other:?}"),
    }
    let thrown = h.j.pop();
    assert_eq!(
        h.j.to_display_string(&thrown),
        format!("Error: cannot open file: '{}'", path.display())
    );
    assert_eq!(h.j.trace().len(), 1);
    assert_eq!(&*h.j.trace()[0].name, "-top-");
    let stats = h.j.resources();
    assert_eq!(stats.open_files, 0);
    assert_eq!(stats.source_buffers, 0);
}

#[test]
fn syntax_error_in_file_closes_the_file() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("broken.js");
    fs::write(&path, "var = 1;").expect("write script");
    let mut h = harness(Flags::NONE);
    let before = h.j.resources();

    let err = h.j.protect(|j| j.load_file(&path)).expect_err("parse fails");
    assert!(matches!(err.root(), Error::Syntax(_)));

    let after = h.j.resources();
    assert_eq!(after.open_files, 0);
    assert_eq!(after.source_buffers, 0);
    assert_eq!(after.syntax_trees, 0);
    assert_eq!(after.files_closed, before.files_closed + 1);
}

#[test]
fn loads_and_runs_a_file() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("answer.js");
    fs::write(&path, "var answer = 6 * 7;\nprint('answer', answer);\nanswer").expect("write script");
    let mut h = harness(Flags::NONE);

    let closure = h.j.load_file(&path).expect("load file");
    assert_eq!(h.j.resources().open_files, 0);
    let receiver = h.j.global();
    let value = h.j.call(receiver, closure, &[]).expect("run file");
    assert_eq!(h.j.to_display_string(&value), "42");
    assert_eq!(h.output.text(), "answer 42\n");

    assert!(h.j.run_file(&path));
    assert_eq!(h.j.resources().files_closed, 2);
}

#[test]
fn try_load_file_pushes_closure_on_success() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("ok.js");
    fs::write(&path, "print('loaded');").expect("write script");
    let mut h = harness(Flags::NONE);

    assert!(h.j.try_load_file(&path));
    assert_eq!(h.j.stack_depth(), 1);
    let closure = h.j.pop();
    let receiver = h.j.global();
    h.j.call(receiver, closure, &[]).expect("run loaded file");
    assert_eq!(h.output.text(), "loaded\n");
    assert_eq!(h.j.resources().open_files, 0);
}

#[test]
fn try_load_file_leaves_open_failure_on_the_stack() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("missing.js");
    let mut h = harness(Flags::NONE);

    assert!(!h.j.try_load_file(&path));
    assert_eq!(h.j.stack_depth(), 1);
    let thrown = h.j.pop();
    assert_eq!(
        h.j.to_display_string(&thrown),
        format!("Error: cannot open file: '{}'", path.display())
    );
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.diagnostics.text(), "");
}

#[test]
fn try_load_file_closes_the_file_on_syntax_errors() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("broken.js");
    fs::write(&path, "function (").expect("write script");
    let mut h = harness(Flags::NONE);
    let before = h.j.resources();

    assert!(!h.j.try_load_file(&path));
    let thrown = h.j.pop();
    let text = h.j.to_display_string(&thrown);
    assert!(text.starts_with("SyntaxError: "), "got {text:?}");

    let after = h.j.resources();
    assert_eq!(after.files_closed, before.files_closed + 1);
    assert_eq!(after.open_files, 0);
    assert_eq!(after.source_buffers, 0);
    assert_eq!(after.syntax_trees, 0);
    assert_eq!(h.j.stack_depth(), 0);
}

fn assert_too_deep(source: &str) {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.try_load("deep.js", source, LoadMode::Program));
    assert_eq!(h.j.stack_depth(), 1);
    let thrown = h.j.pop();
    let text = h.j.to_display_string(&thrown);
    assert!(text.starts_with("SyntaxError: deep.js:1:"), "got {text:?}");
    assert!(text.ends_with("too much nesting"), "got {text:?}");
    assert_eq!(h.j.resources().syntax_trees, 0);
}

#[test]
fn deeply_nested_parentheses_are_a_syntax_error() {
    let depth = 10_000;
    assert_too_deep(&format!("{}1{}", "(".repeat(depth), ")".repeat(depth)));
}

#[test]
fn deeply_nested_blocks_and_unary_operators_are_syntax_errors() {
    assert_too_deep(&format!("{}{}", "{".repeat(10_000), "}".repeat(10_000)));
    assert_too_deep(&format!("{}1", "!".repeat(10_000)));
    assert_too_deep(&format!("x{}", " = x".repeat(10_000)));
}

#[test]
fn long_operator_and_member_chains_are_bounded() {
    assert_too_deep(&format!("1{}", " + 1".repeat(100_000)));
    assert_too_deep(&format!("a{}", ".b".repeat(100_000)));
    // Chains nested in groups share one budget.
    let mut nested = String::from("1");
    for _ in 0..30 {
        nested = format!("({nested}{})", " + 1".repeat(30));
    }
    assert_too_deep(&nested);
}

#[test]
fn moderate_nesting_still_loads() {
    let mut h = harness(Flags::NONE);
    let source = format!("{}1{} + 2 * 3", "(".repeat(10), ")".repeat(10));
    let closure = h.j.load_text("nested.js", &source).expect("load succeeds");
    let receiver = h.j.global();
    let value = h.j.call(receiver, closure, &[]).expect("call succeeds");
    assert_eq!(h.j.to_display_string(&value), "7");
}

#[test]
fn run_reports_failures_and_pops_them() {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.run("oops.js", "throw 'oops';"));
    assert!(!h.j.run("syntax.js", "1 +"));
    assert!(h.j.run("fine.js", "print('still alive');"));
    assert_eq!(h.j.stack_depth(), 0);

    let report = h.diagnostics.text();
    let mut lines = report.lines();
    assert_eq!(lines.next(), Some("oops"));
    assert!(lines
        .next()
        .is_some_and(|line| line.starts_with("SyntaxError: syntax.js:1:")));
    assert_eq!(h.output.text(), "still alive\n");
}

#[test]
fn run_file_reports_missing_files() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("absent.js");
    let mut h = harness(Flags::NONE);
    let diagnostics = Capture::default();
    h.j.set_diagnostics(Box::new(diagnostics.clone()));

    assert!(!h.j.run_file(&path));
    assert_eq!(
        diagnostics.text(),
        format!("Error: cannot open file: '{}'\n", path.display())
    );
}

#[test]
fn io_errors_render_like_thrown_values() {
    assert_eq!(
        Error::io(IoReason::Open, "missing.js").to_string(),
        "Error: cannot open file: 'missing.js'"
    );
    assert_eq!(
        Error::io(IoReason::Read, "short.js").to_string(),
        "Error: cannot read data from file: 'short.js'"
    );
}

#[derive(Clone, Copy, PartialEq)]
enum Fault {
    SeekEnd,
    Tell,
    SeekStart,
    ShortRead,
}

struct FaultyReader {
    fault: Fault,
    data: Cursor<Vec<u8>>,
}

impl FaultyReader {
    fn new(fault: Fault) -> Self {
        Self {
            fault,
            data: Cursor::new(b"print(1);".to_vec()),
        }
    }
}

impl Read for FaultyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // A stream that ends before its reported length.
        if self.fault == Fault::ShortRead {
            return Ok(0);
        }
        self.data.read(buf)
    }
}

impl Seek for FaultyReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let failing = matches!(
            (self.fault, pos),
            (Fault::SeekEnd, SeekFrom::End(_))
                | (Fault::Tell, SeekFrom::Current(_))
                | (Fault::SeekStart, SeekFrom::Start(_))
        );
        if failing {
            return Err(io::Error::new(io::ErrorKind::Other, "injected fault"));
        }
        self.data.seek(pos)
    }
}

fn assert_stream_failure(fault: Fault, expected: IoReason) {
    let tracker = ResourceTracker::new();
    match read_stream("fake.js", FaultyReader::new(fault), &tracker) {
        Err(Error::Io { reason, path }) => {
            assert_eq!(reason, expected);
            assert_eq!(path, "fake.js");
        }
        Err(other) => panic!("expected {expected:?}, got {other:?}"),
        Ok(_) => panic!("expected {expected:?}, read succeeded"),
    }
    let stats = tracker.stats();
    assert_eq!(stats.open_files, 0);
    assert_eq!(stats.source_buffers, 0);
    assert_eq!(stats.files_closed, 1);
}

#[test]
fn seek_to_end_failure_is_reported() {
    assert_stream_failure(Fault::SeekEnd, IoReason::Seek);
}

#[test]
fn tell_failure_is_reported() {
    assert_stream_failure(Fault::Tell, IoReason::Tell);
}

#[test]
fn rewind_failure_is_reported() {
    assert_stream_failure(Fault::SeekStart, IoReason::Seek);
}

#[test]
fn short_read_is_reported() {
    assert_stream_failure(Fault::ShortRead, IoReason::Read);
}

#[test]
fn stream_contents_are_buffered_whole() {
    let tracker = ResourceTracker::new();
    let source = Cursor::new("var s = 'héllo';".as_bytes().to_vec());
    let buffer = read_stream("mem.js", source, &tracker).expect("read succeeds");
    assert_eq!(buffer.text(), "var s = 'héllo';");
    assert_eq!(tracker.stats().open_files, 1);
    assert_eq!(tracker.stats().source_buffers, 1);
    drop(buffer);
    assert_eq!(tracker.stats().open_files, 0);
    assert_eq!(tracker.stats().files_closed, 1);
}
