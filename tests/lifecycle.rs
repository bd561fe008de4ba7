mod common;

use common::{eval_in, harness, harness_with};
use lumen::{EngineConfig, Error, Flags, Interpreter, TraceEntry, Value};

fn quiet_panic(_: &mut Interpreter) {}

fn loud_panic(j: &mut Interpreter) {
    j.set_context("panicked");
}

#[test]
fn fresh_instance_has_top_level_trace_entry() {
    let j = Interpreter::new(Flags::NONE).expect("create interpreter");
    assert_eq!(j.trace(), &[TraceEntry::new("-top-", "native", 0)]);
    assert_eq!(j.stack_depth(), 0);
    assert_eq!(j.protected_depth(), 0);
    assert_eq!(j.gc_epoch(), 1);
    assert!(!j.is_strict());
    assert_eq!(j.current_environment(), j.global_environment());
}

#[test]
fn strict_flag_is_fixed_at_creation() {
    let j = Interpreter::new(Flags::STRICT).expect("create interpreter");
    assert!(j.is_strict());

    let combined = Flags::NONE | Flags::STRICT;
    assert!(combined.contains(Flags::STRICT));
    assert!(Interpreter::new(combined).expect("create interpreter").is_strict());
    assert!(!(Flags::NONE | Flags::NONE).contains(Flags::STRICT));
}

#[test]
fn builtins_are_installed_on_the_global_object() {
    let j = Interpreter::new(Flags::NONE).expect("create interpreter");
    let global = j.global();
    for name in ["print", "eval", "Error", "gc"] {
        let value = j.get_property(&global, name).expect("read global");
        assert!(j.is_callable(&value), "{name} should be callable");
    }
    let math = j.get_property(&global, "Math").expect("read Math");
    assert!(math.as_object().is_some());
}

#[test]
fn instances_share_nothing() {
    let mut first = harness(Flags::NONE);
    let mut second = harness(Flags::NONE);
    eval_in(&mut first.j, "var shared = 1;").expect("define in first");
    assert!(eval_in(&mut second.j, "shared").is_err());
    let thrown = second.j.pop();
    assert_eq!(
        second.j.to_display_string(&thrown),
        "ReferenceError: 'shared' is not defined"
    );
}

#[test]
fn set_panic_returns_previous_handler() {
    let mut j = Interpreter::new(Flags::NONE).expect("create interpreter");
    j.set_panic(quiet_panic);
    let previous = j.set_panic(loud_panic);
    assert_eq!(previous as usize, quiet_panic as usize);

    let err = j.throw(Error::range_error("nobody catches this"));
    assert!(matches!(err, Error::Panic(_)));
    assert_eq!(j.context::<&str>(), Some(&"panicked"));
}

#[test]
fn default_panic_reports_to_diagnostics() {
    let mut h = harness(Flags::NONE);
    let err = h.j.throw(Error::Throw {
        value: Value::string("boom"),
        text: "boom".to_string(),
    });
    assert!(matches!(err, Error::Panic(_)));
    assert_eq!(h.diagnostics.text(), "uncaught exception: boom\n");
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn unprotected_load_failure_panics() {
    let mut h = harness(Flags::NONE);
    let err = h.j.load_text("broken.js", "var = ;").expect_err("load fails");
    assert!(matches!(err, Error::Panic(_)));
    assert!(matches!(err.root(), Error::Syntax(_)));
    assert!(h
        .diagnostics
        .text()
        .starts_with("uncaught exception: SyntaxError: broken.js:1:"));
    assert_eq!(h.j.stack_depth(), 0);
    assert_eq!(h.j.resources().syntax_trees, 0);
}

#[test]
fn context_is_typed_and_replaceable() {
    let mut j = Interpreter::new(Flags::NONE).expect("create interpreter");
    assert!(j.set_context(41u32).is_none());
    assert_eq!(j.context::<u32>(), Some(&41));
    assert_eq!(j.context::<String>(), None);

    if let Some(value) = j.context_mut::<u32>() {
        *value += 1;
    }
    let previous = j.set_context(String::from("host"));
    let previous = previous.and_then(|boxed| boxed.downcast::<u32>().ok());
    assert_eq!(previous.as_deref(), Some(&42));
    assert_eq!(j.context::<String>().map(String::as_str), Some("host"));

    assert!(j.take_context().is_some());
    assert!(j.context::<String>().is_none());
}

#[test]
fn registry_references_anchor_values() {
    let mut j = Interpreter::new(Flags::NONE).expect("create interpreter");
    let object = j.new_object();
    let first = j.make_ref(object.clone()).expect("make ref");
    let second = j.make_ref(Value::Number(2.0)).expect("make ref");
    assert_eq!(first, "_0");
    assert_eq!(second, "_1");

    j.gc();
    let cell = object.as_object().expect("object handle");
    assert!(j.heap().contains(cell));
    assert_eq!(j.get_ref(&first).as_object(), Some(cell));

    j.unref(&first);
    assert!(j.get_ref(&first).is_undefined());
    j.gc();
    assert!(!j.heap().contains(cell));
}

#[test]
fn gc_frees_unreachable_cells_and_advances_epoch() {
    let mut j = Interpreter::new(Flags::NONE).expect("create interpreter");
    j.gc();
    let epoch = j.gc_epoch();
    let live = j.heap().live_cells();
    j.new_object();
    j.new_object();
    assert_eq!(j.gc(), 2);
    assert_eq!(j.heap().live_cells(), live);
    assert!(j.gc_epoch() > epoch);
}

#[test]
fn gc_keeps_script_state() {
    let mut h = harness(Flags::NONE);
    eval_in(&mut h.j, "var keep = { inner: { n: 7 } }; gc();").expect("script runs");
    h.j.gc();
    let value = eval_in(&mut h.j, "keep.inner.n").expect("state survives");
    assert_eq!(h.j.to_display_string(&value), "7");
}

#[test]
fn deep_recursion_hits_the_call_stack_limit() {
    let mut h = harness_with(Flags::NONE, EngineConfig::default().with_trace_limit(16));
    assert!(!h.j.run("recurse.js", "function down() { return down(); } down();"));
    assert_eq!(h.diagnostics.text(), "RangeError: call stack overflow\n");
    assert_eq!(h.j.trace().len(), 1);
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn pushing_past_capacity_is_a_stack_overflow() {
    let mut h = harness_with(Flags::NONE, EngineConfig::default().with_stack_size(4));
    assert!(!h.j.run("wide.js", "print(1, 2, 3);"));
    assert_eq!(h.diagnostics.text(), "RangeError: stack overflow\n");
    assert_eq!(h.j.stack_depth(), 0);
    assert_eq!(h.output.text(), "");
}

#[test]
fn unbounded_recursion_with_default_limits_throws() {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.run("down.js", "function down(n) { return down(n + 1); } down(0);"));
    let report = h.diagnostics.text();
    assert!(report.starts_with("RangeError: "), "got {report:?}");
    assert!(report.contains("stack overflow"), "got {report:?}");
    assert_eq!(h.j.trace().len(), 1);
    assert_eq!(h.j.stack_depth(), 0);
    assert_eq!(h.j.protected_depth(), 0);
}

#[test]
fn deep_recursion_can_be_caught_by_the_script() {
    let mut h = harness(Flags::NONE);
    let value = eval_in(
        &mut h.j,
        "function down(n) { return down(n + 1); }
         var caught;
         try { down(0); } catch (e) { caught = e.name; }
         caught",
    )
    .expect("script completes");
    assert_eq!(h.j.to_display_string(&value), "RangeError");
    assert_eq!(h.j.current_environment(), h.j.global_environment());
}

#[test]
fn recursion_through_try_blocks_hits_the_try_limit() {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.run(
        "nest.js",
        "function down(n) { try { return down(n + 1); } catch (e) { throw e; } } down(0);",
    ));
    assert_eq!(h.diagnostics.text(), "RangeError: exception stack overflow\n");
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn recursion_through_natives_hits_the_reentry_limit() {
    let mut h = harness(Flags::NONE);
    assert!(!h.j.run("again.js", "function again() { eval('again()'); } again();"));
    assert_eq!(h.diagnostics.text(), "RangeError: call stack overflow\n");
    assert_eq!(h.j.trace().len(), 1);
    assert_eq!(h.j.stack_depth(), 0);

    let mut shallow = harness_with(Flags::NONE, EngineConfig::default().with_reentry_limit(2));
    assert!(shallow.j.run("once.js", "print(eval('1 + 1'));"));
    assert!(!shallow.j.run("twice.js", "eval(\"eval('1')\");"));
    assert_eq!(shallow.output.text(), "2\n");
    assert_eq!(
        shallow.diagnostics.text(),
        "RangeError: call stack overflow\n"
    );
}
