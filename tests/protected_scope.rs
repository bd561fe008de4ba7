mod common;

use common::{harness, harness_with};
use lumen::{EngineConfig, Error, ErrorName, Flags, Interpreter, Value};

fn record_panic(j: &mut Interpreter) {
    let text = match j.top() {
        Some(value) => j.to_display_string(value),
        None => "<empty>".to_string(),
    };
    if let Some(log) = j.context_mut::<Vec<String>>() {
        log.push(text);
    }
}

#[test]
fn scopes_nest_and_leave_in_order() {
    let mut h = harness(Flags::NONE);
    let outer = h.j.enter_protected_scope().expect("enter outer");
    let inner = h.j.enter_protected_scope().expect("enter inner");
    assert_eq!(h.j.protected_depth(), 2);
    assert_eq!(inner.depth(), 1);
    h.j.leave_protected_scope(inner).expect("leave inner");
    h.j.leave_protected_scope(outer).expect("leave outer");
    assert_eq!(h.j.protected_depth(), 0);
}

#[test]
fn leaving_out_of_order_is_rejected() {
    let mut h = harness(Flags::NONE);
    let outer = h.j.enter_protected_scope().expect("enter outer");
    let inner = h.j.enter_protected_scope().expect("enter inner");
    assert!(matches!(
        h.j.leave_protected_scope(outer),
        Err(Error::UnbalancedScope)
    ));
    assert_eq!(h.j.protected_depth(), 2);
    h.j.leave_protected_scope(inner).expect("leave inner");
    h.j.leave_protected_scope(outer).expect("leave outer");
}

#[test]
fn unwinding_restores_stack_and_leaves_thrown_value() {
    let mut h = harness(Flags::NONE);
    h.j.push(Value::Number(1.0)).expect("push");
    let result: lumen::Result<()> = h.j.protect(|j| {
        j.push(Value::Number(2.0))?;
        j.push(Value::Number(3.0))?;
        Err(Error::type_error("bad operand"))
    });
    assert!(matches!(
        result,
        Err(Error::Runtime {
            name: ErrorName::TypeError,
            ..
        })
    ));
    assert_eq!(h.j.stack_depth(), 2);
    let thrown = h.j.pop();
    assert_eq!(h.j.to_display_string(&thrown), "TypeError: bad operand");
    assert_eq!(h.j.protected_depth(), 0);
}

#[test]
fn inner_catch_leaves_outer_scope_untouched() {
    let mut h = harness(Flags::NONE);
    let outcome = h.j.protect(|j| {
        let inner: lumen::Result<()> = j.protect(|_| Err(Error::range_error("inner")));
        assert!(inner.is_err());
        assert_eq!(j.protected_depth(), 1);
        let caught = j.pop();
        Ok(j.to_display_string(&caught))
    });
    assert_eq!(outcome.expect("outer completes").as_str(), "RangeError: inner");
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.j.stack_depth(), 0);
}

#[test]
fn exceeding_the_try_limit_throws() {
    let mut h = harness_with(Flags::NONE, EngineConfig::default().with_try_limit(2));
    let result = h
        .j
        .protect(|j| j.protect(|j| j.protect(|_| Ok(()))));
    match result {
        Err(Error::Runtime { name, message }) => {
            assert_eq!(name, ErrorName::RangeError);
            assert_eq!(message, "exception stack overflow");
        }
        other => panic!("expected exception stack overflow, got {other:?}"),
    }
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.j.stack_depth(), 1);
}

#[test]
fn throw_without_scope_runs_panic_handler() {
    let mut h = harness(Flags::NONE);
    h.j.set_context(Vec::<String>::new());
    h.j.set_panic(record_panic);
    h.j.push(Value::Bool(true)).expect("push");

    let err = h.j.throw(Error::type_error("boom"));

    assert!(matches!(err, Error::Panic(_)));
    assert!(matches!(err.root(), Error::Runtime { .. }));
    assert_eq!(
        h.j.context::<Vec<String>>().map(Vec::as_slice),
        Some(&["TypeError: boom".to_string()][..])
    );
    assert_eq!(h.j.stack_depth(), 1);
}

#[test]
fn throw_inside_scope_does_not_panic() {
    let mut h = harness(Flags::NONE);
    h.j.set_context(Vec::<String>::new());
    h.j.set_panic(record_panic);

    let result: lumen::Result<()> = h.j.protect(|j| Err(j.throw(Error::range_error("caught"))));

    assert!(matches!(result, Err(Error::Runtime { .. })));
    assert_eq!(h.j.context::<Vec<String>>().map(Vec::len), Some(0));
}

#[test]
fn panics_are_not_wrapped_twice() {
    let mut h = harness(Flags::NONE);
    let first = h.j.throw(Error::type_error("once"));
    let second = h.j.throw(first);
    match second {
        Error::Panic(inner) => assert!(matches!(*inner, Error::Runtime { .. })),
        other => panic!("expected panic, got {other:?}"),
    }
    assert!(h.diagnostics.text().contains("uncaught exception: TypeError: once"));
}

#[test]
fn unwinding_frees_cells_created_inside_the_scope() {
    let mut h = harness(Flags::NONE);
    h.j.gc();
    let before = h.j.heap().live_cells();
    let _: lumen::Result<()> = h.j.protect(|j| {
        for _ in 0..10 {
            j.new_object();
        }
        Err(Error::type_error("discard"))
    });
    // Only the error object, which is on the stack, survives.
    assert_eq!(h.j.heap().live_cells(), before + 1);
}

#[test]
fn unwinding_keeps_cells_reachable_from_roots() {
    let mut h = harness(Flags::NONE);
    let _: lumen::Result<()> = h.j.protect(|j| {
        let kept = j.new_object();
        let global = j.global();
        j.set_property(&global, "kept", kept)?;
        Err(Error::type_error("discard"))
    });
    let global = h.j.global();
    let kept = h.j.get_property(&global, "kept").expect("read kept");
    let cell = kept.as_object().expect("kept is an object");
    assert!(h.j.heap().contains(cell));
}

#[test]
fn rethrown_errors_keep_their_identity() {
    let mut h = harness(Flags::NONE);
    let mut original = None;
    let outcome: lumen::Result<()> = h.j.protect(|j| {
        let err = j
            .protect(|_| Err::<(), _>(Error::range_error("deep")))
            .expect_err("inner scope fails");
        original = j.top().and_then(Value::as_object);
        Err(j.rethrow(err))
    });
    assert!(outcome.is_err());
    assert!(original.is_some());
    assert_eq!(h.j.pop().as_object(), original);
}

#[test]
fn an_ignored_load_failure_does_not_replace_a_later_error() {
    let mut h = harness(Flags::NONE);
    let outcome: lumen::Result<()> = h.j.protect(|j| {
        assert!(j.load_text("first.js", "var = ;").is_err());
        Err(Error::type_error("second failure"))
    });
    assert!(matches!(outcome, Err(Error::Runtime { .. })));
    assert_eq!(h.j.stack_depth(), 1);
    let thrown = h.j.pop();
    assert_eq!(h.j.to_display_string(&thrown), "TypeError: second failure");
}

#[test]
fn rethrown_errors_carry_their_value() {
    let mut h = harness(Flags::NONE);
    let err = h
        .j
        .protect(|j| j.load_text("bad.js", "var = ;"))
        .expect_err("load fails");
    let thrown = h.j.pop();
    assert!(matches!(err, Error::Rethrown { .. }));
    assert!(matches!(err.root(), Error::Syntax(_)));
    assert_eq!(err.carried_value().and_then(Value::as_object), thrown.as_object());
    assert_eq!(err.to_string(), h.j.to_display_string(&thrown));
}

#[test]
fn resuming_a_scope_that_was_already_left_still_leaves_a_value() {
    let mut h = harness(Flags::NONE);
    let outer = h.j.enter_protected_scope().expect("enter outer");
    let result = h.j.protect(|j| {
        // Unwinding the outer scope takes this one with it.
        j.unwind(outer, Error::type_error("early"));
        j.pop();
        Ok(())
    });
    assert!(matches!(result, Err(Error::UnbalancedScope)));
    assert_eq!(h.j.protected_depth(), 0);
    assert_eq!(h.j.stack_depth(), 1);
    let thrown = h.j.pop();
    assert_eq!(
        h.j.to_display_string(&thrown),
        "Error: unbalanced protected scope"
    );
}
