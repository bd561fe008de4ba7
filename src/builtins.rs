use std::io::Write;

use crate::{
    diagnostics::{Error, ErrorName, Result},
    heap::{Object, ObjectClass},
    state::Interpreter,
    value::{NativeCallback, NativeFunction, Value},
};

/// Populates the global object of a fresh interpreter.
pub fn init(j: &mut Interpreter) -> Result<()> {
    let global = j.global();

    let functions: [(&'static str, usize, NativeCallback); 11] = [
        ("print", usize::MAX, print),
        ("Error", 1, error),
        ("TypeError", 1, type_error),
        ("RangeError", 1, range_error),
        ("ReferenceError", 1, reference_error),
        ("String", 1, string),
        ("Number", 1, number),
        ("isNaN", 1, is_nan),
        ("eval", 1, eval),
        ("gc", 0, gc),
        ("isFinite", 1, is_finite),
    ];
    for (name, arity, callback) in functions {
        let function = native(j, name, arity, callback);
        j.set_property(&global, name, function)?;
    }

    let math = j.new_object();
    let math_functions: [(&'static str, usize, NativeCallback); 8] = [
        ("abs", 1, math_abs),
        ("floor", 1, math_floor),
        ("ceil", 1, math_ceil),
        ("sqrt", 1, math_sqrt),
        ("round", 1, math_round),
        ("pow", 2, math_pow),
        ("max", usize::MAX, math_max),
        ("min", usize::MAX, math_min),
    ];
    for (name, arity, callback) in math_functions {
        let function = native(j, name, arity, callback);
        j.set_property(&math, name, function)?;
    }
    j.set_property(&math, "PI", Value::Number(std::f64::consts::PI))?;
    j.set_property(&global, "Math", math)?;

    j.set_property(&global, "NaN", Value::Number(f64::NAN))?;
    j.set_property(&global, "Infinity", Value::Number(f64::INFINITY))?;
    j.set_property(&global, "undefined", Value::Undefined)?;
    Ok(())
}

fn native(j: &mut Interpreter, name: &'static str, arity: usize, callback: NativeCallback) -> Value {
    let function = NativeFunction {
        name,
        arity,
        callback,
    };
    Value::Object(
        j.heap
            .alloc_object(Object::new(ObjectClass::Native(function), None)),
    )
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn print(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    let line = args
        .iter()
        .map(|value| j.to_display_string(value))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(j.output, "{line}")
        .and_then(|()| j.output.flush())
        .map_err(|err| Error::Runtime {
            name: ErrorName::Error,
            message: format!("cannot write output: {err}"),
        })?;
    Ok(Value::Undefined)
}

fn construct_error(j: &mut Interpreter, name: ErrorName, args: &[Value]) -> Result<Value> {
    let message = match args.first() {
        Some(Value::Undefined) | None => String::new(),
        Some(value) => j.to_display_string(value),
    };
    Ok(j.new_error(name, &message))
}

fn error(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    construct_error(j, ErrorName::Error, args)
}

fn type_error(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    construct_error(j, ErrorName::TypeError, args)
}

fn range_error(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    construct_error(j, ErrorName::RangeError, args)
}

fn reference_error(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    construct_error(j, ErrorName::ReferenceError, args)
}

fn string(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(value) => Ok(Value::string(j.to_display_string(value))),
        None => Ok(Value::string("")),
    }
}

fn number(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(value) => Ok(Value::Number(value.to_number())),
        None => Ok(Value::Number(0.0)),
    }
}

fn is_nan(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).to_number().is_nan()))
}

fn is_finite(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(arg(args, 0).to_number().is_finite()))
}

/// Non-string arguments are returned unchanged.
fn eval(j: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    let source = match args.first() {
        Some(Value::String(source)) => source.clone(),
        Some(other) => return Ok(other.clone()),
        None => return Ok(Value::Undefined),
    };
    let closure = j.load_eval("(eval)", &source)?;
    let receiver = j.global();
    j.call(receiver, closure, &[])
}

fn gc(j: &mut Interpreter, _this: Value, _args: &[Value]) -> Result<Value> {
    j.gc();
    Ok(Value::Undefined)
}

fn math_unary(args: &[Value], op: fn(f64) -> f64) -> Result<Value> {
    Ok(Value::Number(op(arg(args, 0).to_number())))
}

fn math_abs(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    math_unary(args, f64::abs)
}

fn math_floor(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    math_unary(args, f64::floor)
}

fn math_ceil(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    math_unary(args, f64::ceil)
}

fn math_sqrt(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    math_unary(args, f64::sqrt)
}

fn math_round(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    // Halves round up, as in `Math.round(-2.5) == -2`.
    math_unary(args, |n| (n + 0.5).floor())
}

fn math_pow(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    let base = arg(args, 0).to_number();
    let exponent = arg(args, 1).to_number();
    Ok(Value::Number(base.powf(exponent)))
}

fn math_max(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    let mut result = f64::NEG_INFINITY;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        result = result.max(n);
    }
    Ok(Value::Number(result))
}

fn math_min(_: &mut Interpreter, _this: Value, args: &[Value]) -> Result<Value> {
    let mut result = f64::INFINITY;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        result = result.min(n);
    }
    Ok(Value::Number(result))
}
