//! Bytecode execution and the call mechanism.

use std::rc::Rc;

use crate::{
    ast::BinaryOp,
    bytecode::{FunctionProto, Op},
    diagnostics::{Error, Result},
    environment::Environment,
    heap::{Closure, GcRef, Object, ObjectClass},
    protect::ScopeId,
    state::Interpreter,
    value::{NativeFunction, Value},
};

/// A try block whose protected scope is open in some call frame.
struct Handler {
    scope: ScopeId,
    catch_ip: usize,
    exit_ip: usize,
}

struct CallFrame {
    proto: Rc<FunctionProto>,
    ip: usize,
    this: Value,
    /// Where `var` and function declarations bind.
    scope: GcRef,
    /// Stack slot holding the completion value of script code.
    completion: Option<usize>,
    /// Stack height of the callee slot; everything from here up belongs to
    /// the call.
    base: usize,
    /// Index in `scopes` of the caller's environment.
    saved_scope: usize,
    handlers: Vec<Handler>,
}

enum Step {
    Continue,
    Finished(Value),
}

enum Callee {
    Native(NativeFunction),
    Closure(Closure),
}

impl Interpreter {
    /// Wraps a compiled unit in a closure object over `env`.
    pub fn bind_closure(&mut self, proto: Rc<FunctionProto>, env: GcRef) -> Value {
        let closure = Object::new(ObjectClass::Closure(Closure { proto, env }), None);
        Value::Object(self.heap.alloc_object(closure))
    }

    /// Calls `callee` with `receiver` as `this`. The stack depth is the same
    /// after the call as before it, whichever way it ends.
    pub fn call(&mut self, receiver: Value, callee: Value, args: &[Value]) -> Result<Value> {
        self.guarded(|j| {
            j.push(callee)?;
            j.push(receiver)?;
            for arg in args {
                j.push(arg.clone())?;
            }
            j.call_on_stack(args.len())
        })
    }

    /// Calls the function laid out on the stack as `[callee, this, args..]`
    /// and pops all of it.
    pub(crate) fn call_on_stack(&mut self, argc: usize) -> Result<Value> {
        let base = self.call_base(argc)?;
        let this = self.stack[base + 1].clone();
        let callee = self.callee(&self.stack[base])?;
        let result = match callee {
            Callee::Native(native) => self.call_native(native, this, base + 2, argc),
            Callee::Closure(closure) => self.run_closure(closure, this, base, argc),
        };
        self.stack.truncate(base);
        result
    }

    fn call_base(&self, argc: usize) -> Result<usize> {
        self.stack
            .len()
            .checked_sub(argc + 2)
            .ok_or_else(|| Error::range_error("stack underflow"))
    }

    fn callee(&self, callee: &Value) -> Result<Callee> {
        let class = callee
            .as_object()
            .and_then(|obj| self.heap.object(obj))
            .map(|object| &object.class);
        match class {
            Some(ObjectClass::Native(native)) => Ok(Callee::Native(native.clone())),
            Some(ObjectClass::Closure(closure)) => Ok(Callee::Closure(closure.clone())),
            _ => Err(Error::type_error(format!(
                "{} is not a function",
                self.to_display_string(callee)
            ))),
        }
    }

    fn call_native(&mut self, native: NativeFunction, this: Value, args_at: usize, argc: usize) -> Result<Value> {
        let args = self.stack[args_at..args_at + argc].to_vec();
        self.enter_trace(Rc::from(native.name), Rc::from("native"), 0)?;
        let result = (native.callback)(self, this, &args);
        self.trace.pop();
        result
    }

    /// Runs a closure to completion on a fresh frame list. Script-to-script
    /// calls and try blocks stay inside this loop; only natives calling back
    /// into script code enter it again.
    fn run_closure(&mut self, closure: Closure, this: Value, base: usize, argc: usize) -> Result<Value> {
        if self.vm_depth >= self.config.reentry_limit {
            return Err(Error::range_error("call stack overflow"));
        }
        self.vm_depth += 1;
        let saved_scope = self.scopes.len();
        let trace_depth = self.trace.len();

        let mut frames = Vec::new();
        let result = match self.push_frame(&mut frames, closure, this, base, argc) {
            Ok(()) => self.execute(&mut frames),
            Err(err) => Err(err),
        };
        self.vm_depth -= 1;
        result.map_err(|err| {
            // Materialised while the trace still names the failing frames.
            let err = match err.carried_value() {
                Some(_) => err,
                None => {
                    let value = self.exception_value(&err);
                    Error::Rethrown {
                        value,
                        inner: Box::new(err),
                    }
                }
            };
            if let Some(env) = self.scopes.get(saved_scope).copied() {
                self.env = env;
            }
            self.scopes.truncate(saved_scope);
            self.trace.truncate(trace_depth);
            err
        })
    }

    fn push_frame(
        &mut self,
        frames: &mut Vec<CallFrame>,
        closure: Closure,
        this: Value,
        base: usize,
        argc: usize,
    ) -> Result<()> {
        let proto = closure.proto;
        let this = match this {
            Value::Undefined | Value::Null if !proto.strict => self.global(),
            other => other,
        };
        let scope = if proto.is_script {
            closure.env
        } else {
            let args_at = base + 2;
            let env = Environment::alloc(&mut self.heap, None, Some(closure.env));
            for (index, param) in proto.params.iter().enumerate() {
                let value = if index < argc {
                    self.stack[args_at + index].clone()
                } else {
                    Value::Undefined
                };
                Environment::define(&mut self.heap, env, param, value)?;
            }
            env
        };

        let completion = if proto.is_script {
            self.push(Value::Undefined)?;
            Some(self.stack.len() - 1)
        } else {
            None
        };
        self.enter_trace(Rc::clone(&proto.name), Rc::clone(&proto.file), proto.line)?;
        let saved_scope = self.scopes.len();
        self.scopes.push(self.env);
        self.env = scope;

        frames.push(CallFrame {
            proto,
            ip: 0,
            this,
            scope,
            completion,
            base,
            saved_scope,
            handlers: Vec::new(),
        });
        Ok(())
    }

    /// Pops the top frame, closing any try blocks it left open, and hands
    /// its result to the caller frame.
    fn return_from(&mut self, frames: &mut Vec<CallFrame>, returned: Option<Value>) -> Result<Step> {
        let Some(frame) = frames.pop() else {
            return Ok(Step::Finished(returned.unwrap_or_default()));
        };
        for handler in frame.handlers.iter().rev() {
            self.leave_protected_scope(handler.scope)?;
        }
        let value = match returned {
            Some(value) => value,
            None => frame
                .completion
                .and_then(|slot| self.stack.get(slot).cloned())
                .unwrap_or_default(),
        };
        if let Some(env) = self.scopes.get(frame.saved_scope).copied() {
            self.env = env;
        }
        self.scopes.truncate(frame.saved_scope);
        self.trace.pop();

        if frames.is_empty() {
            return Ok(Step::Finished(value));
        }
        self.stack.truncate(frame.base);
        self.push(value)?;
        Ok(Step::Continue)
    }

    /// Routes `err` to the innermost open try block, discarding the frames
    /// above it. Without one the error leaves the loop.
    fn catch(&mut self, frames: &mut Vec<CallFrame>, err: Error) -> Result<()> {
        while let Some(frame) = frames.last_mut() {
            if let Some(handler) = frame.handlers.pop() {
                // The thrown value is on the stack for EnterCatch.
                self.unwind(handler.scope, err);
                frame.ip = handler.catch_ip;
                return Ok(());
            }
            frames.pop();
        }
        Err(err)
    }

    fn execute(&mut self, frames: &mut Vec<CallFrame>) -> Result<Value> {
        loop {
            match self.step(frames) {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(value)) => return Ok(value),
                Err(err) => self.catch(frames, err)?,
            }
        }
    }

    fn step(&mut self, frames: &mut Vec<CallFrame>) -> Result<Step> {
        let Some(frame) = frames.last_mut() else {
            return Ok(Step::Finished(Value::Undefined));
        };
        let proto = Rc::clone(&frame.proto);
        let ip = frame.ip;
        let Some(op) = proto.code.get(ip) else {
            return self.return_from(frames, None);
        };
        if let (Some(top), Some(line)) = (self.trace.last_mut(), proto.lines.get(ip)) {
            top.line = *line;
        }
        frame.ip = ip + 1;

        match op {
            Op::Undefined => self.push(Value::Undefined)?,
            Op::Null => self.push(Value::Null)?,
            Op::Bool(b) => self.push(Value::Bool(*b))?,
            Op::Number(n) => self.push(Value::Number(*n))?,
            Op::String(s) => self.push(Value::String(Rc::clone(s)))?,
            Op::This => self.push(frame.this.clone())?,
            Op::GetVar(name) => {
                let value = Environment::get(&self.heap, self.env, name)?;
                self.push(value)?;
            }
            Op::SetVar(name) => {
                let value = self.peek_value()?;
                Environment::assign(&mut self.heap, self.env, name, value, proto.strict)?;
            }
            Op::DefineVar(name) => {
                let value = self.pop();
                Environment::define(&mut self.heap, frame.scope, name, value)?;
            }
            Op::DeclareVar(name) => Environment::declare(&mut self.heap, frame.scope, name)?,
            Op::Closure(index) => {
                let function = proto
                    .functions
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| Error::range_error("bad function index"))?;
                let closure = self.bind_closure(function, self.env);
                self.push(closure)?;
            }
            Op::NewObject => {
                let object = self.new_object();
                self.push(object)?;
            }
            Op::InitProp(name) => {
                let value = self.pop();
                let target = self.peek_value()?;
                self.set_property(&target, name, value)?;
            }
            Op::GetProp(name) => {
                let target = self.pop();
                let value = self.get_property(&target, name)?;
                self.push(value)?;
            }
            Op::SetProp(name) => {
                let value = self.pop();
                let target = self.pop();
                self.set_property(&target, name, value.clone())?;
                self.push(value)?;
            }
            Op::GetIndex => {
                let key = self.pop();
                let target = self.pop();
                let key = self.to_property_key(&key);
                let value = self.get_property(&target, &key)?;
                self.push(value)?;
            }
            Op::SetIndex => {
                let value = self.pop();
                let key = self.pop();
                let target = self.pop();
                let key = self.to_property_key(&key);
                self.set_property(&target, &key, value.clone())?;
                self.push(value)?;
            }
            Op::GetMethod(name) => {
                let target = self.pop();
                let function = self.get_property(&target, name)?;
                self.push(function)?;
                self.push(target)?;
            }
            Op::Call(argc) => {
                let argc = *argc;
                let base = self.call_base(argc)?;
                let this = self.stack[base + 1].clone();
                let callee = self.callee(&self.stack[base])?;
                match callee {
                    Callee::Native(native) => {
                        let result = self.call_native(native, this, base + 2, argc);
                        self.stack.truncate(base);
                        self.push(result?)?;
                    }
                    Callee::Closure(closure) => self.push_frame(frames, closure, this, base, argc)?,
                }
            }
            Op::Pop => {
                self.pop();
            }
            Op::SetCompletion => {
                let value = self.pop();
                if let Some(slot) = frame.completion.and_then(|slot| self.stack.get_mut(slot)) {
                    *slot = value;
                }
            }
            Op::Negate => {
                let value = self.pop();
                self.push(Value::Number(-value.to_number()))?;
            }
            Op::Not => {
                let value = self.pop();
                self.push(Value::Bool(!value.is_truthy()))?;
            }
            Op::Typeof => {
                let value = self.pop();
                let name = self.type_of(&value);
                self.push(Value::string(name))?;
            }
            Op::Binary(op) => {
                let right = self.pop();
                let left = self.pop();
                let value = self.binary(*op, &left, &right);
                self.push(value)?;
            }
            Op::Jump(target) => frame.ip = *target,
            Op::JumpIfFalse(target) => {
                if !self.pop().is_truthy() {
                    frame.ip = *target;
                }
            }
            Op::JumpIfFalseKeep(target) => {
                if self.peek_value()?.is_truthy() {
                    self.pop();
                } else {
                    frame.ip = *target;
                }
            }
            Op::JumpIfTrueKeep(target) => {
                if self.peek_value()?.is_truthy() {
                    frame.ip = *target;
                } else {
                    self.pop();
                }
            }
            Op::Return => {
                let value = self.pop();
                return self.return_from(frames, Some(value));
            }
            Op::Throw => {
                let value = self.pop();
                let text = self.to_display_string(&value);
                return Err(Error::Throw { value, text });
            }
            Op::Try { handler, exit } => {
                let scope = self.enter_protected_scope()?;
                frame.handlers.push(Handler {
                    scope,
                    catch_ip: *handler,
                    exit_ip: *exit,
                });
            }
            Op::Leave => {
                let handler = frame.handlers.pop().ok_or(Error::UnbalancedScope)?;
                self.leave_protected_scope(handler.scope)?;
                frame.ip = handler.exit_ip;
            }
            Op::EnterCatch(name) => {
                let thrown = self.pop();
                let env = Environment::alloc(&mut self.heap, None, Some(self.env));
                Environment::define(&mut self.heap, env, name, thrown)?;
                self.scopes.push(self.env);
                self.env = env;
            }
            Op::ExitCatch => {
                if let Some(env) = self.scopes.pop() {
                    self.env = env;
                }
            }
        }
        Ok(Step::Continue)
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Value {
        match op {
            BinaryOp::Add => {
                let textual = |v: &Value| matches!(v, Value::String(_) | Value::Object(_));
                if textual(left) || textual(right) {
                    let mut text = self.to_display_string(left);
                    text.push_str(&self.to_display_string(right));
                    Value::string(text)
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Equal => Value::Bool(left.loose_equals(right)),
            BinaryOp::NotEqual => Value::Bool(!left.loose_equals(right)),
            BinaryOp::StrictEqual => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let ordering = match (left, right) {
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                let Some(ordering) = ordering else {
                    return Value::Bool(false);
                };
                Value::Bool(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
        }
    }
}
