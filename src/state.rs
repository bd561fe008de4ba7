//! Interpreter root state: creation, teardown and the host-facing accessors.

use std::{
    any::Any,
    fmt,
    io::{self, Write},
    rc::Rc,
};

use crate::{
    builtins,
    config::{EngineConfig, Flags},
    diagnostics::{Error, ErrorName, Result},
    environment::Environment,
    heap::{GcRef, Heap, Object, ObjectClass},
    protect::ProtectedFrame,
    resource::{ResourceStats, ResourceTracker},
    value::{format_number, Value},
};

/// Called when a throw finds no protected scope to resume. The thrown value
/// is on top of the stack while the handler runs.
pub type PanicHandler = fn(&mut Interpreter);

/// One entry of the call trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub name: Rc<str>,
    pub file: Rc<str>,
    pub line: u32,
}

impl TraceEntry {
    pub fn new(name: impl Into<Rc<str>>, file: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{} ({}:{})", self.name, self.file, self.line)
        } else {
            write!(f, "{} ({})", self.name, self.file)
        }
    }
}

pub struct Interpreter {
    pub(crate) strict: bool,
    pub(crate) config: EngineConfig,
    pub(crate) stack: Vec<Value>,
    pub(crate) trace: Vec<TraceEntry>,
    pub(crate) frames: Vec<ProtectedFrame>,
    pub(crate) next_scope_serial: u64,
    pub(crate) heap: Heap,
    next_ref: u64,
    registry: GcRef,
    global: GcRef,
    pub(crate) global_env: GcRef,
    pub(crate) env: GcRef,
    /// Environments saved by active calls and catch clauses.
    pub(crate) scopes: Vec<GcRef>,
    /// Nested entries into the bytecode loop from host or native code.
    pub(crate) vm_depth: usize,
    pub(crate) resources: ResourceTracker,
    panic: PanicHandler,
    context: Option<Box<dyn Any>>,
    pub(crate) output: Box<dyn Write>,
    pub(crate) diagnostics: Box<dyn Write>,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("strict", &self.strict)
            .field("stack_depth", &self.stack.len())
            .field("trace_depth", &self.trace.len())
            .field("protected_depth", &self.frames.len())
            .field("live_cells", &self.heap.live_cells())
            .finish_non_exhaustive()
    }
}

fn default_panic(j: &mut Interpreter) {
    let text = match j.stack.last() {
        Some(value) => j.to_display_string(value),
        None => "undefined".to_string(),
    };
    tracing::error!(%text, "uncaught exception");
    let _ = writeln!(j.diagnostics, "uncaught exception: {text}");
    let _ = j.diagnostics.flush();
}

impl Interpreter {
    /// Creates an instance with the default capacities. Returns `None` when
    /// the value stack cannot be allocated.
    pub fn new(flags: Flags) -> Option<Self> {
        Self::with_config(flags, EngineConfig::default())
    }

    pub fn with_config(flags: Flags, config: EngineConfig) -> Option<Self> {
        let mut stack = Vec::new();
        if stack.try_reserve_exact(config.stack_size + 1).is_err() {
            tracing::error!(stack_size = config.stack_size, "cannot allocate value stack");
            return None;
        }
        let mut trace = Vec::with_capacity(config.trace_limit.min(64));
        trace.push(TraceEntry::new("-top-", "native", 0));

        let mut heap = Heap::new();
        let registry = heap.alloc_object(Object::new(ObjectClass::Plain, None));
        let global = heap.alloc_object(Object::new(ObjectClass::Plain, None));
        let global_env = Environment::alloc(&mut heap, Some(global), None);

        let mut interpreter = Self {
            strict: flags.contains(Flags::STRICT),
            config,
            stack,
            trace,
            frames: Vec::new(),
            next_scope_serial: 0,
            heap,
            next_ref: 0,
            registry,
            global,
            global_env,
            env: global_env,
            scopes: Vec::new(),
            vm_depth: 0,
            resources: ResourceTracker::new(),
            panic: default_panic,
            context: None,
            output: Box::new(io::stdout()),
            diagnostics: Box::new(io::stderr()),
        };
        if let Err(err) = builtins::init(&mut interpreter) {
            tracing::error!(error = %err, "cannot initialise builtins");
            return None;
        }
        tracing::debug!(
            strict = interpreter.strict,
            stack_size = interpreter.config.stack_size,
            "created interpreter"
        );
        Some(interpreter)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Installs a new panic handler, returning the previous one.
    pub fn set_panic(&mut self, handler: PanicHandler) -> PanicHandler {
        std::mem::replace(&mut self.panic, handler)
    }

    pub(crate) fn panic_handler(&self) -> PanicHandler {
        self.panic
    }

    /// Stores an opaque host value, returning the one it replaces.
    pub fn set_context<T: Any>(&mut self, context: T) -> Option<Box<dyn Any>> {
        self.context.replace(Box::new(context))
    }

    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref()
    }

    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_mut()?.downcast_mut()
    }

    pub fn take_context(&mut self) -> Option<Box<dyn Any>> {
        self.context.take()
    }

    /// Redirects `print` output, returning the previous sink.
    pub fn set_output(&mut self, output: Box<dyn Write>) -> Box<dyn Write> {
        std::mem::replace(&mut self.output, output)
    }

    /// Redirects error reports and the default panic message.
    pub fn set_diagnostics(&mut self, diagnostics: Box<dyn Write>) -> Box<dyn Write> {
        std::mem::replace(&mut self.diagnostics, diagnostics)
    }

    pub fn resources(&self) -> ResourceStats {
        self.resources.stats()
    }

    // Value stack

    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(Error::range_error("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Used for the thrown value, which always gets a slot.
    pub(crate) fn push_unchecked(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    pub fn top(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn peek_value(&self) -> Result<Value> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| Error::range_error("stack underflow"))
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub(crate) fn enter_trace(&mut self, name: Rc<str>, file: Rc<str>, line: u32) -> Result<()> {
        if self.trace.len() >= self.config.trace_limit {
            return Err(Error::range_error("call stack overflow"));
        }
        self.trace.push(TraceEntry { name, file, line });
        Ok(())
    }

    // Roots

    pub fn global(&self) -> Value {
        Value::Object(self.global)
    }

    pub fn registry(&self) -> Value {
        Value::Object(self.registry)
    }

    pub fn global_environment(&self) -> GcRef {
        self.global_env
    }

    pub fn current_environment(&self) -> GcRef {
        self.env
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_epoch(&self) -> u32 {
        self.heap.epoch()
    }

    pub(crate) fn roots(&self) -> Vec<GcRef> {
        let mut roots = vec![self.registry, self.global, self.global_env, self.env];
        roots.extend(self.scopes.iter().copied());
        roots.extend(self.frames.iter().map(|frame| frame.env));
        roots.extend(self.stack.iter().filter_map(Value::as_object));
        roots
    }

    /// Full collection. Values held only by the host are not roots; anchor
    /// them with [`Interpreter::make_ref`] first.
    pub fn gc(&mut self) -> usize {
        let roots = self.roots();
        let freed = self.heap.collect(&roots);
        tracing::debug!(freed, live = self.heap.live_cells(), epoch = self.heap.epoch(), "gc");
        freed
    }

    // Registry references

    /// Anchors `value` in the Registry, returning the key it is stored under.
    pub fn make_ref(&mut self, value: Value) -> Result<String> {
        let key = format!("_{}", self.next_ref);
        self.next_ref += 1;
        let registry = self.registry();
        self.set_property(&registry, &key, value)?;
        Ok(key)
    }

    pub fn get_ref(&self, key: &str) -> Value {
        self.heap
            .object(self.registry)
            .and_then(|registry| registry.properties.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn unref(&mut self, key: &str) {
        if let Some(registry) = self.heap.object_mut(self.registry) {
            registry.properties.shift_remove(key);
        }
    }

    // Objects

    pub fn new_object(&mut self) -> Value {
        Value::Object(self.heap.alloc_object(Object::new(ObjectClass::Plain, None)))
    }

    /// Builds an error object carrying `name`, `message` and a `stack`
    /// property rendered from the current trace.
    pub fn new_error(&mut self, name: ErrorName, message: &str) -> Value {
        let mut object = Object::new(ObjectClass::Error, None);
        object
            .properties
            .insert("name".to_string(), Value::string(name.as_str()));
        object
            .properties
            .insert("message".to_string(), Value::string(message));
        object
            .properties
            .insert("stack".to_string(), Value::string(self.stack_trace()));
        Value::Object(self.heap.alloc_object(object))
    }

    fn stack_trace(&self) -> String {
        self.trace
            .iter()
            .rev()
            .map(|entry| format!("\n\tat {entry}"))
            .collect()
    }

    /// The script-visible value an error stands for.
    pub fn exception_value(&mut self, err: &Error) -> Value {
        if let Some(value) = err.carried_value() {
            return value.clone();
        }
        match err.error_object_parts() {
            Some((name, message)) => self.new_error(name, &message),
            None => Value::Undefined,
        }
    }

    pub fn get_property(&self, target: &Value, name: &str) -> Result<Value> {
        match target {
            Value::Object(obj) => {
                let mut current = Some(*obj);
                while let Some(cell) = current {
                    let Some(object) = self.heap.object(cell) else {
                        break;
                    };
                    if let Some(value) = object.properties.get(name) {
                        return Ok(value.clone());
                    }
                    current = object.prototype;
                }
                Ok(Value::Undefined)
            }
            Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "cannot read property '{name}' of {target}"
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    pub fn set_property(&mut self, target: &Value, name: &str, value: Value) -> Result<()> {
        match target {
            Value::Object(obj) => {
                let object = self
                    .heap
                    .object_mut(*obj)
                    .ok_or_else(|| Error::reference_error("object is no longer live"))?;
                object.properties.insert(name.to_string(), value);
                Ok(())
            }
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "cannot set property '{name}' of {target}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        value
            .as_object()
            .and_then(|obj| self.heap.object(obj))
            .is_some_and(Object::is_callable)
    }

    pub fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) if self.is_callable(value) => "function",
            Value::Object(_) => "object",
        }
    }

    /// Textual form of a value, as `print` and error reports show it.
    pub fn to_display_string(&self, value: &Value) -> String {
        let Value::Object(obj) = value else {
            return value.to_string();
        };
        let Some(object) = self.heap.object(*obj) else {
            return "[object]".to_string();
        };
        match &object.class {
            ObjectClass::Error => {
                let text = |key: &str| match self.get_property(value, key) {
                    Ok(Value::Undefined) | Err(_) => None,
                    Ok(other) => Some(self.to_display_string(&other)),
                };
                let name = text("name").unwrap_or_else(|| "Error".to_string());
                match text("message") {
                    Some(message) if !message.is_empty() => format!("{name}: {message}"),
                    _ => name,
                }
            }
            ObjectClass::Closure(closure) => {
                format!("function {}() {{ ... }}", closure.proto.name)
            }
            ObjectClass::Native(native) => {
                format!("function {}() {{ [native code] }}", native.name)
            }
            ObjectClass::Plain => "[object Object]".to_string(),
        }
    }

    /// Property key for an index expression.
    pub(crate) fn to_property_key(&self, key: &Value) -> String {
        match key {
            Value::Number(n) => format_number(*n),
            other => self.to_display_string(other),
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        tracing::debug!(
            live = self.heap.live_cells(),
            stack_depth = self.stack.len(),
            "freeing interpreter"
        );
    }
}
