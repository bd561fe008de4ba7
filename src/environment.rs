use crate::{
    diagnostics::{Error, Result},
    heap::{GcRef, Heap, HeapCell, Object, ObjectClass},
    value::Value,
};

/// A lexical scope. Bindings live as properties of `variables`; for the
/// global environment that object is the Global object itself.
#[derive(Debug, Clone)]
pub struct Environment {
    pub variables: GcRef,
    pub outer: Option<GcRef>,
}

impl Environment {
    /// Allocates an environment over `variables`, or over a fresh binding
    /// object when none is given.
    pub fn alloc(heap: &mut Heap, variables: Option<GcRef>, outer: Option<GcRef>) -> GcRef {
        let variables = match variables {
            Some(variables) => variables,
            None => heap.alloc_object(Object::new(ObjectClass::Plain, None)),
        };
        heap.alloc(HeapCell::Environment(Environment { variables, outer }))
    }

    /// Defines `name` in this scope only, shadowing any outer binding.
    pub fn define(heap: &mut Heap, env: GcRef, name: &str, value: Value) -> Result<()> {
        let variables = Self::variables(heap, env)?;
        let object = heap
            .object_mut(variables)
            .ok_or_else(|| stale("binding object"))?;
        object.properties.insert(name.to_string(), value);
        Ok(())
    }

    /// `var name;` without initializer: creates the binding only if absent.
    pub fn declare(heap: &mut Heap, env: GcRef, name: &str) -> Result<()> {
        if Self::has_own(heap, env, name)? {
            return Ok(());
        }
        Self::define(heap, env, name, Value::Undefined)
    }

    pub fn has_own(heap: &Heap, env: GcRef, name: &str) -> Result<bool> {
        let variables = Self::variables(heap, env)?;
        Ok(heap
            .object(variables)
            .is_some_and(|object| object.properties.contains_key(name)))
    }

    pub fn lookup(heap: &Heap, env: GcRef, name: &str) -> Option<Value> {
        let mut current = Some(env);
        while let Some(scope) = current {
            let environment = heap.environment(scope)?;
            if let Some(value) = heap
                .object(environment.variables)
                .and_then(|object| object.properties.get(name))
            {
                return Some(value.clone());
            }
            current = environment.outer;
        }
        None
    }

    pub fn get(heap: &Heap, env: GcRef, name: &str) -> Result<Value> {
        Self::lookup(heap, env, name)
            .ok_or_else(|| Error::reference_error(format!("'{name}' is not defined")))
    }

    /// Updates the nearest binding of `name`. An unresolved name is an error
    /// in strict mode and becomes a binding of the outermost scope otherwise.
    pub fn assign(heap: &mut Heap, env: GcRef, name: &str, value: Value, strict: bool) -> Result<()> {
        let mut current = env;
        loop {
            if Self::has_own(heap, current, name)? {
                return Self::define(heap, current, name, value);
            }
            match heap.environment(current).and_then(|scope| scope.outer) {
                Some(outer) => current = outer,
                None => break,
            }
        }
        if strict {
            return Err(Error::reference_error(format!(
                "assignment to undeclared variable '{name}'"
            )));
        }
        Self::define(heap, current, name, value)
    }

    fn variables(heap: &Heap, env: GcRef) -> Result<GcRef> {
        heap.environment(env)
            .map(|scope| scope.variables)
            .ok_or_else(|| stale("environment"))
    }
}

fn stale(what: &str) -> Error {
    Error::reference_error(format!("{what} is no longer live"))
}
