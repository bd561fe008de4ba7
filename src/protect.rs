//! Protected scopes: the engine's non-local error channel.
//!
//! Every throwing operation returns `Err`. A protected scope records the
//! interpreter's depths on entry; when an error reaches it, [`Interpreter::unwind`]
//! restores those depths, leaves the thrown value on the stack and frees the
//! heap cells that became unreachable inside the scope. With no scope left,
//! [`Interpreter::throw`] hands the value to the panic handler instead.

use crate::{
    diagnostics::{Error, Result},
    heap::GcRef,
    state::Interpreter,
};

/// Identifies one entered protected scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId {
    depth: usize,
    serial: u64,
}

impl ScopeId {
    pub fn depth(self) -> usize {
        self.depth
    }
}

/// Snapshot taken on entry to a protected scope.
#[derive(Debug)]
pub(crate) struct ProtectedFrame {
    id: ScopeId,
    stack_depth: usize,
    trace_depth: usize,
    scope_depth: usize,
    pub(crate) env: GcRef,
    heap_mark: u64,
}

impl Interpreter {
    pub fn enter_protected_scope(&mut self) -> Result<ScopeId> {
        if self.frames.len() >= self.config.try_limit {
            return Err(Error::range_error("exception stack overflow"));
        }
        let id = ScopeId {
            depth: self.frames.len(),
            serial: self.next_scope_serial,
        };
        self.next_scope_serial += 1;
        self.frames.push(ProtectedFrame {
            id,
            stack_depth: self.stack.len(),
            trace_depth: self.trace.len(),
            scope_depth: self.scopes.len(),
            env: self.env,
            heap_mark: self.heap.allocation_mark(),
        });
        tracing::trace!(depth = id.depth, "entered protected scope");
        Ok(id)
    }

    /// Normal exit. Only the innermost scope may be left.
    pub fn leave_protected_scope(&mut self, id: ScopeId) -> Result<()> {
        match self.frames.last() {
            Some(frame) if frame.id == id => {
                self.frames.pop();
                tracing::trace!(depth = id.depth, "left protected scope");
                Ok(())
            }
            _ => Err(Error::UnbalancedScope),
        }
    }

    /// Resumes scope `id` after `err` was thrown inside it. Frames above it
    /// are discarded, the recorded depths are restored and the thrown value
    /// becomes the single new value on the stack.
    ///
    /// A scope that is no longer on the frame stack cannot be restored; the
    /// frames are left alone and an `UnbalancedScope` error value is pushed
    /// in place of the thrown one.
    pub fn unwind(&mut self, id: ScopeId, err: Error) -> Error {
        let frame = match self.frames.iter().rposition(|frame| frame.id == id) {
            Some(position) => {
                self.frames.truncate(position + 1);
                self.frames.pop()
            }
            None => None,
        };
        let Some(frame) = frame else {
            tracing::debug!(depth = id.depth, error = %err, "unwind of a scope no longer entered");
            let unbalanced = Error::UnbalancedScope;
            let value = self.exception_value(&unbalanced);
            self.push_unchecked(value);
            return unbalanced;
        };

        // Materialised before the trace is cut back so error objects record
        // where the throw happened.
        let value = self.exception_value(&err);

        self.stack.truncate(frame.stack_depth);
        self.trace.truncate(frame.trace_depth.max(1));
        self.scopes.truncate(frame.scope_depth);
        self.env = frame.env;
        self.push_unchecked(value);

        let roots = self.roots();
        let freed = self.heap.collect_since(frame.heap_mark, &roots);
        tracing::trace!(depth = id.depth, freed, error = %err, "unwound protected scope");
        err
    }

    /// Runs `body` in a protected scope. On `Err` the scope has been unwound
    /// and the thrown value sits on top of the stack.
    pub fn protect<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let id = match self.enter_protected_scope() {
            Ok(id) => id,
            Err(err) => {
                let value = self.exception_value(&err);
                self.push_unchecked(value);
                return Err(err);
            }
        };
        match body(self) {
            Ok(value) => match self.leave_protected_scope(id) {
                Ok(()) => Ok(value),
                Err(err) => Err(self.unwind(id, err)),
            },
            Err(err) => Err(self.unwind(id, err)),
        }
    }

    /// Raises `err` in the current context. With an enclosing protected scope
    /// the error is returned for propagation; otherwise the panic handler
    /// runs with the thrown value on the stack and a `Panic` is returned.
    pub fn throw(&mut self, err: Error) -> Error {
        if !self.frames.is_empty() || matches!(err, Error::Panic(_)) {
            return err;
        }
        let depth = self.stack.len();
        let value = self.exception_value(&err);
        self.push_unchecked(value);
        let handler = self.panic_handler();
        handler(self);
        self.stack.truncate(depth);
        Error::Panic(Box::new(err))
    }

    /// Propagates an error caught by [`Interpreter::protect`] further out.
    /// The thrown value that scope left behind moves off the stack and into
    /// the returned error, so the next scope resumes with the same value.
    pub fn rethrow(&mut self, err: Error) -> Error {
        let err = match self.stack.pop() {
            Some(value) => {
                let inner = match err {
                    Error::Rethrown { inner, .. } => inner,
                    other => Box::new(other),
                };
                Error::Rethrown { value, inner }
            }
            None => err,
        };
        self.throw(err)
    }

    /// A protected scope that rethrows on failure: cleanup runs before the
    /// caller sees the error.
    pub(crate) fn guarded<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.protect(body).map_err(|err| self.rethrow(err))
    }

    pub fn protected_depth(&self) -> usize {
        self.frames.len()
    }
}
