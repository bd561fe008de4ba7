use std::ops::BitOr;

/// Creation flags for an interpreter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Strict-mode semantics: unresolved assignments throw and `eval` code
    /// binds into its own scope.
    pub const STRICT: Flags = Flags(1);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

pub const DEFAULT_STACK_SIZE: usize = 256;
pub const DEFAULT_TRACE_LIMIT: usize = 128;
pub const DEFAULT_TRY_LIMIT: usize = 64;
pub const DEFAULT_REENTRY_LIMIT: usize = 24;

/// Capacities fixed for the lifetime of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Slots in the value stack.
    pub stack_size: usize,
    /// Maximum call depth recorded in the trace, including the `-top-` entry.
    pub trace_limit: usize,
    /// Maximum number of nested protected scopes.
    pub try_limit: usize,
    /// How many times host or native code may re-enter the bytecode loop
    /// before a call fails with a call stack overflow. Script-to-script calls
    /// do not count.
    pub reentry_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            trace_limit: DEFAULT_TRACE_LIMIT,
            try_limit: DEFAULT_TRY_LIMIT,
            reentry_limit: DEFAULT_REENTRY_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_trace_limit(mut self, trace_limit: usize) -> Self {
        self.trace_limit = trace_limit.max(1);
        self
    }

    pub fn with_try_limit(mut self, try_limit: usize) -> Self {
        self.try_limit = try_limit;
        self
    }

    pub fn with_reentry_limit(mut self, reentry_limit: usize) -> Self {
        self.reentry_limit = reentry_limit;
        self
    }
}
