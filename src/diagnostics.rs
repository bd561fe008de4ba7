use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Represents a byte span within a source text, plus the line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: u32) -> Self {
        Self { start, end, line }
    }

    pub fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end,
            line: self.line,
        }
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Compiler,
}

/// Rich diagnostic information produced while turning source into a unit.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub file: Option<String>,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.span) {
            (Some(file), Some(span)) => write!(f, "{file}:{}: ", span.line)?,
            (Some(file), None) => write!(f, "{file}: ")?,
            (None, Some(span)) => write!(f, "{}: ", span.line)?,
            (None, None) => {}
        }
        write!(f, "{}", self.message)?;
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// The I/O step of source ingestion that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoReason {
    Open,
    Seek,
    Tell,
    Read,
}

impl IoReason {
    fn describe(self) -> &'static str {
        match self {
            IoReason::Open => "cannot open file",
            IoReason::Seek => "cannot seek in file",
            IoReason::Tell => "cannot tell in file",
            IoReason::Read => "cannot read data from file",
        }
    }
}

/// Constructor name given to error objects raised by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorName {
    Error,
    SyntaxError,
    TypeError,
    ReferenceError,
    RangeError,
}

impl ErrorName {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorName::Error => "Error",
            ErrorName::SyntaxError => "SyntaxError",
            ErrorName::TypeError => "TypeError",
            ErrorName::ReferenceError => "ReferenceError",
            ErrorName::RangeError => "RangeError",
        }
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can travel through the engine's thrown-value channel.
///
/// Ingestion failures, parse and compile failures, engine-internal runtime
/// errors and values thrown by scripts all share this one type. The
/// `Display` text of each variant is the textual form of the value a script
/// `catch` clause would receive for it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Error: {}: '{path}'", .reason.describe())]
    Io { reason: IoReason, path: String },
    #[error("Error: cannot allocate storage for file contents: '{path}'")]
    OutOfMemory { path: String },
    #[error("SyntaxError: {0}")]
    Syntax(Diagnostic),
    #[error("SyntaxError: {0}")]
    Compile(Diagnostic),
    #[error("{name}: {message}")]
    Runtime { name: ErrorName, message: String },
    #[error("{text}")]
    Throw { value: Value, text: String },
    /// An error passed on by [`Interpreter::rethrow`](crate::Interpreter::rethrow),
    /// carrying the exact value the inner scope resumed with.
    #[error("{inner}")]
    Rethrown { value: Value, inner: Box<Error> },
    #[error("uncaught exception: {0}")]
    Panic(Box<Error>),
    #[error("Error: unbalanced protected scope")]
    UnbalancedScope,
}

impl Error {
    pub fn io(reason: IoReason, path: impl Into<String>) -> Self {
        Error::Io {
            reason,
            path: path.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Runtime {
            name: ErrorName::TypeError,
            message: message.into(),
        }
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        Error::Runtime {
            name: ErrorName::ReferenceError,
            message: message.into(),
        }
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Error::Runtime {
            name: ErrorName::RangeError,
            message: message.into(),
        }
    }

    /// Error name and message of the error object this error materialises
    /// into, or `None` when the thrown value is a script value.
    pub(crate) fn error_object_parts(&self) -> Option<(ErrorName, String)> {
        match self {
            Error::Io { reason, path } => {
                Some((ErrorName::Error, format!("{}: '{path}'", reason.describe())))
            }
            Error::OutOfMemory { path } => Some((
                ErrorName::Error,
                format!("cannot allocate storage for file contents: '{path}'"),
            )),
            Error::Syntax(diag) | Error::Compile(diag) => {
                Some((ErrorName::SyntaxError, diag.to_string()))
            }
            Error::Runtime { name, message } => Some((*name, message.clone())),
            Error::UnbalancedScope => {
                Some((ErrorName::Error, "unbalanced protected scope".to_string()))
            }
            Error::Throw { .. } => None,
            Error::Rethrown { inner, .. } | Error::Panic(inner) => inner.error_object_parts(),
        }
    }

    /// The script value this error already carries, if any.
    pub fn carried_value(&self) -> Option<&Value> {
        match self {
            Error::Throw { value, .. } | Error::Rethrown { value, .. } => Some(value),
            Error::Panic(inner) => inner.carried_value(),
            _ => None,
        }
    }

    /// Strips panic and rethrow wrappers, yielding the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::Panic(inner) | Error::Rethrown { inner, .. } => inner.root(),
            other => other,
        }
    }

}

pub type Result<T> = std::result::Result<T, Error>;
