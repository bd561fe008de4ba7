//! Core library for the Lumen embeddable scripting engine.
//! Implements the interpreter state lifecycle, protected scopes, source
//! ingestion and the load pipeline, plus the small language they drive.

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod heap;
pub mod ingest;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod protect;
pub mod repl;
pub mod resource;
pub mod state;
pub mod value;
mod vm;

pub use config::{EngineConfig, Flags};
pub use diagnostics::{Diagnostic, DiagnosticKind, Error, ErrorName, IoReason, Result, SourceSpan};
pub use pipeline::LoadMode;
pub use protect::ScopeId;
pub use repl::Repl;
pub use resource::ResourceStats;
pub use state::{Interpreter, PanicHandler, TraceEntry};
pub use value::Value;
