//! Centralised error hierarchy for the **rope-eval** engine.
//!
//! All subsystems (scanner, parser, resolver, evaluator, CLI) convert their
//! internal failure modes into one of the variants defined here before they
//! reach the host.  This enables a uniform `Result<T>` alias throughout the
//! crate and ergonomic inter‑operation with `anyhow`, while still preserving
//! rich diagnostic detail.
//!
//! Script-visible exceptions use the [`ErrorKind`] taxonomy.  The two fatal
//! conditions, [`EngineError::StackOverflow`] and [`EngineError::OutOfMemory`],
//! are separate variants so a host can special-case them: they
//! are never catchable by script code.
//!
//! The module **does not** print diagnostics itself.

use std::fmt;
use std::io;

use log::info;
use serde::Serialize;
use thiserror::Error;

/// Script-visible error constructors raised by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Malformed source text, including text handed to `eval`.
    SyntaxError,

    /// Unresolvable identifier or a read inside the temporal dead zone.
    ReferenceError,

    /// Constant reassignment, calling a non-callable, `with` on a non-object.
    TypeError,

    /// String length overflow.
    RangeError,
}

impl ErrorKind {
    /// The constructor name as scripts observe it through `e.name`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
        }
    }

    /// Inverse of [`ErrorKind::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SyntaxError" => Some(ErrorKind::SyntaxError),
            "ReferenceError" => Some(ErrorKind::ReferenceError),
            "TypeError" => Some(ErrorKind::TypeError),
            "RangeError" => Some(ErrorKind::RangeError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical error type used throughout the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Lexical (scanner) error with source line information.
    #[error("[line {line}] SyntaxError: {message}")]
    Lex {
        /// Human‑readable description.
        message: String,

        /// 1‑based line where the error occurred.
        line: usize,
    },

    /// Syntactic (parser) error.
    #[error("[line {line}] SyntaxError: {message}")]
    Parse { message: String, line: usize },

    /// Early error found by the resolver (e.g. `with` in strict code).
    #[error("[line {line}] SyntaxError: {message}")]
    Resolve { message: String, line: usize },

    /// A script exception that nothing caught.
    ///
    /// `kind` is set when the thrown value was an engine error object
    /// (or any object whose `name` matches the taxonomy).
    #[error("Uncaught {}: {message}", .kind.map_or("exception", ErrorKind::name))]
    Thrown {
        kind: Option<ErrorKind>,
        message: String,
    },

    /// Call depth or syntactic nesting exceeded the engine limits.  Fatal.
    #[error("Fatal: maximum call stack size exceeded")]
    StackOverflow,

    /// Allocation failure while building strings or environments.  Fatal.
    #[error("Fatal: out of memory")]
    OutOfMemory,

    /// Wrapper around `std::io::Error` (transparent).  Enables `?` on I/O ops.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// UTF‑8 decoding failure when ingesting external text.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl EngineError {
    /// Helper constructor for the **scanner**.
    pub fn lex<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Lex error: line={}, msg={}", line, message);

        EngineError::Lex { message, line }
    }

    /// Helper constructor for the **parser**.
    pub fn parse<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Parse error: line={}, msg={}", line, message);

        EngineError::Parse { message, line }
    }

    /// Helper constructor for the **resolver**.
    pub fn resolve<S: Into<String>>(line: usize, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Resolve error: line={}, msg={}", line, message);

        EngineError::Resolve { message, line }
    }

    /// Helper constructor for uncaught script exceptions.
    pub fn thrown<S: Into<String>>(kind: Option<ErrorKind>, msg: S) -> Self {
        let message: String = msg.into();

        info!("Creating Thrown error: kind={:?}, msg={}", kind, message);

        EngineError::Thrown { kind, message }
    }

    /// `true` for the conditions that bypass every script-level handler.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::StackOverflow | EngineError::OutOfMemory)
    }

    /// `true` for errors produced before any code ran (exit code 65 in the CLI).
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            EngineError::Lex { .. } | EngineError::Parse { .. } | EngineError::Resolve { .. }
        )
    }

    /// The script-visible kind of this error, if it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Lex { .. } | EngineError::Parse { .. } | EngineError::Resolve { .. } => {
                Some(ErrorKind::SyntaxError)
            }
            EngineError::Thrown { kind, .. } => *kind,
            _ => None,
        }
    }

    /// Message without the line prefix, as stored on a thrown error object.
    pub fn message(&self) -> String {
        match self {
            EngineError::Lex { message, .. }
            | EngineError::Parse { message, .. }
            | EngineError::Resolve { message, .. }
            | EngineError::Thrown { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Crate‑wide `Result` alias.
pub type Result<T> = std::result::Result<T, EngineError>;
