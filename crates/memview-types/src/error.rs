//! Error types for the synthetic type engine.
//!
//! Lex and parse failures are fatal to the whole header read; unknown-type and
//! memory failures stay local to the operation that triggered them.

use memview_core::MemoryError;
use thiserror::Error;

/// Error type for header parsing, layout, and instance access.
#[derive(Error, Debug)]
pub enum TypeError {
    /// Lexical failure (unterminated comment, unbalanced conditional).
    #[error("lex error at line {line}: {message}")]
    Lex { line: u32, message: String },

    /// Unexpected token during declaration or expression parsing.
    #[error("parse error at line {line}: {message}")]
    Parse { line: u32, message: String },

    /// A type name resolved to neither a synthetic nor a native definition.
    #[error("unrecognized type: {0}")]
    UnknownType(String),

    /// A computed size overflows the address space.
    #[error("type too large: {0}")]
    TooLarge(String),

    /// A read from target memory failed.
    #[error("memory read failed: {0}")]
    Memory(#[from] MemoryError),

    /// The header file could not be read from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TypeError {
    /// Creates a new Lex error.
    pub fn lex(line: u32, message: impl Into<String>) -> Self {
        Self::Lex {
            line,
            message: message.into(),
        }
    }

    /// Creates a new Parse error.
    pub fn parse(line: u32, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

/// Result type for type-engine operations.
pub type TypeResult<T> = Result<T, TypeError>;
