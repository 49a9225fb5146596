//! Error types shared across the autonomy kernel.

use std::{io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while parsing or evaluating a rule condition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// The condition text is not a valid expression.
    #[error("parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset of the offending token.
        position: usize,
        /// What the parser expected.
        message: String,
    },
    /// The condition references a name absent from the evaluation context.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    /// Operand types are incompatible with the operator.
    #[error("type mismatch: cannot apply `{op}` to {left} and {right}")]
    TypeMismatch {
        /// Operator symbol.
        op: String,
        /// Left operand type.
        left: &'static str,
        /// Right operand type.
        right: &'static str,
    },
    /// Arithmetic division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Nesting exceeds the parser limit.
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
    /// Condition text exceeds the length limit.
    #[error("expression longer than {0} bytes")]
    TooLong(usize),
}

/// Raised by the tool executor when an action cannot be carried out.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolExecutionError {
    /// The action has no entry in the tool table.
    #[error("Unknown AI Action: {0}")]
    UnknownAction(String),
}

/// Failures of the heuristic persistence collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("heuristic storage io error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The persisted document is not valid JSON for the heuristic schema.
    #[error("heuristic storage at {path} is corrupt: {source}")]
    Corrupt {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Serialization of the in-memory store failed.
    #[error("could not encode heuristics: {0}")]
    Encode(#[from] serde_json::Error),
    /// Storage deliberately refused the write.
    #[error("heuristic storage unavailable: {0}")]
    Unavailable(String),
}

/// Loading and configuration failures surfaced when the runtime is wired.
#[derive(Debug, Error)]
pub enum AutonomyError {
    /// Knowledge file could not be read or decoded.
    #[error("knowledge error: {0}")]
    Knowledge(String),
    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
