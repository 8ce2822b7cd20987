//! The bytecode virtual machine.
//!
//! This module contains the reference interpreter for compiled units,
//! along with its configuration and error type.
//!
//! ## Structure
//!
//! - `interpreter` - register machine executing bytecode against a scope chain
//! - `operators` - arithmetic, comparison and unary operators on values

mod interpreter;
pub mod operators;

#[cfg(test)]
mod tests;

pub use interpreter::Vm;

use crate::ast::Position;
use crate::compiler::bytecode::LabelError;
use crate::runtime::value::Value;
use thiserror::Error;

/// Interpreter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOptions {
    /// Deepest nesting of script function calls before the task aborts
    pub max_call_depth: usize,
    /// Emit a `trace` event for every executed instruction
    pub trace: bool,
    /// Largest length or capacity a script may request for a slice or channel
    pub max_len: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            trace: false,
            max_len: 1 << 24,
        }
    }
}

impl VmOptions {
    /// Sets the call depth limit.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Enables per-instruction tracing.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Sets the largest slice or channel size `make` may request.
    pub fn with_max_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }
}

/// Errors raised while executing bytecode.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// An operation failed; catchable
    #[error("{pos}: {message}")]
    Failed {
        /// What went wrong
        message: String,
        /// Instruction position
        pos: Position,
    },
    /// A `throw` no handler caught; catchable further out
    #[error("{pos}: uncaught error: {value}")]
    Uncaught {
        /// The error value
        value: Value,
        /// Position of the `throw`
        pos: Position,
    },
    /// A jump names a label its sequence does not define
    #[error("invalid bytecode: {0}")]
    Label(#[from] LabelError),
    /// Call nesting went past [`VmOptions::max_call_depth`]
    #[error("call depth exceeds {limit}")]
    CallDepth {
        /// The configured limit
        limit: usize,
    },
    /// The interrupt flag was raised
    #[error("interrupted")]
    Interrupted,
}

impl RuntimeError {
    pub(crate) fn failed(message: impl Into<String>, pos: Position) -> Self {
        RuntimeError::Failed {
            message: message.into(),
            pos,
        }
    }

    /// The value a `catch` handler receives, or `None` when no handler may
    /// intercept this error.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            RuntimeError::Failed { message, .. } => Some(Value::error(message.clone())),
            RuntimeError::Uncaught { value, .. } => Some(value.clone()),
            _ => None,
        }
    }
}
