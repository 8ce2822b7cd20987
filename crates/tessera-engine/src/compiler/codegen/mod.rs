//! Code generation from the statement tree to bytecode.
//!
//! Every lowering function receives the sequence to append to and a base
//! register. The construct leaves its result (if any) in the base register
//! and is free to use any register above it as scratch space; it never
//! writes below the base.

mod expressions;
mod statements;

#[cfg(test)]
mod tests;

use crate::ast::{Position, Statement};
use crate::compiler::bytecode::{Bytecode, Unit};
use crate::runtime::interner::{Ident, Interner};
use thiserror::Error;

/// A construct the compiler cannot lower.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{pos}: {message}")]
pub struct CompileError {
    /// What went wrong
    pub message: String,
    /// Where
    pub pos: Position,
}

impl CompileError {
    pub(crate) fn new(message: impl Into<String>, pos: Position) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// Compiles statement trees to bytecode.
///
/// The compiler owns the label counter. Labels are never reused within one
/// compiler, so units lowered by the same instance (and the function bodies
/// nested in them) never share a label number.
pub struct Compiler<'a> {
    names: &'a Interner,
    /// Last label handed out
    labels: usize,
    /// Module name that inlines its body into the current scope
    inline_module: Ident,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler resolving names through `names`.
    pub fn new(names: &'a Interner) -> Self {
        Self {
            names,
            labels: 0,
            inline_module: names.intern("_"),
        }
    }

    /// The interner this compiler works against.
    pub fn names(&self) -> &Interner {
        self.names
    }

    /// Number of labels allocated so far.
    pub fn label_count(&self) -> usize {
        self.labels
    }

    /// Compiles a program starting at register 0.
    pub fn compile(&mut self, program: &[Statement]) -> Result<Unit, CompileError> {
        self.compile_with(program, 0)
    }

    /// Compiles a program using `base` as its first scratch register.
    pub fn compile_with(
        &mut self,
        program: &[Statement],
        base: usize,
    ) -> Result<Unit, CompileError> {
        let mut code = Bytecode::new();
        self.block(&mut code, program, base)?;
        tracing::debug!(
            instructions = code.len(),
            labels = self.labels,
            "compiled unit"
        );
        Ok(Unit {
            code,
            label_count: self.labels,
        })
    }

    /// Allocates a fresh label.
    fn label(&mut self) -> usize {
        self.labels += 1;
        self.labels
    }
}
