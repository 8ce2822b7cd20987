// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # tessera-engine
//!
//! Back end of the tessera scripting language: lowering of statement trees
//! to register bytecode, persisted units with identifier merging, the
//! lexical scope chain and a reference interpreter.
//!
//! ## Overview
//!
//! - [`ast`]: the statement/expression tree handed over by a front end
//! - [`compiler`]: lowering to bytecode
//! - [`link`]: persisted units and the identifier merge on load
//! - [`runtime`]: interner, values and environments
//! - [`vm`]: the interpreter
//! - [`prelude`]: built-in names
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessera_engine::{Engine, Expression, Statement};
//!
//! let engine = Engine::new();
//! let x = engine.names().intern("x");
//! engine.run(&[Statement::set(x, Expression::int(2))])?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod link;
pub mod prelude;
pub mod runtime;
pub mod vm;

#[cfg(feature = "async")]
pub mod async_loader;
#[cfg(feature = "parallel")]
pub mod parallel;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

pub use ast::{Expression, Position, Statement};
pub use compiler::{Bytecode, CompileError, Compiler, Unit};
pub use link::LinkError;
pub use runtime::{Environment, Ident, Interner, ScopeError, Value};
pub use vm::{RuntimeError, Vm, VmOptions};

#[cfg(feature = "async")]
pub use async_loader::AsyncLoader;
#[cfg(feature = "parallel")]
pub use parallel::ParallelCompiler;

/// An interner, a root environment with the prelude, and an interpreter.
pub struct Engine {
    names: Arc<Interner>,
    env: Environment,
    vm: Vm,
}

impl Engine {
    /// Creates an engine with default options.
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Creates an engine whose interpreter uses `options`.
    pub fn with_options(options: VmOptions) -> Self {
        let names = Arc::new(Interner::new());
        let env = Environment::new_root(names.clone());
        prelude::register(&env);
        Self {
            names,
            env,
            vm: Vm::with_options(options),
        }
    }

    /// The shared interner.
    pub fn names(&self) -> &Arc<Interner> {
        &self.names
    }

    /// The root environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// The interpreter.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Lowers a program.
    pub fn compile(&self, program: &[Statement]) -> Result<Unit> {
        Ok(Compiler::new(&self.names).compile(program)?)
    }

    /// Lowers and runs a program in the root environment.
    pub fn run(&self, program: &[Statement]) -> Result<Value> {
        let unit = self.compile(program)?;
        self.run_unit(&unit)
    }

    /// Runs a compiled unit in the root environment.
    pub fn run_unit(&self, unit: &Unit) -> Result<Value> {
        Ok(self.vm.run_unit(unit, &self.env)?)
    }

    /// Reads a persisted unit and links it against this engine's names.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Unit> {
        Ok(link::read_unit(path, &self.names)?)
    }

    /// Persists a unit compiled by this engine.
    pub fn save_file(&self, path: impl AsRef<Path>, unit: &Unit) -> Result<()> {
        Ok(link::write_unit(path, unit, &self.names)?)
    }

    /// Loads and runs a persisted unit, then waits for launched tasks.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let unit = self.load_file(path)?;
        let value = self.run_unit(&unit)?;
        self.vm.wait();
        Ok(value)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A construct could not be lowered
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// A persisted unit could not be written or loaded
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    /// Execution failed
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    /// A name could not be resolved
    #[error("scope error: {0}")]
    Scope(#[from] ScopeError),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

    #[test]
    fn test_engine_has_prelude() {
        let engine = Engine::new();
        let len = engine.names().intern("len");
        assert!(engine.env().get(len).is_ok());
    }

    #[test]
    fn test_run_and_persist() {
        let engine = Engine::new();
        let x = engine.names().intern("x");
        let program = [Statement::ret(vec![Expression::binary(
            BinaryOp::Add,
            Expression::int(40),
            Expression::int(2),
        )])];
        let unit = engine.compile(&program).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.tsb");
        engine.save_file(&path, &unit).unwrap();

        let other = Engine::new();
        assert_eq!(other.run_file(&path).unwrap(), Value::Int(42));
        assert!(engine.env().get(x).is_err());
    }

    #[test]
    fn test_errors_convert() {
        let engine = Engine::new();
        let err = engine
            .run(&[Statement::throw(Expression::string("nope"))])
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::Uncaught { .. })));
        assert!(err.to_string().starts_with("runtime error:"));
    }
}
