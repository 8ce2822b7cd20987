//! Parallel compilation on a rayon thread pool.
//!
//! All programs are lowered against one shared interner, so identical names
//! in different programs get identical handles. Each program gets its own
//! [`Compiler`] and therefore its own label numbering.

use rayon::ThreadPoolBuildError;
use rayon::prelude::*;

use crate::ast::{Statement, simplify_block};
use crate::compiler::Compiler;
use crate::compiler::bytecode::Unit;
use crate::compiler::codegen::CompileError;
use crate::runtime::interner::Interner;

/// Compiles many programs on a dedicated thread pool.
pub struct ParallelCompiler {
    /// Thread pool for CPU-bound work
    pool: rayon::ThreadPool,
}

impl ParallelCompiler {
    /// Creates a pool with the default number of threads.
    pub fn new() -> Result<Self, ThreadPoolBuildError> {
        Ok(Self {
            pool: rayon::ThreadPoolBuilder::new().build()?,
        })
    }

    /// Creates a pool with `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ThreadPoolBuildError> {
        Ok(Self {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("tessera-compile-{}", i))
                .build()?,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compiles every program. Results are in input order.
    pub fn compile_all(
        &self,
        names: &Interner,
        programs: &[Vec<Statement>],
    ) -> Vec<Result<Unit, CompileError>> {
        tracing::debug!(programs = programs.len(), threads = self.threads(), "compiling in parallel");
        self.pool.install(|| {
            programs
                .par_iter()
                .map(|program| Compiler::new(names).compile(program))
                .collect()
        })
    }

    /// Simplifies every program in place, then compiles it.
    pub fn simplify_and_compile(
        &self,
        names: &Interner,
        programs: &mut [Vec<Statement>],
    ) -> Vec<Result<Unit, CompileError>> {
        self.pool.install(|| {
            programs
                .par_iter_mut()
                .map(|program| {
                    simplify_block(program);
                    Compiler::new(names).compile(program)
                })
                .collect()
        })
    }
}
