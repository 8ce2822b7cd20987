//! Bytecode compiler.
//!
//! Lowers statement trees into register bytecode.
//!
//! # Module Structure
//!
//! - `bytecode`: instruction set, listings and label checks
//! - `codegen`: lowering from the tree to bytecode
//!   - `codegen::statements`: control flow and assignment
//!   - `codegen::expressions`: value-producing expressions

pub mod bytecode;
pub mod codegen;

pub use bytecode::{Bytecode, Instruction, LabelError, OpCode, Unit};
pub use codegen::{CompileError, Compiler};
