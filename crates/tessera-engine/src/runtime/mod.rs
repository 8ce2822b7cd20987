//! Runtime types: interned names, values and the scope chain.

pub mod environment;
pub mod interner;
pub mod value;

pub use environment::{ConcurrencyMode, Environment, ScopeError};
pub use interner::{Ident, Interner, NameTable};
pub use value::{Channel, Function, Native, TypeInfo, Value, ValueKind};
