//! Built-in names registered before any script runs.
//!
//! Deliberately small: a handful of functions, the core type descriptors
//! and the `sys` module.

use crate::runtime::environment::Environment;
use crate::runtime::value::{Native, TypeInfo, Value, ValueKind};
use std::io::Write;

/// Type descriptors bound at the root, by script-visible name.
const TYPES: &[(&str, ValueKind)] = &[
    ("bool", ValueKind::Bool),
    ("int", ValueKind::Int),
    ("float", ValueKind::Float),
    ("string", ValueKind::Str),
    ("slice", ValueKind::Slice),
    ("map", ValueKind::Map),
    ("func", ValueKind::Function),
    ("chan", ValueKind::Channel),
    ("error", ValueKind::Error),
];

/// Registers the built-ins on the root of `env`. Does nothing if `env` or
/// one of its ancestors already has them.
pub fn register(env: &Environment) {
    if env.is_prelude_loaded() {
        return;
    }
    let names = env.names().clone();

    for (name, kind) in TYPES {
        env.define_type(
            names.intern(name),
            TypeInfo {
                name: name.to_string(),
                kind: *kind,
            },
        );
    }

    env.define_global(names.intern("len"), Native::value("len", len));
    env.define_global(names.intern("str"), Native::value("str", str));
    env.define_global(names.intern("close"), Native::value("close", close));

    let output = env.output();
    env.define_global(
        names.intern("print"),
        Native::value("print", move |args| {
            let line = args
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            let mut out = output.lock();
            writeln!(out, "{}", line).map_err(|e| e.to_string())?;
            Ok(Value::Nil)
        }),
    );

    let sys = env.new_module("sys");
    sys.define_str("version", Value::from(env!("CARGO_PKG_VERSION")));
    sys.define_str(
        "getenv",
        Native::value("sys.getenv", |args| match args {
            [Value::Str(key)] => Ok(std::env::var(key).map(Value::Str).unwrap_or(Value::Nil)),
            _ => Err("getenv expects one string".to_string()),
        }),
    );

    env.root().mark_prelude_loaded();
    tracing::debug!(types = TYPES.len(), "registered prelude");
}

fn single<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, String> {
    match args {
        [value] => Ok(value),
        _ => Err(format!("{} expects 1 argument, got {}", name, args.len())),
    }
}

fn len(args: &[Value]) -> Result<Value, String> {
    let count = match single("len", args)? {
        Value::Str(s) => s.chars().count(),
        Value::Slice(items) => items.read().len(),
        Value::Map(map) => map.read().len(),
        Value::Channel(ch) => ch.len(),
        Value::Nil => 0,
        other => return Err(format!("len of {}", other.type_name())),
    };
    Ok(Value::Int(count as i64))
}

fn str(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Str(single("str", args)?.to_string()))
}

fn close(args: &[Value]) -> Result<Value, String> {
    match single("close", args)? {
        Value::Channel(ch) => ch.close().map(|_| Value::Nil),
        other => Err(format!("close of {}", other.type_name())),
    }
}
