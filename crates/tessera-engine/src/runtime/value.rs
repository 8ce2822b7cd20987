//! Runtime value representation.

use crate::ast::Constant;
use crate::compiler::bytecode::Bytecode;
use crate::runtime::environment::Environment;
use crate::runtime::interner::Ident;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Shared, mutable slice storage.
pub type SliceRef = Arc<RwLock<Vec<Value>>>;

/// Shared, mutable map storage with string keys.
pub type MapRef = Arc<RwLock<BTreeMap<String, Value>>>;

/// Host function signature.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A value manipulated by the interpreter.
///
/// Containers, functions and channels are reference types: cloning the
/// value shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value
    #[default]
    Nil,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
    /// Slice
    Slice(SliceRef),
    /// Map
    Map(MapRef),
    /// Compiled function with its captured scope
    Function(Arc<Function>),
    /// Host function
    Native(Arc<Native>),
    /// Channel
    Channel(Arc<Channel>),
    /// Module namespace
    Module(Environment),
    /// Reference to a binding or member
    Ref(Arc<Reference>),
    /// Runtime type descriptor
    Type(Arc<TypeInfo>),
    /// Error payload delivered to `catch`
    Error(Arc<ErrorValue>),
}

/// Value categories, used by `ISKIND` and type descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Nil
    Nil,
    /// Null
    Null,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Floating point number
    Float,
    /// String
    Str,
    /// Slice
    Slice,
    /// Map
    Map,
    /// Compiled or host function
    Function,
    /// Channel
    Channel,
    /// Module
    Module,
    /// Reference
    Ref,
    /// Type descriptor
    Type,
    /// Error
    Error,
}

impl ValueKind {
    /// Lowercase name, as reported by `type_name`.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Slice => "slice",
            ValueKind::Map => "map",
            ValueKind::Function => "func",
            ValueKind::Channel => "chan",
            ValueKind::Module => "module",
            ValueKind::Ref => "ref",
            ValueKind::Type => "type",
            ValueKind::Error => "error",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A function value.
#[derive(Debug)]
pub struct Function {
    /// Name, if declared with one
    pub name: Option<Ident>,
    /// Parameter names
    pub params: Vec<Ident>,
    /// The last parameter collects the remaining arguments
    pub variadic: bool,
    /// Body
    pub code: Arc<Bytecode>,
    /// Scope the function was created in
    pub env: Environment,
}

/// A host function.
pub struct Native {
    /// Name used in diagnostics
    pub name: String,
    /// Implementation
    pub func: Box<NativeFn>,
}

impl Native {
    /// Wraps a closure as a value.
    pub fn value(
        name: &str,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Value {
        Value::Native(Arc::new(Native {
            name: name.to_string(),
            func: Box::new(func),
        }))
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native").field("name", &self.name).finish()
    }
}

/// Runtime type descriptor registered with `define_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Name the type was registered under
    pub name: String,
    /// Category of the values it produces
    pub kind: ValueKind,
}

impl TypeInfo {
    /// Creates a descriptor value.
    pub fn value(name: &str, kind: ValueKind) -> Value {
        Value::Type(Arc::new(TypeInfo {
            name: name.to_string(),
            kind,
        }))
    }

    /// The value `make` produces for this type.
    pub fn zero(&self) -> Value {
        match self.kind {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Str => Value::Str(String::new()),
            ValueKind::Slice => Value::slice(Vec::new()),
            ValueKind::Map => Value::map(BTreeMap::new()),
            ValueKind::Channel => Value::Channel(Arc::new(Channel::new(0))),
            ValueKind::Null => Value::Null,
            _ => Value::Nil,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    /// Message
    pub message: String,
    /// Value passed to `throw`, when the error came from one
    pub payload: Value,
}

/// Reference created by `&name` or `&object.member`.
#[derive(Debug)]
pub enum Reference {
    /// A binding in a scope
    Binding {
        /// Scope the reference was taken in
        env: Environment,
        /// Bound name
        id: Ident,
    },
    /// A map member
    Member {
        /// The map
        map: MapRef,
        /// Member key
        key: String,
    },
}

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum TryRecv {
    /// A value was ready
    Value(Value),
    /// Nothing buffered and no sender waiting
    Empty,
    /// Closed and drained
    Closed,
}

/// A channel shared between tasks.
///
/// Backed by a bounded crossbeam channel; capacity 0 is a rendezvous
/// channel. Closing drops the only sender, so receivers drain what is
/// buffered and then observe the close.
pub struct Channel {
    tx: RwLock<Option<Sender<Value>>>,
    rx: Receiver<Value>,
    capacity: usize,
}

impl Channel {
    /// Creates a channel with `capacity` buffered slots.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx,
            capacity,
        }
    }

    /// Buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Returns true once the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Sends, blocking until there is room or a receiver.
    pub fn send(&self, value: Value) -> Result<(), String> {
        let tx = self.tx.read();
        match tx.as_ref() {
            Some(tx) => tx
                .send(value)
                .map_err(|_| "send on closed channel".to_string()),
            None => Err("send on closed channel".to_string()),
        }
    }

    /// Receives, blocking until a value arrives. `None` means closed.
    pub fn recv(&self) -> Option<Value> {
        self.rx.recv().ok()
    }

    /// Sends without blocking; `Ok(false)` when the channel is not ready.
    pub fn try_send(&self, value: Value) -> Result<bool, String> {
        let tx = self.tx.read();
        let Some(tx) = tx.as_ref() else {
            return Err("send on closed channel".to_string());
        };
        match tx.try_send(value) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err("send on closed channel".to_string()),
        }
    }

    /// Receives without blocking.
    pub fn try_recv(&self) -> TryRecv {
        match self.rx.try_recv() {
            Ok(value) => TryRecv::Value(value),
            Err(TryRecvError::Empty) => TryRecv::Empty,
            Err(TryRecvError::Disconnected) => TryRecv::Closed,
        }
    }

    /// Closes the channel. Closing twice is an error.
    pub fn close(&self) -> Result<(), String> {
        match self.tx.write().take() {
            Some(_) => Ok(()),
            None => Err("close of closed channel".to_string()),
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Value {
    /// Wraps items in a new slice.
    pub fn slice(items: Vec<Value>) -> Self {
        Value::Slice(Arc::new(RwLock::new(items)))
    }

    /// Wraps entries in a new map.
    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    /// Builds an error value with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(Arc::new(ErrorValue {
            message: message.into(),
            payload: Value::Nil,
        }))
    }

    /// Builds an error value carrying a thrown value.
    pub fn thrown(payload: Value) -> Self {
        let message = match &payload {
            Value::Error(err) => return Value::Error(err.clone()),
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        };
        Value::Error(Arc::new(ErrorValue { message, payload }))
    }

    /// Category of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Slice(_) => ValueKind::Slice,
            Value::Map(_) => ValueKind::Map,
            Value::Function(_) | Value::Native(_) => ValueKind::Function,
            Value::Channel(_) => ValueKind::Channel,
            Value::Module(_) => ValueKind::Module,
            Value::Ref(_) => ValueKind::Ref,
            Value::Type(_) => ValueKind::Type,
            Value::Error(_) => ValueKind::Error,
        }
    }

    /// Name of this value's category.
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Returns true for nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns true for error values.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Truthiness used by conditional jumps.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil | Value::Null | Value::Error(_) => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Integer view of numeric values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// Converts to `kind`, as `value as type` does.
    pub fn cast(&self, kind: ValueKind) -> Result<Value, String> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        let fail = || format!("cannot convert {} to {}", self.type_name(), kind);
        match (kind, self) {
            (ValueKind::Bool, v) => Ok(Value::Bool(v.is_truthy())),
            (ValueKind::Str, v) => Ok(Value::Str(v.to_string())),
            (ValueKind::Int, Value::Float(n)) => Ok(Value::Int(n.trunc() as i64)),
            (ValueKind::Int, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
            (ValueKind::Int, Value::Str(s)) => match crate::ast::parse_number(s) {
                Some(Constant::Int(n)) => Ok(Value::Int(n)),
                Some(Constant::Float(n)) => Ok(Value::Int(n.trunc() as i64)),
                _ => Err(fail()),
            },
            (ValueKind::Float, Value::Int(n)) => Ok(Value::Float(*n as f64)),
            (ValueKind::Float, Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            (ValueKind::Float, Value::Str(s)) => s.trim().parse().map(Value::Float).map_err(|_| fail()),
            (ValueKind::Slice, Value::Str(s)) => Ok(Value::slice(
                s.chars().map(|c| Value::Str(c.to_string())).collect(),
            )),
            (ValueKind::Slice, Value::Map(map)) => {
                Ok(Value::slice(map.read().values().cloned().collect()))
            }
            _ => Err(fail()),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

thread_local! {
    /// Container pairs being compared or printed on this thread.
    static VISITING: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container pair as in progress until dropped. Printing uses the
/// pair `(container, 0)`.
struct Visit;

impl Visit {
    /// Returns `None` when the pair is already being visited further up.
    fn enter<A, B>(a: &Arc<A>, b: Option<&Arc<B>>) -> Option<Visit> {
        let key = (
            Arc::as_ptr(a) as *const () as usize,
            b.map_or(0, |b| Arc::as_ptr(b) as *const () as usize),
        );
        VISITING.with(|visiting| {
            let mut visiting = visiting.borrow_mut();
            if visiting.contains(&key) {
                return None;
            }
            visiting.push(key);
            Some(Visit)
        })
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        VISITING.with(|visiting| {
            visiting.borrow_mut().pop();
        });
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            // a pair met again while comparing it is equal so far
            (Value::Slice(a), Value::Slice(b)) => {
                Arc::ptr_eq(a, b)
                    || Visit::enter(a, Some(b)).is_none_or(|_visit| *a.read() == *b.read())
            }
            (Value::Map(a), Value::Map(b)) => {
                Arc::ptr_eq(a, b)
                    || Visit::enter(a, Some(b)).is_none_or(|_visit| *a.read() == *b.read())
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Channel(a), Value::Channel(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => a.ptr_eq(b),
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a.message == b.message,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Slice(items) => {
                let Some(_visit) = Visit::enter::<_, ()>(items, None) else {
                    return write!(f, "[...]");
                };
                write!(f, "[")?;
                for (i, item) in items.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match item {
                        Value::Str(s) => write!(f, "{:?}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                let Some(_visit) = Visit::enter::<_, ()>(map, None) else {
                    return write!(f, "{{...}}");
                };
                write!(f, "{{")?;
                for (i, (key, value)) in map.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match value {
                        Value::Str(s) => write!(f, "{:?}: {:?}", key, s)?,
                        other => write!(f, "{:?}: {}", key, other)?,
                    }
                }
                write!(f, "}}")
            }
            Value::Function(func) => match func.name {
                Some(name) => write!(f, "func {}", func.env.names().name(name)),
                None => write!(f, "func"),
            },
            Value::Native(native) => write!(f, "native {}", native.name),
            Value::Channel(ch) => write!(f, "chan({})", ch.capacity()),
            Value::Module(env) => write!(f, "module {}", env.module_name()),
            Value::Ref(_) => write!(f, "ref"),
            Value::Type(ty) => write!(f, "type {}", ty.name),
            Value::Error(err) => write!(f, "{}", err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::slice(vec![]).is_truthy());
        assert!(!Value::error("x").is_truthy());
    }

    #[test]
    fn test_numeric_equality_crosses_kinds() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".into()));
    }

    #[test]
    fn test_slices_compare_by_content() {
        let a = Value::slice(vec![Value::Int(1), Value::Str("x".into())]);
        let b = Value::slice(vec![Value::Int(1), Value::Str("x".into())]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "[1, \"x\"]");
    }

    #[test]
    fn test_self_referencing_slice() {
        let a = Value::slice(vec![Value::Int(1)]);
        let b = Value::slice(vec![Value::Int(1)]);
        if let (Value::Slice(xs), Value::Slice(ys)) = (&a, &b) {
            xs.write().push(a.clone());
            ys.write().push(b.clone());
        }
        assert_eq!(a.to_string(), "[1, [...]]");
        assert_eq!(a, a.clone());
        assert_eq!(a, b);

        let c = Value::slice(vec![Value::Int(2), a.clone()]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_self_referencing_map() {
        let m = Value::map(BTreeMap::new());
        if let Value::Map(inner) = &m {
            inner.write().insert("me".to_string(), m.clone());
        }
        assert_eq!(m.to_string(), "{\"me\": {...}}");
        assert_eq!(m, m.clone());
    }

    #[test]
    fn test_cast() {
        assert_eq!(Value::Str("42".into()).cast(ValueKind::Int), Ok(Value::Int(42)));
        assert_eq!(Value::Float(2.9).cast(ValueKind::Int), Ok(Value::Int(2)));
        assert_eq!(Value::Int(5).cast(ValueKind::Str), Ok(Value::Str("5".into())));
        assert!(Value::Str("abc".into()).cast(ValueKind::Int).is_err());
    }

    #[test]
    fn test_type_zero_values() {
        let int = TypeInfo {
            name: "int".into(),
            kind: ValueKind::Int,
        };
        assert_eq!(int.zero(), Value::Int(0));
        let map = TypeInfo {
            name: "map".into(),
            kind: ValueKind::Map,
        };
        assert_eq!(map.zero().kind(), ValueKind::Map);
    }

    #[test]
    fn test_thrown_keeps_message() {
        let err = Value::thrown(Value::Str("boom".into()));
        assert!(err.is_error());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_channel_buffered() {
        let ch = Channel::new(1);
        assert_eq!(ch.try_send(Value::Int(1)), Ok(true));
        assert_eq!(ch.try_send(Value::Int(2)), Ok(false));
        assert_eq!(ch.try_recv(), TryRecv::Value(Value::Int(1)));
        assert_eq!(ch.try_recv(), TryRecv::Empty);
    }

    #[test]
    fn test_channel_close() {
        let ch = Channel::new(2);
        ch.send(Value::Int(7)).unwrap();
        ch.close().unwrap();
        assert!(ch.close().is_err());
        assert!(ch.send(Value::Int(8)).is_err());
        // buffered values survive the close
        assert_eq!(ch.recv(), Some(Value::Int(7)));
        assert_eq!(ch.recv(), None);
        assert_eq!(ch.try_recv(), TryRecv::Closed);
    }

    #[test]
    fn test_unbuffered_try_send_needs_receiver() {
        let ch = Channel::new(0);
        assert_eq!(ch.try_send(Value::Int(1)), Ok(false));
    }
}
