//! Lexical environments for variable binding.
//!
//! An [`Environment`] is a cheap handle on one scope. Scopes point at their
//! parent and never at their children, so a scope lives as long as the
//! longest holder: the running call, a closure that captured it, or a
//! module binding.
//!
//! Every scope tree (a root and everything created below it) shares one
//! [`TreeState`]: the concurrency mode, the interrupt flag, the interner
//! and the output sink used by the prelude.

use super::interner::{Ident, Interner};
use super::value::{TypeInfo, Value, ValueKind};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Name resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// No binding with this name is visible
    #[error("undefined name '{name}'")]
    Undefined {
        /// The name looked up
        name: String,
    },
    /// No type registered under this name
    #[error("undefined type '{name}'")]
    UndefinedType {
        /// The name looked up
        name: String,
    },
}

/// Whether a scope tree may be touched by more than one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// Only the task that created the tree uses it
    Exclusive,
    /// A task was launched from somewhere in the tree
    Shared,
}

/// Sink for program output.
pub type Output = Arc<Mutex<Box<dyn Write + Send>>>;

/// State shared by every scope of one tree.
pub struct TreeState {
    shared: AtomicBool,
    interrupt: Arc<AtomicBool>,
    names: Arc<Interner>,
    output: Output,
    session: RwLock<String>,
}

impl TreeState {
    fn new(names: Arc<Interner>) -> Self {
        Self {
            shared: AtomicBool::new(false),
            interrupt: Arc::new(AtomicBool::new(false)),
            names,
            output: Arc::new(Mutex::new(Box::new(io::stdout()))),
            session: RwLock::new(String::new()),
        }
    }

    fn mode(&self) -> ConcurrencyMode {
        if self.shared.load(Ordering::Acquire) {
            ConcurrencyMode::Shared
        } else {
            ConcurrencyMode::Exclusive
        }
    }
}

#[derive(Default)]
struct Bindings {
    values: FxHashMap<Ident, Value>,
    types: FxHashMap<Ident, Arc<TypeInfo>>,
    /// Last binding of this scope read or written
    cache: Option<(Ident, Value)>,
}

struct Scope {
    parent: Option<Environment>,
    /// Module name; `None` for ordinary scopes
    name: Option<Ident>,
    tree: Arc<TreeState>,
    bindings: RwLock<Bindings>,
    /// Set once the prelude was registered here
    prelude: AtomicBool,
}

/// Handle on a scope.
#[derive(Clone)]
pub struct Environment {
    scope: Arc<Scope>,
}

impl Environment {
    /// Creates a root (global) scope with a fresh tree state.
    pub fn new_root(names: Arc<Interner>) -> Self {
        Self {
            scope: Arc::new(Scope {
                parent: None,
                name: None,
                tree: Arc::new(TreeState::new(names)),
                bindings: RwLock::new(Bindings::default()),
                prelude: AtomicBool::new(false),
            }),
        }
    }

    fn child(parent: &Environment, name: Option<Ident>) -> Self {
        Self {
            scope: Arc::new(Scope {
                parent: Some(parent.clone()),
                name,
                tree: parent.scope.tree.clone(),
                bindings: RwLock::new(Bindings::default()),
                prelude: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a scope whose parent is the root.
    pub fn new_env(&self) -> Self {
        Self::child(&self.root(), None)
    }

    /// Creates a scope whose parent is this scope, as a call or closure does.
    pub fn new_sub_env(&self) -> Self {
        Self::child(self, None)
    }

    /// Returns the module scope `name`, creating it under the root and
    /// binding it as a global if it does not exist yet.
    pub fn new_module(&self, name: &str) -> Self {
        let id = self.names().intern(name);
        if let Ok(Value::Module(module)) = self.get(id) {
            return module;
        }
        let module = Self::child(&self.root(), Some(id));
        self.define_global(id, Value::Module(module.clone()));
        tracing::debug!(module = name, "created module scope");
        module
    }

    /// Creates a named package scope below this one without binding it
    /// anywhere. The caller decides under which name, if any, it is visible.
    pub fn new_package(&self, name: &str) -> Self {
        Self::child(self, Some(self.names().intern(name)))
    }

    /// Records that the prelude was registered in this scope.
    pub fn mark_prelude_loaded(&self) {
        self.scope.prelude.store(true, Ordering::Release);
    }

    /// Returns true if this scope or an ancestor had the prelude registered.
    pub fn is_prelude_loaded(&self) -> bool {
        let mut env = Some(self);
        while let Some(current) = env {
            if current.scope.prelude.load(Ordering::Acquire) {
                return true;
            }
            env = current.scope.parent.as_ref();
        }
        false
    }

    /// The root scope of this tree.
    pub fn root(&self) -> Self {
        let mut env = self;
        while let Some(parent) = &env.scope.parent {
            env = parent;
        }
        env.clone()
    }

    /// The enclosing scope.
    pub fn parent(&self) -> Option<&Environment> {
        self.scope.parent.as_ref()
    }

    /// Number of ancestors.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut env = self;
        while let Some(parent) = &env.scope.parent {
            depth += 1;
            env = parent;
        }
        depth
    }

    /// Returns true if both handles point at the same scope.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.scope, &other.scope)
    }

    /// The interner shared by the tree.
    pub fn names(&self) -> &Arc<Interner> {
        &self.scope.tree.names
    }

    /// Module name of this scope.
    pub fn name(&self) -> Option<Ident> {
        self.scope.name
    }

    /// Module name as text; empty for ordinary scopes.
    pub fn module_name(&self) -> String {
        self.scope
            .name
            .map(|id| self.names().name(id))
            .unwrap_or_default()
    }

    /// Returns true if this scope is a module namespace.
    pub fn is_module(&self) -> bool {
        self.scope.name.is_some()
    }

    /// Current concurrency mode of the tree.
    pub fn mode(&self) -> ConcurrencyMode {
        self.scope.tree.mode()
    }

    /// Switches the tree to shared access. There is no way back.
    pub fn mark_shared(&self) {
        if !self.scope.tree.shared.swap(true, Ordering::AcqRel) {
            tracing::debug!("scope tree is now shared between tasks");
        }
    }

    /// Returns true once a task was launched from this tree.
    pub fn is_shared(&self) -> bool {
        self.mode() == ConcurrencyMode::Shared
    }

    /// Raises the interrupt flag.
    pub fn interrupt(&self) {
        self.scope.tree.interrupt.store(true, Ordering::Release);
    }

    /// The interrupt flag, for raising it from outside the interpreter.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.scope.tree.interrupt.clone()
    }

    /// Returns true, and clears the flag, if an interrupt was raised.
    pub fn check_interrupt(&self) -> bool {
        self.scope.tree.interrupt.swap(false, Ordering::AcqRel)
    }

    /// Binds `id` in this scope, replacing any local binding.
    pub fn define(&self, id: Ident, value: Value) {
        let cache = self.mode() == ConcurrencyMode::Exclusive;
        let mut bindings = self.scope.bindings.write();
        if cache {
            bindings.cache = Some((id, value.clone()));
        } else {
            bindings.cache = None;
        }
        bindings.values.insert(id, value);
    }

    /// Like [`define`](Self::define), interning `name` first.
    pub fn define_str(&self, name: &str, value: Value) {
        let id = self.names().intern(name);
        self.define(id, value);
    }

    /// Binds `id` in the root scope.
    pub fn define_global(&self, id: Ident, value: Value) {
        self.root().define(id, value);
    }

    /// Registers a type descriptor in the root scope.
    pub fn define_type(&self, id: Ident, ty: TypeInfo) {
        let root = self.root();
        root.scope.bindings.write().types.insert(id, Arc::new(ty));
    }

    /// Looks up a type descriptor, walking outwards.
    pub fn type_of(&self, id: Ident) -> Result<Arc<TypeInfo>, ScopeError> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(ty) = current.scope.bindings.read().types.get(&id) {
                return Ok(ty.clone());
            }
            env = current.parent();
        }
        Err(ScopeError::UndefinedType {
            name: self.names().name(id),
        })
    }

    /// Name under which `kind` is registered, or its built-in name.
    pub fn type_name(&self, kind: ValueKind) -> Ident {
        let mut env = Some(self);
        while let Some(current) = env {
            let bindings = current.scope.bindings.read();
            let mut found: Vec<Ident> = bindings
                .types
                .iter()
                .filter(|(_, ty)| ty.kind == kind)
                .map(|(id, _)| *id)
                .collect();
            found.sort();
            if let Some(id) = found.first() {
                return *id;
            }
            drop(bindings);
            env = current.parent();
        }
        self.names().intern(kind.name())
    }

    /// Reads `id`, walking outwards from this scope.
    pub fn get(&self, id: Ident) -> Result<Value, ScopeError> {
        let exclusive = self.mode() == ConcurrencyMode::Exclusive;
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(value) = current.lookup_local(id, exclusive) {
                return Ok(value);
            }
            env = current.parent();
        }
        Err(ScopeError::Undefined {
            name: self.names().name(id),
        })
    }

    fn lookup_local(&self, id: Ident, exclusive: bool) -> Option<Value> {
        if !exclusive {
            return self.scope.bindings.read().values.get(&id).cloned();
        }
        let mut bindings = self.scope.bindings.write();
        if let Some((cached, value)) = &bindings.cache {
            if *cached == id {
                return Some(value.clone());
            }
        }
        let value = bindings.values.get(&id).cloned()?;
        bindings.cache = Some((id, value.clone()));
        Some(value)
    }

    /// Assigns `id` in the nearest scope that binds it.
    ///
    /// Never creates a binding: an unresolved name is an error.
    pub fn set(&self, id: Ident, value: Value) -> Result<(), ScopeError> {
        let exclusive = self.mode() == ConcurrencyMode::Exclusive;
        let mut env = Some(self);
        while let Some(current) = env {
            let mut bindings = current.scope.bindings.write();
            if let Some(slot) = bindings.values.get_mut(&id) {
                *slot = value.clone();
                bindings.cache = if exclusive { Some((id, value)) } else { None };
                return Ok(());
            }
            drop(bindings);
            env = current.parent();
        }
        Err(ScopeError::Undefined {
            name: self.names().name(id),
        })
    }

    /// Returns true if `id` is bound in this scope itself.
    pub fn has_local(&self, id: Ident) -> bool {
        self.scope.bindings.read().values.contains_key(&id)
    }

    /// Drops every binding of this scope and removes any module binding in
    /// the parent that points at it.
    pub fn destroy(&self) {
        {
            let mut bindings = self.scope.bindings.write();
            bindings.values.clear();
            bindings.types.clear();
            bindings.cache = None;
        }
        if let Some(parent) = &self.scope.parent {
            let mut bindings = parent.scope.bindings.write();
            bindings
                .values
                .retain(|_, value| !matches!(value, Value::Module(m) if m.ptr_eq(self)));
            bindings.cache = None;
        }
    }

    /// Lists the bindings of this scope, sorted by handle.
    pub fn dump(&self) -> String {
        let bindings = self.scope.bindings.read();
        let mut ids: Vec<&Ident> = bindings.values.keys().collect();
        ids.sort();
        let mut out = String::new();
        for id in ids {
            let value = &bindings.values[id];
            out.push_str(&format!(
                "{} {} = {} ({})\n",
                id.0,
                self.names().name(*id),
                value,
                value.type_name()
            ));
        }
        out
    }

    /// Replaces the output sink of the tree.
    pub fn set_output(&self, writer: Box<dyn Write + Send>) {
        *self.scope.tree.output.lock() = writer;
    }

    /// The output sink of the tree.
    pub fn output(&self) -> Output {
        self.scope.tree.output.clone()
    }

    /// Writes a line to the output sink.
    pub fn println(&self, line: &str) -> io::Result<()> {
        let mut out = self.scope.tree.output.lock();
        writeln!(out, "{}", line)
    }

    /// Sets the session identifier and binds it as a global.
    pub fn set_session_id(&self, sid: &str) {
        *self.scope.tree.session.write() = sid.to_string();
        self.define_global(self.names().intern("session_id"), Value::Str(sid.to_string()));
    }

    /// The session identifier, empty when unset.
    pub fn session_id(&self) -> String {
        self.scope.tree.session.read().clone()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("module", &self.scope.name)
            .field("depth", &self.depth())
            .field("mode", &self.mode())
            .finish()
    }
}
