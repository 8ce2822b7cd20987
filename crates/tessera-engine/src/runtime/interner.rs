//! Identifier interning.
//!
//! Every name the compiler or the runtime touches is stored once in an
//! [`Interner`] and referred to by a small [`Ident`] handle afterwards.
//! Lookup is case-insensitive: `Count` and `count` share a handle, and the
//! first spelling seen is the one reported back.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of an interned identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ident(pub u32);

impl Ident {
    /// Returns the handle as a table index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Serializable copy of an interner's contents, in handle order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameTable {
    /// `(handle, spelling)` pairs
    pub entries: Vec<(Ident, String)>,
}

impl NameTable {
    /// Number of names in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no names.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spelling stored for `id`, if any.
    pub fn get(&self, id: Ident) -> Option<&str> {
        self.entries
            .iter()
            .find(|(handle, _)| *handle == id)
            .map(|(_, name)| name.as_str())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    spelling: String,
    lower: String,
}

#[derive(Debug, Default)]
struct Table {
    /// Slot per handle; `None` marks a gap left by [`Interner::adopt_at`].
    names: Vec<Option<Entry>>,
    /// Lowercased spelling to handle
    lookup: FxHashMap<String, Ident>,
}

impl Table {
    fn push(&mut self, spelling: &str, lower: String) -> Ident {
        let id = Ident(self.names.len() as u32);
        self.names.push(Some(Entry {
            spelling: spelling.to_string(),
            lower: lower.clone(),
        }));
        self.lookup.insert(lower, id);
        id
    }
}

/// Process-wide identifier table.
///
/// The interner is a service object: create one per process, wrap it in an
/// `Arc` and hand it to the compiler, the linker and the root environment.
/// All methods take `&self`, so the table can be read and extended from
/// several tasks at once.
#[derive(Debug, Default)]
pub struct Interner {
    table: RwLock<Table>,
}

impl Interner {
    /// Creates an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `name`, allocating one if needed.
    pub fn intern(&self, name: &str) -> Ident {
        let lower = name.to_lowercase();
        if let Some(id) = self.table.read().lookup.get(&lower) {
            return *id;
        }
        let mut table = self.table.write();
        // another task may have won the race between the two locks
        if let Some(id) = table.lookup.get(&lower) {
            return *id;
        }
        table.push(name, lower)
    }

    /// Looks up `name` without allocating.
    pub fn lookup(&self, name: &str) -> Option<Ident> {
        self.table.read().lookup.get(&name.to_lowercase()).copied()
    }

    /// Returns the spelling stored for `id`.
    pub fn resolve(&self, id: Ident) -> Option<String> {
        self.table
            .read()
            .names
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.spelling.clone())
    }

    /// Like [`resolve`](Self::resolve), but falls back to a placeholder.
    pub fn name(&self, id: Ident) -> String {
        self.resolve(id).unwrap_or_else(|| format!("<unknown {}>", id))
    }

    /// Returns the lowercased spelling stored for `id`.
    pub fn lowercase_at(&self, id: Ident) -> Option<String> {
        self.table
            .read()
            .names
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.lower.clone())
    }

    /// Installs `name` at the free handle `id`.
    ///
    /// Returns false, leaving the table untouched, if the slot is occupied
    /// or the name already owns another handle.
    pub fn adopt_at(&self, name: &str, id: Ident) -> bool {
        let lower = name.to_lowercase();
        let mut table = self.table.write();
        if table.lookup.contains_key(&lower) {
            return false;
        }
        let index = id.index();
        if index < table.names.len() && table.names[index].is_some() {
            return false;
        }
        if index >= table.names.len() {
            table.names.resize(index + 1, None);
        }
        table.names[index] = Some(Entry {
            spelling: name.to_string(),
            lower: lower.clone(),
        });
        table.lookup.insert(lower, id);
        true
    }

    /// Number of handle slots, including gaps.
    pub fn len(&self) -> usize {
        self.table.read().names.len()
    }

    /// Returns true if no name was ever interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current contents into a serializable table.
    pub fn snapshot(&self) -> NameTable {
        let table = self.table.read();
        let entries = table
            .names
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .map(|entry| (Ident(index as u32), entry.spelling.clone()))
            })
            .collect();
        NameTable { entries }
    }

    /// Builds an interner holding exactly the names of `snapshot`.
    pub fn from_snapshot(snapshot: &NameTable) -> Self {
        let interner = Self::new();
        for (id, name) in &snapshot.entries {
            interner.adopt_at(name, *id);
        }
        interner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_case_insensitive() {
        let interner = Interner::new();
        let a = interner.intern("Count");
        let b = interner.intern("count");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a).as_deref(), Some("Count"));
        assert_eq!(interner.lowercase_at(a).as_deref(), Some("count"));
    }

    #[test]
    fn test_intern_allocates_sequentially() {
        let interner = Interner::new();
        assert_eq!(interner.intern("a"), Ident(0));
        assert_eq!(interner.intern("b"), Ident(1));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_adopt_at_leaves_gap() {
        let interner = Interner::new();
        assert!(interner.adopt_at("far", Ident(4)));
        assert_eq!(interner.len(), 5);
        assert_eq!(interner.resolve(Ident(2)), None);
        // next allocation goes after the adopted slot
        assert_eq!(interner.intern("next"), Ident(5));
    }

    #[test]
    fn test_adopt_at_rejects_taken_slot_and_known_name() {
        let interner = Interner::new();
        let x = interner.intern("x");
        assert!(!interner.adopt_at("y", x));
        assert!(!interner.adopt_at("X", Ident(7)));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let interner = Interner::new();
        interner.intern("alpha");
        interner.adopt_at("omega", Ident(3));
        let snapshot = interner.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(Ident(3)), Some("omega"));

        let copy = Interner::from_snapshot(&snapshot);
        assert_eq!(copy.lookup("ALPHA"), Some(Ident(0)));
        assert_eq!(copy.lookup("omega"), Some(Ident(3)));
    }

    #[test]
    fn test_name_placeholder() {
        let interner = Interner::new();
        assert_eq!(interner.name(Ident(9)), "<unknown #9>");
    }
}
