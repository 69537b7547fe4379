//! Identifier dictionary.
//!
//! Every identifier that ends up in a compiled schema (module, node,
//! identity, feature and enum names, units, argument values) is stored
//! once in the [`Dictionary`] and referred to through a [`Name`]. Stored
//! strings are reference counted and never move, so a [`Name`] handed out
//! during a compile that later fails stays valid.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle to a string stored in a [`Dictionary`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct Name(pub u32);

/// A shared, immutable dictionary entry.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ArcStr(Arc<str>);

impl fmt::Display for ArcStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ArcStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl Borrow<str> for ArcStr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for ArcStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Default)]
struct Entries {
    lookup: HashMap<ArcStr, Name>,
    strings: Vec<ArcStr>,
}

/// Thread-safe string dictionary shared by every module of a context.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: Mutex<Entries>,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    /// Store `value` (if not yet stored) and return its handle.
    pub fn insert(&self, value: &str) -> Name {
        let mut entries = self.entries.lock();

        if let Some(&name) = entries.lookup.get(value) {
            return name;
        }

        let stored = ArcStr(Arc::from(value));
        let name = Name(entries.strings.len() as u32);
        entries.strings.push(stored.clone());
        entries.lookup.insert(stored, name);
        name
    }

    /// Look up an already stored string without inserting it.
    pub fn get(&self, value: &str) -> Option<Name> {
        self.entries.lock().lookup.get(value).copied()
    }

    /// The string behind a handle.
    pub fn resolve(&self, name: Name) -> ArcStr {
        self.entries.lock().strings[name.0 as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
