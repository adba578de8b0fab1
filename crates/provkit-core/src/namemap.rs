//! Algorithm name interning.
//!
//! Maps algorithm names (case-insensitive under ASCII folding) to dense
//! numeric ids. Aliases share the id of their canonical name; iteration
//! yields canonical names only. The map is append-only and ids are never
//! reused, so an id stays valid for the lifetime of its library context.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Largest assignable name id; the id must fit in 24 bits so that it can be
/// packed into a method id next to an 8-bit operation id.
pub const MAX_NAME_ID: u32 = (1 << 24) - 1;

/// Separator between aliases in a provider's algorithm name string. The
/// canonical name comes first.
pub const ALIAS_SEPARATOR: char = ':';

#[derive(Default)]
struct Inner {
    /// Folded name -> id.
    ids: HashMap<String, u32>,
    /// Canonical name per id; index `id - 1`.
    canonical: Vec<String>,
}

/// Append-only map from algorithm names to numeric ids.
///
/// `intern` is linearizable: two concurrent interns of names that fold to
/// the same string observe the same id.
#[derive(Default)]
pub struct NameMap {
    inner: RwLock<Inner>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl NameMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, assigning a fresh one on first sight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty name and
    /// [`Error::Exhausted`] once all 2^24 - 1 ids are in use.
    pub fn intern(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(Error::Configuration("empty algorithm name".into()));
        }
        let folded = fold(name);
        {
            let inner = self.inner.read().unwrap();
            if let Some(&id) = inner.ids.get(&folded) {
                return Ok(id);
            }
        }
        let mut inner = self.inner.write().unwrap();
        // Double check under the write lock; a concurrent intern may have
        // won the race between the two lock acquisitions.
        if let Some(&id) = inner.ids.get(&folded) {
            return Ok(id);
        }
        let next = inner.canonical.len() as u64 + 1;
        if next > u64::from(MAX_NAME_ID) {
            return Err(Error::Exhausted("algorithm name ids"));
        }
        let next = next as u32;
        inner.canonical.push(name.to_owned());
        inner.ids.insert(folded, next);
        Ok(next)
    }

    /// Interns a colon-separated alias list (canonical name first) and
    /// returns the shared id.
    ///
    /// All names in the list end up with a single id. If some of the names
    /// are already known they must all agree on one id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the list is empty or when two
    /// of its names are already mapped to different ids.
    pub fn intern_names(&self, names: &str) -> Result<u32> {
        let mut parts = names.split(ALIAS_SEPARATOR).filter(|s| !s.is_empty());
        let canonical = parts
            .next()
            .ok_or_else(|| Error::Configuration("empty algorithm name list".into()))?;
        let id = self.intern(canonical)?;
        for alias in parts {
            self.add_alias(id, alias)?;
        }
        Ok(id)
    }

    /// Registers `alias` as another name for an existing id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the id is unknown or the alias
    /// already maps to a different id.
    pub fn add_alias(&self, id: u32, alias: &str) -> Result<()> {
        if alias.is_empty() {
            return Err(Error::Configuration("empty algorithm alias".into()));
        }
        let folded = fold(alias);
        let mut inner = self.inner.write().unwrap();
        if id == 0 || id as usize > inner.canonical.len() {
            return Err(Error::Configuration(format!("unknown name id {id}")));
        }
        match inner.ids.get(&folded) {
            Some(&existing) if existing == id => Ok(()),
            Some(&existing) => Err(Error::Configuration(format!(
                "alias {alias:?} already maps to id {existing}, not {id}"
            ))),
            None => {
                inner.ids.insert(folded, id);
                Ok(())
            }
        }
    }

    /// Looks up a name (or alias). Zero means unknown.
    #[must_use]
    pub fn lookup(&self, name: &str) -> u32 {
        let inner = self.inner.read().unwrap();
        inner.ids.get(&fold(name)).copied().unwrap_or(0)
    }

    /// Returns the canonical name for an id, if assigned.
    #[must_use]
    pub fn name(&self, id: u32) -> Option<String> {
        let inner = self.inner.read().unwrap();
        id.checked_sub(1)
            .and_then(|i| inner.canonical.get(i as usize))
            .cloned()
    }

    /// Calls `f` with every `(id, canonical name)` pair, in id order.
    ///
    /// The map is read-locked for the duration; `f` must not call back into
    /// this map's mutating operations.
    pub fn for_each<F: FnMut(u32, &str)>(&self, mut f: F) {
        let inner = self.inner.read().unwrap();
        for (i, name) in inner.canonical.iter().enumerate() {
            f(i as u32 + 1, name);
        }
    }

    /// Number of assigned ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().canonical.len()
    }

    /// True when no names have been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
