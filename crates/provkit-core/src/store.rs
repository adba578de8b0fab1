//! The method store: per-library-context registry of constructed methods.
//!
//! Methods are keyed by [`MethodId`], the packed (name id, operation id)
//! pair. Each key holds an ordered list of candidates, every candidate
//! carrying the property definition it was registered under. [`fetch`]
//! applies the property matcher and returns the best candidate; a secondary
//! query cache keyed by `(method id, query string)` short-circuits repeat
//! fetches until the global default properties change.
//!
//! The store owns one reference per inserted method and every handout is an
//! additional reference; the method's own `Drop` acts as its destructor once
//! the last reference is gone.
//!
//! [`fetch`]: MethodStore::fetch

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::dispatch::Operation;
use crate::error::{Error, Result};
use crate::namemap::MAX_NAME_ID;
use crate::property::{PropertyDef, PropertyQuery};

/// A type-erased, reference-counted method record.
pub type StoredMethod = Arc<dyn Any + Send + Sync>;

/// Packed method identity: 24 bits of name id over 8 bits of operation id.
///
/// Both operands are nonzero, so a method id is never zero and is unique
/// per (operation, name) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(u32);

impl MethodId {
    /// Packs an operation and a name id.
    ///
    /// # Errors
    ///
    /// A zero or out-of-range name id is a programming error upstream and
    /// is reported as [`Error::Configuration`].
    pub fn new(operation: Operation, name_id: u32) -> Result<Self> {
        if name_id == 0 || name_id > MAX_NAME_ID {
            return Err(Error::Configuration(format!(
                "name id {name_id} out of range"
            )));
        }
        Ok(Self((name_id << 8) | u32::from(operation.id())))
    }

    /// The operation half of the id.
    #[must_use]
    pub fn operation(self) -> Option<Operation> {
        Operation::from_id((self.0 & 0xff) as u8)
    }

    /// The name-id half of the id.
    #[must_use]
    pub fn name_id(self) -> u32 {
        self.0 >> 8
    }

    /// The raw packed value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

struct StoreEntry {
    /// Parsed definition the candidate was registered under.
    def: PropertyDef,
    /// Raw definition string, for duplicate detection.
    def_str: String,
    /// Identity of the registering party (provider address); used with
    /// `def_str` to make concurrent promotions collapse onto one entry.
    owner: usize,
    /// Provider priority, the first tie-breaker after the match score.
    priority: i32,
    method: StoredMethod,
}

/// Registry of methods for one library context.
#[derive(Default)]
pub struct MethodStore {
    buckets: RwLock<HashMap<MethodId, Vec<StoreEntry>>>,
    cache: RwLock<HashMap<(MethodId, String), StoredMethod>>,
    global: RwLock<Option<PropertyQuery>>,
}

impl MethodStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method under `id` with the given property definition.
    ///
    /// Returns the canonical record for this registration: normally the
    /// method just passed in, but when an equivalent entry (same owner, same
    /// definition) already exists the existing record is returned instead
    /// and the new one is dropped. The first successful insertion wins;
    /// concurrent constructors of the same method converge on one record.
    ///
    /// # Errors
    ///
    /// Fails when the property definition does not parse.
    pub fn add(
        &self,
        id: MethodId,
        propdef: &str,
        priority: i32,
        owner: usize,
        method: StoredMethod,
    ) -> Result<StoredMethod> {
        let def = PropertyDef::parse(propdef)?;
        let mut buckets = self.buckets.write().unwrap();
        let entries = buckets.entry(id).or_default();
        if let Some(existing) = entries
            .iter()
            .find(|e| e.owner == owner && e.def_str == propdef)
        {
            return Ok(Arc::clone(&existing.method));
        }
        debug!(
            method_id = id.as_u32(),
            propdef, priority, "method store insert"
        );
        entries.push(StoreEntry {
            def,
            def_str: propdef.to_owned(),
            owner,
            priority,
            method: Arc::clone(&method),
        });
        Ok(method)
    }

    /// Removes a specific method record from `id`'s candidate list and
    /// purges any cache slots holding it.
    ///
    /// Returns true when a record was removed.
    pub fn remove(&self, id: MethodId, method: &StoredMethod) -> bool {
        let mut buckets = self.buckets.write().unwrap();
        let Some(entries) = buckets.get_mut(&id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !Arc::ptr_eq(&e.method, method));
        let removed = entries.len() != before;
        if entries.is_empty() {
            buckets.remove(&id);
        }
        drop(buckets);
        if removed {
            let mut cache = self.cache.write().unwrap();
            cache.retain(|_, m| !Arc::ptr_eq(m, method));
        }
        removed
    }

    /// Selects the best candidate for `id` under `query` plus the global
    /// default properties.
    ///
    /// Candidates are ranked by match score, then provider priority, then
    /// insertion order. The returned record carries its own reference.
    #[must_use]
    pub fn fetch(&self, id: MethodId, query: &PropertyQuery) -> Option<StoredMethod> {
        let effective = match self.global.read().unwrap().as_ref() {
            Some(global) => query.merge_defaults(global),
            None => query.clone(),
        };
        let buckets = self.buckets.read().unwrap();
        let entries = buckets.get(&id)?;
        let mut best: Option<(usize, i32, usize)> = None;
        for (index, entry) in entries.iter().enumerate() {
            let Some(score) = entry.def.satisfies(&effective) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_score, best_priority, _)) => {
                    score > best_score || (score == best_score && entry.priority > best_priority)
                }
            };
            if better {
                best = Some((score, entry.priority, index));
            }
        }
        best.map(|(_, _, index)| Arc::clone(&entries[index].method))
    }

    /// Looks up the query cache.
    #[must_use]
    pub fn cache_get(&self, id: MethodId, query: &str) -> Option<StoredMethod> {
        let cache = self.cache.read().unwrap();
        cache.get(&(id, query.to_owned())).map(Arc::clone)
    }

    /// Populates the query cache. Advisory; later global-property changes
    /// evict the whole cache.
    pub fn cache_set(&self, id: MethodId, query: &str, method: StoredMethod) {
        let mut cache = self.cache.write().unwrap();
        cache.insert((id, query.to_owned()), method);
    }

    /// Replaces the global default property query and invalidates the query
    /// cache, which was built against the previous defaults.
    ///
    /// # Errors
    ///
    /// Fails when the query string does not parse; the previous defaults
    /// stay in effect.
    pub fn set_global_properties(&self, query: &str) -> Result<()> {
        let parsed = PropertyQuery::parse(query)?;
        let mut global = self.global.write().unwrap();
        *global = Some(parsed);
        drop(global);
        debug!(query, "global default properties changed, flushing cache");
        self.flush_cache();
        Ok(())
    }

    /// The current global default property query, if one was set.
    #[must_use]
    pub fn global_properties(&self) -> Option<PropertyQuery> {
        self.global.read().unwrap().clone()
    }

    /// Drops every query-cache slot.
    pub fn flush_cache(&self) {
        self.cache.write().unwrap().clear();
    }

    /// Calls `f` for every stored method of the given operation.
    ///
    /// The candidate lists are snapshotted first, so `f` may call back into
    /// the store.
    pub fn for_each<F: FnMut(MethodId, &StoredMethod)>(&self, operation: Operation, mut f: F) {
        let snapshot: Vec<(MethodId, StoredMethod)> = {
            let buckets = self.buckets.read().unwrap();
            buckets
                .iter()
                .filter(|(id, _)| id.operation() == Some(operation))
                .flat_map(|(id, entries)| {
                    entries.iter().map(|e| (*id, Arc::clone(&e.method)))
                })
                .collect()
        };
        for (id, method) in &snapshot {
            f(*id, method);
        }
    }
}
