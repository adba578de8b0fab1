//! Method construction: provider enumeration and store promotion.
//!
//! [`construct_method`] implements the slow path of a fetch. It builds every
//! matching implementation into a temporary store, selects the best match
//! there, and promotes the winner into the context's default store and query
//! cache. Construction is idempotent under concurrency: the default store
//! collapses equivalent promotions onto the first one, so racing callers
//! converge on a single record and the losers' temporaries are dropped.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::fetch::MethodAdapter;
use crate::libctx::LibCtx;
use crate::property::PropertyQuery;
use crate::store::{MethodId, MethodStore, StoredMethod};

struct Candidate {
    method_id: MethodId,
    propdef: &'static str,
    priority: i32,
    owner: usize,
    no_store: bool,
    method: StoredMethod,
}

/// Constructs (or re-uses) the best implementation of `A::OPERATION` for
/// `name` under `query`.
///
/// Returns `Ok(None)` when no provider offers a matching implementation;
/// the caller turns that into a not-found error with full context.
///
/// # Errors
///
/// Fails when the query does not parse, or when a provider offers the
/// requested name but its implementation cannot be constructed (an
/// incomplete dispatch table aborts the whole construction).
pub(crate) fn construct_method<A: MethodAdapter>(
    libctx: &Arc<LibCtx>,
    name: &str,
    query_str: &str,
) -> Result<Option<Arc<A::Method>>> {
    let operation = A::OPERATION;
    let query = PropertyQuery::parse(query_str)?;

    let tmp = MethodStore::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for provider in libctx.providers() {
        let Some(list) = provider.query_operation(operation) else {
            continue;
        };
        for algorithm in list.algorithms {
            if !algorithm.has_name(name) {
                continue;
            }
            // A matching name that fails to construct aborts the fetch;
            // an unusable advertised implementation is a provider defect,
            // not a miss.
            let method = A::from_dispatch(
                algorithm.canonical_name(),
                algorithm.implementation,
                &provider,
            )?;
            let name_id = libctx.namemap().intern_names(algorithm.names)?;
            let method_id = MethodId::new(operation, name_id)?;
            let stored: StoredMethod = method;
            let owner = crate::provider::Provider::identity(&provider);
            let stored = tmp.add(
                method_id,
                algorithm.property_definition,
                provider.priority(),
                owner,
                stored,
            )?;
            candidates.push(Candidate {
                method_id,
                propdef: algorithm.property_definition,
                priority: provider.priority(),
                owner,
                no_store: list.no_store,
                method: stored,
            });
        }
    }

    let name_id = libctx.namemap().lookup(name);
    if name_id == 0 {
        return Ok(None);
    }
    let method_id = MethodId::new(operation, name_id)?;

    // The temporary store has no defaults of its own; apply the context's.
    let effective = match libctx.store().global_properties() {
        Some(global) => query.merge_defaults(&global),
        None => query,
    };
    let Some(found) = tmp.fetch(method_id, &effective) else {
        return Ok(None);
    };
    let winner = candidates
        .iter()
        .find(|c| Arc::ptr_eq(&c.method, &found))
        .ok_or_else(|| Error::Configuration("constructed method lost its candidate".into()))?;

    if winner.no_store {
        debug!(
            operation = operation.name(),
            name, "constructed transient method (no-store)"
        );
        return downcast::<A>(found).map(Some);
    }

    let canonical = libctx.store().add(
        winner.method_id,
        winner.propdef,
        winner.priority,
        winner.owner,
        Arc::clone(&found),
    )?;
    libctx
        .store()
        .cache_set(winner.method_id, query_str, Arc::clone(&canonical));
    debug!(
        operation = operation.name(),
        name,
        query = query_str,
        "constructed and promoted method"
    );
    downcast::<A>(canonical).map(Some)
}

/// Recovers the typed method from a stored record. A mismatch would mean
/// two operations shared a method id, which the id packing rules out.
pub(crate) fn downcast<A: MethodAdapter>(method: StoredMethod) -> Result<Arc<A::Method>> {
    method
        .downcast::<A::Method>()
        .map_err(|_| Error::Configuration("method store holds a foreign type for this id".into()))
}
