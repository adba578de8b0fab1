//! Generic method fetch and enumeration.
//!
//! [`generic_fetch`] is the public entry point behind every typed fetch
//! (`Digest::fetch`, `KeyExch::fetch`, ...): probe the query cache, fall
//! back to [construction](crate::construct), and hand out a reference to
//! the resolved record. [`generic_do_all`] visits every algorithm of an
//! operation across all providers with a transient record per (provider,
//! algorithm) pair.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::construct::{construct_method, downcast};
use crate::dispatch::{DispatchEntry, Operation};
use crate::error::{Error, Result};
use crate::libctx::LibCtx;
use crate::provider::Provider;
use crate::store::MethodId;

/// Builds a typed method record from a provider's dispatch table.
///
/// One adapter exists per operation kind; it owns the operation's
/// completeness rule and the decoding of function ids into typed slots.
pub trait MethodAdapter {
    /// The method record this adapter produces.
    type Method: Send + Sync + 'static;

    /// The operation the adapter belongs to.
    const OPERATION: Operation;

    /// Decodes a dispatch table into a method record.
    ///
    /// # Errors
    ///
    /// Fails when the table does not satisfy the operation's completeness
    /// rule.
    fn from_dispatch(
        name: &str,
        dispatch: &[DispatchEntry],
        provider: &Arc<Provider>,
    ) -> Result<Arc<Self::Method>>;
}

/// Fetches the best implementation of `A::OPERATION` named `name` under the
/// property query `query`.
///
/// The returned record carries its own reference. Two fetches with equal
/// arguments resolve to the same underlying record.
///
/// # Errors
///
/// [`Error::NotFound`] when nothing matches; [`Error::Property`] for a
/// malformed query; construction errors surface as reported by the
/// provider's adapter.
pub fn generic_fetch<A: MethodAdapter>(
    libctx: &Arc<LibCtx>,
    name: &str,
    query: &str,
) -> Result<Arc<A::Method>> {
    let operation = A::OPERATION;

    let name_id = libctx.namemap().lookup(name);
    if name_id != 0 {
        let method_id = MethodId::new(operation, name_id)?;
        if let Some(method) = libctx.store().cache_get(method_id, query) {
            trace!(
                operation = operation.name(),
                name,
                query,
                "fetch served from query cache"
            );
            return downcast::<A>(method);
        }
    }

    match construct_method::<A>(libctx, name, query)? {
        Some(method) => Ok(method),
        None => {
            debug!(operation = operation.name(), name, query, "fetch miss");
            Err(Error::NotFound {
                operation: operation.name(),
                name: name.to_owned(),
                query: query.to_owned(),
            })
        }
    }
}

/// Calls `f` once for every (provider, algorithm) pair registered for
/// `A::OPERATION`, with a transient method record that is released after
/// the callback. Iteration order is unspecified and pairs are not
/// deduplicated across providers.
pub fn generic_do_all<A: MethodAdapter>(libctx: &Arc<LibCtx>, mut f: impl FnMut(Arc<A::Method>)) {
    for provider in libctx.providers() {
        let Some(list) = provider.query_operation(A::OPERATION) else {
            continue;
        };
        for algorithm in list.algorithms {
            match A::from_dispatch(algorithm.canonical_name(), algorithm.implementation, &provider)
            {
                Ok(method) => f(method),
                Err(err) => {
                    // Unlike a targeted fetch, enumeration skips over
                    // implementations that fail to construct.
                    debug!(
                        provider = provider.name(),
                        algorithm = algorithm.canonical_name(),
                        error = %err,
                        "skipping algorithm during enumeration"
                    );
                }
            }
        }
    }
}
