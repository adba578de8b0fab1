//! Providers: the modules that supply algorithm implementations.
//!
//! A provider is registered with an init function. At init the core hands
//! the provider a [`CoreHandle`] (the typed form of the core's dispatch
//! table: parameter access, error reporting, the library-context accessor
//! and the thread-stop hook) and receives back the provider context plus
//! the provider's own dispatch table, from which [`Provider`] decodes the
//! `query_operation`, `teardown`, parameter and reason-string slots.
//!
//! The runtime holds providers behind `Arc`; every method record keeps a
//! strong back-reference to its provider, so a provider outlives all
//! methods constructed from it. Teardown runs when the last reference goes
//! away; teardown failures are logged and swallowed.

use std::sync::{Arc, Weak};

use tracing::{debug, error, warn};

use crate::dispatch::{
    self, DispatchEntry, Operation, ProvCtx, ProviderFn, ProviderGetParamsFn,
    ProviderParamTypesFn, ProviderQueryOperationFn, ProviderReasonStringsFn, ProviderTeardownFn,
};
use crate::error::{Error, Result};
use crate::libctx::LibCtx;
use crate::params::{keys, Params};

/// One algorithm as advertised by a provider.
///
/// `names` is a colon-separated alias list with the canonical name first.
#[derive(Debug, Clone, Copy)]
pub struct Algorithm {
    /// Colon-separated algorithm names, canonical first.
    pub names: &'static str,
    /// Property definition string for this implementation.
    pub property_definition: &'static str,
    /// The implementation's dispatch table.
    pub implementation: &'static [DispatchEntry],
}

impl Algorithm {
    /// The canonical (first) name of the alias list.
    #[must_use]
    pub fn canonical_name(&self) -> &'static str {
        self.names
            .split(crate::namemap::ALIAS_SEPARATOR)
            .next()
            .unwrap_or(self.names)
    }

    /// True when `name` equals any of the algorithm's names, ASCII
    /// case-insensitively.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .split(crate::namemap::ALIAS_SEPARATOR)
            .any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Result of a provider's `query_operation`.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmList {
    /// The algorithms the provider offers for the queried operation.
    pub algorithms: &'static [Algorithm],
    /// When set, constructed methods must not be promoted into the default
    /// store or the query cache; every fetch constructs afresh.
    pub no_store: bool,
}

/// The core's side of the provider ABI, passed to `provider_init`.
///
/// Holds the owning library context weakly: a provider keeping its
/// `CoreHandle` must not keep the context alive.
pub struct CoreHandle {
    libctx: Weak<LibCtx>,
    provider_name: String,
}

impl CoreHandle {
    pub(crate) fn new(libctx: Weak<LibCtx>, provider_name: &str) -> Self {
        Self {
            libctx,
            provider_name: provider_name.to_owned(),
        }
    }

    /// The library context the provider is being loaded into, unless it is
    /// already being torn down.
    #[must_use]
    pub fn libctx(&self) -> Option<Arc<LibCtx>> {
        self.libctx.upgrade()
    }

    /// Fills requested core parameters: the provider's registered name and
    /// the core version. Unknown keys are skipped.
    pub fn get_params(&self, params: &mut Params) {
        params.set_utf8(keys::PROV_NAME, &self.provider_name);
        params.set_utf8(keys::CORE_VERSION, env!("CARGO_PKG_VERSION"));
    }

    /// Records an error report from the provider.
    pub fn put_error(&self, reason: u32, message: &str) {
        error!(
            provider = %self.provider_name,
            reason,
            message,
            "provider error report"
        );
    }

    /// Registers a handler to run when the library context is torn down
    /// (the thread-start hook of the ABI). Returns false when the context
    /// is already gone.
    pub fn register_stop_handler(&self, handler: fn()) -> bool {
        match self.libctx.upgrade() {
            Some(ctx) => {
                ctx.push_stop_handler(handler);
                true
            }
            None => false,
        }
    }
}

/// What `provider_init` returns to the core.
pub struct ProviderInit {
    /// Opaque provider context, handed back on every provider call.
    pub provctx: ProvCtx,
    /// The provider's dispatch table.
    pub dispatch: Vec<DispatchEntry>,
}

/// A provider's init entry point.
pub type ProviderInitFn = fn(&CoreHandle) -> Result<ProviderInit>;

/// A registered provider.
pub struct Provider {
    name: String,
    priority: i32,
    provctx: ProvCtx,
    teardown: Option<ProviderTeardownFn>,
    param_types: Option<ProviderParamTypesFn>,
    get_params: Option<ProviderGetParamsFn>,
    query_operation: ProviderQueryOperationFn,
    reason_strings: Option<ProviderReasonStringsFn>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Decodes a provider from the result of its init function.
    ///
    /// # Errors
    ///
    /// The dispatch table must at least advertise `query_operation`;
    /// anything less is an incomplete provider.
    pub(crate) fn from_init(name: &str, priority: i32, init: ProviderInit) -> Result<Self> {
        let mut teardown = None;
        let mut param_types = None;
        let mut get_params = None;
        let mut query_operation = None;
        let mut reason_strings = None;

        for entry in dispatch::entries(&init.dispatch) {
            match (entry.function_id, entry.function) {
                (dispatch::PROVIDER_TEARDOWN, ProviderFn::ProviderTeardown(f)) => {
                    teardown.get_or_insert(f);
                }
                (dispatch::PROVIDER_GET_PARAM_TYPES, ProviderFn::ProviderParamTypes(f)) => {
                    param_types.get_or_insert(f);
                }
                (dispatch::PROVIDER_GET_PARAMS, ProviderFn::ProviderGetParams(f)) => {
                    get_params.get_or_insert(f);
                }
                (dispatch::PROVIDER_QUERY_OPERATION, ProviderFn::ProviderQueryOperation(f)) => {
                    query_operation.get_or_insert(f);
                }
                (dispatch::PROVIDER_GET_REASON_STRINGS, ProviderFn::ProviderReasonStrings(f)) => {
                    reason_strings.get_or_insert(f);
                }
                // Unknown ids and mismatched slots are ignored for forward
                // compatibility.
                _ => {}
            }
        }

        let Some(query_operation) = query_operation else {
            return Err(Error::Incomplete {
                operation: "provider",
                name: name.to_owned(),
                missing: "query_operation",
            });
        };

        Ok(Self {
            name: name.to_owned(),
            priority,
            provctx: init.provctx,
            teardown,
            param_types,
            get_params,
            query_operation,
            reason_strings,
        })
    }

    /// The provider's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider's priority, used to break selection ties.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// The opaque provider context.
    #[must_use]
    pub fn provctx(&self) -> &ProvCtx {
        &self.provctx
    }

    /// Stable identity of a provider instance while it is alive, used to
    /// collapse concurrent store promotions.
    #[must_use]
    pub(crate) fn identity(this: &Arc<Self>) -> usize {
        Arc::as_ptr(this) as usize
    }

    /// Asks the provider for its algorithm table for `operation`.
    #[must_use]
    pub fn query_operation(&self, operation: Operation) -> Option<AlgorithmList> {
        (self.query_operation)(&self.provctx, operation)
    }

    /// The parameter keys the provider can report.
    #[must_use]
    pub fn param_types(&self) -> &'static [&'static str] {
        self.param_types.map_or(&[], |f| f(&self.provctx))
    }

    /// Fills requested provider parameters. A provider without the slot
    /// leaves every slot untouched.
    ///
    /// # Errors
    ///
    /// Propagates the provider's failure, if any.
    pub fn get_params(&self, params: &mut Params) -> Result<()> {
        match self.get_params {
            Some(f) => f(&self.provctx, params),
            None => Ok(()),
        }
    }

    /// Resolves a provider reason code to its string, if the provider
    /// publishes reason strings.
    #[must_use]
    pub fn reason_string(&self, reason: u32) -> Option<&'static str> {
        let table = self.reason_strings?();
        table
            .iter()
            .find(|(code, _)| *code == reason)
            .map(|(_, text)| *text)
    }

    /// Builds the error for a provider-reported failure, resolving the
    /// reason string when available.
    #[must_use]
    pub fn failure(&self, reason: u32) -> Error {
        let message = self
            .reason_string(reason)
            .unwrap_or("unknown reason")
            .to_owned();
        Error::Provider {
            provider: self.name.clone(),
            reason,
            message,
        }
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown {
            debug!(provider = %self.name, "running provider teardown");
            if let Err(err) = teardown(&self.provctx) {
                // Teardown must not abort; report and carry on.
                warn!(provider = %self.name, error = %err, "provider teardown failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    fn no_algorithms(_: &ProvCtx, _: Operation) -> Option<AlgorithmList> {
        None
    }

    /// A provider with an empty algorithm table, for adapter-level tests.
    pub(crate) fn bare_provider(name: &str) -> Arc<Provider> {
        Arc::new(
            Provider::from_init(
                name,
                0,
                ProviderInit {
                    provctx: Arc::new(()),
                    dispatch: vec![DispatchEntry::new(
                        dispatch::PROVIDER_QUERY_OPERATION,
                        ProviderFn::ProviderQueryOperation(no_algorithms),
                    )],
                },
            )
            .unwrap(),
        )
    }
}
