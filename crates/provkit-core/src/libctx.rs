//! The library context: an isolated runtime instance.
//!
//! A [`LibCtx`] owns the name map, the default method store and the
//! provider registry. All runtime components take the context as an
//! explicit parameter; the only global is the optional process-wide
//! default instance, which is created lazily and can be torn down
//! explicitly.
//!
//! Teardown cascades through ownership: dropping the last reference to a
//! context drops its store, which drops its method records, which release
//! their providers, which run their teardown slots.

use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::info;

use crate::error::{Error, Result};
use crate::namemap::NameMap;
use crate::property::PropertyQuery;
use crate::provider::{CoreHandle, Provider, ProviderInitFn};
use crate::store::MethodStore;

static DEFAULT_CTX: RwLock<Option<Arc<LibCtx>>> = RwLock::new(None);

/// An isolated runtime instance owning stores, names and providers.
pub struct LibCtx {
    /// Weak self-reference, handed to providers at init so that a provider
    /// holding its [`CoreHandle`] cannot keep the context alive.
    self_ref: Weak<LibCtx>,
    namemap: NameMap,
    store: MethodStore,
    providers: RwLock<Vec<Arc<Provider>>>,
    stop_handlers: Mutex<Vec<fn()>>,
}

impl LibCtx {
    /// Creates a fresh, empty library context.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            namemap: NameMap::new(),
            store: MethodStore::new(),
            providers: RwLock::new(Vec::new()),
            stop_handlers: Mutex::new(Vec::new()),
        })
    }

    /// The process-wide default context, created on first use.
    #[must_use]
    pub fn default_ctx() -> Arc<Self> {
        if let Some(ctx) = DEFAULT_CTX.read().unwrap().as_ref() {
            return Arc::clone(ctx);
        }
        let mut slot = DEFAULT_CTX.write().unwrap();
        Arc::clone(slot.get_or_insert_with(Self::new))
    }

    /// Releases the process-wide default context.
    ///
    /// Callers holding their own references keep the instance alive; a
    /// later [`default_ctx`](Self::default_ctx) creates a fresh one.
    pub fn teardown_default() {
        DEFAULT_CTX.write().unwrap().take();
    }

    /// The context's algorithm name map.
    #[must_use]
    pub fn namemap(&self) -> &NameMap {
        &self.namemap
    }

    /// The context's default method store.
    #[must_use]
    pub fn store(&self) -> &MethodStore {
        &self.store
    }

    /// Registers a provider under `name` with the given selection priority.
    ///
    /// The provider's init function runs immediately and receives the
    /// core's side of the ABI.
    ///
    /// # Errors
    ///
    /// Fails when the name is already registered, when init itself fails,
    /// or when the returned dispatch table is incomplete.
    pub fn register_provider(
        &self,
        name: &str,
        priority: i32,
        init: ProviderInitFn,
    ) -> Result<Arc<Provider>> {
        if self.find_provider(name).is_some() {
            return Err(Error::Configuration(format!(
                "provider {name:?} is already registered"
            )));
        }
        let core = CoreHandle::new(self.self_ref.clone(), name);
        let handshake = init(&core)?;
        let provider = Arc::new(Provider::from_init(name, priority, handshake)?);
        self.providers.write().unwrap().push(Arc::clone(&provider));
        info!(provider = name, priority, "provider registered");
        Ok(provider)
    }

    /// Snapshot of the registered providers, in registration order.
    #[must_use]
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.providers.read().unwrap().clone()
    }

    /// Looks up a registered provider by name.
    #[must_use]
    pub fn find_provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers
            .read()
            .unwrap()
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::clone)
    }

    /// Sets the global default property query for this context.
    ///
    /// The default is merged into every fetch query unless the query names
    /// the same atoms; changing it invalidates the query cache.
    ///
    /// # Errors
    ///
    /// Fails when the query string does not parse.
    pub fn set_default_properties(&self, query: &str) -> Result<()> {
        self.store.set_global_properties(query)
    }

    /// The global default property query, if set.
    #[must_use]
    pub fn default_properties(&self) -> Option<PropertyQuery> {
        self.store.global_properties()
    }

    pub(crate) fn push_stop_handler(&self, handler: fn()) {
        self.stop_handlers.lock().unwrap().push(handler);
    }
}

impl Drop for LibCtx {
    fn drop(&mut self) {
        let handlers = std::mem::take(&mut *self.stop_handlers.lock().unwrap());
        for handler in handlers {
            handler();
        }
    }
}
