//! Key management: provider-side key and domain-parameter objects.
//!
//! Keys and domain parameters are created in several ways: imported from a
//! parameter list, generated (a key optionally from previously created
//! domain parameters), or loaded from a binary identity. The objects stay
//! opaque to the core; [`Key`] and [`DomainParams`] pair the provider
//! object with the provider it came from, and the creating method's free
//! slot runs when the pairing is dropped.
//!
//! Domain parameters and keys must not cross providers: generating a key
//! from another provider's parameters is rejected, since the original
//! contract leaves that behavior undefined.

use std::sync::Arc;

use crate::dispatch::{
    self, DispatchEntry, KeyMgmtExportFn, KeyMgmtFreeObjFn, KeyMgmtGenKeyFn, KeyMgmtLoadKeyFn,
    KeyMgmtNewObjFn, KeyMgmtTypesFn, KeyObj, Operation, ProviderFn,
};
use crate::error::{Error, Result};
use crate::fetch::{generic_do_all, generic_fetch, MethodAdapter};
use crate::libctx::LibCtx;
use crate::params::Params;
use crate::provider::Provider;

/// A resolved key management implementation.
pub struct KeyMgmt {
    name: String,
    provider: Arc<Provider>,
    importdomparams: Option<KeyMgmtNewObjFn>,
    gendomparams: Option<KeyMgmtNewObjFn>,
    freedomparams: Option<KeyMgmtFreeObjFn>,
    exportdomparams: Option<KeyMgmtExportFn>,
    importdomparam_types: Option<KeyMgmtTypesFn>,
    exportdomparam_types: Option<KeyMgmtTypesFn>,
    importkey: Option<KeyMgmtNewObjFn>,
    genkey: Option<KeyMgmtGenKeyFn>,
    loadkey: Option<KeyMgmtLoadKeyFn>,
    freekey: Option<KeyMgmtFreeObjFn>,
    exportkey: Option<KeyMgmtExportFn>,
    importkey_types: Option<KeyMgmtTypesFn>,
    exportkey_types: Option<KeyMgmtTypesFn>,
}

impl std::fmt::Debug for KeyMgmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMgmt")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

/// Domain parameters bound to the provider that created them.
///
/// Carries the creating method's free slot, which runs on drop.
pub struct DomainParams {
    provider: Arc<Provider>,
    free: Option<KeyMgmtFreeObjFn>,
    // Only detached when the wrapper drops.
    object: Option<KeyObj>,
}

/// A key bound to the provider that created it.
///
/// Carries the creating method's free slot, which runs on drop.
pub struct Key {
    provider: Arc<Provider>,
    free: Option<KeyMgmtFreeObjFn>,
    // Only detached when the wrapper drops.
    object: Option<KeyObj>,
}

impl DomainParams {
    /// The provider the parameters belong to.
    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub(crate) fn object(&self) -> &KeyObj {
        self.object.as_ref().expect("domain parameters released")
    }
}

impl Drop for DomainParams {
    fn drop(&mut self) {
        if let (Some(object), Some(free)) = (self.object.take(), self.free) {
            free(object);
        }
    }
}

impl Key {
    /// The provider the key belongs to.
    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    pub(crate) fn object(&self) -> &KeyObj {
        self.object.as_ref().expect("key object released")
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        if let (Some(object), Some(free)) = (self.object.take(), self.free) {
            free(object);
        }
    }
}

impl KeyMgmt {
    /// Fetches the best key management implementation for `name` under
    /// `query`.
    ///
    /// # Errors
    ///
    /// See [`generic_fetch`].
    pub fn fetch(libctx: &Arc<LibCtx>, name: &str, query: &str) -> Result<Arc<Self>> {
        generic_fetch::<KeyMgmtAdapter>(libctx, name, query)
    }

    /// Visits every key management implementation across all providers.
    pub fn do_all(libctx: &Arc<LibCtx>, f: impl FnMut(Arc<Self>)) {
        generic_do_all::<KeyMgmtAdapter>(libctx, f);
    }

    /// Canonical algorithm name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider this implementation came from.
    #[must_use]
    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Imports domain parameters from a parameter list.
    ///
    /// # Errors
    ///
    /// [`Error::Incomplete`] without the slot; otherwise as reported by the
    /// implementation.
    pub fn import_domain_params(&self, params: &Params) -> Result<DomainParams> {
        let import = self
            .importdomparams
            .ok_or_else(|| self.incomplete("importdomparams"))?;
        let object = import(self.provider.provctx(), params)?;
        Ok(self.wrap_domain_params(object))
    }

    /// Generates fresh domain parameters.
    ///
    /// # Errors
    ///
    /// [`Error::Incomplete`] without the slot; otherwise as reported by the
    /// implementation.
    pub fn generate_domain_params(&self, params: &Params) -> Result<DomainParams> {
        let generate = self
            .gendomparams
            .ok_or_else(|| self.incomplete("gendomparams"))?;
        let object = generate(self.provider.provctx(), params)?;
        Ok(self.wrap_domain_params(object))
    }

    /// Exports domain parameters into requested parameter slots.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] when the parameters belong to a different
    /// provider; [`Error::Incomplete`] without the slot.
    pub fn export_domain_params(&self, domparams: &DomainParams, out: &mut Params) -> Result<()> {
        self.check_same_provider(&domparams.provider)?;
        let export = self
            .exportdomparams
            .ok_or_else(|| self.incomplete("exportdomparams"))?;
        export(domparams.object(), out)
    }

    /// Imports a key from a parameter list.
    ///
    /// # Errors
    ///
    /// [`Error::Incomplete`] without the slot; otherwise as reported by the
    /// implementation.
    pub fn import_key(&self, params: &Params) -> Result<Key> {
        let import = self.importkey.ok_or_else(|| self.incomplete("importkey"))?;
        let object = import(self.provider.provctx(), params)?;
        Ok(self.wrap_key(object))
    }

    /// Generates a key, optionally from previously created domain
    /// parameters.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] when the domain parameters belong to a
    /// different provider; [`Error::Incomplete`] without the slot.
    pub fn generate_key(&self, domparams: Option<&DomainParams>, params: &Params) -> Result<Key> {
        if let Some(domparams) = domparams {
            self.check_same_provider(&domparams.provider)?;
        }
        let generate = self.genkey.ok_or_else(|| self.incomplete("genkey"))?;
        let object = generate(
            self.provider.provctx(),
            domparams.map(DomainParams::object),
            params,
        )?;
        Ok(self.wrap_key(object))
    }

    /// Loads an internal key from a binary identity.
    ///
    /// # Errors
    ///
    /// [`Error::Incomplete`] without the slot; otherwise as reported by the
    /// implementation.
    pub fn load_key(&self, id: &[u8]) -> Result<Key> {
        let load = self.loadkey.ok_or_else(|| self.incomplete("loadkey"))?;
        let object = load(self.provider.provctx(), id)?;
        Ok(self.wrap_key(object))
    }

    /// Exports a key into requested parameter slots.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] when the key belongs to a different
    /// provider; [`Error::Incomplete`] without the slot.
    pub fn export_key(&self, key: &Key, out: &mut Params) -> Result<()> {
        self.check_same_provider(&key.provider)?;
        let export = self.exportkey.ok_or_else(|| self.incomplete("exportkey"))?;
        export(key.object(), out)
    }

    fn wrap_key(&self, object: KeyObj) -> Key {
        Key {
            provider: Arc::clone(&self.provider),
            free: self.freekey,
            object: Some(object),
        }
    }

    fn wrap_domain_params(&self, object: KeyObj) -> DomainParams {
        DomainParams {
            provider: Arc::clone(&self.provider),
            free: self.freedomparams,
            object: Some(object),
        }
    }

    /// Parameter keys accepted by domain-parameter import.
    #[must_use]
    pub fn importdomparam_types(&self) -> &'static [&'static str] {
        self.importdomparam_types.map_or(&[], |f| f())
    }

    /// Parameter keys produced by domain-parameter export.
    #[must_use]
    pub fn exportdomparam_types(&self) -> &'static [&'static str] {
        self.exportdomparam_types.map_or(&[], |f| f())
    }

    /// Parameter keys accepted by key import.
    #[must_use]
    pub fn importkey_types(&self) -> &'static [&'static str] {
        self.importkey_types.map_or(&[], |f| f())
    }

    /// Parameter keys produced by key export.
    #[must_use]
    pub fn exportkey_types(&self) -> &'static [&'static str] {
        self.exportkey_types.map_or(&[], |f| f())
    }

    fn check_same_provider(&self, other: &Arc<Provider>) -> Result<()> {
        if Arc::ptr_eq(&self.provider, other) {
            Ok(())
        } else {
            Err(Error::ProtocolMisuse(
                "key material from a different provider",
            ))
        }
    }

    fn incomplete(&self, missing: &'static str) -> Error {
        Error::Incomplete {
            operation: Operation::KeyMgmt.name(),
            name: self.name.clone(),
            missing,
        }
    }
}

pub(crate) struct KeyMgmtAdapter;

impl MethodAdapter for KeyMgmtAdapter {
    type Method = KeyMgmt;
    const OPERATION: Operation = Operation::KeyMgmt;

    fn from_dispatch(
        name: &str,
        table: &[DispatchEntry],
        provider: &Arc<Provider>,
    ) -> Result<Arc<KeyMgmt>> {
        let mut km = KeyMgmt {
            name: name.to_owned(),
            provider: Arc::clone(provider),
            importdomparams: None,
            gendomparams: None,
            freedomparams: None,
            exportdomparams: None,
            importdomparam_types: None,
            exportdomparam_types: None,
            importkey: None,
            genkey: None,
            loadkey: None,
            freekey: None,
            exportkey: None,
            importkey_types: None,
            exportkey_types: None,
        };

        for entry in dispatch::entries(table) {
            match (entry.function_id, entry.function) {
                (dispatch::KEYMGMT_IMPORTDOMPARAMS, ProviderFn::KeyMgmtImportDomParams(f)) => {
                    km.importdomparams.get_or_insert(f);
                }
                (dispatch::KEYMGMT_GENDOMPARAMS, ProviderFn::KeyMgmtGenDomParams(f)) => {
                    km.gendomparams.get_or_insert(f);
                }
                (dispatch::KEYMGMT_FREEDOMPARAMS, ProviderFn::KeyMgmtFreeDomParams(f)) => {
                    km.freedomparams.get_or_insert(f);
                }
                (dispatch::KEYMGMT_EXPORTDOMPARAMS, ProviderFn::KeyMgmtExportDomParams(f)) => {
                    km.exportdomparams.get_or_insert(f);
                }
                (
                    dispatch::KEYMGMT_IMPORTDOMPARAM_TYPES,
                    ProviderFn::KeyMgmtImportDomParamTypes(f),
                ) => {
                    km.importdomparam_types.get_or_insert(f);
                }
                (
                    dispatch::KEYMGMT_EXPORTDOMPARAM_TYPES,
                    ProviderFn::KeyMgmtExportDomParamTypes(f),
                ) => {
                    km.exportdomparam_types.get_or_insert(f);
                }
                (dispatch::KEYMGMT_IMPORTKEY, ProviderFn::KeyMgmtImportKey(f)) => {
                    km.importkey.get_or_insert(f);
                }
                (dispatch::KEYMGMT_GENKEY, ProviderFn::KeyMgmtGenKey(f)) => {
                    km.genkey.get_or_insert(f);
                }
                (dispatch::KEYMGMT_LOADKEY, ProviderFn::KeyMgmtLoadKey(f)) => {
                    km.loadkey.get_or_insert(f);
                }
                (dispatch::KEYMGMT_FREEKEY, ProviderFn::KeyMgmtFreeKey(f)) => {
                    km.freekey.get_or_insert(f);
                }
                (dispatch::KEYMGMT_EXPORTKEY, ProviderFn::KeyMgmtExportKey(f)) => {
                    km.exportkey.get_or_insert(f);
                }
                (dispatch::KEYMGMT_IMPORTKEY_TYPES, ProviderFn::KeyMgmtImportKeyTypes(f)) => {
                    km.importkey_types.get_or_insert(f);
                }
                (dispatch::KEYMGMT_EXPORTKEY_TYPES, ProviderFn::KeyMgmtExportKeyTypes(f)) => {
                    km.exportkey_types.get_or_insert(f);
                }
                _ => {}
            }
        }

        // There must be at least one way to come by a key.
        if km.importkey.is_none() && km.genkey.is_none() && km.loadkey.is_none() {
            return Err(Error::Incomplete {
                operation: Operation::KeyMgmt.name(),
                name: name.to_owned(),
                missing: "an importkey, genkey or loadkey slot",
            });
        }

        Ok(Arc::new(km))
    }
}
