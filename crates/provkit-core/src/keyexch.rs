//! Key exchange: shared-secret derivation contexts.
//!
//! A complete key exchange dispatch table carries `newctx`, `init`,
//! `derive` and `freectx`; `set_peer`, `dupctx` and `set_params` are
//! optional. Key exchange cannot work without keys, so
//! [`KeyExch::fetch`] also fetches the same-name key management method and
//! requires it to come from the same provider.
//!
//! The derive contract: probing with [`KeyExchContext::derive_size`]
//! reports the exact secret size without writing; deriving into a buffer
//! shorter than required fails; deriving before both the local key and the
//! peer key are bound is protocol misuse.

use std::sync::{Arc, OnceLock};

use crate::dispatch::{
    self, DispatchEntry, KeyExchBindKeyFn, KeyExchDeriveFn, KeyExchDupCtxFn, KeyExchFreeCtxFn,
    KeyExchNewCtxFn, KeyExchSetParamsFn, OpCtx, Operation, ProviderFn,
};
use crate::error::{Error, Result};
use crate::fetch::{generic_do_all, generic_fetch, MethodAdapter};
use crate::keymgmt::{Key, KeyMgmt};
use crate::libctx::LibCtx;
use crate::params::Params;
use crate::provider::Provider;

/// A resolved key exchange implementation.
pub struct KeyExch {
    name: String,
    provider: Arc<Provider>,
    newctx: KeyExchNewCtxFn,
    init: KeyExchBindKeyFn,
    derive: KeyExchDeriveFn,
    set_peer: Option<KeyExchBindKeyFn>,
    freectx: KeyExchFreeCtxFn,
    dupctx: Option<KeyExchDupCtxFn>,
    set_params: Option<KeyExchSetParamsFn>,
    /// Attached on first fetch; the key management method of the same name
    /// from the same provider.
    keymgmt: OnceLock<Arc<KeyMgmt>>,
}

impl std::fmt::Debug for KeyExch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExch")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl KeyExch {
    /// Fetches the best key exchange implementation for `name` under
    /// `query` and attaches its key management counterpart.
    ///
    /// # Errors
    ///
    /// Besides the usual fetch errors, fails when no key management method
    /// of the same name exists in the same provider.
    pub fn fetch(libctx: &Arc<LibCtx>, name: &str, query: &str) -> Result<Arc<Self>> {
        let exchange = generic_fetch::<KeyExchAdapter>(libctx, name, query)?;
        if exchange.keymgmt.get().is_none() {
            let keymgmt = KeyMgmt::fetch(libctx, name, query)?;
            if !Arc::ptr_eq(keymgmt.provider(), &exchange.provider) {
                return Err(Error::NotFound {
                    operation: Operation::KeyMgmt.name(),
                    name: name.to_owned(),
                    query: query.to_owned(),
                });
            }
            // A concurrent fetch may have attached it already; both
            // attachments are equivalent.
            let _ = exchange.keymgmt.set(keymgmt);
        }
        Ok(exchange)
    }

    /// Visits every key exchange implementation across all providers.
    ///
    /// Enumeration hands out bare records; no key management method is
    /// attached.
    pub fn do_all(libctx: &Arc<LibCtx>, f: impl FnMut(Arc<Self>)) {
        generic_do_all::<KeyExchAdapter>(libctx, f);
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

    /// The attached key management method, present after a fetch.
    #[must_use]
    pub fn keymgmt(&self) -> Option<&Arc<KeyMgmt>> {
        self.keymgmt.get()
    }

    fn incomplete(&self, missing: &'static str) -> Error {
        Error::Incomplete {
            operation: Operation::KeyExch.name(),
            name: self.name.clone(),
            missing,
        }
    }
}

pub(crate) struct KeyExchAdapter;

impl MethodAdapter for KeyExchAdapter {
    type Method = KeyExch;
    const OPERATION: Operation = Operation::KeyExch;

    fn from_dispatch(
        name: &str,
        table: &[DispatchEntry],
        provider: &Arc<Provider>,
    ) -> Result<Arc<KeyExch>> {
        let mut newctx = None;
        let mut init = None;
        let mut derive = None;
        let mut set_peer = None;
        let mut freectx = None;
        let mut dupctx = None;
        let mut set_params = None;

        for entry in dispatch::entries(table) {
            match (entry.function_id, entry.function) {
                (dispatch::KEYEXCH_NEWCTX, ProviderFn::KeyExchNewCtx(f)) => {
                    newctx.get_or_insert(f);
                }
                (dispatch::KEYEXCH_INIT, ProviderFn::KeyExchInit(f)) => {
                    init.get_or_insert(f);
                }
                (dispatch::KEYEXCH_DERIVE, ProviderFn::KeyExchDerive(f)) => {
                    derive.get_or_insert(f);
                }
                (dispatch::KEYEXCH_SET_PEER, ProviderFn::KeyExchSetPeer(f)) => {
                    set_peer.get_or_insert(f);
                }
                (dispatch::KEYEXCH_FREECTX, ProviderFn::KeyExchFreeCtx(f)) => {
                    freectx.get_or_insert(f);
                }
                (dispatch::KEYEXCH_DUPCTX, ProviderFn::KeyExchDupCtx(f)) => {
                    dupctx.get_or_insert(f);
                }
                (dispatch::KEYEXCH_SET_PARAMS, ProviderFn::KeyExchSetParams(f)) => {
                    set_params.get_or_insert(f);
                }
                _ => {}
            }
        }

        // The consistent minimum is newctx, init, derive and freectx;
        // everything else is optional.
        let incomplete = |missing| Error::Incomplete {
            operation: Operation::KeyExch.name(),
            name: name.to_owned(),
            missing,
        };
        let Some(newctx) = newctx else {
            return Err(incomplete("newctx"));
        };
        let Some(init) = init else {
            return Err(incomplete("init"));
        };
        let Some(derive) = derive else {
            return Err(incomplete("derive"));
        };
        let Some(freectx) = freectx else {
            return Err(incomplete("freectx"));
        };

        Ok(Arc::new(KeyExch {
            name: name.to_owned(),
            provider: Arc::clone(provider),
            newctx,
            init,
            derive,
            set_peer,
            freectx,
            dupctx,
            set_params,
            keymgmt: OnceLock::new(),
        }))
    }
}

/// The per-operation key exchange context.
#[derive(Default)]
pub struct KeyExchContext {
    method: Option<Arc<KeyExch>>,
    state: Option<OpCtx>,
    have_key: bool,
    have_peer: bool,
}

impl KeyExchContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound implementation, if any.
    #[must_use]
    pub fn method(&self) -> Option<&Arc<KeyExch>> {
        self.method.as_ref()
    }

    /// Binds `exchange` and the local key.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] when the key belongs to a different
    /// provider; otherwise as reported by the implementation.
    pub fn init(&mut self, exchange: &Arc<KeyExch>, key: &Key) -> Result<()> {
        Self::check_same_provider(exchange, key)?;
        self.release_state();
        self.method = Some(Arc::clone(exchange));
        self.have_key = false;
        self.have_peer = false;

        let mut state = (exchange.newctx)(exchange.provider.provctx())?;
        (exchange.init)(state.as_mut(), key.object())?;
        self.state = Some(state);
        self.have_key = true;
        Ok(())
    }

    /// Binds the peer key.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] before [`init`](Self::init) or for a key
    /// from a different provider; [`Error::Incomplete`] when the
    /// implementation has no `set_peer` slot.
    pub fn set_peer(&mut self, peer: &Key) -> Result<()> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
            return Err(Error::ProtocolMisuse("set_peer before init"));
        };
        Self::check_same_provider(method, peer)?;
        let set_peer = method
            .set_peer
            .ok_or_else(|| method.incomplete("set_peer"))?;
        set_peer(state.as_mut(), peer.object())?;
        self.have_peer = true;
        Ok(())
    }

    /// Reports the exact shared-secret size without writing anything.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] unless both keys are bound.
    pub fn derive_size(&mut self) -> Result<usize> {
        self.derive_inner(None)
    }

    /// Derives the shared secret into `out`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] unless both keys are bound, or when `out`
    /// is shorter than the secret requires.
    pub fn derive(&mut self, out: &mut [u8]) -> Result<usize> {
        self.derive_inner(Some(out))
    }

    fn derive_inner(&mut self, out: Option<&mut [u8]>) -> Result<usize> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
            return Err(Error::ProtocolMisuse("derive before init"));
        };
        if !(self.have_key && self.have_peer) {
            return Err(Error::ProtocolMisuse("derive before init and set_peer"));
        }
        (method.derive)(state.as_mut(), out)
    }

    /// Passes parameters to the live context (for DH, the `pad` toggle);
    /// reconfigurable at any point between init and derive.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] before init; [`Error::Incomplete`] when
    /// the implementation has no `set_params` slot.
    pub fn set_params(&mut self, params: &Params) -> Result<()> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
            return Err(Error::ProtocolMisuse("keyexch set_params before init"));
        };
        let set = method
            .set_params
            .ok_or_else(|| method.incomplete("set_params"))?;
        set(state.as_mut(), params)
    }

    /// Duplicates the context, including bound keys and parameters.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] on an unbound context and
    /// [`Error::Incomplete`] when the implementation lacks `dupctx`.
    pub fn try_clone(&self) -> Result<Self> {
        let Some(method) = self.method.as_ref() else {
            return Err(Error::ProtocolMisuse(
                "duplicating an unbound keyexch context",
            ));
        };
        let state = match self.state.as_ref() {
            Some(state) => {
                let dup = method.dupctx.ok_or_else(|| method.incomplete("dupctx"))?;
                Some(dup(state.as_ref())?)
            }
            None => None,
        };
        Ok(Self {
            method: Some(Arc::clone(method)),
            state,
            have_key: self.have_key,
            have_peer: self.have_peer,
        })
    }

    /// Returns the envelope to the post-new state.
    pub fn reset(&mut self) {
        self.release_state();
        self.method = None;
        self.have_key = false;
        self.have_peer = false;
    }

    fn check_same_provider(method: &KeyExch, key: &Key) -> Result<()> {
        if Arc::ptr_eq(key.provider(), &method.provider) {
            Ok(())
        } else {
            Err(Error::ProtocolMisuse("key from a different provider"))
        }
    }

    fn release_state(&mut self) {
        if let Some(state) = self.state.take() {
            match self.method.as_ref() {
                Some(method) => (method.freectx)(state),
                None => drop(state),
            }
        }
    }
}

impl Drop for KeyExchContext {
    fn drop(&mut self) {
        self.release_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{KeyObj, OpState, ProvCtx};
    use crate::keymgmt::KeyMgmtAdapter;
    use crate::provider::test_support::bare_provider;

    // A toy agreement scheme: keys are byte strings, the shared secret is
    // the element-wise XOR padded to the longer input. Deterministic and
    // symmetric, which is all the envelope cares about.

    struct MockKey {
        bytes: Vec<u8>,
    }

    #[derive(Default)]
    struct ExchState {
        key: Option<Vec<u8>>,
        peer: Option<Vec<u8>>,
    }

    fn state(s: &mut OpState) -> Result<&mut ExchState> {
        s.downcast_mut()
            .ok_or(Error::ProtocolMisuse("foreign keyexch state"))
    }

    fn kx_newctx(_: &ProvCtx) -> Result<OpCtx> {
        Ok(Box::<ExchState>::default())
    }

    fn key_bytes(key: &KeyObj) -> Result<Vec<u8>> {
        Ok(key
            .downcast_ref::<MockKey>()
            .ok_or(Error::ProtocolMisuse("foreign key object"))?
            .bytes
            .clone())
    }

    fn kx_init(s: &mut OpState, key: &KeyObj) -> Result<()> {
        let bytes = key_bytes(key)?;
        state(s)?.key = Some(bytes);
        Ok(())
    }

    fn kx_set_peer(s: &mut OpState, key: &KeyObj) -> Result<()> {
        let bytes = key_bytes(key)?;
        state(s)?.peer = Some(bytes);
        Ok(())
    }

    fn kx_derive(s: &mut OpState, out: Option<&mut [u8]>) -> Result<usize> {
        let st = state(s)?;
        let (Some(key), Some(peer)) = (st.key.as_ref(), st.peer.as_ref()) else {
            return Err(Error::ProtocolMisuse("derive before init and set_peer"));
        };
        let size = key.len().max(peer.len());
        let Some(out) = out else {
            return Ok(size);
        };
        if out.len() < size {
            return Err(Error::ProtocolMisuse("secret buffer too small"));
        }
        for (i, slot) in out.iter_mut().take(size).enumerate() {
            let a = key.get(i).copied().unwrap_or(0);
            let b = peer.get(i).copied().unwrap_or(0);
            *slot = a ^ b;
        }
        Ok(size)
    }

    fn kx_free(_: OpCtx) {}

    fn kx_dup(s: &OpState) -> Result<OpCtx> {
        let st: &ExchState = s
            .downcast_ref()
            .ok_or(Error::ProtocolMisuse("foreign keyexch state"))?;
        Ok(Box::new(ExchState {
            key: st.key.clone(),
            peer: st.peer.clone(),
        }))
    }

    fn kx_table() -> Vec<DispatchEntry> {
        vec![
            DispatchEntry::new(dispatch::KEYEXCH_NEWCTX, ProviderFn::KeyExchNewCtx(kx_newctx)),
            DispatchEntry::new(dispatch::KEYEXCH_INIT, ProviderFn::KeyExchInit(kx_init)),
            DispatchEntry::new(dispatch::KEYEXCH_DERIVE, ProviderFn::KeyExchDerive(kx_derive)),
            DispatchEntry::new(
                dispatch::KEYEXCH_SET_PEER,
                ProviderFn::KeyExchSetPeer(kx_set_peer),
            ),
            DispatchEntry::new(dispatch::KEYEXCH_FREECTX, ProviderFn::KeyExchFreeCtx(kx_free)),
            DispatchEntry::new(dispatch::KEYEXCH_DUPCTX, ProviderFn::KeyExchDupCtx(kx_dup)),
        ]
    }

    fn km_import(_: &ProvCtx, params: &Params) -> Result<KeyObj> {
        let bytes = params
            .get_octets("bytes")
            .ok_or(Error::ProtocolMisuse("missing key bytes"))?;
        Ok(Arc::new(MockKey {
            bytes: bytes.to_vec(),
        }))
    }

    fn km_table() -> Vec<DispatchEntry> {
        vec![DispatchEntry::new(
            dispatch::KEYMGMT_IMPORTKEY,
            ProviderFn::KeyMgmtImportKey(km_import),
        )]
    }

    fn setup() -> (Arc<Provider>, Arc<KeyExch>, Arc<KeyMgmt>) {
        let provider = bare_provider("mock");
        let exchange = KeyExchAdapter::from_dispatch("MOCK-XCH", &kx_table(), &provider).unwrap();
        let keymgmt = KeyMgmtAdapter::from_dispatch("MOCK-XCH", &km_table(), &provider).unwrap();
        (provider, exchange, keymgmt)
    }

    fn import(km: &Arc<KeyMgmt>, bytes: &[u8]) -> Key {
        km.import_key(&Params::new().with_octets("bytes", bytes))
            .unwrap()
    }

    #[test]
    fn completeness_requires_the_four_core_slots() {
        let provider = bare_provider("mock");
        for drop_id in [
            dispatch::KEYEXCH_NEWCTX,
            dispatch::KEYEXCH_INIT,
            dispatch::KEYEXCH_DERIVE,
            dispatch::KEYEXCH_FREECTX,
        ] {
            let table: Vec<DispatchEntry> = kx_table()
                .into_iter()
                .filter(|e| e.function_id != drop_id)
                .collect();
            assert!(
                matches!(
                    KeyExchAdapter::from_dispatch("MOCK-XCH", &table, &provider),
                    Err(Error::Incomplete { .. })
                ),
                "table without id {drop_id} must be incomplete"
            );
        }
    }

    #[test]
    fn derive_contract() {
        let (_, exchange, keymgmt) = setup();
        let local = import(&keymgmt, &[0xF0, 0x0F]);
        let peer = import(&keymgmt, &[0x0F, 0x0F]);

        let mut ctx = KeyExchContext::new();
        ctx.init(&exchange, &local).unwrap();

        // Size probe and derive both need a peer first.
        assert!(matches!(
            ctx.derive_size(),
            Err(Error::ProtocolMisuse(_))
        ));
        ctx.set_peer(&peer).unwrap();

        let size = ctx.derive_size().unwrap();
        assert_eq!(size, 2);

        let mut short = [0u8; 1];
        assert!(ctx.derive(&mut short).is_err());

        let mut secret = [0u8; 2];
        assert_eq!(ctx.derive(&mut secret).unwrap(), 2);
        assert_eq!(secret, [0xFF, 0x00]);
    }

    #[test]
    fn derive_before_init_is_misuse() {
        let mut ctx = KeyExchContext::new();
        let mut out = [0u8; 4];
        assert!(matches!(
            ctx.derive(&mut out),
            Err(Error::ProtocolMisuse(_))
        ));
        assert!(matches!(
            ctx.derive_size(),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn set_peer_before_init_is_misuse() {
        let (_, _, keymgmt) = setup();
        let peer = import(&keymgmt, &[1]);
        let mut ctx = KeyExchContext::new();
        assert!(matches!(
            ctx.set_peer(&peer),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn foreign_keys_are_rejected() {
        let (_, exchange, _) = setup();
        let other_km =
            KeyMgmtAdapter::from_dispatch("MOCK-XCH", &km_table(), &bare_provider("other"))
                .unwrap();
        let foreign = import(&other_km, &[1, 2, 3]);
        let mut ctx = KeyExchContext::new();
        assert!(matches!(
            ctx.init(&exchange, &foreign),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn dup_carries_keys_and_stays_isolated() {
        let (_, exchange, keymgmt) = setup();
        let local = import(&keymgmt, &[0xAA]);
        let peer_a = import(&keymgmt, &[0x0A]);
        let peer_b = import(&keymgmt, &[0xFF]);

        let mut a = KeyExchContext::new();
        a.init(&exchange, &local).unwrap();
        a.set_peer(&peer_a).unwrap();

        let mut b = a.try_clone().unwrap();

        // Re-pointing the copy's peer does not affect the original.
        b.set_peer(&peer_b).unwrap();
        let mut sa = [0u8; 1];
        let mut sb = [0u8; 1];
        a.derive(&mut sa).unwrap();
        b.derive(&mut sb).unwrap();
        assert_eq!(sa, [0xA0]);
        assert_eq!(sb, [0x55]);
    }
}
