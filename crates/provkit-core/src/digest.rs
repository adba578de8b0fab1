//! Message digest methods and contexts.
//!
//! [`Digest`] is the resolved method record: the provider back-reference
//! plus the decoded slots of the implementation's dispatch table. A table
//! is complete when it carries either the full streaming set (`newctx`,
//! `init`, `update`, `final`, `freectx`) or the standalone one-shot
//! `digest` slot; the `size` slot is mandatory either way. Anything else is
//! rejected as an incomplete implementation.
//!
//! [`DigestContext`] is the stateful envelope:
//!
//! ```text
//! new -> init(md) -> update* -> finalize -> (re-init | reset | drop)
//! ```
//!
//! Contexts are single-owner and not thread-safe; [`DigestContext::try_clone`]
//! is the hand-off mechanism and yields an observationally equivalent
//! context sharing no mutable state with the source.

use std::any::Any;
use std::sync::Arc;

use crate::dispatch::{
    self, DigestBlockSizeFn, DigestDupCtxFn, DigestFinalFn, DigestFreeCtxFn, DigestGetParamsFn,
    DigestInitFn, DigestNewCtxFn, DigestOneShotFn, DigestSetParamsFn, DigestSizeFn,
    DigestUpdateFn, DispatchEntry, OpCtx, Operation, ProviderFn,
};
use crate::error::{Error, Result};
use crate::fetch::{generic_do_all, generic_fetch, MethodAdapter};
use crate::libctx::LibCtx;
use crate::params::Params;
use crate::provider::Provider;

/// Lifecycle flag bits for operation contexts.
pub mod flags {
    /// Per-context state has been released; nothing secret remains.
    pub const CLEANED: u32 = 0b0000_0001;
    /// The context re-used already-allocated state on the last init
    /// instead of allocating afresh.
    pub const REUSE: u32 = 0b0000_0010;
    /// The context is being driven through a single-shot computation.
    pub const ONESHOT: u32 = 0b0000_0100;
    /// Binding an implementation must not run its init slot; the caller
    /// drives initialization itself.
    pub const NO_INIT: u32 = 0b0000_1000;
    /// An attached public-key context is caller-owned and survives reset.
    pub const KEEP_PKEY_CTX: u32 = 0b0001_0000;
}

/// A resolved digest implementation.
pub struct Digest {
    name: String,
    provider: Arc<Provider>,
    newctx: Option<DigestNewCtxFn>,
    init: Option<DigestInitFn>,
    update: Option<DigestUpdateFn>,
    finish: Option<DigestFinalFn>,
    oneshot: Option<DigestOneShotFn>,
    freectx: Option<DigestFreeCtxFn>,
    dupctx: Option<DigestDupCtxFn>,
    size: DigestSizeFn,
    block_size: Option<DigestBlockSizeFn>,
    set_params: Option<DigestSetParamsFn>,
    get_params: Option<DigestGetParamsFn>,
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Digest")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl Digest {
    /// Fetches the best digest implementation for `name` under `query`.
    ///
    /// # Errors
    ///
    /// See [`generic_fetch`].
    pub fn fetch(libctx: &Arc<LibCtx>, name: &str, query: &str) -> Result<Arc<Self>> {
        generic_fetch::<DigestAdapter>(libctx, name, query)
    }

    /// Visits every digest implementation registered across all providers.
    pub fn do_all(libctx: &Arc<LibCtx>, f: impl FnMut(Arc<Self>)) {
        generic_do_all::<DigestAdapter>(libctx, f);
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

    /// Digest output size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        (self.size)()
    }

    /// Digest block size in bytes, when the implementation reports one.
    #[must_use]
    pub fn block_size(&self) -> Option<usize> {
        self.block_size.map(|f| f())
    }

    fn incomplete(&self, missing: &'static str) -> Error {
        Error::Incomplete {
            operation: Operation::Digest.name(),
            name: self.name.clone(),
            missing,
        }
    }
}

pub(crate) struct DigestAdapter;

impl MethodAdapter for DigestAdapter {
    type Method = Digest;
    const OPERATION: Operation = Operation::Digest;

    fn from_dispatch(
        name: &str,
        table: &[DispatchEntry],
        provider: &Arc<Provider>,
    ) -> Result<Arc<Digest>> {
        let mut md = Digest {
            name: name.to_owned(),
            provider: Arc::clone(provider),
            newctx: None,
            init: None,
            update: None,
            finish: None,
            oneshot: None,
            freectx: None,
            dupctx: None,
            size: || 0,
            block_size: None,
            set_params: None,
            get_params: None,
        };
        let mut size = None;
        // Streaming slots present; the set must be all-or-nothing.
        let mut streaming = 0u32;

        for entry in dispatch::entries(table) {
            match (entry.function_id, entry.function) {
                (dispatch::DIGEST_NEWCTX, ProviderFn::DigestNewCtx(f)) => {
                    if md.newctx.is_none() {
                        md.newctx = Some(f);
                        streaming += 1;
                    }
                }
                (dispatch::DIGEST_INIT, ProviderFn::DigestInit(f)) => {
                    if md.init.is_none() {
                        md.init = Some(f);
                        streaming += 1;
                    }
                }
                (dispatch::DIGEST_UPDATE, ProviderFn::DigestUpdate(f)) => {
                    if md.update.is_none() {
                        md.update = Some(f);
                        streaming += 1;
                    }
                }
                (dispatch::DIGEST_FINAL, ProviderFn::DigestFinal(f)) => {
                    if md.finish.is_none() {
                        md.finish = Some(f);
                        streaming += 1;
                    }
                }
                (dispatch::DIGEST_FREECTX, ProviderFn::DigestFreeCtx(f)) => {
                    if md.freectx.is_none() {
                        md.freectx = Some(f);
                        streaming += 1;
                    }
                }
                (dispatch::DIGEST_DIGEST, ProviderFn::DigestOneShot(f)) => {
                    // Standalone; does not count towards the streaming set.
                    md.oneshot.get_or_insert(f);
                }
                (dispatch::DIGEST_DUPCTX, ProviderFn::DigestDupCtx(f)) => {
                    md.dupctx.get_or_insert(f);
                }
                (dispatch::DIGEST_SIZE, ProviderFn::DigestSize(f)) => {
                    size.get_or_insert(f);
                }
                (dispatch::DIGEST_BLOCK_SIZE, ProviderFn::DigestBlockSize(f)) => {
                    md.block_size.get_or_insert(f);
                }
                (dispatch::DIGEST_SET_PARAMS, ProviderFn::DigestSetParams(f)) => {
                    md.set_params.get_or_insert(f);
                }
                (dispatch::DIGEST_GET_PARAMS, ProviderFn::DigestGetParams(f)) => {
                    md.get_params.get_or_insert(f);
                }
                _ => {}
            }
        }

        let incomplete = |missing| Error::Incomplete {
            operation: Operation::Digest.name(),
            name: name.to_owned(),
            missing,
        };
        // Either the whole streaming set or a standalone one-shot; there
        // must be at least one way to produce a digest.
        if streaming != 0 && streaming != 5 {
            return Err(incomplete("part of the init/update/final set"));
        }
        if streaming == 0 && md.oneshot.is_none() {
            return Err(incomplete("an init/update/final set or a one-shot digest"));
        }
        let Some(size) = size else {
            return Err(incomplete("size"));
        };
        md.size = size;

        Ok(Arc::new(md))
    }
}

/// The per-operation digest context.
#[derive(Default)]
pub struct DigestContext {
    method: Option<Arc<Digest>>,
    state: Option<OpCtx>,
    flags: u32,
    pkey_ctx: Option<Box<dyn Any + Send>>,
}

impl DigestContext {
    /// Creates an empty context; bind an implementation with
    /// [`init`](Self::init).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound implementation, if any.
    #[must_use]
    pub fn method(&self) -> Option<&Arc<Digest>> {
        self.method.as_ref()
    }

    /// Current lifecycle flags.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags
    }

    /// Sets lifecycle flag bits.
    pub fn set_flags(&mut self, bits: u32) {
        self.flags |= bits;
    }

    /// Clears lifecycle flag bits.
    pub fn clear_flags(&mut self, bits: u32) {
        self.flags &= !bits;
    }

    /// True when all of `bits` are set.
    #[must_use]
    pub const fn test_flags(&self, bits: u32) -> bool {
        self.flags & bits == bits
    }

    /// Attaches an opaque public-key context, as used by signature-producing
    /// digest flows. An attached context disables the re-init fast path.
    pub fn attach_pkey_ctx(&mut self, pkey_ctx: Box<dyn Any + Send>) {
        self.pkey_ctx = Some(pkey_ctx);
    }

    /// Detaches and returns the attached public-key context.
    pub fn take_pkey_ctx(&mut self) -> Option<Box<dyn Any + Send>> {
        self.pkey_ctx.take()
    }

    /// Binds `digest` and initializes the per-context state.
    ///
    /// Re-initialization of a finalized or already-bound context is legal.
    /// When the same implementation is already bound, its state is live and
    /// no foreign context is attached, the implementation's init slot runs
    /// directly on the existing state instead of tearing it down.
    ///
    /// # Errors
    ///
    /// Fails for one-shot-only implementations (no streaming slots) and
    /// when the implementation reports an init failure.
    pub fn init(&mut self, digest: &Arc<Digest>) -> Result<()> {
        self.clear_flags(flags::CLEANED);
        let same = self
            .method
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, digest));

        if same && self.pkey_ctx.is_none() && !self.test_flags(flags::NO_INIT) {
            if let Some(state) = self.state.as_mut() {
                let init = digest.init.ok_or_else(|| digest.incomplete("init"))?;
                self.flags |= flags::REUSE;
                return init(state.as_mut());
            }
        }
        self.clear_flags(flags::REUSE);

        // Slow path: tear the old state down and build afresh.
        self.release_state();
        self.method = Some(Arc::clone(digest));
        let newctx = digest.newctx.ok_or_else(|| digest.incomplete("newctx"))?;
        let mut state = newctx(digest.provider.provctx())?;
        if !self.test_flags(flags::NO_INIT) {
            let init = digest.init.ok_or_else(|| digest.incomplete("init"))?;
            init(state.as_mut())?;
        }
        self.state = Some(state);
        // release_state marked the context cleaned; it is live again.
        self.clear_flags(flags::CLEANED);
        Ok(())
    }

    /// Absorbs `data` into the digest state. Empty input is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] when the context was never initialized
    /// (or was finalized and not re-initialized).
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
            return Err(Error::ProtocolMisuse("digest update before init"));
        };
        if data.is_empty() {
            return Ok(());
        }
        let update = method.update.ok_or_else(|| method.incomplete("update"))?;
        update(state.as_mut(), data)
    }

    /// Produces the digest into `out` and releases the per-context state;
    /// any secret data leaves the context. Returns the number of bytes
    /// written. The implementation stays bound, so a following
    /// [`init`](Self::init) may take the fast path.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] before init or when `out` is shorter than
    /// the digest size.
    pub fn finalize(&mut self, out: &mut [u8]) -> Result<usize> {
        let written = {
            let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
                return Err(Error::ProtocolMisuse("digest final before init"));
            };
            let finish = method.finish.ok_or_else(|| method.incomplete("final"))?;
            if out.len() < (method.size)() {
                return Err(Error::ProtocolMisuse("digest output buffer too small"));
            }
            finish(state.as_mut(), out)?
        };
        self.release_state();
        Ok(written)
    }

    /// One-shot digest computation.
    ///
    /// Prefers the implementation's standalone one-shot slot; otherwise
    /// drives init, update and finalize with the [`flags::ONESHOT`] hint
    /// set.
    ///
    /// # Errors
    ///
    /// As for [`init`](Self::init) through [`finalize`](Self::finalize).
    pub fn digest(&mut self, digest: &Arc<Digest>, data: &[u8], out: &mut [u8]) -> Result<usize> {
        self.set_flags(flags::ONESHOT);
        let result = if let Some(oneshot) = digest.oneshot {
            if out.len() < (digest.size)() {
                Err(Error::ProtocolMisuse("digest output buffer too small"))
            } else {
                oneshot(digest.provider.provctx(), data, out)
            }
        } else {
            self.init(digest)
                .and_then(|()| self.update(data))
                .and_then(|()| self.finalize(out))
        };
        self.clear_flags(flags::ONESHOT);
        result
    }

    /// Returns the envelope to the post-new state: releases the per-context
    /// state and the implementation reference. The attached public-key
    /// context is kept only under [`flags::KEEP_PKEY_CTX`].
    pub fn reset(&mut self) {
        self.release_state();
        self.method = None;
        if !self.test_flags(flags::KEEP_PKEY_CTX) {
            self.pkey_ctx = None;
        }
        self.flags &= flags::KEEP_PKEY_CTX;
    }

    /// Duplicates the context: one more reference on the implementation and
    /// a deep copy of the per-context state. The copy shares no mutable
    /// state with the source; an attached public-key context is not carried
    /// over.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] on an unbound context and
    /// [`Error::Incomplete`] when the implementation lacks `dupctx`.
    pub fn try_clone(&self) -> Result<Self> {
        let Some(method) = self.method.as_ref() else {
            return Err(Error::ProtocolMisuse("duplicating an unbound digest context"));
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
            flags: self.flags & !flags::KEEP_PKEY_CTX,
            pkey_ctx: None,
        })
    }

    /// Passes parameters to the implementation's state.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] before init; [`Error::Incomplete`] when the
    /// implementation has no `set_params` slot.
    pub fn set_params(&mut self, params: &Params) -> Result<()> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_mut()) else {
            return Err(Error::ProtocolMisuse("digest set_params before init"));
        };
        let set = method
            .set_params
            .ok_or_else(|| method.incomplete("set_params"))?;
        set(state.as_mut(), params)
    }

    /// Reads parameters from the implementation's state.
    ///
    /// # Errors
    ///
    /// [`Error::ProtocolMisuse`] before init; [`Error::Incomplete`] when the
    /// implementation has no `get_params` slot.
    pub fn get_params(&self, params: &mut Params) -> Result<()> {
        let (Some(method), Some(state)) = (self.method.as_ref(), self.state.as_ref()) else {
            return Err(Error::ProtocolMisuse("digest get_params before init"));
        };
        let get = method
            .get_params
            .ok_or_else(|| method.incomplete("get_params"))?;
        get(state.as_ref(), params)
    }

    /// Output size of the bound implementation.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.method.as_ref().map(|m| m.size())
    }

    fn release_state(&mut self) {
        if let Some(state) = self.state.take() {
            match self.method.as_ref().and_then(|m| m.freectx) {
                Some(freectx) => freectx(state),
                None => drop(state),
            }
            self.set_flags(flags::CLEANED);
        }
    }
}

impl Drop for DigestContext {
    fn drop(&mut self) {
        self.release_state();
    }
}

impl std::fmt::Debug for DigestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestContext")
            .field("method", &self.method)
            .field("flags", &self.flags)
            .field("live", &self.state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::dispatch::{OpState, ProvCtx};
    use crate::provider::test_support::bare_provider;
    use crate::provider::{Algorithm, AlgorithmList, CoreHandle, ProviderInit};

    // A toy "SUM64" digest: the big-endian sum of all input bytes. Enough
    // structure to observe streaming, duplication and isolation.

    struct SumState {
        sum: u64,
    }

    fn state(s: &mut OpState) -> Result<&mut SumState> {
        s.downcast_mut()
            .ok_or(Error::ProtocolMisuse("foreign digest state"))
    }

    fn sum_newctx(_: &ProvCtx) -> Result<OpCtx> {
        Ok(Box::new(SumState { sum: 0 }))
    }

    fn sum_init(s: &mut OpState) -> Result<()> {
        state(s)?.sum = 0;
        Ok(())
    }

    fn sum_update(s: &mut OpState, data: &[u8]) -> Result<()> {
        let st = state(s)?;
        for byte in data {
            st.sum = st.sum.wrapping_add(u64::from(*byte));
        }
        Ok(())
    }

    fn sum_final(s: &mut OpState, out: &mut [u8]) -> Result<usize> {
        let st = state(s)?;
        if out.len() < 8 {
            return Err(Error::ProtocolMisuse("output too small"));
        }
        out[..8].copy_from_slice(&st.sum.to_be_bytes());
        Ok(8)
    }

    fn sum_free(_: OpCtx) {}

    fn sum_dup(s: &OpState) -> Result<OpCtx> {
        let st: &SumState = s
            .downcast_ref()
            .ok_or(Error::ProtocolMisuse("foreign digest state"))?;
        Ok(Box::new(SumState { sum: st.sum }))
    }

    fn sum_size() -> usize {
        8
    }

    fn sum_block_size() -> usize {
        1
    }

    fn sum_oneshot(_: &ProvCtx, data: &[u8], out: &mut [u8]) -> Result<usize> {
        let mut sum = 0u64;
        for byte in data {
            sum = sum.wrapping_add(u64::from(*byte));
        }
        out[..8].copy_from_slice(&sum.to_be_bytes());
        Ok(8)
    }

    fn full_table() -> Vec<DispatchEntry> {
        vec![
            DispatchEntry::new(dispatch::DIGEST_NEWCTX, ProviderFn::DigestNewCtx(sum_newctx)),
            DispatchEntry::new(dispatch::DIGEST_INIT, ProviderFn::DigestInit(sum_init)),
            DispatchEntry::new(dispatch::DIGEST_UPDATE, ProviderFn::DigestUpdate(sum_update)),
            DispatchEntry::new(dispatch::DIGEST_FINAL, ProviderFn::DigestFinal(sum_final)),
            DispatchEntry::new(dispatch::DIGEST_FREECTX, ProviderFn::DigestFreeCtx(sum_free)),
            DispatchEntry::new(dispatch::DIGEST_DUPCTX, ProviderFn::DigestDupCtx(sum_dup)),
            DispatchEntry::new(dispatch::DIGEST_SIZE, ProviderFn::DigestSize(sum_size)),
            DispatchEntry::new(
                dispatch::DIGEST_BLOCK_SIZE,
                ProviderFn::DigestBlockSize(sum_block_size),
            ),
        ]
    }

    fn build(table: &[DispatchEntry]) -> Result<Arc<Digest>> {
        DigestAdapter::from_dispatch("SUM64", table, &bare_provider("mock"))
    }

    #[test]
    fn full_streaming_set_is_complete() {
        let md = build(&full_table()).unwrap();
        assert_eq!(md.size(), 8);
        assert_eq!(md.block_size(), Some(1));
        assert_eq!(md.name(), "SUM64");
    }

    #[test]
    fn oneshot_only_is_complete() {
        let table = [
            DispatchEntry::new(dispatch::DIGEST_DIGEST, ProviderFn::DigestOneShot(sum_oneshot)),
            DispatchEntry::new(dispatch::DIGEST_SIZE, ProviderFn::DigestSize(sum_size)),
        ];
        let md = build(&table).unwrap();
        assert_eq!(md.size(), 8);
    }

    #[test]
    fn partial_streaming_set_is_incomplete() {
        // Drop the update slot from the full set.
        let table: Vec<DispatchEntry> = full_table()
            .into_iter()
            .filter(|e| e.function_id != dispatch::DIGEST_UPDATE)
            .collect();
        assert!(matches!(
            build(&table),
            Err(Error::Incomplete { .. })
        ));
    }

    #[test]
    fn missing_size_is_incomplete_even_with_oneshot() {
        let table = [DispatchEntry::new(
            dispatch::DIGEST_DIGEST,
            ProviderFn::DigestOneShot(sum_oneshot),
        )];
        assert!(matches!(build(&table), Err(Error::Incomplete { .. })));

        let table: Vec<DispatchEntry> = full_table()
            .into_iter()
            .filter(|e| e.function_id != dispatch::DIGEST_SIZE)
            .collect();
        assert!(matches!(build(&table), Err(Error::Incomplete { .. })));
    }

    #[test]
    fn empty_table_is_incomplete() {
        assert!(matches!(build(&[]), Err(Error::Incomplete { .. })));
    }

    // Envelope behavior against the mock implementation.

    fn sum_digest() -> Arc<Digest> {
        build(&full_table()).unwrap()
    }

    fn sum_of(data: &[u8]) -> [u8; 8] {
        let mut sum = 0u64;
        for byte in data {
            sum = sum.wrapping_add(u64::from(*byte));
        }
        sum.to_be_bytes()
    }

    #[test]
    fn stream_round_trip() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        ctx.init(&md).unwrap();
        ctx.update(b"abc").unwrap();
        ctx.update(b"").unwrap();
        ctx.update(b"def").unwrap();
        let mut out = [0u8; 8];
        assert_eq!(ctx.finalize(&mut out).unwrap(), 8);
        assert_eq!(out, sum_of(b"abcdef"));
    }

    #[test]
    fn update_before_init_is_misuse() {
        let mut ctx = DigestContext::new();
        assert!(matches!(
            ctx.update(b"abc"),
            Err(Error::ProtocolMisuse(_))
        ));
        let mut out = [0u8; 8];
        assert!(matches!(
            ctx.finalize(&mut out),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn finalize_then_reinit_is_legal() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        let mut out = [0u8; 8];

        ctx.init(&md).unwrap();
        ctx.update(b"abc").unwrap();
        ctx.finalize(&mut out).unwrap();
        assert!(ctx.test_flags(flags::CLEANED));
        // Finalized: further updates are misuse until re-init.
        assert!(ctx.update(b"x").is_err());

        ctx.init(&md).unwrap();
        ctx.update(b"xy").unwrap();
        ctx.finalize(&mut out).unwrap();
        assert_eq!(out, sum_of(b"xy"));
    }

    #[test]
    fn short_output_buffer_is_misuse() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        ctx.init(&md).unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(
            ctx.finalize(&mut out),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn dup_isolates_the_copies() {
        let md = sum_digest();
        let mut a = DigestContext::new();
        a.init(&md).unwrap();
        a.update(b"abc").unwrap();

        let mut b = a.try_clone().unwrap();

        a.update(b"d").unwrap();
        let mut out_a = [0u8; 8];
        a.finalize(&mut out_a).unwrap();
        let mut out_b = [0u8; 8];
        b.finalize(&mut out_b).unwrap();

        assert_eq!(out_a, sum_of(b"abcd"));
        assert_eq!(out_b, sum_of(b"abc"));
    }

    #[test]
    fn dup_of_unbound_context_is_misuse() {
        let ctx = DigestContext::new();
        assert!(matches!(
            ctx.try_clone(),
            Err(Error::ProtocolMisuse(_))
        ));
    }

    #[test]
    fn reset_returns_to_post_new_state() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        ctx.init(&md).unwrap();
        ctx.update(b"abc").unwrap();
        ctx.reset();
        assert!(ctx.method().is_none());
        assert_eq!(ctx.flags(), 0);
        assert!(ctx.update(b"abc").is_err());
    }

    #[test]
    fn reset_honors_keep_pkey_ctx() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        ctx.init(&md).unwrap();
        ctx.attach_pkey_ctx(Box::new(42u32));
        ctx.set_flags(flags::KEEP_PKEY_CTX);
        ctx.reset();
        assert!(ctx.take_pkey_ctx().is_some());

        let mut ctx = DigestContext::new();
        ctx.init(&md).unwrap();
        ctx.attach_pkey_ctx(Box::new(42u32));
        ctx.reset();
        assert!(ctx.take_pkey_ctx().is_none());
    }

    #[test]
    fn oneshot_slot_is_preferred() {
        let table = [
            DispatchEntry::new(dispatch::DIGEST_DIGEST, ProviderFn::DigestOneShot(sum_oneshot)),
            DispatchEntry::new(dispatch::DIGEST_SIZE, ProviderFn::DigestSize(sum_size)),
        ];
        let md = build(&table).unwrap();
        let mut ctx = DigestContext::new();
        let mut out = [0u8; 8];
        assert_eq!(ctx.digest(&md, b"abc", &mut out).unwrap(), 8);
        assert_eq!(out, sum_of(b"abc"));
        // One-shot-only implementations cannot stream.
        assert!(matches!(ctx.init(&md), Err(Error::Incomplete { .. })));
    }

    #[test]
    fn oneshot_via_streaming_slots() {
        let md = sum_digest();
        let mut ctx = DigestContext::new();
        let mut out = [0u8; 8];
        assert_eq!(ctx.digest(&md, b"abcdef", &mut out).unwrap(), 8);
        assert_eq!(out, sum_of(b"abcdef"));
        assert!(!ctx.test_flags(flags::ONESHOT));
    }

    // Re-init fast path: same implementation, live state, nothing attached.

    static FAST_NEWCTX_CALLS: AtomicU32 = AtomicU32::new(0);

    fn counting_newctx(provctx: &ProvCtx) -> Result<OpCtx> {
        FAST_NEWCTX_CALLS.fetch_add(1, Ordering::SeqCst);
        sum_newctx(provctx)
    }

    fn counting_table() -> Vec<DispatchEntry> {
        let mut table = full_table();
        table[0] = DispatchEntry::new(
            dispatch::DIGEST_NEWCTX,
            ProviderFn::DigestNewCtx(counting_newctx),
        );
        table
    }

    #[test]
    fn reinit_fast_path_skips_reallocation() {
        let md = build(&counting_table()).unwrap();
        let mut ctx = DigestContext::new();

        let before = FAST_NEWCTX_CALLS.load(Ordering::SeqCst);
        ctx.init(&md).unwrap();
        ctx.update(b"abc").unwrap();
        assert_eq!(FAST_NEWCTX_CALLS.load(Ordering::SeqCst), before + 1);

        // Same implementation, live state: init reuses it.
        ctx.init(&md).unwrap();
        assert_eq!(FAST_NEWCTX_CALLS.load(Ordering::SeqCst), before + 1);
        assert!(ctx.test_flags(flags::REUSE));
        let mut out = [0u8; 8];
        ctx.update(b"xy").unwrap();
        ctx.finalize(&mut out).unwrap();
        assert_eq!(out, sum_of(b"xy"));

        // A foreign attachment disables the fast path.
        ctx.init(&md).unwrap();
        ctx.attach_pkey_ctx(Box::new(0u8));
        ctx.init(&md).unwrap();
        assert_eq!(FAST_NEWCTX_CALLS.load(Ordering::SeqCst), before + 3);
        assert!(!ctx.test_flags(flags::REUSE));
    }

    // The fetch pipeline end to end against a mock provider.

    const SUM_TABLE: &[DispatchEntry] = &[
        DispatchEntry::new(dispatch::DIGEST_NEWCTX, ProviderFn::DigestNewCtx(sum_newctx)),
        DispatchEntry::new(dispatch::DIGEST_INIT, ProviderFn::DigestInit(sum_init)),
        DispatchEntry::new(dispatch::DIGEST_UPDATE, ProviderFn::DigestUpdate(sum_update)),
        DispatchEntry::new(dispatch::DIGEST_FINAL, ProviderFn::DigestFinal(sum_final)),
        DispatchEntry::new(dispatch::DIGEST_FREECTX, ProviderFn::DigestFreeCtx(sum_free)),
        DispatchEntry::new(dispatch::DIGEST_DUPCTX, ProviderFn::DigestDupCtx(sum_dup)),
        DispatchEntry::new(dispatch::DIGEST_SIZE, ProviderFn::DigestSize(sum_size)),
    ];

    static SUM_ALGS: &[Algorithm] = &[Algorithm {
        names: "SUM64:SUM-64",
        property_definition: "default=yes",
        implementation: SUM_TABLE,
    }];

    fn sum_query(_: &ProvCtx, op: Operation) -> Option<AlgorithmList> {
        (op == Operation::Digest).then_some(AlgorithmList {
            algorithms: SUM_ALGS,
            no_store: false,
        })
    }

    fn sum_provider_init(_: &CoreHandle) -> Result<ProviderInit> {
        Ok(ProviderInit {
            provctx: Arc::new(()),
            dispatch: vec![DispatchEntry::new(
                dispatch::PROVIDER_QUERY_OPERATION,
                ProviderFn::ProviderQueryOperation(sum_query),
            )],
        })
    }

    #[test]
    fn fetch_and_digest_end_to_end() {
        let ctx = LibCtx::new();
        ctx.register_provider("mock", 0, sum_provider_init).unwrap();

        let md = Digest::fetch(&ctx, "sum-64", "").unwrap();
        assert_eq!(md.name(), "SUM64");

        let mut dctx = DigestContext::new();
        dctx.init(&md).unwrap();
        dctx.update(b"abc").unwrap();
        let mut out = [0u8; 8];
        dctx.finalize(&mut out).unwrap();
        assert_eq!(out, sum_of(b"abc"));

        let mut names = Vec::new();
        Digest::do_all(&ctx, |m| names.push(m.name().to_owned()));
        assert_eq!(names, vec!["SUM64"]);
    }
}
