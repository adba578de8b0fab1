//! Digest dispatch tables over the SHA-1 and SHA-2 hash crates.
//!
//! Each algorithm gets one generic set of slot functions instantiated per
//! hash type, plus a static dispatch table advertising the full streaming
//! set, the standalone one-shot slot, duplication and the size queries.

use digest::crypto_common::BlockSizeUser;
use digest::{Digest, FixedOutputReset};
use provkit_core::dispatch::{self, DispatchEntry, OpCtx, OpState, ProvCtx, ProviderFn};
use provkit_core::error::{Error, Result};

/// Per-context state: the running hasher.
struct HashState<D> {
    hasher: D,
}

trait Hash: Digest + FixedOutputReset + BlockSizeUser + Clone + Send + 'static {}

impl<D: Digest + FixedOutputReset + BlockSizeUser + Clone + Send + 'static> Hash for D {}

fn state<D: Hash>(s: &mut OpState) -> Result<&mut HashState<D>> {
    s.downcast_mut()
        .ok_or(Error::ProtocolMisuse("foreign digest state"))
}

fn newctx<D: Hash>(_: &ProvCtx) -> Result<OpCtx> {
    Ok(Box::new(HashState { hasher: D::new() }))
}

fn init<D: Hash>(s: &mut OpState) -> Result<()> {
    state::<D>(s)?.hasher = D::new();
    Ok(())
}

fn update<D: Hash>(s: &mut OpState, data: &[u8]) -> Result<()> {
    Digest::update(&mut state::<D>(s)?.hasher, data);
    Ok(())
}

fn finalize<D: Hash>(s: &mut OpState, out: &mut [u8]) -> Result<usize> {
    let size = <D as Digest>::output_size();
    if out.len() < size {
        return Err(Error::ProtocolMisuse("digest output buffer too small"));
    }
    let value = state::<D>(s)?.hasher.finalize_reset();
    out[..size].copy_from_slice(&value);
    Ok(size)
}

fn oneshot<D: Hash>(_: &ProvCtx, data: &[u8], out: &mut [u8]) -> Result<usize> {
    let size = <D as Digest>::output_size();
    if out.len() < size {
        return Err(Error::ProtocolMisuse("digest output buffer too small"));
    }
    out[..size].copy_from_slice(&D::digest(data));
    Ok(size)
}

fn freectx(_: OpCtx) {}

fn dupctx<D: Hash>(s: &OpState) -> Result<OpCtx> {
    let st: &HashState<D> = s
        .downcast_ref()
        .ok_or(Error::ProtocolMisuse("foreign digest state"))?;
    Ok(Box::new(HashState {
        hasher: st.hasher.clone(),
    }))
}

fn size<D: Hash>() -> usize {
    <D as Digest>::output_size()
}

fn block_size<D: Hash>() -> usize {
    <D as BlockSizeUser>::block_size()
}

macro_rules! digest_functions {
    ($(#[$meta:meta])* $table:ident, $ty:ty) => {
        $(#[$meta])*
        pub const $table: &[DispatchEntry] = &[
            DispatchEntry::new(
                dispatch::DIGEST_NEWCTX,
                ProviderFn::DigestNewCtx(newctx::<$ty>),
            ),
            DispatchEntry::new(dispatch::DIGEST_INIT, ProviderFn::DigestInit(init::<$ty>)),
            DispatchEntry::new(
                dispatch::DIGEST_UPDATE,
                ProviderFn::DigestUpdate(update::<$ty>),
            ),
            DispatchEntry::new(
                dispatch::DIGEST_FINAL,
                ProviderFn::DigestFinal(finalize::<$ty>),
            ),
            DispatchEntry::new(
                dispatch::DIGEST_DIGEST,
                ProviderFn::DigestOneShot(oneshot::<$ty>),
            ),
            DispatchEntry::new(dispatch::DIGEST_FREECTX, ProviderFn::DigestFreeCtx(freectx)),
            DispatchEntry::new(
                dispatch::DIGEST_DUPCTX,
                ProviderFn::DigestDupCtx(dupctx::<$ty>),
            ),
            DispatchEntry::new(dispatch::DIGEST_SIZE, ProviderFn::DigestSize(size::<$ty>)),
            DispatchEntry::new(
                dispatch::DIGEST_BLOCK_SIZE,
                ProviderFn::DigestBlockSize(block_size::<$ty>),
            ),
        ];
    };
}

digest_functions!(
    /// SHA-1 dispatch table.
    SHA1_FUNCTIONS,
    sha1::Sha1
);
digest_functions!(
    /// SHA-224 dispatch table.
    SHA224_FUNCTIONS,
    sha2::Sha224
);
digest_functions!(
    /// SHA-256 dispatch table.
    SHA256_FUNCTIONS,
    sha2::Sha256
);
digest_functions!(
    /// SHA-384 dispatch table.
    SHA384_FUNCTIONS,
    sha2::Sha384
);
digest_functions!(
    /// SHA-512 dispatch table.
    SHA512_FUNCTIONS,
    sha2::Sha512
);
digest_functions!(
    /// SHA-512/224 dispatch table.
    SHA512_224_FUNCTIONS,
    sha2::Sha512_224
);
digest_functions!(
    /// SHA-512/256 dispatch table.
    SHA512_256_FUNCTIONS,
    sha2::Sha512_256
);
