//! Dispatch tables: the stable numeric ABI between the core and providers.
//!
//! A provider advertises each algorithm as a *dispatch table*, a slice of
//! [`DispatchEntry`] pairs mapping stable function ids to function pointers.
//! The core copies the pointers out by id when it builds a method record and
//! never touches the raw table again. Unknown function ids are ignored so
//! that newer providers keep working against an older core, and an id of
//! zero terminates decoding (zero is reserved and never a valid slot).
//!
//! Function pointers cross the boundary as typed variants of [`ProviderFn`]
//! rather than erased pointers; the numeric id remains the source of truth
//! for which slot an entry fills. All id series start at 1.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::params::Params;
use crate::provider::AlgorithmList;

/// Operation kinds, a closed enumeration.
///
/// The numeric values are part of the stable ABI and fit in eight bits;
/// zero is reserved as a terminator and is never a valid operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Message digests (hashes).
    Digest = 1,
    /// Symmetric ciphers.
    Cipher = 2,
    /// Key and domain-parameter management.
    KeyMgmt = 10,
    /// Shared-secret derivation (key exchange).
    KeyExch = 11,
}

impl Operation {
    /// Numeric operation id (always in `1..=255`).
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Decodes the operation stored in the low byte of a method id.
    #[must_use]
    pub(crate) const fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Digest),
            2 => Some(Self::Cipher),
            10 => Some(Self::KeyMgmt),
            11 => Some(Self::KeyExch),
            _ => None,
        }
    }

    /// Short lowercase name used in errors and log records.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Digest => "digest",
            Self::Cipher => "cipher",
            Self::KeyMgmt => "keymgmt",
            Self::KeyExch => "keyexch",
        }
    }
}

/// Opaque provider context, created by `provider_init` and handed back to
/// every provider function.
pub type ProvCtx = Arc<dyn Any + Send + Sync>;

/// Opaque per-context state owned by an operation context envelope.
pub type OpCtx = Box<dyn Any + Send>;

/// Unsized view of [`OpCtx`] used in slot signatures.
pub type OpState = dyn Any + Send;

/// Opaque provider-side key or domain-parameter object.
pub type KeyObj = Arc<dyn Any + Send + Sync>;

// Core function ids, for the table the core hands to `provider_init`.
// In this crate the core side is exposed as the typed
// [`crate::provider::CoreHandle`]; the ids are kept for ABI parity.

/// Core slot: enumerate the parameter keys the core can report.
pub const CORE_GET_PARAM_TYPES: u32 = 1;
/// Core slot: read core parameters.
pub const CORE_GET_PARAMS: u32 = 2;
/// Core slot: register a thread-stop handler.
pub const CORE_THREAD_START: u32 = 3;
/// Core slot: report an error record against the calling provider.
pub const CORE_PUT_ERROR: u32 = 4;
/// Core slot: obtain the library context the provider was loaded into.
pub const CORE_GET_LIBRARY_CONTEXT: u32 = 6;

// Provider function ids (reserved series 1024..).

/// Provider slot: release the provider context.
pub const PROVIDER_TEARDOWN: u32 = 1024;
/// Provider slot: enumerate the parameter keys the provider can report.
pub const PROVIDER_GET_PARAM_TYPES: u32 = 1025;
/// Provider slot: read provider parameters (name, version, ...).
pub const PROVIDER_GET_PARAMS: u32 = 1026;
/// Provider slot: return the algorithm table for an operation.
pub const PROVIDER_QUERY_OPERATION: u32 = 1027;
/// Provider slot: map provider reason codes to strings.
pub const PROVIDER_GET_REASON_STRINGS: u32 = 1028;

// Digest function ids.

/// Digest slot: allocate per-context state.
pub const DIGEST_NEWCTX: u32 = 1;
/// Digest slot: (re)initialize per-context state.
pub const DIGEST_INIT: u32 = 2;
/// Digest slot: absorb input.
pub const DIGEST_UPDATE: u32 = 3;
/// Digest slot: produce the digest and reset nothing.
pub const DIGEST_FINAL: u32 = 4;
/// Digest slot: standalone one-shot digest.
pub const DIGEST_DIGEST: u32 = 5;
/// Digest slot: release per-context state.
pub const DIGEST_FREECTX: u32 = 6;
/// Digest slot: duplicate per-context state.
pub const DIGEST_DUPCTX: u32 = 7;
/// Digest slot: output size in bytes.
pub const DIGEST_SIZE: u32 = 8;
/// Digest slot: block size in bytes.
pub const DIGEST_BLOCK_SIZE: u32 = 9;
/// Digest slot: set context parameters.
pub const DIGEST_SET_PARAMS: u32 = 10;
/// Digest slot: read context parameters.
pub const DIGEST_GET_PARAMS: u32 = 11;

// Cipher function ids.

/// Cipher slot: allocate per-context state.
pub const CIPHER_NEWCTX: u32 = 1;
/// Cipher slot: initialize for encryption.
pub const CIPHER_ENCRYPT_INIT: u32 = 2;
/// Cipher slot: initialize for decryption.
pub const CIPHER_DECRYPT_INIT: u32 = 3;
/// Cipher slot: transform input.
pub const CIPHER_UPDATE: u32 = 4;
/// Cipher slot: finish the stream.
pub const CIPHER_FINAL: u32 = 5;
/// Cipher slot: standalone one-shot transform.
pub const CIPHER_CIPHER: u32 = 6;
/// Cipher slot: release per-context state.
pub const CIPHER_FREECTX: u32 = 7;
/// Cipher slot: duplicate per-context state.
pub const CIPHER_DUPCTX: u32 = 8;
/// Cipher slot: read method parameters.
pub const CIPHER_GET_PARAMS: u32 = 9;
/// Cipher slot: read context parameters.
pub const CIPHER_CTX_GET_PARAMS: u32 = 10;
/// Cipher slot: set context parameters.
pub const CIPHER_CTX_SET_PARAMS: u32 = 11;

// Key management function ids.

/// Keymgmt slot: import domain parameters from a parameter list.
pub const KEYMGMT_IMPORTDOMPARAMS: u32 = 1;
/// Keymgmt slot: generate domain parameters.
pub const KEYMGMT_GENDOMPARAMS: u32 = 2;
/// Keymgmt slot: release a domain-parameter object.
pub const KEYMGMT_FREEDOMPARAMS: u32 = 3;
/// Keymgmt slot: export domain parameters into a parameter list.
pub const KEYMGMT_EXPORTDOMPARAMS: u32 = 4;
/// Keymgmt slot: enumerate importable domain-parameter keys.
pub const KEYMGMT_IMPORTDOMPARAM_TYPES: u32 = 5;
/// Keymgmt slot: enumerate exportable domain-parameter keys.
pub const KEYMGMT_EXPORTDOMPARAM_TYPES: u32 = 6;
/// Keymgmt slot: import a key from a parameter list.
pub const KEYMGMT_IMPORTKEY: u32 = 10;
/// Keymgmt slot: generate a key, optionally from domain parameters.
pub const KEYMGMT_GENKEY: u32 = 11;
/// Keymgmt slot: load an internal key from a binary identity.
pub const KEYMGMT_LOADKEY: u32 = 12;
/// Keymgmt slot: release a key object.
pub const KEYMGMT_FREEKEY: u32 = 13;
/// Keymgmt slot: export a key into a parameter list.
pub const KEYMGMT_EXPORTKEY: u32 = 14;
/// Keymgmt slot: enumerate importable key parameter keys.
pub const KEYMGMT_IMPORTKEY_TYPES: u32 = 15;
/// Keymgmt slot: enumerate exportable key parameter keys.
pub const KEYMGMT_EXPORTKEY_TYPES: u32 = 16;

// Key exchange function ids.

/// Keyexch slot: allocate per-context state.
pub const KEYEXCH_NEWCTX: u32 = 1;
/// Keyexch slot: bind the local key.
pub const KEYEXCH_INIT: u32 = 2;
/// Keyexch slot: derive the shared secret.
pub const KEYEXCH_DERIVE: u32 = 3;
/// Keyexch slot: bind the peer key.
pub const KEYEXCH_SET_PEER: u32 = 4;
/// Keyexch slot: release per-context state.
pub const KEYEXCH_FREECTX: u32 = 5;
/// Keyexch slot: duplicate per-context state.
pub const KEYEXCH_DUPCTX: u32 = 6;
/// Keyexch slot: set context parameters.
pub const KEYEXCH_SET_PARAMS: u32 = 7;

// Slot signatures. One alias per function id, in id order.

/// `PROVIDER_TEARDOWN` signature.
pub type ProviderTeardownFn = fn(&ProvCtx) -> Result<()>;
/// `PROVIDER_GET_PARAM_TYPES` signature.
pub type ProviderParamTypesFn = fn(&ProvCtx) -> &'static [&'static str];
/// `PROVIDER_GET_PARAMS` signature.
pub type ProviderGetParamsFn = fn(&ProvCtx, &mut Params) -> Result<()>;
/// `PROVIDER_QUERY_OPERATION` signature.
pub type ProviderQueryOperationFn = fn(&ProvCtx, Operation) -> Option<AlgorithmList>;
/// `PROVIDER_GET_REASON_STRINGS` signature.
pub type ProviderReasonStringsFn = fn() -> &'static [(u32, &'static str)];

/// `DIGEST_NEWCTX` signature.
pub type DigestNewCtxFn = fn(&ProvCtx) -> Result<OpCtx>;
/// `DIGEST_INIT` signature.
pub type DigestInitFn = fn(&mut OpState) -> Result<()>;
/// `DIGEST_UPDATE` signature.
pub type DigestUpdateFn = fn(&mut OpState, &[u8]) -> Result<()>;
/// `DIGEST_FINAL` signature; returns the number of bytes written.
pub type DigestFinalFn = fn(&mut OpState, &mut [u8]) -> Result<usize>;
/// `DIGEST_DIGEST` signature (one-shot); returns the number of bytes written.
pub type DigestOneShotFn = fn(&ProvCtx, &[u8], &mut [u8]) -> Result<usize>;
/// `DIGEST_FREECTX` signature.
pub type DigestFreeCtxFn = fn(OpCtx);
/// `DIGEST_DUPCTX` signature.
pub type DigestDupCtxFn = fn(&OpState) -> Result<OpCtx>;
/// `DIGEST_SIZE` signature.
pub type DigestSizeFn = fn() -> usize;
/// `DIGEST_BLOCK_SIZE` signature.
pub type DigestBlockSizeFn = fn() -> usize;
/// `DIGEST_SET_PARAMS` signature.
pub type DigestSetParamsFn = fn(&mut OpState, &Params) -> Result<()>;
/// `DIGEST_GET_PARAMS` signature.
pub type DigestGetParamsFn = fn(&OpState, &mut Params) -> Result<()>;

/// `CIPHER_NEWCTX` signature.
pub type CipherNewCtxFn = fn(&ProvCtx) -> Result<OpCtx>;
/// `CIPHER_ENCRYPT_INIT` / `CIPHER_DECRYPT_INIT` signature (key, iv).
pub type CipherInitFn = fn(&mut OpState, &[u8], &[u8]) -> Result<()>;
/// `CIPHER_UPDATE` signature (out, input); returns bytes written.
pub type CipherUpdateFn = fn(&mut OpState, &mut [u8], &[u8]) -> Result<usize>;
/// `CIPHER_FINAL` signature; returns bytes written.
pub type CipherFinalFn = fn(&mut OpState, &mut [u8]) -> Result<usize>;
/// `CIPHER_CIPHER` signature (one-shot); returns bytes written.
pub type CipherOneShotFn = fn(&mut OpState, &mut [u8], &[u8]) -> Result<usize>;
/// `CIPHER_FREECTX` signature.
pub type CipherFreeCtxFn = fn(OpCtx);
/// `CIPHER_DUPCTX` signature.
pub type CipherDupCtxFn = fn(&OpState) -> Result<OpCtx>;
/// `CIPHER_GET_PARAMS` signature (method-level parameters).
pub type CipherGetParamsFn = fn(&mut Params) -> Result<()>;
/// `CIPHER_CTX_GET_PARAMS` signature.
pub type CipherCtxGetParamsFn = fn(&OpState, &mut Params) -> Result<()>;
/// `CIPHER_CTX_SET_PARAMS` signature.
pub type CipherCtxSetParamsFn = fn(&mut OpState, &Params) -> Result<()>;

/// `KEYMGMT_IMPORTDOMPARAMS` / `KEYMGMT_GENDOMPARAMS` signature.
pub type KeyMgmtNewObjFn = fn(&ProvCtx, &Params) -> Result<KeyObj>;
/// `KEYMGMT_FREEDOMPARAMS` / `KEYMGMT_FREEKEY` signature.
pub type KeyMgmtFreeObjFn = fn(KeyObj);
/// `KEYMGMT_EXPORTDOMPARAMS` / `KEYMGMT_EXPORTKEY` signature.
pub type KeyMgmtExportFn = fn(&KeyObj, &mut Params) -> Result<()>;
/// Parameter-key enumeration signature (import/export type lists).
pub type KeyMgmtTypesFn = fn() -> &'static [&'static str];
/// `KEYMGMT_GENKEY` signature (optional domain parameters, then params).
pub type KeyMgmtGenKeyFn = fn(&ProvCtx, Option<&KeyObj>, &Params) -> Result<KeyObj>;
/// `KEYMGMT_LOADKEY` signature (binary identity).
pub type KeyMgmtLoadKeyFn = fn(&ProvCtx, &[u8]) -> Result<KeyObj>;

/// `KEYEXCH_NEWCTX` signature.
pub type KeyExchNewCtxFn = fn(&ProvCtx) -> Result<OpCtx>;
/// `KEYEXCH_INIT` / `KEYEXCH_SET_PEER` signature.
pub type KeyExchBindKeyFn = fn(&mut OpState, &KeyObj) -> Result<()>;
/// `KEYEXCH_DERIVE` signature.
///
/// With `None` the exact secret size is returned and nothing is written;
/// with `Some(out)` the secret is written and the byte count returned, or an
/// error raised when `out` is too small.
pub type KeyExchDeriveFn = fn(&mut OpState, Option<&mut [u8]>) -> Result<usize>;
/// `KEYEXCH_FREECTX` signature.
pub type KeyExchFreeCtxFn = fn(OpCtx);
/// `KEYEXCH_DUPCTX` signature.
pub type KeyExchDupCtxFn = fn(&OpState) -> Result<OpCtx>;
/// `KEYEXCH_SET_PARAMS` signature.
pub type KeyExchSetParamsFn = fn(&mut OpState, &Params) -> Result<()>;

/// A typed provider function pointer.
///
/// The variant must agree with the [`DispatchEntry::function_id`] it is
/// advertised under; adapters ignore entries where the two disagree, the
/// same way unknown function ids are ignored.
#[derive(Clone, Copy)]
#[allow(missing_docs)] // variant names restate the id constants above
pub enum ProviderFn {
    ProviderTeardown(ProviderTeardownFn),
    ProviderParamTypes(ProviderParamTypesFn),
    ProviderGetParams(ProviderGetParamsFn),
    ProviderQueryOperation(ProviderQueryOperationFn),
    ProviderReasonStrings(ProviderReasonStringsFn),

    DigestNewCtx(DigestNewCtxFn),
    DigestInit(DigestInitFn),
    DigestUpdate(DigestUpdateFn),
    DigestFinal(DigestFinalFn),
    DigestOneShot(DigestOneShotFn),
    DigestFreeCtx(DigestFreeCtxFn),
    DigestDupCtx(DigestDupCtxFn),
    DigestSize(DigestSizeFn),
    DigestBlockSize(DigestBlockSizeFn),
    DigestSetParams(DigestSetParamsFn),
    DigestGetParams(DigestGetParamsFn),

    CipherNewCtx(CipherNewCtxFn),
    CipherEncryptInit(CipherInitFn),
    CipherDecryptInit(CipherInitFn),
    CipherUpdate(CipherUpdateFn),
    CipherFinal(CipherFinalFn),
    CipherOneShot(CipherOneShotFn),
    CipherFreeCtx(CipherFreeCtxFn),
    CipherDupCtx(CipherDupCtxFn),
    CipherGetParams(CipherGetParamsFn),
    CipherCtxGetParams(CipherCtxGetParamsFn),
    CipherCtxSetParams(CipherCtxSetParamsFn),

    KeyMgmtImportDomParams(KeyMgmtNewObjFn),
    KeyMgmtGenDomParams(KeyMgmtNewObjFn),
    KeyMgmtFreeDomParams(KeyMgmtFreeObjFn),
    KeyMgmtExportDomParams(KeyMgmtExportFn),
    KeyMgmtImportDomParamTypes(KeyMgmtTypesFn),
    KeyMgmtExportDomParamTypes(KeyMgmtTypesFn),
    KeyMgmtImportKey(KeyMgmtNewObjFn),
    KeyMgmtGenKey(KeyMgmtGenKeyFn),
    KeyMgmtLoadKey(KeyMgmtLoadKeyFn),
    KeyMgmtFreeKey(KeyMgmtFreeObjFn),
    KeyMgmtExportKey(KeyMgmtExportFn),
    KeyMgmtImportKeyTypes(KeyMgmtTypesFn),
    KeyMgmtExportKeyTypes(KeyMgmtTypesFn),

    KeyExchNewCtx(KeyExchNewCtxFn),
    KeyExchInit(KeyExchBindKeyFn),
    KeyExchSetPeer(KeyExchBindKeyFn),
    KeyExchDerive(KeyExchDeriveFn),
    KeyExchFreeCtx(KeyExchFreeCtxFn),
    KeyExchDupCtx(KeyExchDupCtxFn),
    KeyExchSetParams(KeyExchSetParamsFn),
}

impl std::fmt::Debug for ProviderFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProviderFn(..)")
    }
}

/// One entry of a dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct DispatchEntry {
    /// Stable function id, namespaced per operation kind. Zero terminates.
    pub function_id: u32,
    /// The advertised function.
    pub function: ProviderFn,
}

impl DispatchEntry {
    /// Creates a dispatch entry. Usable in `static` tables.
    #[must_use]
    pub const fn new(function_id: u32, function: ProviderFn) -> Self {
        Self {
            function_id,
            function,
        }
    }
}

/// Iterates a dispatch table up to (and excluding) a zero terminator, if
/// one is present. Tables are slices, so the terminator is optional.
pub(crate) fn entries(table: &[DispatchEntry]) -> impl Iterator<Item = &DispatchEntry> {
    table.iter().take_while(|e| e.function_id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_are_stable() {
        assert_eq!(Operation::Digest.id(), 1);
        assert_eq!(Operation::Cipher.id(), 2);
        assert_eq!(Operation::KeyMgmt.id(), 10);
        assert_eq!(Operation::KeyExch.id(), 11);
    }

    #[test]
    fn operation_round_trips_through_id() {
        for op in [
            Operation::Digest,
            Operation::Cipher,
            Operation::KeyMgmt,
            Operation::KeyExch,
        ] {
            assert_eq!(Operation::from_id(op.id()), Some(op));
        }
        assert_eq!(Operation::from_id(0), None);
        assert_eq!(Operation::from_id(255), None);
    }

    #[test]
    fn zero_id_terminates_iteration() {
        fn size() -> usize {
            0
        }
        let table = [
            DispatchEntry::new(DIGEST_SIZE, ProviderFn::DigestSize(size)),
            DispatchEntry::new(0, ProviderFn::DigestSize(size)),
            DispatchEntry::new(DIGEST_BLOCK_SIZE, ProviderFn::DigestBlockSize(size)),
        ];
        assert_eq!(entries(&table).count(), 1);
    }
}
