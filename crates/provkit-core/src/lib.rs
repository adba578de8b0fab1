//! # provkit-core
//!
//! A pluggable cryptographic provider runtime: the layer between a generic
//! cryptographic API (digests, ciphers, key exchange, key management) and
//! interchangeable *provider* backends supplying the concrete algorithm
//! implementations.
//!
//! Given an operation kind, an algorithm name and a property query, the
//! runtime locates (or lazily constructs) the best implementation, returns
//! a reference-counted method record, and mediates the lifecycle of the
//! operation contexts bound to it.
//!
//! ## Architecture
//!
//! - [`dispatch`] - the stable numeric ABI: function ids and typed
//!   dispatch tables advertised by providers
//! - [`namemap`] - algorithm names and aliases to dense numeric ids
//! - [`property`] - property definitions, queries, and the matcher that
//!   scores candidates
//! - [`store`] - the per-context method store with its query cache
//! - [`fetch`] - the generic fetch / do-all entry points behind the typed
//!   front ends
//! - [`digest`], [`cipher`], [`keymgmt`], [`keyexch`] - per-operation
//!   method records and context envelopes
//! - [`libctx`] - the owning library context
//!
//! ## Example
//!
//! ```rust,no_run
//! use provkit_core::digest::{Digest, DigestContext};
//! use provkit_core::libctx::LibCtx;
//!
//! # fn example() -> Result<(), provkit_core::Error> {
//! let ctx = LibCtx::new();
//! // ... register providers ...
//! let md = Digest::fetch(&ctx, "SHA-256", "fips=yes")?;
//! let mut dctx = DigestContext::new();
//! dctx.init(&md)?;
//! dctx.update(b"abc")?;
//! let mut out = vec![0u8; md.size()];
//! dctx.finalize(&mut out)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cipher;
mod construct;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod keyexch;
pub mod keymgmt;
pub mod libctx;
pub mod namemap;
pub mod params;
pub mod property;
pub mod provider;
pub mod store;

pub use error::{Error, Result};
pub use libctx::LibCtx;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cipher::{Cipher, CipherContext};
    pub use crate::digest::{Digest, DigestContext};
    pub use crate::dispatch::{DispatchEntry, Operation, ProviderFn};
    pub use crate::error::{Error, Result};
    pub use crate::keyexch::{KeyExch, KeyExchContext};
    pub use crate::keymgmt::{DomainParams, Key, KeyMgmt};
    pub use crate::libctx::LibCtx;
    pub use crate::params::Params;
    pub use crate::provider::{Algorithm, AlgorithmList, CoreHandle, Provider, ProviderInit};
}
