//! # provkit-default
//!
//! The built-in provider for the provkit runtime: SHA-1 and SHA-2 family
//! digests plus Diffie-Hellman key exchange and key management, all
//! advertised under the `default=yes` property.
//!
//! The crate is a pure consumer of the core's provider ABI. Register it
//! into a library context with [`install`]:
//!
//! ```rust
//! use provkit_core::digest::Digest;
//! use provkit_core::libctx::LibCtx;
//!
//! let ctx = LibCtx::new();
//! provkit_default::install(&ctx).unwrap();
//! let md = Digest::fetch(&ctx, "SHA-256", "").unwrap();
//! assert_eq!(md.size(), 32);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dh;
pub mod digests;

use std::sync::Arc;

use provkit_core::dispatch::{self, DispatchEntry, Operation, ProvCtx, ProviderFn};
use provkit_core::error::{Error, Result};
use provkit_core::libctx::LibCtx;
use provkit_core::params::{keys, Params};
use provkit_core::provider::{Algorithm, AlgorithmList, CoreHandle, Provider, ProviderInit};

/// The name this provider registers under.
pub const PROVIDER_NAME: &str = "default";

/// The property definition shared by every algorithm in this provider.
const PROPERTY_DEFINITION: &str = "default=yes";

static DIGESTS: &[Algorithm] = &[
    Algorithm {
        names: "SHA-1:SHA1",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA1_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-224:SHA2-224:SHA224",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA224_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-256:SHA2-256:SHA256",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA256_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-384:SHA2-384:SHA384",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA384_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-512:SHA2-512:SHA512",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA512_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-512/224:SHA2-512/224:SHA512-224",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA512_224_FUNCTIONS,
    },
    Algorithm {
        names: "SHA-512/256:SHA2-512/256:SHA512-256",
        property_definition: PROPERTY_DEFINITION,
        implementation: digests::SHA512_256_FUNCTIONS,
    },
];

static KEYEXCH: &[Algorithm] = &[Algorithm {
    names: "DH:dhKeyAgreement",
    property_definition: PROPERTY_DEFINITION,
    implementation: dh::DH_KEYEXCH_FUNCTIONS,
}];

static KEYMGMT: &[Algorithm] = &[Algorithm {
    names: "DH:dhKeyAgreement",
    property_definition: PROPERTY_DEFINITION,
    implementation: dh::DH_KEYMGMT_FUNCTIONS,
}];

/// The provider context; this provider keeps no state of its own.
struct DefaultProvCtx;

fn query_operation(_: &ProvCtx, operation: Operation) -> Option<AlgorithmList> {
    let algorithms = match operation {
        Operation::Digest => DIGESTS,
        Operation::KeyMgmt => KEYMGMT,
        Operation::KeyExch => KEYEXCH,
        Operation::Cipher => return None,
    };
    Some(AlgorithmList {
        algorithms,
        no_store: false,
    })
}

fn param_types(_: &ProvCtx) -> &'static [&'static str] {
    &[keys::PROV_NAME, keys::PROV_VERSION, keys::PROV_BUILDINFO]
}

fn get_params(_: &ProvCtx, params: &mut Params) -> Result<()> {
    params.set_utf8(keys::PROV_NAME, "provkit default provider");
    params.set_utf8(keys::PROV_VERSION, env!("CARGO_PKG_VERSION"));
    params.set_utf8(
        keys::PROV_BUILDINFO,
        concat!("provkit-default ", env!("CARGO_PKG_VERSION")),
    );
    Ok(())
}

fn teardown(_: &ProvCtx) -> Result<()> {
    Ok(())
}

/// The provider's init entry point, compatible with
/// [`LibCtx::register_provider`].
///
/// # Errors
///
/// Fails when the owning library context is already gone.
pub fn provider_init(core: &CoreHandle) -> Result<ProviderInit> {
    // The provider is context-scoped; refuse to load into a dying context.
    if core.libctx().is_none() {
        return Err(Error::Configuration(
            "default provider loaded without a library context".into(),
        ));
    }
    Ok(ProviderInit {
        provctx: Arc::new(DefaultProvCtx),
        dispatch: vec![
            DispatchEntry::new(
                dispatch::PROVIDER_TEARDOWN,
                ProviderFn::ProviderTeardown(teardown),
            ),
            DispatchEntry::new(
                dispatch::PROVIDER_GET_PARAM_TYPES,
                ProviderFn::ProviderParamTypes(param_types),
            ),
            DispatchEntry::new(
                dispatch::PROVIDER_GET_PARAMS,
                ProviderFn::ProviderGetParams(get_params),
            ),
            DispatchEntry::new(
                dispatch::PROVIDER_QUERY_OPERATION,
                ProviderFn::ProviderQueryOperation(query_operation),
            ),
        ],
    })
}

/// Registers the default provider into `libctx` under [`PROVIDER_NAME`]
/// with priority 0.
///
/// # Errors
///
/// Fails when a provider of the same name is already registered.
pub fn install(libctx: &Arc<LibCtx>) -> Result<Arc<Provider>> {
    libctx.register_provider(PROVIDER_NAME, 0, provider_init)
}
