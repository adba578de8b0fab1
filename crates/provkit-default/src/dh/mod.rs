//! Diffie-Hellman key exchange and key management.
//!
//! Key material travels across the provider boundary as big-endian
//! big-number parameters (`p`, `g`, `pub`, `priv`); the provider-side
//! objects keep the private exponent in zeroizing storage. The derive
//! contract follows the generic key-exchange rules, with the
//! reconfigurable `pad` parameter choosing between modulus-length
//! zero-padded output and the stripped natural encoding.

mod bn;

use std::sync::Arc;

use provkit_core::dispatch::{self, DispatchEntry, KeyObj, OpCtx, OpState, ProvCtx, ProviderFn};
use provkit_core::error::{Error, Result};
use provkit_core::params::{keys, Params};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use bn::Bn;

/// DH domain parameters: prime modulus and generator.
struct DhParams {
    p: Bn,
    g: Bn,
}

/// A DH key: domain parameters, public value, optional private exponent.
struct DhKey {
    p: Bn,
    g: Bn,
    public: Bn,
    private: Option<Zeroizing<Bn>>,
}

fn required_bn(params: &Params, key: &str) -> Result<Bn> {
    let bytes = params
        .get_bn(key)
        .ok_or_else(|| Error::Configuration(format!("dh parameter {key:?} is required")))?;
    let value = Bn::from_be_bytes(bytes);
    if value.is_zero() {
        return Err(Error::Configuration(format!(
            "dh parameter {key:?} must be nonzero"
        )));
    }
    Ok(value)
}

// Key management slots.

fn import_domparams(_: &ProvCtx, params: &Params) -> Result<KeyObj> {
    let p = required_bn(params, keys::PKEY_DH_P)?;
    let g = required_bn(params, keys::PKEY_DH_G)?;
    Ok(Arc::new(DhParams { p, g }))
}

fn export_domparams(obj: &KeyObj, out: &mut Params) -> Result<()> {
    let domparams = obj
        .downcast_ref::<DhParams>()
        .ok_or(Error::ProtocolMisuse("foreign dh domain parameters"))?;
    out.set_bn(keys::PKEY_DH_P, &domparams.p.to_be_bytes());
    out.set_bn(keys::PKEY_DH_G, &domparams.g.to_be_bytes());
    Ok(())
}

fn free_domparams(_: KeyObj) {}

fn domparam_types() -> &'static [&'static str] {
    &[keys::PKEY_DH_P, keys::PKEY_DH_G]
}

fn import_key(_: &ProvCtx, params: &Params) -> Result<KeyObj> {
    let p = required_bn(params, keys::PKEY_DH_P)?;
    let g = required_bn(params, keys::PKEY_DH_G)?;
    // A public value must always be present; the private exponent only for
    // keys that will drive a derivation.
    let public = required_bn(params, keys::PKEY_DH_PUB)?;
    let private = params
        .get_bn(keys::PKEY_DH_PRIV)
        .map(|bytes| Zeroizing::new(Bn::from_be_bytes(bytes)));
    Ok(Arc::new(DhKey {
        p,
        g,
        public,
        private,
    }))
}

fn generate_key(_: &ProvCtx, domparams: Option<&KeyObj>, _params: &Params) -> Result<KeyObj> {
    let domparams = domparams
        .ok_or(Error::ProtocolMisuse("dh key generation requires domain parameters"))?
        .downcast_ref::<DhParams>()
        .ok_or(Error::ProtocolMisuse("foreign dh domain parameters"))?;

    // Random exponent in [2, p); the raw bytes are wiped once parsed.
    let mut rng = rand::thread_rng();
    let mut buf = Zeroizing::new(vec![0u8; domparams.p.byte_len()]);
    let two = Bn::from_u64(2);
    let private = loop {
        rng.fill_bytes(&mut buf);
        let mut candidate = Bn::from_be_bytes(&buf);
        if candidate >= domparams.p {
            candidate.zeroize();
            continue;
        }
        if candidate < two {
            continue;
        }
        break Zeroizing::new(candidate);
    };

    let public = domparams.g.mod_pow(&private, &domparams.p);
    tracing::debug!(bits = domparams.p.bit_len(), "generated dh keypair");
    Ok(Arc::new(DhKey {
        p: domparams.p.clone(),
        g: domparams.g.clone(),
        public,
        private: Some(private),
    }))
}

fn export_key(obj: &KeyObj, out: &mut Params) -> Result<()> {
    let key = obj
        .downcast_ref::<DhKey>()
        .ok_or(Error::ProtocolMisuse("foreign dh key"))?;
    out.set_bn(keys::PKEY_DH_P, &key.p.to_be_bytes());
    out.set_bn(keys::PKEY_DH_G, &key.g.to_be_bytes());
    out.set_bn(keys::PKEY_DH_PUB, &key.public.to_be_bytes());
    if let Some(private) = key.private.as_ref() {
        out.set_bn(keys::PKEY_DH_PRIV, &private.to_be_bytes());
    }
    Ok(())
}

fn free_key(_: KeyObj) {}

fn key_types() -> &'static [&'static str] {
    &[
        keys::PKEY_DH_P,
        keys::PKEY_DH_G,
        keys::PKEY_DH_PUB,
        keys::PKEY_DH_PRIV,
    ]
}

// Key exchange slots.

#[derive(Default)]
struct DhExchState {
    key: Option<Arc<DhKey>>,
    peer: Option<Arc<DhKey>>,
    pad: bool,
}

fn exch_state(s: &mut OpState) -> Result<&mut DhExchState> {
    s.downcast_mut()
        .ok_or(Error::ProtocolMisuse("foreign dh exchange state"))
}

fn dh_key(obj: &KeyObj) -> Result<Arc<DhKey>> {
    Arc::clone(obj)
        .downcast::<DhKey>()
        .map_err(|_| Error::ProtocolMisuse("foreign dh key"))
}

fn newctx(_: &ProvCtx) -> Result<OpCtx> {
    Ok(Box::<DhExchState>::default())
}

fn init(s: &mut OpState, key: &KeyObj) -> Result<()> {
    let key = dh_key(key)?;
    exch_state(s)?.key = Some(key);
    Ok(())
}

fn set_peer(s: &mut OpState, key: &KeyObj) -> Result<()> {
    let peer = dh_key(key)?;
    exch_state(s)?.peer = Some(peer);
    Ok(())
}

fn derive(s: &mut OpState, out: Option<&mut [u8]>) -> Result<usize> {
    let st = exch_state(s)?;
    let (Some(key), Some(peer)) = (st.key.as_ref(), st.peer.as_ref()) else {
        return Err(Error::ProtocolMisuse("dh derive before init and set_peer"));
    };

    let modulus_len = key.p.byte_len();
    let Some(out) = out else {
        // Size probe: the full modulus length, regardless of padding.
        return Ok(modulus_len);
    };

    let private = key
        .private
        .as_ref()
        .ok_or(Error::ProtocolMisuse("dh derive without a private exponent"))?;
    let secret = Zeroizing::new(peer.public.mod_pow(private, &key.p));
    let bytes = Zeroizing::new(secret.to_be_bytes());

    if st.pad {
        if out.len() < modulus_len {
            return Err(Error::ProtocolMisuse("dh secret buffer too small"));
        }
        let lead = modulus_len - bytes.len();
        out[..lead].fill(0);
        out[lead..modulus_len].copy_from_slice(&bytes);
        Ok(modulus_len)
    } else {
        if out.len() < bytes.len() {
            return Err(Error::ProtocolMisuse("dh secret buffer too small"));
        }
        out[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

fn freectx(_: OpCtx) {}

fn dupctx(s: &OpState) -> Result<OpCtx> {
    let st: &DhExchState = s
        .downcast_ref()
        .ok_or(Error::ProtocolMisuse("foreign dh exchange state"))?;
    Ok(Box::new(DhExchState {
        key: st.key.clone(),
        peer: st.peer.clone(),
        pad: st.pad,
    }))
}

fn set_params(s: &mut OpState, params: &Params) -> Result<()> {
    let pad = params
        .get_int(keys::EXCHANGE_PAD)
        .ok_or_else(|| Error::Configuration("dh set_params requires the pad parameter".into()))?;
    exch_state(s)?.pad = pad != 0;
    Ok(())
}

/// DH key exchange dispatch table.
pub const DH_KEYEXCH_FUNCTIONS: &[DispatchEntry] = &[
    DispatchEntry::new(dispatch::KEYEXCH_NEWCTX, ProviderFn::KeyExchNewCtx(newctx)),
    DispatchEntry::new(dispatch::KEYEXCH_INIT, ProviderFn::KeyExchInit(init)),
    DispatchEntry::new(dispatch::KEYEXCH_DERIVE, ProviderFn::KeyExchDerive(derive)),
    DispatchEntry::new(dispatch::KEYEXCH_SET_PEER, ProviderFn::KeyExchSetPeer(set_peer)),
    DispatchEntry::new(dispatch::KEYEXCH_FREECTX, ProviderFn::KeyExchFreeCtx(freectx)),
    DispatchEntry::new(dispatch::KEYEXCH_DUPCTX, ProviderFn::KeyExchDupCtx(dupctx)),
    DispatchEntry::new(
        dispatch::KEYEXCH_SET_PARAMS,
        ProviderFn::KeyExchSetParams(set_params),
    ),
];

/// DH key management dispatch table.
pub const DH_KEYMGMT_FUNCTIONS: &[DispatchEntry] = &[
    DispatchEntry::new(
        dispatch::KEYMGMT_IMPORTDOMPARAMS,
        ProviderFn::KeyMgmtImportDomParams(import_domparams),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_EXPORTDOMPARAMS,
        ProviderFn::KeyMgmtExportDomParams(export_domparams),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_FREEDOMPARAMS,
        ProviderFn::KeyMgmtFreeDomParams(free_domparams),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_IMPORTDOMPARAM_TYPES,
        ProviderFn::KeyMgmtImportDomParamTypes(domparam_types),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_EXPORTDOMPARAM_TYPES,
        ProviderFn::KeyMgmtExportDomParamTypes(domparam_types),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_IMPORTKEY,
        ProviderFn::KeyMgmtImportKey(import_key),
    ),
    DispatchEntry::new(dispatch::KEYMGMT_GENKEY, ProviderFn::KeyMgmtGenKey(generate_key)),
    DispatchEntry::new(
        dispatch::KEYMGMT_EXPORTKEY,
        ProviderFn::KeyMgmtExportKey(export_key),
    ),
    DispatchEntry::new(dispatch::KEYMGMT_FREEKEY, ProviderFn::KeyMgmtFreeKey(free_key)),
    DispatchEntry::new(
        dispatch::KEYMGMT_IMPORTKEY_TYPES,
        ProviderFn::KeyMgmtImportKeyTypes(key_types),
    ),
    DispatchEntry::new(
        dispatch::KEYMGMT_EXPORTKEY_TYPES,
        ProviderFn::KeyMgmtExportKeyTypes(key_types),
    ),
];
