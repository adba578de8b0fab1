//! End-to-end digest flows through the default provider.

use hex_literal::hex;
use provkit_core::digest::{Digest, DigestContext};
use provkit_core::error::Error;
use provkit_core::libctx::LibCtx;
use std::sync::Arc;

fn ctx_with_default() -> Arc<LibCtx> {
    let ctx = LibCtx::new();
    provkit_default::install(&ctx).unwrap();
    ctx
}

#[test]
fn sha256_round_trip_matches_the_fixed_vector() {
    let ctx = ctx_with_default();
    // Case-insensitive fetch against the alias list.
    let md = Digest::fetch(&ctx, "sha-256", "").unwrap();
    assert_eq!(md.name(), "SHA-256");
    assert_eq!(md.size(), 32);
    assert_eq!(md.block_size(), Some(64));

    let mut dctx = DigestContext::new();
    dctx.init(&md).unwrap();
    dctx.update(b"abc").unwrap();
    let mut out = [0u8; 32];
    assert_eq!(dctx.finalize(&mut out).unwrap(), 32);
    assert_eq!(
        out,
        hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}

#[test]
fn every_advertised_digest_matches_its_backend() {
    let ctx = ctx_with_default();
    let vectors: &[(&str, &[u8])] = &[
        ("SHA-1", &hex!("a9993e364706816aba3e25717850c26c9cd0d89d")),
        (
            "SHA-224",
            &hex!("23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7"),
        ),
        (
            "SHA-256",
            &hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
        ),
        (
            "SHA-384",
            &hex!(
                "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded163"
                "1a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7"
            ),
        ),
        (
            "SHA-512",
            &hex!(
                "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea2"
                "0a9eeee64b55d39a2192992a274fc1a836ba3c23a3feebbd"
                "454d4423643ce80e2a9ac94fa54ca49f"
            ),
        ),
    ];
    for (name, expected) in vectors {
        let md = Digest::fetch(&ctx, name, "").unwrap();
        let mut dctx = DigestContext::new();
        let mut out = vec![0u8; md.size()];
        dctx.digest(&md, b"abc", &mut out).unwrap();
        assert_eq!(&out[..], *expected, "{name}");
    }

    // The truncated SHA-512 variants have no constant here; streaming and
    // one-shot paths must still agree with each other.
    for name in ["SHA-512/224", "SHA-512/256"] {
        let md = Digest::fetch(&ctx, name, "").unwrap();
        let mut oneshot = vec![0u8; md.size()];
        DigestContext::new()
            .digest(&md, b"abc", &mut oneshot)
            .unwrap();

        let mut dctx = DigestContext::new();
        dctx.init(&md).unwrap();
        dctx.update(b"ab").unwrap();
        dctx.update(b"c").unwrap();
        let mut streamed = vec![0u8; md.size()];
        dctx.finalize(&mut streamed).unwrap();
        assert_eq!(streamed, oneshot, "{name}");
    }
}

#[test]
fn update_without_init_is_protocol_misuse() {
    let ctx = ctx_with_default();
    let _md = Digest::fetch(&ctx, "SHA-256", "").unwrap();
    let mut dctx = DigestContext::new();
    assert!(matches!(
        dctx.update(b"abc"),
        Err(Error::ProtocolMisuse(_))
    ));
}

#[test]
fn dup_isolation() {
    let ctx = ctx_with_default();
    let md = Digest::fetch(&ctx, "SHA-256", "").unwrap();

    let mut a = DigestContext::new();
    a.init(&md).unwrap();
    a.update(b"abc").unwrap();

    let mut b = a.try_clone().unwrap();

    a.update(b"d").unwrap();
    let mut out_a = [0u8; 32];
    a.finalize(&mut out_a).unwrap();
    let mut out_b = [0u8; 32];
    b.finalize(&mut out_b).unwrap();

    let mut expect_abcd = [0u8; 32];
    DigestContext::new()
        .digest(&md, b"abcd", &mut expect_abcd)
        .unwrap();
    assert_eq!(out_a, expect_abcd);
    assert_eq!(
        out_b,
        hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}

#[test]
fn finalized_contexts_reinitialize() {
    let ctx = ctx_with_default();
    let md = Digest::fetch(&ctx, "SHA-1", "").unwrap();
    let mut dctx = DigestContext::new();
    let mut out = [0u8; 20];

    dctx.init(&md).unwrap();
    dctx.update(b"first message").unwrap();
    dctx.finalize(&mut out).unwrap();

    dctx.init(&md).unwrap();
    dctx.update(b"abc").unwrap();
    dctx.finalize(&mut out).unwrap();
    assert_eq!(out, hex!("a9993e364706816aba3e25717850c26c9cd0d89d"));
}

#[test]
fn do_all_lists_every_digest_once() {
    let ctx = ctx_with_default();
    let mut names = Vec::new();
    Digest::do_all(&ctx, |md| names.push(md.name().to_owned()));
    names.sort();
    assert_eq!(
        names,
        vec![
            "SHA-1",
            "SHA-224",
            "SHA-256",
            "SHA-384",
            "SHA-512",
            "SHA-512/224",
            "SHA-512/256",
        ]
    );
}

#[test]
fn sizes_and_block_sizes_are_reported() {
    let ctx = ctx_with_default();
    let md = Digest::fetch(&ctx, "SHA-384", "").unwrap();
    assert_eq!(md.size(), 48);
    assert_eq!(md.block_size(), Some(128));
    let md = Digest::fetch(&ctx, "SHA-512/224", "").unwrap();
    assert_eq!(md.size(), 28);
    assert_eq!(md.block_size(), Some(128));
}

#[test]
fn unknown_digest_is_not_found() {
    let ctx = ctx_with_default();
    assert!(matches!(
        Digest::fetch(&ctx, "WHIRLPOOL", ""),
        Err(Error::NotFound { .. })
    ));
}
