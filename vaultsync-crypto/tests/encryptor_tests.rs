use std::sync::Arc;
use vaultsync_crypto::{
    ChunkCipher, IterationMode, KdfParams, PassphraseEncryptor, PassthroughEncryptor,
};

fn passphrase(pw: &str) -> PassphraseEncryptor {
    PassphraseEncryptor::new(pw, KdfParams::fast(), IterationMode::Fixed { iterations: 1 }).unwrap()
}

// ── PassthroughEncryptor ─────────────────────────────────────────

#[test]
fn passthrough_is_identity() {
    let enc = PassthroughEncryptor;
    assert_eq!(enc.seal("h:01", b"data").unwrap(), b"data");
    assert_eq!(enc.open("h:01", b"data").unwrap(), b"data");
    assert_eq!(enc.seal_path("a.md").unwrap(), "a.md");
    assert!(!enc.is_encrypting());
    assert!(enc.make_verifier().unwrap().is_none());
}

// ── PassphraseEncryptor ──────────────────────────────────────────

#[test]
fn passphrase_seal_open() {
    let enc = passphrase("pw");
    let sealed = enc.seal("h:01", b"chunk").unwrap();
    assert_ne!(sealed, b"chunk");
    assert_eq!(enc.open("h:01", &sealed).unwrap(), b"chunk");
    assert!(enc.is_encrypting());
}

#[test]
fn payload_under_wrong_id_fails() {
    let enc = passphrase("pw");
    let sealed = enc.seal("h:01", b"chunk").unwrap();
    assert!(enc.open("h:02", &sealed).unwrap_err().is_authentication());
}

#[test]
fn path_roundtrip() {
    let enc = passphrase("pw");
    let stored = enc.seal_path("folder/x.md").unwrap();
    assert_ne!(stored, "folder/x.md");
    assert_eq!(enc.open_path(&stored).unwrap(), "folder/x.md");
}

#[test]
fn verifier_checks_passphrase() {
    let verifier = passphrase("pw").make_verifier().unwrap().unwrap();
    assert!(passphrase("pw").test_passphrase(&verifier));
    assert!(!passphrase("other").test_passphrase(&verifier));
}

#[test]
fn usable_as_trait_object() {
    let ciphers: Vec<Arc<dyn ChunkCipher>> =
        vec![Arc::new(PassthroughEncryptor), Arc::new(passphrase("pw"))];
    for c in ciphers {
        let sealed = c.seal("h:ab", b"x").unwrap();
        assert_eq!(c.open("h:ab", &sealed).unwrap(), b"x");
    }
}
