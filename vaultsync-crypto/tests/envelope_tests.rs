use vaultsync_crypto::{
    decrypt_with_passphrase, encrypt_with_passphrase, envelope_version, CryptoError,
    IterationMode, KdfParams, PassphraseCipher, ENVELOPE_VERSION, MAX_MEMORY_COST,
    MAX_PARALLELISM, MAX_TIME_COST,
};

fn cipher(passphrase: &str) -> PassphraseCipher {
    PassphraseCipher::new(passphrase, KdfParams::fast(), IterationMode::Fixed { iterations: 1 })
        .unwrap()
}

#[test]
fn roundtrip_between_instances() {
    let a = cipher("correct horse");
    let b = cipher("correct horse");
    let sealed = a.encrypt(b"note body", b"h:01").unwrap();
    assert_eq!(b.decrypt(&sealed, b"h:01").unwrap(), b"note body");
}

#[test]
fn wrong_passphrase_is_authentication_error() {
    let sealed = cipher("right").encrypt(b"secret", b"").unwrap();
    let err = cipher("wrong").decrypt(&sealed, b"").unwrap_err();
    assert!(err.is_authentication());
}

#[test]
fn empty_passphrase_is_rejected() {
    let err = PassphraseCipher::new("", KdfParams::fast(), IterationMode::default()).unwrap_err();
    assert!(matches!(err, CryptoError::EmptyPassphrase));
}

#[test]
fn envelope_carries_version_byte() {
    let sealed = cipher("pw").encrypt(b"x", b"").unwrap();
    assert_eq!(envelope_version(&sealed), Some(ENVELOPE_VERSION));
}

#[test]
fn unknown_version_is_rejected() {
    let mut sealed = cipher("pw").encrypt(b"x", b"").unwrap();
    sealed[0] = 99;
    assert!(matches!(
        cipher("pw").decrypt(&sealed, b""),
        Err(CryptoError::UnsupportedVersion(99))
    ));
}

#[test]
fn truncated_envelope_is_malformed() {
    let sealed = cipher("pw").encrypt(b"x", b"").unwrap();
    assert!(matches!(
        cipher("pw").decrypt(&sealed[..8], b""),
        Err(CryptoError::Malformed(_))
    ));
    assert!(matches!(
        cipher("pw").decrypt(&[], b""),
        Err(CryptoError::Malformed(_))
    ));
}

#[test]
fn oversized_kdf_header_is_malformed() {
    let sealed = cipher("pw").encrypt(b"x", b"").unwrap();
    let patch = |at: usize, bytes: &[u8]| {
        let mut forged = sealed.clone();
        forged[at..at + bytes.len()].copy_from_slice(bytes);
        forged
    };

    for forged in [
        patch(1, &u32::MAX.to_be_bytes()),
        patch(5, &u32::MAX.to_be_bytes()),
        patch(5, &0u32.to_be_bytes()),
        patch(9, &[0]),
    ] {
        assert!(matches!(
            cipher("pw").decrypt(&forged, b""),
            Err(CryptoError::Malformed(_))
        ));
        assert!(matches!(
            decrypt_with_passphrase(&forged, "pw"),
            Err(CryptoError::Malformed(_))
        ));
    }
}

#[test]
fn kdf_bounds() {
    assert!(KdfParams::default().validate().is_ok());
    assert!(KdfParams::fast().validate().is_ok());
    let too_wide = KdfParams {
        parallelism: MAX_PARALLELISM + 1,
        ..KdfParams::fast()
    };
    assert!(too_wide.validate().is_err());
    let too_slow = KdfParams::fast().with_time_cost(MAX_TIME_COST + 1);
    assert!(too_slow.validate().is_err());
    let too_big = KdfParams {
        memory_cost: MAX_MEMORY_COST + 1,
        ..KdfParams::fast()
    };
    assert!(too_big.validate().is_err());
}

#[test]
fn iteration_count_travels_with_ciphertext() {
    let writer = cipher("pw");
    let sealed = writer.encrypt_with_iterations(b"payload", b"", 3).unwrap();
    // Reader is configured differently but still opens it.
    let reader =
        PassphraseCipher::new("pw", KdfParams::fast(), IterationMode::Fixed { iterations: 5 })
            .unwrap();
    assert_eq!(reader.decrypt(&sealed, b"").unwrap(), b"payload");
}

#[test]
fn dynamic_mode_roundtrip() {
    let writer =
        PassphraseCipher::new("pw", KdfParams::fast(), IterationMode::Dynamic { min: 1, max: 2 })
            .unwrap();
    let small = writer.encrypt(b"tiny", b"").unwrap();
    let large = writer.encrypt(&vec![7u8; 64 * 1024], b"").unwrap();
    assert_eq!(cipher("pw").decrypt(&small, b"").unwrap(), b"tiny");
    assert_eq!(cipher("pw").decrypt(&large, b"").unwrap(), vec![7u8; 64 * 1024]);
}

#[test]
fn string_roundtrip() {
    let c = cipher("pw");
    let encoded = c.encrypt_string("folder/note.md", b"path").unwrap();
    assert_eq!(c.decrypt_string(&encoded, b"path").unwrap(), "folder/note.md");
    assert!(c.decrypt_string("not base64!!", b"path").is_err());
}

#[test]
fn verifier_accepts_same_passphrase_only() {
    let verifier = cipher("vault-pass").make_verifier().unwrap();
    assert!(cipher("vault-pass").test_passphrase(&verifier));
    assert!(!cipher("other-pass").test_passphrase(&verifier));
    assert!(!cipher("vault-pass").test_passphrase("garbage"));
}

#[test]
fn warm_up_succeeds() {
    cipher("pw").warm_up(1024).unwrap();
}

#[test]
fn one_shot_functions_roundtrip() {
    let sealed = encrypt_with_passphrase(b"hello", "pw", &KdfParams::fast()).unwrap();
    assert_eq!(decrypt_with_passphrase(&sealed, "pw").unwrap(), b"hello");
    assert!(decrypt_with_passphrase(&sealed, "nope").unwrap_err().is_authentication());
}

#[test]
fn debug_hides_passphrase() {
    let debug = format!("{:?}", cipher("super-secret"));
    assert!(!debug.contains("super-secret"));
}
