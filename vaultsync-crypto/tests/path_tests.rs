use vaultsync_crypto::{
    decrypt_path, encrypt_path, is_encrypted_path, obfuscate_path, IterationMode, KdfParams,
    PassphraseCipher,
};

#[test]
fn obfuscation_is_deterministic() {
    let a = obfuscate_path("notes/today.md", "pw");
    let b = obfuscate_path("notes/today.md", "pw");
    assert_eq!(a, b);
    assert!(a.is_obfuscated());
    assert!(!a.as_str().contains("today"));
}

#[test]
fn obfuscation_depends_on_passphrase_and_path() {
    let base = obfuscate_path("a.md", "pw");
    assert_ne!(base, obfuscate_path("a.md", "pw2"));
    assert_ne!(base, obfuscate_path("b.md", "pw"));
}

#[test]
fn encrypted_path_roundtrip() {
    let cipher =
        PassphraseCipher::new("pw", KdfParams::fast(), IterationMode::Fixed { iterations: 1 })
            .unwrap();
    let stored = encrypt_path(&cipher, "dir/file.md").unwrap();
    assert!(is_encrypted_path(&stored));
    assert_eq!(decrypt_path(&cipher, &stored).unwrap(), "dir/file.md");
}

#[test]
fn plain_path_passes_through_decrypt() {
    let cipher =
        PassphraseCipher::new("pw", KdfParams::fast(), IterationMode::Fixed { iterations: 1 })
            .unwrap();
    assert_eq!(decrypt_path(&cipher, "plain.md").unwrap(), "plain.md");
}
