use pretty_assertions::assert_eq;
use vaultsync_crypto::{HashAlgorithm, IterationMode};
use vaultsync_sync::{
    ConfigChange, ConflictPolicy, EncryptionConfig, EngineConfig, RemoteConfig, SyncError,
};

fn encrypted(passphrase: &str) -> EngineConfig {
    EngineConfig {
        encryption: EncryptionConfig {
            enabled: true,
            passphrase: Some(passphrase.into()),
            ..EncryptionConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[test]
fn default_config_is_valid() {
    EngineConfig::default().validate().unwrap();
}

#[test]
fn encryption_requires_passphrase() {
    let config = EngineConfig {
        encryption: EncryptionConfig {
            enabled: true,
            passphrase: None,
            ..EncryptionConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(matches!(config.validate(), Err(SyncError::Config(_))));
}

#[test]
fn obfuscation_requires_encryption() {
    let mut config = EngineConfig::default();
    config.encryption.obfuscate_paths = true;
    assert!(matches!(config.validate(), Err(SyncError::Config(_))));
}

#[test]
fn tiny_batches_rejected() {
    let mut config = EngineConfig::default();
    config.replication.batch_size = 1;
    assert!(config.validate().is_err());
}

#[test]
fn kdf_parallelism_must_fit_the_envelope() {
    let mut config = encrypted("pw");
    config.encryption.kdf.parallelism = 256;
    assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    config.encryption.kdf.parallelism = 255;
    config.validate().unwrap();
}

#[test]
fn iteration_mode_is_bounded() {
    let mut config = encrypted("pw");
    config.encryption.iteration_mode = IterationMode::Dynamic { min: 1, max: 10_000 };
    assert!(matches!(config.validate(), Err(SyncError::Config(_))));
}

#[test]
fn retry_factor_must_be_finite() {
    for factor in [f64::INFINITY, f64::NAN, 0.5] {
        let mut config = EngineConfig::default();
        config.retry.factor = factor;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
    let mut config = EngineConfig::default();
    config.retry.max_attempts = Some(0);
    assert!(config.validate().is_err());
}

#[test]
fn bad_remote_rejected() {
    let config = EngineConfig {
        remote: RemoteConfig::CouchDb {
            url: "ftp://example.com".into(),
            database: "vault".into(),
            username: String::new(),
            password: String::new(),
        },
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn passphrase_change_needs_rebuild() {
    let current = encrypted("first");
    let next = EngineConfig {
        device_id: current.device_id,
        ..encrypted("second")
    };
    let err = current.transition_to(&next, false).unwrap_err();
    assert!(matches!(err, SyncError::RebuildRequired(_)));

    let changes = current.transition_to(&next, true).unwrap();
    assert_eq!(changes, vec![ConfigChange::Passphrase]);
}

#[test]
fn hash_algorithm_change_is_destructive() {
    let current = EngineConfig::default();
    let next = EngineConfig {
        hash_algorithm: HashAlgorithm::Sha1,
        ..current.clone()
    };
    assert!(current.transition_to(&next, false).is_err());
}

#[test]
fn policy_change_applies_directly() {
    let current = EngineConfig::default();
    let next = EngineConfig {
        conflict: ConflictPolicy {
            prefer_newer: true,
            ..ConflictPolicy::default()
        },
        device_name: "laptop".into(),
        ..current.clone()
    };
    let changes = current.transition_to(&next, false).unwrap();
    assert_eq!(changes, vec![ConfigChange::Conflict, ConfigChange::DeviceName]);
    assert!(changes.iter().all(|c| !c.is_destructive()));
}

#[test]
fn device_id_is_fixed() {
    let current = EngineConfig::default();
    let next = EngineConfig::default();
    assert!(matches!(
        current.transition_to(&next, true),
        Err(SyncError::Config(_))
    ));
}

#[test]
fn debug_output_redacts_secrets() {
    let mut config = encrypted("hunter2");
    config.remote = RemoteConfig::CouchDb {
        url: "https://couch.example.com".into(),
        database: "vault".into(),
        username: "admin".into(),
        password: "s3cret".into(),
    };
    let debug = format!("{config:?}");
    assert!(!debug.contains("hunter2"));
    assert!(!debug.contains("s3cret"));
    assert!(debug.contains("[REDACTED]"));
}

#[test]
fn remote_config_is_tagged() {
    let raw = r#"{
        "type": "object_store",
        "bucket": "notes",
        "region": "eu-west-1",
        "access_key_id": "AK",
        "secret_access_key": "SK"
    }"#;
    let remote: RemoteConfig = serde_json::from_str(raw).unwrap();
    assert_eq!(remote.peer_label(), "s3://notes");
    match remote {
        RemoteConfig::ObjectStore {
            endpoint, prefix, ..
        } => {
            assert_eq!(endpoint, None);
            assert_eq!(prefix, "");
        }
        RemoteConfig::CouchDb { .. } => panic!("wrong variant"),
    }
}

#[test]
fn inactive_passphrase_is_ignored() {
    let encryption = EncryptionConfig {
        enabled: false,
        passphrase: Some("unused".into()),
        ..EncryptionConfig::default()
    };
    assert_eq!(encryption.active_passphrase(), None);
}
