use vaultsync_crypto::{derive_key, generate_random_key, IterationMode, KdfParams, Salt};

const SALT: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

// ── derive_key ───────────────────────────────────────────────────

#[test]
fn derive_key_is_deterministic() {
    let salt = Salt::from_bytes(SALT);
    let key1 = derive_key("test_password_123", &salt, &KdfParams::fast()).unwrap();
    let key2 = derive_key("test_password_123", &salt, &KdfParams::fast()).unwrap();
    assert_eq!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_passwords_produce_different_keys() {
    let salt = Salt::from_bytes(SALT);
    let key1 = derive_key("password1", &salt, &KdfParams::fast()).unwrap();
    let key2 = derive_key("password2", &salt, &KdfParams::fast()).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn iteration_count_changes_key() {
    let salt = Salt::from_bytes(SALT);
    let params = KdfParams::fast();
    let key1 = derive_key("pw", &salt, &params).unwrap();
    let key2 = derive_key("pw", &salt, &params.with_time_cost(2)).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn invalid_params_are_rejected() {
    let params = KdfParams {
        memory_cost: 1,
        time_cost: 1,
        parallelism: 1,
    };
    assert!(derive_key("pw", &Salt::random(), &params).is_err());
}

#[test]
fn random_salts_differ() {
    assert_ne!(Salt::random(), Salt::random());
}

#[test]
fn random_keys_differ() {
    assert_ne!(
        generate_random_key().as_bytes(),
        generate_random_key().as_bytes()
    );
}

#[test]
fn derived_key_debug_is_redacted() {
    let debug = format!("{:?}", generate_random_key());
    assert!(debug.contains("REDACTED"));
}

#[test]
fn with_time_cost_never_zero() {
    assert_eq!(KdfParams::fast().with_time_cost(0).time_cost, 1);
}

// ── IterationMode ────────────────────────────────────────────────

#[test]
fn fixed_mode_ignores_size() {
    let mode = IterationMode::Fixed { iterations: 3 };
    assert_eq!(mode.iterations_for(0), 3);
    assert_eq!(mode.iterations_for(10 * 1024 * 1024), 3);
}

#[test]
fn dynamic_mode_scales_down_with_size() {
    let mode = IterationMode::Dynamic { min: 1, max: 5 };
    assert_eq!(mode.iterations_for(100), 5);
    assert_eq!(mode.iterations_for(4096), 4);
    assert_eq!(mode.iterations_for(3 * 4096), 3);
    assert_eq!(mode.iterations_for(64 * 1024 * 1024), 1);
}

#[test]
fn dynamic_mode_with_inverted_bounds_does_not_panic() {
    let mode = IterationMode::Dynamic { min: 8, max: 2 };
    assert_eq!(mode.iterations_for(0), 2);
}

#[test]
fn iteration_mode_serde() {
    let json = serde_json::to_string(&IterationMode::Dynamic { min: 1, max: 4 }).unwrap();
    assert_eq!(json, r#"{"mode":"dynamic","min":1,"max":4}"#);
    let back: IterationMode = serde_json::from_str(r#"{"mode":"fixed","iterations":7}"#).unwrap();
    assert_eq!(back, IterationMode::Fixed { iterations: 7 });
}
