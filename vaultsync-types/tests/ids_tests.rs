use vaultsync_types::{ChunkId, DeviceId, DocumentId};
use std::collections::HashSet;
use std::str::FromStr;

// ── DeviceId ─────────────────────────────────────────────────────

#[test]
fn device_id_new_is_unique() {
    let a = DeviceId::new();
    let b = DeviceId::new();
    assert_ne!(a, b);
}

#[test]
fn device_id_is_random_v4() {
    assert_eq!(DeviceId::new().as_uuid().get_version_num(), 4);
}

#[test]
fn device_id_display_and_parse() {
    let id = DeviceId::new();
    let parsed = DeviceId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn device_id_from_str_invalid() {
    assert!(DeviceId::from_str("garbage").is_err());
}

#[test]
fn device_id_serde_is_transparent() {
    let id = DeviceId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

#[test]
fn device_ids_hash_distinctly() {
    let set: HashSet<DeviceId> = (0..50).map(|_| DeviceId::new()).collect();
    assert_eq!(set.len(), 50);
}

// ── DocumentId ───────────────────────────────────────────────────

#[test]
fn document_id_from_plain_path() {
    let id = DocumentId::from_path("notes/today.md");
    assert_eq!(id.as_str(), "notes/today.md");
    assert!(!id.is_obfuscated());
}

#[test]
fn document_id_escapes_reserved_prefix() {
    let id = DocumentId::from_path("_design.md");
    assert_eq!(id.as_str(), "/_design.md");
}

#[test]
fn document_id_obfuscated_prefix() {
    let id = DocumentId::obfuscated("abcdef");
    assert_eq!(id.as_str(), "f:abcdef");
    assert!(id.is_obfuscated());
}

// ── ChunkId ──────────────────────────────────────────────────────

#[test]
fn chunk_id_from_digest() {
    let id = ChunkId::from_digest("00ff");
    assert_eq!(id.as_str(), "h:00ff");
    assert_eq!(id.digest(), "00ff");
}

#[test]
fn chunk_id_parse_valid() {
    let id: ChunkId = "h:deadbeef".parse().unwrap();
    assert_eq!(id.digest(), "deadbeef");
}

#[test]
fn chunk_id_parse_rejects_missing_prefix() {
    assert!("deadbeef".parse::<ChunkId>().is_err());
}

#[test]
fn chunk_id_parse_rejects_non_hex() {
    assert!("h:xyz".parse::<ChunkId>().is_err());
    assert!("h:".parse::<ChunkId>().is_err());
}
