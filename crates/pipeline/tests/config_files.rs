//! Node configuration files on disk.

use std::io::Write;
use trustproof_pipeline::{NodeConfig, ProofError, ProofErrorKind};

#[test]
fn test_load_node_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
node_id = "proof-node-eu-1"
log_format = "json"

[fusion]
partition_threshold = 40

[pipeline.retry]
max_attempts = 5

[pipeline.cache]
enabled = false

[pool]
heartbeat_interval_ms = 5000
max_workers = 4
"#
    )
    .unwrap();

    let config = NodeConfig::load(file.path()).unwrap();
    assert_eq!(config.node_id, "proof-node-eu-1");
    assert_eq!(config.log_format, "json");
    assert_eq!(config.fusion.partition_threshold, 40);
    assert_eq!(config.pipeline.retry.max_attempts, 5);
    assert_eq!(config.pipeline.retry.base_delay_ms, 1_000);
    assert!(!config.pipeline.cache.enabled);
    assert_eq!(config.pool.offline_after_ms(), 10_000);
    assert_eq!(config.pool.max_workers, 4);
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = tempfile::tempdir().unwrap();
    assert!(NodeConfig::load(dir.path().join("absent.toml")).is_err());

    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "node_id = [unterminated").unwrap();
    assert!(NodeConfig::load(&path).is_err());
}

#[test]
fn test_errors_serialize_with_stable_codes() {
    let error = ProofError::new(ProofErrorKind::ProofTampered, "content hash mismatch");
    let json = serde_json::to_value(&error).unwrap();
    assert_eq!(json["kind"], "PROOF_TAMPERED");
    assert_eq!(json["severity"], "Critical");
    assert_eq!(json["recoverability"], "Fatal");

    let back: ProofError = serde_json::from_value(json).unwrap();
    assert_eq!(back, error);
}
