use serde_yaml::Value;

use crate::config::*;
use crate::mem::AddressInterval;

#[test]
fn architecture_name() {
    let config = Config::from_yaml_str("architecture: M68kSystem\ntimeout: 30\n")
        .expect("failed to parse config");
    assert_eq!(config.architecture(), Some("M68kSystem"));
    assert_eq!(config.get("timeout"), Some(&Value::from(30)));
}

#[test]
fn missing_architecture() {
    let config = Config::from_yaml_str("timeout: 30").expect("failed to parse config");
    assert_eq!(config.architecture(), None);
}

#[test]
fn non_string_architecture() {
    let config = Config::from_yaml_str("architecture: [M68kSystem]").expect("failed to parse config");
    assert_eq!(config.architecture(), None);
}

#[test]
fn empty_document() {
    let config = Config::from_yaml_str("").expect("failed to parse config");
    assert_eq!(config, Config::default());
}

#[test]
fn non_mapping_document() {
    let err = Config::from_yaml_str("- architecture").expect_err("sequence should be rejected");
    assert!(matches!(err, Error::NotAMapping(ref kind) if kind == "a sequence"));
}

#[test]
fn malformed_document() {
    let err = Config::from_yaml_str("architecture: [").expect_err("invalid yaml should fail");
    assert!(matches!(err, Error::Parse(_)));
}

#[test]
fn insert_overrides() {
    let mut config = Config::for_architecture("M68kSystem");
    let previous = config.insert(ARCHITECTURE_KEY, "Other");
    assert_eq!(previous, Some(Value::from("M68kSystem")));
    assert_eq!(config.architecture(), Some("Other"));
}

#[test]
fn shared_memory_defaults_to_none() {
    let config = Config::for_architecture("M68kSystem");
    assert_eq!(config.shared_memory().expect("no list is valid"), Vec::new());

    let config = Config::from_yaml_str("shared-memory:").expect("failed to parse config");
    assert!(config.shared_memory().expect("null list is valid").is_empty());
}

#[test]
fn shared_memory_regions() {
    let config = Config::from_yaml_str(
        "shared-memory:\n  - address: 8192\n    size: 4096\n    driver: timer\n",
    )
    .expect("failed to parse config");
    let regions = config.shared_memory().expect("valid list");
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].interval, AddressInterval::new(0x2000, 0x2fff));
    assert_eq!(regions[0].driver.as_deref(), Some("timer"));
}

#[test]
fn shared_memory_rejects_bad_regions() {
    let empty = Config::from_yaml_str("shared-memory: [{ address: 16, size: 0 }]")
        .expect("failed to parse config");
    assert!(matches!(
        empty.shared_memory(),
        Err(Error::InvalidSharedMemory { address: 16, size: 0 })
    ));

    let overlapping = Config::from_yaml_str(
        "shared-memory: [{ address: 256, size: 16 }, { address: 264, size: 16 }]",
    )
    .expect("failed to parse config");
    assert!(matches!(
        overlapping.shared_memory(),
        Err(Error::OverlappingSharedMemory(..))
    ));

    let unknown = Config::from_yaml_str("shared-memory: [{ address: 256, length: 16 }]")
        .expect("failed to parse config");
    let err = unknown.shared_memory().expect_err("unknown field should be rejected");
    assert!(matches!(err, Error::InvalidEntry { key: SHARED_MEMORY_KEY, .. }));
}
