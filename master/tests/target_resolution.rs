//! Crate-level coverage for the target resolver's whitelist and
//! skip-condition filtering end to end, plus the alive-scan network/
//! broadcast omission rule across stage types.

use scan_shared::models::{MatchOperator, SkipCondition, TargetPolicy, TargetSource};
use scan_shared::types::StageType;
use serde_json::Value;

use scan_master::resolver::resolve;

#[test]
fn whitelist_and_skip_conditions_both_remove_targets() {
    let policy = TargetPolicy {
        sources: vec![TargetSource::Manual { value: "1.1.1.1,2.2.2.2,3.3.3.3".to_string() }],
        whitelist_enabled: true,
        whitelist: vec!["2.2.2.2".to_string()],
        skip_conditions: vec![SkipCondition {
            field: "ip".to_string(),
            operator: MatchOperator::Equals,
            value: Value::String("3.3.3.3".to_string()),
            ignore_case: false,
        }],
        shuffle: false,
    };

    let mut attrs = std::collections::HashMap::new();
    let mut a3 = serde_json::Map::new();
    a3.insert("ip".to_string(), Value::String("3.3.3.3".to_string()));
    attrs.insert("3.3.3.3".to_string(), a3);

    let resolved = resolve(&policy, vec![], &attrs, 10, StageType::PortScan).unwrap();

    assert_eq!(resolved.chunks, vec![vec!["1.1.1.1".to_string()]]);
}

#[test]
fn disabled_whitelist_is_not_applied() {
    let policy = TargetPolicy {
        sources: vec![TargetSource::Manual { value: "1.1.1.1,2.2.2.2".to_string() }],
        whitelist_enabled: false,
        whitelist: vec!["2.2.2.2".to_string()],
        skip_conditions: vec![],
        shuffle: false,
    };

    let resolved = resolve(&policy, vec![], &Default::default(), 10, StageType::PortScan).unwrap();

    assert_eq!(resolved.chunks[0].len(), 2);
}

#[test]
fn alive_scan_omits_network_and_broadcast_for_slash_24() {
    let policy = TargetPolicy {
        sources: vec![TargetSource::Manual { value: "10.0.0.0/24".to_string() }],
        whitelist_enabled: false,
        whitelist: vec![],
        skip_conditions: vec![],
        shuffle: false,
    };

    let resolved = resolve(&policy, vec![], &Default::default(), 1000, StageType::IpAlive).unwrap();

    let all: Vec<&String> = resolved.chunks.iter().flatten().collect();
    assert_eq!(all.len(), 254);
    assert!(!all.iter().any(|ip| ip.as_str() == "10.0.0.0"));
    assert!(!all.iter().any(|ip| ip.as_str() == "10.0.0.255"));
}

#[test]
fn port_scan_keeps_network_and_broadcast_for_slash_24() {
    let policy = TargetPolicy {
        sources: vec![TargetSource::Manual { value: "10.0.0.0/24".to_string() }],
        whitelist_enabled: false,
        whitelist: vec![],
        skip_conditions: vec![],
        shuffle: false,
    };

    let resolved = resolve(&policy, vec![], &Default::default(), 1000, StageType::PortScan).unwrap();

    let all: Vec<&String> = resolved.chunks.iter().flatten().collect();
    assert_eq!(all.len(), 256);
    assert!(all.iter().any(|ip| ip.as_str() == "10.0.0.0"));
    assert!(all.iter().any(|ip| ip.as_str() == "10.0.0.255"));
}
