//! Crate-level coverage that a manually-applied tag survives both a direct
//! lower-precedence `apply_tag` call and a full `auto_tag_asset` pass driven
//! by a matching rule, verified through an independently-opened `Store`
//! handle (integration tests only see the crate's public surface).

use std::sync::Arc;

use scan_shared::models::{AssetUnified, EntityTag, MatchNode, MatchRule};
use scan_shared::types::{EntityTagSource, TagId, TaskPriority};
use serde_json::Value;
use tempfile::tempdir;

use scan_master::storage::Store;
use scan_master::tagging::Tagger;

#[test]
fn manual_tag_survives_direct_auto_apply() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap();
    let store = Arc::new(Store::open(path).unwrap());
    let tagger = Tagger::new(store.clone());

    let tag_id = TagId::new();
    store
        .upsert_entity_tag(&EntityTag {
            entity_type: "asset".into(),
            entity_id: "1.1.1.1:80".into(),
            tag_id,
            source: EntityTagSource::Manual,
            rule_id: None,
        })
        .unwrap();

    tagger.apply_tag("1.1.1.1:80", tag_id, EntityTagSource::Auto, Some("rule-1")).unwrap();

    let stored = store.get_entity_tag("asset", "1.1.1.1:80", tag_id).unwrap().unwrap();
    assert_eq!(stored.source, EntityTagSource::Manual);
}

#[test]
fn manual_tag_survives_a_matching_rule_auto_tagging_the_same_asset() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap();
    let store = Arc::new(Store::open(path).unwrap());
    let tagger = Tagger::new(store.clone());

    let tag_id = TagId::new();
    store
        .upsert_entity_tag(&EntityTag {
            entity_type: "asset".into(),
            entity_id: "10.0.0.5:22".into(),
            tag_id,
            source: EntityTagSource::Manual,
            rule_id: None,
        })
        .unwrap();

    tagger
        .upsert_rule(&MatchRule {
            id: "rule-ssh".into(),
            target_tag: tag_id,
            entity_type: "asset".into(),
            priority: TaskPriority::Normal,
            enabled: true,
            tree: MatchNode::Leaf {
                field: "service".into(),
                operator: scan_shared::models::MatchOperator::Equals,
                value: Value::String("ssh".into()),
                ignore_case: false,
            },
        })
        .unwrap();

    let asset = AssetUnified {
        ip: "10.0.0.5".into(),
        port: 22,
        service: Some("ssh".into()),
        ..Default::default()
    };
    tagger.auto_tag_asset(&asset).unwrap();

    let tags = store.entity_tags_for("asset", "10.0.0.5:22").unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].source, EntityTagSource::Manual);
}

#[test]
fn sync_entity_tags_never_removes_a_manual_tag() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap();
    let store = Arc::new(Store::open(path).unwrap());
    let tagger = Tagger::new(store.clone());

    let manual_tag = TagId::new();
    let auto_tag = TagId::new();
    tagger.apply_tag("2.2.2.2:443", manual_tag, EntityTagSource::Manual, None).unwrap();
    tagger.apply_tag("2.2.2.2:443", auto_tag, EntityTagSource::Auto, None).unwrap();

    tagger.sync_entity_tags("2.2.2.2:443", &[], EntityTagSource::Auto).unwrap();

    let remaining = store.entity_tags_for("asset", "2.2.2.2:443").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].tag_id, manual_tag);
}
