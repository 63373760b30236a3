//! Tagging engine (§4.7): rule-tree evaluation against assets, auto-tag on
//! ingest with manual-tag preservation, and tag propagation.

use std::sync::Arc;

use parking_lot::RwLock;
use scan_shared::models::{AssetUnified, MatchNode, MatchRule};
use scan_shared::types::{EntityTagSource, TagId};
use serde_json::Value;
use tracing::debug;

use crate::error::MasterResult;
use crate::resolver;
use crate::storage::Store;

fn asset_to_attrs(asset: &AssetUnified) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert("ip".into(), Value::String(asset.ip.clone()));
    map.insert("port".into(), Value::from(asset.port));
    map.insert("protocol".into(), asset.protocol.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("service".into(), asset.service.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("product".into(), asset.product.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("version".into(), asset.version.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("banner".into(), asset.banner.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("hostname".into(), asset.hostname.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("os".into(), asset.os.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("url".into(), asset.url.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert("title".into(), asset.title.clone().map(Value::String).unwrap_or(Value::Null));
    map.insert(
        "status_code".into(),
        asset.status_code.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert("tech_stack".into(), Value::Array(asset.tech_stack.iter().cloned().map(Value::String).collect()));
    map.insert("is_web".into(), Value::Bool(asset.is_web));
    map
}

/// Evaluates a recursive match tree against an attribute map, reusing the
/// same operator semantics as the target resolver's skip-condition clauses.
pub fn eval_node(attrs: &serde_json::Map<String, Value>, node: &MatchNode) -> bool {
    match node {
        MatchNode::And { nodes } => nodes.iter().all(|n| eval_node(attrs, n)),
        MatchNode::Or { nodes } => nodes.iter().any(|n| eval_node(attrs, n)),
        MatchNode::Leaf { field, operator, value, ignore_case } => {
            let clause = scan_shared::models::SkipCondition {
                field: field.clone(),
                operator: *operator,
                value: value.clone(),
                ignore_case: *ignore_case,
            };
            resolver::eval_clause(attrs, &clause)
        }
    }
}

pub struct Tagger {
    store: Arc<Store>,
    /// Snapshot of enabled `asset` rules, swapped atomically on
    /// `reload_rules` so in-flight evaluations never see a half-updated
    /// rule set (§9 hot-reload).
    rules: RwLock<Arc<Vec<MatchRule>>>,
}

impl Tagger {
    pub fn new(store: Arc<Store>) -> Self {
        let tagger = Self { store, rules: RwLock::new(Arc::new(Vec::new())) };
        if let Err(e) = tagger.reload_rules() {
            debug!("initial match rule load failed: {e}");
        }
        tagger
    }

    /// Re-reads the `asset` rule set from storage and swaps it in.
    pub fn reload_rules(&self) -> MasterResult<()> {
        let fresh = self.store.match_rules_for("asset")?;
        *self.rules.write() = Arc::new(fresh);
        Ok(())
    }

    pub fn upsert_rule(&self, rule: &MatchRule) -> MasterResult<()> {
        self.store.upsert_match_rule(rule)?;
        self.reload_rules()
    }

    /// Applies every enabled `asset` match rule against a freshly-merged
    /// asset. A manual tag on the same entity/tag pair is never displaced by
    /// an auto-assigned one (§4.7 precedence rule).
    pub fn auto_tag_asset(&self, asset: &AssetUnified) -> MasterResult<()> {
        let attrs = asset_to_attrs(asset);
        let entity_id = format!("{}:{}", asset.ip, asset.port);
        let rules = self.rules.read().clone();

        for rule in rules.iter().filter(|r| r.enabled) {
            if eval_node(&attrs, &rule.tree) {
                self.apply_tag(&entity_id, rule.target_tag, EntityTagSource::Auto, Some(&rule.id))?;
            }
        }
        Ok(())
    }

    /// Writes or overwrites an entity tag only if the new source's
    /// precedence is not lower than whatever is already recorded.
    pub fn apply_tag(
        &self,
        entity_id: &str,
        tag_id: TagId,
        source: EntityTagSource,
        rule_id: Option<&str>,
    ) -> MasterResult<()> {
        let existing = self.store.get_entity_tag("asset", entity_id, tag_id)?;
        if let Some(existing) = &existing {
            if existing.source.precedence() > source.precedence() {
                debug!(
                    "skipping {:?}-sourced tag {} on {entity_id}: existing {:?} tag has higher precedence",
                    source, tag_id, existing.source
                );
                return Ok(());
            }
        }
        self.store.upsert_entity_tag(&scan_shared::models::EntityTag {
            entity_type: "asset".to_string(),
            entity_id: entity_id.to_string(),
            tag_id,
            source,
            rule_id: rule_id.map(str::to_string),
        })?;
        Ok(())
    }

    /// Diff/apply for a bulk tag sync call: removes auto/propagation tags no
    /// longer implied by `desired`, adds the missing ones. Manual tags are
    /// never removed by a sync.
    pub fn sync_entity_tags(
        &self,
        entity_id: &str,
        desired: &[TagId],
        source: EntityTagSource,
    ) -> MasterResult<()> {
        let current = self.store.entity_tags_for("asset", entity_id)?;
        let desired_set: std::collections::HashSet<TagId> = desired.iter().copied().collect();

        for tag in &current {
            if tag.source == EntityTagSource::Manual {
                continue;
            }
            if !desired_set.contains(&tag.tag_id) && tag.source == source {
                self.store.remove_entity_tag("asset", entity_id, tag.tag_id)?;
            }
        }
        for tag_id in desired {
            self.apply_tag(entity_id, *tag_id, source, None)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_shared::models::EntityTag;
    use scan_shared::types::EntityTagSource as Source;
    use tempfile::tempdir;

    fn tagger() -> Tagger {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
        Tagger::new(store)
    }

    #[test]
    fn manual_tag_is_not_overwritten_by_auto() {
        let tagger = tagger();
        let tag_id = TagId::new();
        tagger.store.upsert_entity_tag(&EntityTag {
            entity_type: "asset".into(),
            entity_id: "1.1.1.1:80".into(),
            tag_id,
            source: Source::Manual,
            rule_id: None,
        }).unwrap();

        tagger.apply_tag("1.1.1.1:80", tag_id, Source::Auto, Some("rule-1")).unwrap();

        let stored = tagger.store.get_entity_tag("asset", "1.1.1.1:80", tag_id).unwrap().unwrap();
        assert_eq!(stored.source, Source::Manual);
    }

    #[test]
    fn auto_tag_overwrites_lower_precedence_propagation() {
        let tagger = tagger();
        let tag_id = TagId::new();
        tagger.apply_tag("1.1.1.1:80", tag_id, Source::Propagation, None).unwrap();
        tagger.apply_tag("1.1.1.1:80", tag_id, Source::Manual, None).unwrap();

        let stored = tagger.store.get_entity_tag("asset", "1.1.1.1:80", tag_id).unwrap().unwrap();
        assert_eq!(stored.source, Source::Manual);
    }

    #[test]
    fn matching_rule_auto_tags_on_ingest() {
        let tagger = tagger();
        let tag_id = TagId::new();
        tagger.upsert_rule(&MatchRule {
            id: "rule-ssh".into(),
            target_tag: tag_id,
            entity_type: "asset".into(),
            priority: scan_shared::types::TaskPriority::Normal,
            enabled: true,
            tree: MatchNode::Leaf {
                field: "service".into(),
                operator: scan_shared::models::MatchOperator::Equals,
                value: Value::String("ssh".into()),
                ignore_case: false,
            },
        }).unwrap();

        let asset = AssetUnified {
            ip: "10.0.0.5".into(),
            port: 22,
            service: Some("ssh".into()),
            ..Default::default()
        };
        tagger.auto_tag_asset(&asset).unwrap();

        let tags = tagger.store.entity_tags_for("asset", "10.0.0.5:22").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag_id, tag_id);
        assert_eq!(tags[0].source, Source::Auto);
    }

    #[test]
    fn sync_leaves_manual_tags_alone() {
        let tagger = tagger();
        let manual_tag = TagId::new();
        let auto_tag = TagId::new();
        tagger.apply_tag("1.1.1.1:80", manual_tag, Source::Manual, None).unwrap();
        tagger.apply_tag("1.1.1.1:80", auto_tag, Source::Auto, None).unwrap();

        tagger.sync_entity_tags("1.1.1.1:80", &[], Source::Auto).unwrap();

        let remaining = tagger.store.entity_tags_for("asset", "1.1.1.1:80").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tag_id, manual_tag);
    }
}
