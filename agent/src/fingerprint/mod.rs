//! Rule-driven product/CPE identification (§4.8). Rules are held behind an
//! atomically-swapped snapshot so a reload never interrupts an in-flight
//! match (§9 rule hot-reload).

pub mod http;
pub mod service;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use http::{HttpContext, HttpEngine};
pub use service::ServiceEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub product: String,
    pub vendor: Option<String>,
    pub r#type: String,
    pub cpe: String,
    pub confidence: f32,
    pub source: String,
}

/// The in-house rule schema. `goby` rule files declare the same shape under
/// different field names and are translated into this on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRule {
    pub id: String,
    pub product: String,
    pub vendor: Option<String>,
    pub r#type: String,
    pub cpe: Option<String>,
    #[serde(default)]
    pub http: Option<HttpRuleBody>,
    #[serde(default)]
    pub service: Option<ServiceRuleBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRuleBody {
    pub title: Option<String>,
    pub server: Option<String>,
    pub x_powered_by: Option<String>,
    pub match_tree: Option<scan_shared::models::MatchNode>,
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRuleBody {
    pub regex: String,
}

/// Evaluates a recursive match tree against an attribute map, mirroring the
/// operator semantics used by the target resolver's skip conditions. `Cidr`
/// is not meaningful against HTTP response attributes and always fails.
pub(crate) fn eval_match_tree(attrs: &serde_json::Map<String, serde_json::Value>, node: &scan_shared::models::MatchNode) -> bool {
    use scan_shared::models::{MatchNode, MatchOperator, SkipCondition};
    use serde_json::Value;

    fn value_as_str(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn eval_leaf(attrs: &serde_json::Map<String, Value>, clause: &SkipCondition) -> bool {
        let field_value = attrs.get(&clause.field);
        let norm = |s: &str| if clause.ignore_case { s.to_lowercase() } else { s.to_string() };

        match clause.operator {
            MatchOperator::Exists => field_value.is_some(),
            MatchOperator::IsNull => field_value.map(Value::is_null).unwrap_or(true),
            MatchOperator::IsNotNull => field_value.map(|v| !v.is_null()).unwrap_or(false),
            MatchOperator::Cidr => false,
            _ => {
                let Some(fv) = field_value else { return false };
                match clause.operator {
                    MatchOperator::Equals => norm(&value_as_str(fv)) == norm(&value_as_str(&clause.value)),
                    MatchOperator::NotEquals => norm(&value_as_str(fv)) != norm(&value_as_str(&clause.value)),
                    MatchOperator::Contains => norm(&value_as_str(fv)).contains(&norm(&value_as_str(&clause.value))),
                    MatchOperator::StartsWith => norm(&value_as_str(fv)).starts_with(&norm(&value_as_str(&clause.value))),
                    MatchOperator::EndsWith => norm(&value_as_str(fv)).ends_with(&norm(&value_as_str(&clause.value))),
                    MatchOperator::Regex => {
                        let pattern = value_as_str(&clause.value);
                        regex::Regex::new(&pattern).map(|re| re.is_match(&value_as_str(fv))).unwrap_or(false)
                    }
                    MatchOperator::In => clause
                        .value
                        .as_array()
                        .map(|arr| arr.iter().any(|v| norm(&value_as_str(v)) == norm(&value_as_str(fv))))
                        .unwrap_or(false),
                    MatchOperator::NotIn => !clause
                        .value
                        .as_array()
                        .map(|arr| arr.iter().any(|v| norm(&value_as_str(v)) == norm(&value_as_str(fv))))
                        .unwrap_or(false),
                    MatchOperator::ListContains => fv
                        .as_array()
                        .map(|arr| arr.iter().any(|v| norm(&value_as_str(v)) == norm(&value_as_str(&clause.value))))
                        .unwrap_or(false),
                    _ => false,
                }
            }
        }
    }

    match node {
        MatchNode::And { nodes } => nodes.iter().all(|n| eval_match_tree(attrs, n)),
        MatchNode::Or { nodes } => nodes.iter().any(|n| eval_match_tree(attrs, n)),
        MatchNode::Leaf { field, operator, value, ignore_case } => eval_leaf(
            attrs,
            &SkipCondition { field: field.clone(), operator: *operator, value: value.clone(), ignore_case: *ignore_case },
        ),
    }
}

pub(crate) fn derive_cpe(vendor: Option<&str>, product: &str, version: Option<&str>) -> String {
    format!(
        "cpe:2.3:a:{}:{}:{}:*:*:*:*:*:*:*",
        vendor.unwrap_or("*").to_lowercase().replace(' ', "_"),
        product.to_lowercase().replace(' ', "_"),
        version.unwrap_or("*"),
    )
}

/// Converts a Goby-style rule object (`{"product":..., "rule":[{"http":...}]}`
/// flattened via keyword fields) into the in-house schema. Malformed entries
/// return `None` and are skipped by the caller with a warning, never
/// aborting the whole load.
pub fn from_goby_schema(raw: &serde_json::Value) -> Option<FingerprintRule> {
    let product = raw.get("product")?.as_str()?.to_string();
    let id = raw.get("id").and_then(|v| v.as_str()).unwrap_or(&product).to_string();
    let r#type = raw.get("level").and_then(|v| v.as_str()).unwrap_or("application").to_string();
    let regex = raw.get("regular").and_then(|v| v.as_str()).map(str::to_string);
    Some(FingerprintRule {
        id,
        product,
        vendor: raw.get("company").and_then(|v| v.as_str()).map(str::to_string),
        r#type,
        cpe: raw.get("cpe").and_then(|v| v.as_str()).map(str::to_string),
        http: None,
        service: regex.map(|regex| ServiceRuleBody { regex }),
    })
}

pub struct RuleStore {
    rules: RwLock<Arc<Vec<FingerprintRule>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self { rules: RwLock::new(Arc::new(Vec::new())) }
    }

    pub fn snapshot(&self) -> Arc<Vec<FingerprintRule>> {
        self.rules.read().clone()
    }

    /// Loads rules from the in-house JSON schema (array of `FingerprintRule`).
    /// Individual malformed entries are skipped with a warning rather than
    /// aborting the whole batch.
    pub fn load_json(&self, raw: &str) {
        let parsed: Vec<serde_json::Value> = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("fingerprint rule file is not a JSON array: {e}");
                return;
            }
        };
        let mut loaded = Vec::with_capacity(parsed.len());
        for entry in parsed {
            match serde_json::from_value::<FingerprintRule>(entry.clone()) {
                Ok(rule) => loaded.push(rule),
                Err(_) => match from_goby_schema(&entry) {
                    Some(rule) => loaded.push(rule),
                    None => warn!("skipping invalid fingerprint rule: {entry}"),
                },
            }
        }
        *self.rules.write() = Arc::new(loaded);
    }

    pub fn load_rules(&self, rules: Vec<FingerprintRule>) {
        *self.rules.write() = Arc::new(rules);
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}
