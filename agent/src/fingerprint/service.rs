//! Banner-regex fingerprint engine: first capture group is the version used
//! to template a CPE 2.3 string.

use regex::Regex;

use super::{derive_cpe, FingerprintRule, Match};

pub struct ServiceEngine;

impl ServiceEngine {
    pub fn evaluate(rules: &[FingerprintRule], banner: &str) -> Vec<Match> {
        let mut matches = Vec::new();
        for rule in rules {
            let Some(body) = &rule.service else { continue };
            let Ok(re) = Regex::new(&body.regex) else { continue };
            let Some(caps) = re.captures(banner) else { continue };
            let version = caps.get(1).map(|m| m.as_str());

            let cpe = rule
                .cpe
                .clone()
                .unwrap_or_else(|| derive_cpe(rule.vendor.as_deref(), &rule.product, version));

            matches.push(Match {
                product: rule.product.clone(),
                vendor: rule.vendor.clone(),
                r#type: rule.r#type.clone(),
                cpe,
                confidence: 0.9,
                source: "service".to_string(),
            });
        }
        matches
    }
}
