//! HTTP fingerprint engine: implicit-AND field rules plus an optional
//! match-tree or regex against the full response.

use std::collections::HashMap;

use regex::Regex;

use super::{derive_cpe, eval_match_tree, FingerprintRule, Match};

pub struct HttpContext {
    pub body: String,
    pub headers: HashMap<String, String>,
    pub status_code: u16,
}

impl HttpContext {
    pub fn title(&self) -> Option<String> {
        let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
        re.captures(&self.body).map(|c| c[1].trim().to_string())
    }

    pub fn server(&self) -> Option<&str> {
        self.headers.get("server").map(String::as_str)
    }

    pub fn x_powered_by(&self) -> Option<&str> {
        self.headers.get("x-powered-by").map(String::as_str)
    }

    pub fn all_headers(&self) -> String {
        self.headers.iter().map(|(k, v)| format!("{k}: {v}")).collect::<Vec<_>>().join("\n")
    }

    /// Status line + headers + body, the surface a rule's free-form regex
    /// runs against.
    pub fn all_response(&self) -> String {
        format!("{}\n{}\n\n{}", self.status_code, self.all_headers(), self.body)
    }

    fn attrs(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("title".into(), self.title().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
        map.insert(
            "server".into(),
            self.server().map(|s| serde_json::Value::String(s.to_string())).unwrap_or(serde_json::Value::Null),
        );
        map.insert(
            "x_powered_by".into(),
            self.x_powered_by().map(|s| serde_json::Value::String(s.to_string())).unwrap_or(serde_json::Value::Null),
        );
        map.insert("status_code".into(), serde_json::Value::from(self.status_code));
        map.insert("all_response".into(), serde_json::Value::String(self.all_response()));
        map
    }
}

pub struct HttpEngine;

impl HttpEngine {
    /// Standard fields (`title`/`server`/`x_powered_by`) are ANDed together
    /// implicitly; an optional `match_tree` or `regex` adds a further AND'd
    /// condition against the full response.
    pub fn evaluate(rules: &[FingerprintRule], ctx: &HttpContext) -> Vec<Match> {
        let attrs = ctx.attrs();
        let mut matches = Vec::new();

        for rule in rules {
            let Some(body) = &rule.http else { continue };

            if let Some(expect) = &body.title {
                if ctx.title().as_deref() != Some(expect.as_str()) {
                    continue;
                }
            }
            if let Some(expect) = &body.server {
                if !ctx.server().unwrap_or_default().to_lowercase().contains(&expect.to_lowercase()) {
                    continue;
                }
            }
            if let Some(expect) = &body.x_powered_by {
                if !ctx.x_powered_by().unwrap_or_default().to_lowercase().contains(&expect.to_lowercase()) {
                    continue;
                }
            }
            if let Some(tree) = &body.match_tree {
                if !eval_match_tree(&attrs, tree) {
                    continue;
                }
            }
            if let Some(pattern) = &body.regex {
                match Regex::new(pattern) {
                    Ok(re) if re.is_match(&ctx.all_response()) => {}
                    _ => continue,
                }
            }

            let cpe = rule.cpe.clone().unwrap_or_else(|| derive_cpe(rule.vendor.as_deref(), &rule.product, None));
            matches.push(Match {
                product: rule.product.clone(),
                vendor: rule.vendor.clone(),
                r#type: rule.r#type.clone(),
                cpe,
                confidence: 0.8,
                source: "http".to_string(),
            });
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::HttpRuleBody;

    #[test]
    fn server_header_substring_match() {
        let mut headers = HashMap::new();
        headers.insert("server".to_string(), "nginx/1.18.0".to_string());
        let ctx = HttpContext { body: "<html></html>".into(), headers, status_code: 200 };

        let rules = vec![FingerprintRule {
            id: "r1".into(),
            product: "nginx".into(),
            vendor: None,
            r#type: "server".into(),
            cpe: None,
            http: Some(HttpRuleBody { title: None, server: Some("nginx".into()), x_powered_by: None, match_tree: None, regex: None }),
            service: None,
        }];

        let matches = HttpEngine::evaluate(&rules, &ctx);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].product, "nginx");
    }

    #[test]
    fn non_matching_rule_is_skipped() {
        let ctx = HttpContext { body: String::new(), headers: HashMap::new(), status_code: 404 };
        let rules = vec![FingerprintRule {
            id: "r1".into(),
            product: "apache".into(),
            vendor: None,
            r#type: "server".into(),
            cpe: None,
            http: Some(HttpRuleBody { title: None, server: Some("apache".into()), x_powered_by: None, match_tree: None, regex: None }),
            service: None,
        }];
        assert!(HttpEngine::evaluate(&rules, &ctx).is_empty());
    }
}
