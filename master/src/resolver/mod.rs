//! Target resolver (§4.1): expands a stage's target policy into a
//! deduplicated, chunked sequence of `AgentTask` target lists.

pub mod cidr;

use std::collections::HashSet;
use std::net::IpAddr;

use regex::Regex;
use scan_shared::models::{MatchOperator, SkipCondition, TargetPolicy, TargetSource};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MasterError, MasterResult};
use cidr::Ipv4Net;
use scan_shared::types::StageType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Cidr,
    DashRange,
    SingleIp,
    Domain,
}

pub fn classify(literal: &str) -> TargetKind {
    if literal.contains('/') && Ipv4Net::parse(literal).is_some() {
        TargetKind::Cidr
    } else if literal.contains('-') && literal.split('-').count() == 2 {
        TargetKind::DashRange
    } else if literal.parse::<IpAddr>().is_ok() {
        TargetKind::SingleIp
    } else {
        TargetKind::Domain
    }
}

/// Expands a single literal entry into concrete host addresses. Network and
/// broadcast addresses are omitted only when expanding a /24-or-smaller CIDR
/// for an alive-scan stage; every other stage type keeps the full range so a
/// port scan or service scan doesn't silently skip `.0`/`.255`.
pub fn expand_literal(literal: &str, stage_type: StageType) -> MasterResult<Vec<String>> {
    match classify(literal) {
        TargetKind::Cidr => {
            let net = Ipv4Net::parse(literal)
                .ok_or_else(|| MasterError::Config(format!("invalid CIDR: {literal}")))?;
            let omit_network_broadcast = stage_type == StageType::IpAlive && net.prefix_len() >= 24;
            Ok(net.hosts(omit_network_broadcast).into_iter().map(|ip| ip.to_string()).collect())
        }
        TargetKind::DashRange => {
            let mut parts = literal.splitn(2, '-');
            let start: IpAddr = parts
                .next()
                .unwrap()
                .parse()
                .map_err(|_| MasterError::Config(format!("invalid range start: {literal}")))?;
            let end_raw = parts.next().unwrap();
            let end: IpAddr = if end_raw.contains('.') {
                end_raw
                    .parse()
                    .map_err(|_| MasterError::Config(format!("invalid range end: {literal}")))?
            } else {
                // `a.b.c.d-e` shorthand: substitute the last octet.
                match start {
                    IpAddr::V4(start_v4) => {
                        let octets = start_v4.octets();
                        let last: u8 = end_raw
                            .parse()
                            .map_err(|_| MasterError::Config(format!("invalid range end: {literal}")))?;
                        IpAddr::V4(std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], last))
                    }
                    IpAddr::V6(_) => {
                        return Err(MasterError::Config(format!("unsupported IPv6 range: {literal}")))
                    }
                }
            };
            Ok(ip_range(start, end))
        }
        TargetKind::SingleIp => Ok(vec![literal.to_string()]),
        TargetKind::Domain => {
            // A/AAAA resolution is a runtime concern handled by the caller
            // (DNS lookups are not deterministic inputs to this pure
            // expansion function); callers pass the resolved addresses back
            // through `resolve_domains`.
            Ok(vec![literal.to_string()])
        }
    }
}

fn ip_range(start: IpAddr, end: IpAddr) -> Vec<String> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            let s = u32::from(s);
            let e = u32::from(e);
            let (lo, hi) = if s <= e { (s, e) } else { (e, s) };
            (lo..=hi)
                .map(|v| std::net::Ipv4Addr::from(v).to_string())
                .collect()
        }
        _ => vec![start.to_string(), end.to_string()],
    }
}

/// Resolves `manual` and `file` sources into literal strings; `db`/`view`/
/// `sql`/`api`/`previous_stage` sources are resolved by the caller (they
/// require collaborators this module has no dependency on) and passed in
/// via `external_targets`.
pub fn literals_from_sources(sources: &[TargetSource]) -> Vec<String> {
    let mut out = Vec::new();
    for source in sources {
        match source {
            TargetSource::Manual { value } => {
                out.extend(value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
            }
            TargetSource::File { path } => match std::fs::read_to_string(path) {
                Ok(contents) => {
                    out.extend(
                        contents
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty() && !l.starts_with('#'))
                            .map(str::to_string),
                    );
                }
                Err(e) => warn!("failed to read target file {path}: {e}"),
            },
            TargetSource::Db { .. }
            | TargetSource::View { .. }
            | TargetSource::Sql { .. }
            | TargetSource::Api { .. }
            | TargetSource::PreviousStage { .. } => {
                // Resolved externally; see `external_targets` in `resolve`.
            }
        }
    }
    out
}

fn value_as_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if regex::escape(&c.to_string()) != c.to_string() => {
                out.push_str(&regex::escape(&c.to_string()))
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Evaluates a single skip clause against an attribute map (typically a
/// previous stage's per-target output).
pub fn eval_clause(attrs: &serde_json::Map<String, Value>, clause: &SkipCondition) -> bool {
    let field_value = attrs.get(&clause.field);

    let norm = |s: &str| {
        if clause.ignore_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };

    match clause.operator {
        MatchOperator::Exists => field_value.is_some(),
        MatchOperator::IsNull => field_value.map(Value::is_null).unwrap_or(true),
        MatchOperator::IsNotNull => field_value.map(|v| !v.is_null()).unwrap_or(false),
        _ => {
            let Some(fv) = field_value else { return false };
            match clause.operator {
                MatchOperator::Equals => norm(&value_as_str(fv)) == norm(&value_as_str(&clause.value)),
                MatchOperator::NotEquals => norm(&value_as_str(fv)) != norm(&value_as_str(&clause.value)),
                MatchOperator::Contains => {
                    norm(&value_as_str(fv)).contains(&norm(&value_as_str(&clause.value)))
                }
                MatchOperator::StartsWith => {
                    norm(&value_as_str(fv)).starts_with(&norm(&value_as_str(&clause.value)))
                }
                MatchOperator::EndsWith => {
                    norm(&value_as_str(fv)).ends_with(&norm(&value_as_str(&clause.value)))
                }
                MatchOperator::Regex => {
                    let pattern = value_as_str(&clause.value);
                    Regex::new(&pattern)
                        .map(|re| re.is_match(&value_as_str(fv)))
                        .unwrap_or(false)
                }
                MatchOperator::Like => {
                    let pattern = like_to_regex(&value_as_str(&clause.value));
                    let re = if clause.ignore_case {
                        Regex::new(&format!("(?i){pattern}"))
                    } else {
                        Regex::new(&pattern)
                    };
                    re.map(|re| re.is_match(&value_as_str(fv))).unwrap_or(false)
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
                MatchOperator::GreaterThan => numeric_cmp(fv, &clause.value, |a, b| a > b),
                MatchOperator::GreaterThanOrEqual => numeric_cmp(fv, &clause.value, |a, b| a >= b),
                MatchOperator::LessThan => numeric_cmp(fv, &clause.value, |a, b| a < b),
                MatchOperator::LessThanOrEqual => numeric_cmp(fv, &clause.value, |a, b| a <= b),
                MatchOperator::Cidr => {
                    let ip = value_as_str(fv).parse::<std::net::Ipv4Addr>().ok();
                    let net = Ipv4Net::parse(&value_as_str(&clause.value));
                    match (ip, net) {
                        (Some(ip), Some(net)) => net.contains(ip),
                        _ => false,
                    }
                }
                MatchOperator::ListContains => fv
                    .as_array()
                    .map(|arr| arr.iter().any(|v| norm(&value_as_str(v)) == norm(&value_as_str(&clause.value))))
                    .unwrap_or(false),
                MatchOperator::Exists | MatchOperator::IsNull | MatchOperator::IsNotNull => unreachable!(),
            }
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Resolves a stage's full target policy: expansion, whitelist removal,
/// skip-condition filtering, dedup (first-seen order preserved unless
/// `shuffle` requests a seeded shuffle), and chunking.
pub struct ResolvedTargets {
    pub chunks: Vec<Vec<String>>,
}

pub fn resolve(
    policy: &TargetPolicy,
    external_targets: Vec<String>,
    attrs_by_target: &std::collections::HashMap<String, serde_json::Map<String, Value>>,
    chunk_size: u32,
    stage_type: StageType,
) -> MasterResult<ResolvedTargets> {
    if chunk_size == 0 {
        return Err(MasterError::Config("chunk_size must be > 0".to_string()));
    }

    let mut literals = literals_from_sources(&policy.sources);
    literals.extend(external_targets);

    let mut expanded = Vec::new();
    for literal in &literals {
        expanded.extend(expand_literal(literal, stage_type)?);
    }

    let whitelist: HashSet<&String> = policy.whitelist.iter().collect();
    let mut seen = HashSet::new();
    let mut deduped = Vec::new();
    for target in expanded {
        if policy.whitelist_enabled && whitelist.contains(&target) {
            continue;
        }
        let empty_attrs = serde_json::Map::new();
        let attrs = attrs_by_target.get(&target).unwrap_or(&empty_attrs);
        let skipped = policy
            .skip_conditions
            .iter()
            .any(|clause| eval_clause(attrs, clause));
        if skipped {
            continue;
        }
        if seen.insert(target.clone()) {
            deduped.push(target);
        }
    }

    if policy.shuffle {
        seeded_shuffle(&mut deduped);
    }

    debug!("resolved {} targets after whitelist/skip filtering", deduped.len());

    let chunks = deduped
        .chunks(chunk_size as usize)
        .map(|c| c.to_vec())
        .collect();

    Ok(ResolvedTargets { chunks })
}

/// Deterministic shuffle seeded by the target count so replays within the
/// same run produce the same order (no external RNG dependency).
fn seeded_shuffle(items: &mut [String]) {
    let len = items.len();
    if len < 2 {
        return;
    }
    let mut seed: u64 = len as u64;
    for i in (1..len).rev() {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let j = (seed >> 33) as usize % (i + 1);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_shared::models::TargetSource;

    #[test]
    fn classify_identifies_kinds() {
        assert_eq!(classify("10.0.0.0/24"), TargetKind::Cidr);
        assert_eq!(classify("10.0.0.1-10.0.0.5"), TargetKind::DashRange);
        assert_eq!(classify("10.0.0.1"), TargetKind::SingleIp);
        assert_eq!(classify("example.com"), TargetKind::Domain);
    }

    #[test]
    fn manual_source_resolves() {
        let policy = TargetPolicy {
            sources: vec![TargetSource::Manual {
                value: "1.1.1.1,2.2.2.2".to_string(),
            }],
            whitelist_enabled: false,
            whitelist: vec![],
            skip_conditions: vec![],
            shuffle: false,
        };
        let resolved = resolve(&policy, vec![], &Default::default(), 10, StageType::PortScan).unwrap();
        assert_eq!(resolved.chunks, vec![vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()]]);
    }

    #[test]
    fn whitelist_excludes() {
        let policy = TargetPolicy {
            sources: vec![TargetSource::Manual {
                value: "1.1.1.1,8.8.8.8".to_string(),
            }],
            whitelist_enabled: true,
            whitelist: vec!["8.8.8.8".to_string()],
            skip_conditions: vec![],
            shuffle: false,
        };
        let resolved = resolve(&policy, vec![], &Default::default(), 10, StageType::PortScan).unwrap();
        assert_eq!(resolved.chunks, vec![vec!["1.1.1.1".to_string()]]);
    }

    #[test]
    fn chunk_size_zero_is_rejected() {
        let policy = TargetPolicy {
            sources: vec![TargetSource::Manual { value: "1.1.1.1".to_string() }],
            whitelist_enabled: false,
            whitelist: vec![],
            skip_conditions: vec![],
            shuffle: false,
        };
        assert!(resolve(&policy, vec![], &Default::default(), 0, StageType::PortScan).is_err());
    }

    #[test]
    fn chunk_size_larger_than_targets_yields_one_task() {
        let policy = TargetPolicy {
            sources: vec![TargetSource::Manual {
                value: "1.1.1.1,2.2.2.2,3.3.3.3".to_string(),
            }],
            whitelist_enabled: false,
            whitelist: vec![],
            skip_conditions: vec![],
            shuffle: false,
        };
        let resolved = resolve(&policy, vec![], &Default::default(), 100, StageType::PortScan).unwrap();
        assert_eq!(resolved.chunks.len(), 1);
        assert_eq!(resolved.chunks[0].len(), 3);
    }

    #[test]
    fn cidr_expands_to_hosts_omitting_network_broadcast_for_alive_scan() {
        let expanded = expand_literal("192.168.1.0/30", StageType::IpAlive).unwrap();
        assert_eq!(expanded.len(), 2);
    }

    #[test]
    fn cidr_expands_to_full_range_for_non_alive_stage() {
        let expanded = expand_literal("192.168.1.0/30", StageType::PortScan).unwrap();
        assert_eq!(expanded.len(), 4);
    }

    #[test]
    fn dash_range_shorthand_expands() {
        let expanded = expand_literal("10.0.0.1-5", StageType::PortScan).unwrap();
        assert_eq!(expanded, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"]);
    }

    #[test]
    fn skip_condition_cidr_operator() {
        let mut attrs = serde_json::Map::new();
        attrs.insert("ip".to_string(), Value::String("10.0.0.5".to_string()));
        let clause = SkipCondition {
            field: "ip".to_string(),
            operator: MatchOperator::Cidr,
            value: Value::String("10.0.0.0/24".to_string()),
            ignore_case: false,
        };
        assert!(eval_clause(&attrs, &clause));
    }
}
