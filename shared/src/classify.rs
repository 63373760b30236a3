//! Web-target and brute-force-eligibility inference shared by the master's
//! ingest pipeline (tags an asset `is_web` on merge) and the agent's
//! pipeline (decides which phase-2 scans to prioritize for a port).

const WEB_SERVICE_NAMES: &[&str] = &["http", "https", "http-alt", "http-proxy", "ssl/http", "ssl/https"];
const WEB_BANNER_KEYWORDS: &[&str] =
    &["nginx", "apache", "iis", "jetty", "tomcat", "node.js", "express", "php", "jsp", "html", "http"];
const WEB_DEFAULT_PORTS: &[u16] = &[443, 8443];

/// Brute-force is only attempted against this fixed protocol whitelist.
pub const BRUTE_FORCE_PROTOCOLS: &[&str] =
    &["ssh", "rdp", "mysql", "redis", "postgres", "mssql", "ftp", "telnet", "smb", "oracle", "elasticsearch", "mongodb"];

/// A port is inferred as a web target by service name, a product/banner
/// keyword match, or landing on one of the HTTPS-default ports with no
/// contradicting service name.
pub fn is_web_target(service: Option<&str>, product: Option<&str>, banner: Option<&str>, port: u16) -> bool {
    if let Some(service) = service {
        let lower = service.to_lowercase();
        if WEB_SERVICE_NAMES.iter().any(|s| *s == lower) {
            return true;
        }
    }
    let haystack = format!("{} {}", product.unwrap_or_default(), banner.unwrap_or_default()).to_lowercase();
    if WEB_BANNER_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        return true;
    }
    service.is_none() && WEB_DEFAULT_PORTS.contains(&port)
}

pub fn is_brute_eligible(service: &str) -> bool {
    BRUTE_FORCE_PROTOCOLS.contains(&service.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_keyword_implies_web() {
        assert!(is_web_target(None, Some("nginx"), None, 8080));
    }

    #[test]
    fn ssl_http_service_name_implies_web() {
        assert!(is_web_target(Some("ssl/http"), None, None, 443));
    }

    #[test]
    fn bare_443_with_no_service_defaults_to_web() {
        assert!(is_web_target(None, None, None, 443));
    }

    #[test]
    fn ssh_is_not_a_web_target() {
        assert!(!is_web_target(Some("ssh"), None, None, 22));
    }

    #[test]
    fn brute_whitelist_is_case_insensitive_and_exact() {
        assert!(is_brute_eligible("SSH"));
        assert!(!is_brute_eligible("ssh-agent-forwarding"));
    }
}
