//! Parsers that normalize raw scanner tool output into [`ToolScanResult`].
//! Shared between `master::etl` (which drives them on report ingest) and
//! `agent::adapters` (which may run them immediately after a subprocess
//! exits, to populate the result envelope before transport).

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{CoreError, CoreResult};
use crate::protocol::{HostResult, PortResult, ToolScanResult, VulnResult, WebResult};

/// Parses Nmap's `-oX` XML output. Only `open` ports are retained.
pub fn parse_nmap_xml(xml: &str) -> CoreResult<ToolScanResult> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut result = ToolScanResult::default();
    let mut buf = Vec::new();

    let mut cur_ip: Option<String> = None;
    let mut cur_ttl: Option<u8> = None;
    let mut cur_hostname: Option<String> = None;
    let mut cur_alive = false;
    let mut cur_port: Option<u16> = None;
    let mut cur_proto: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let tag = std::str::from_utf8(name.as_ref()).unwrap_or_default();
                match tag {
                    "host" => {
                        cur_ip = None;
                        cur_ttl = None;
                        cur_hostname = None;
                        cur_alive = false;
                    }
                    "status" => {
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"state" => {
                                    let v = attr.unescape_value().unwrap_or_default();
                                    cur_alive = v == "up";
                                }
                                b"reason_ttl" => {
                                    cur_ttl = attr.unescape_value().ok().and_then(|v| v.parse().ok());
                                }
                                _ => {}
                            }
                        }
                    }
                    "address" => {
                        let mut addr = None;
                        let mut addrtype = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"addr" => addr = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                b"addrtype" => addrtype = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                _ => {}
                            }
                        }
                        if matches!(addrtype.as_deref(), Some("ipv4") | Some("ipv6")) {
                            cur_ip = addr;
                        }
                    }
                    "hostname" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"name" {
                                cur_hostname = Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                    }
                    "port" => {
                        cur_port = None;
                        cur_proto = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"portid" => {
                                    cur_port = attr.unescape_value().ok().and_then(|v| v.parse().ok());
                                }
                                b"protocol" => cur_proto = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                _ => {}
                            }
                        }
                    }
                    "state" => {
                        let mut state = None;
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"state" {
                                state = Some(attr.unescape_value().unwrap_or_default().to_string());
                            }
                        }
                        if state.as_deref() == Some("open") {
                            if let (Some(ip), Some(port), Some(proto)) =
                                (cur_ip.clone(), cur_port, cur_proto.clone())
                            {
                                result.ports.push(PortResult {
                                    ip,
                                    port,
                                    protocol: proto,
                                    state: "open".to_string(),
                                    service: None,
                                    product: None,
                                    version: None,
                                    banner: None,
                                    cpe: None,
                                });
                            }
                        } else {
                            cur_port = None;
                        }
                    }
                    "service" => {
                        if let (Some(_ip), Some(port)) = (cur_ip.clone(), cur_port) {
                            if let Some(last) = result
                                .ports
                                .iter_mut()
                                .rev()
                                .find(|p| p.port == port && p.ip == *cur_ip.as_ref().unwrap())
                            {
                                for attr in e.attributes().flatten() {
                                    let val = attr.unescape_value().unwrap_or_default().to_string();
                                    match attr.key.as_ref() {
                                        b"name" => last.service = Some(val),
                                        b"product" => last.product = Some(val),
                                        b"version" => last.version = Some(val),
                                        b"banner" => last.banner = Some(val),
                                        _ => {}
                                    }
                                }
                            }
                        }
                    }
                    "cpe" => {}
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"host" {
                    if let Some(ip) = cur_ip.take() {
                        result.hosts.push(HostResult {
                            ip,
                            alive: cur_alive,
                            ttl: cur_ttl,
                            rtt_ms: None,
                            os_guess: None,
                            hostname: cur_hostname.take(),
                        });
                    }
                }
            }
            Err(e) => return Err(CoreError::ToolFailure(format!("nmap xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(result)
}

/// Parses Masscan output, accepting either a JSON array or JSON-lines. No
/// product/version information is ever present.
pub fn parse_masscan_json(raw: &str) -> CoreResult<ToolScanResult> {
    #[derive(serde::Deserialize)]
    struct MasscanEntry {
        ip: String,
        ports: Vec<MasscanPort>,
    }

    #[derive(serde::Deserialize)]
    struct MasscanPort {
        port: u16,
        proto: String,
        status: String,
    }

    let entries: Vec<MasscanEntry> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut result = ToolScanResult::default();
    for entry in entries {
        for p in entry.ports {
            if p.status == "open" {
                result.ports.push(PortResult {
                    ip: entry.ip.clone(),
                    port: p.port,
                    protocol: p.proto,
                    state: "open".to_string(),
                    service: None,
                    product: None,
                    version: None,
                    banner: None,
                    cpe: None,
                });
            }
        }
    }
    Ok(result)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebScanEntry {
    pub url: String,
    pub ip: String,
    pub port: u16,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

/// Parses tool-agnostic web-scan output: a JSON array of entries carrying
/// URL/IP/port/title/status-code/tech-stack/headers.
pub fn parse_web_scan(raw: &str) -> CoreResult<ToolScanResult> {
    let entries: Vec<WebScanEntry> = serde_json::from_str(raw)?;
    let mut result = ToolScanResult::default();
    for e in entries {
        result.webs.push(WebResult {
            url: e.url,
            ip: e.ip,
            port: e.port,
            title: e.title,
            status_code: e.status_code,
            tech_stack: e.tech_stack,
            headers: e.headers,
        });
    }
    Ok(result)
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct VulnScanEntry {
    pub template_id: String,
    pub name: String,
    pub severity: String,
    pub description: String,
    pub proof: String,
    #[serde(default)]
    pub reference: Vec<String>,
    pub url: Option<String>,
}

/// Parses tool-agnostic vuln-scan output: template id, name, severity,
/// description, proof, reference, optional URL.
pub fn parse_vuln_scan(raw: &str) -> CoreResult<ToolScanResult> {
    let entries: Vec<VulnScanEntry> = serde_json::from_str(raw)?;
    let mut result = ToolScanResult::default();
    for e in entries {
        result.vulns.push(VulnResult {
            template_id: e.template_id,
            name: e.name,
            severity: e.severity,
            description: e.description,
            proof: e.proof,
            reference: e.reference,
            url: e.url,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nmap_xml_retains_only_open_ports() {
        let xml = r#"<nmaprun>
            <host>
                <status state="up" reason_ttl="64"/>
                <address addr="10.0.0.1" addrtype="ipv4"/>
                <hostname name="box1"/>
                <ports>
                    <port protocol="tcp" portid="22">
                        <state state="open"/>
                        <service name="ssh" product="OpenSSH" version="8.2"/>
                    </port>
                    <port protocol="tcp" portid="81">
                        <state state="closed"/>
                    </port>
                </ports>
            </host>
        </nmaprun>"#;
        let result = parse_nmap_xml(xml).unwrap();
        assert_eq!(result.hosts.len(), 1);
        assert!(result.hosts[0].alive);
        assert_eq!(result.ports.len(), 1);
        assert_eq!(result.ports[0].port, 22);
        assert_eq!(result.ports[0].service.as_deref(), Some("ssh"));
    }

    #[test]
    fn nmap_xml_parses_reason_ttl() {
        let xml = r#"<nmaprun>
            <host>
                <status state="up" reason="echo-reply" reason_ttl="128"/>
                <address addr="10.0.0.2" addrtype="ipv4"/>
            </host>
        </nmaprun>"#;
        let result = parse_nmap_xml(xml).unwrap();
        assert_eq!(result.hosts.len(), 1);
        assert_eq!(result.hosts[0].ttl, Some(128));
    }

    #[test]
    fn nmap_xml_missing_reason_ttl_yields_none() {
        let xml = r#"<nmaprun>
            <host>
                <status state="down"/>
                <address addr="10.0.0.3" addrtype="ipv4"/>
            </host>
        </nmaprun>"#;
        let result = parse_nmap_xml(xml).unwrap();
        assert_eq!(result.hosts[0].ttl, None);
    }

    #[test]
    fn masscan_accepts_json_lines() {
        let raw = "{\"ip\":\"1.2.3.4\",\"ports\":[{\"port\":80,\"proto\":\"tcp\",\"status\":\"open\"}]}\n";
        let result = parse_masscan_json(raw).unwrap();
        assert_eq!(result.ports.len(), 1);
        assert_eq!(result.ports[0].port, 80);
        assert!(result.ports[0].product.is_none());
    }

    #[test]
    fn masscan_accepts_json_array() {
        let raw = r#"[{"ip":"1.2.3.4","ports":[{"port":443,"proto":"tcp","status":"open"},{"port":8080,"proto":"tcp","status":"closed"}]}]"#;
        let result = parse_masscan_json(raw).unwrap();
        assert_eq!(result.ports.len(), 1);
        assert_eq!(result.ports[0].port, 443);
    }

    #[test]
    fn web_scan_parses_entries() {
        let raw = r#"[{"url":"http://a/","ip":"1.1.1.1","port":80,"title":"A","status_code":200,"tech_stack":["nginx"]}]"#;
        let result = parse_web_scan(raw).unwrap();
        assert_eq!(result.webs.len(), 1);
        assert_eq!(result.webs[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn vuln_scan_parses_entries() {
        let raw = r#"[{"template_id":"CVE-2021-1","name":"x","severity":"high","description":"d","proof":"p","reference":[]}]"#;
        let result = parse_vuln_scan(raw).unwrap();
        assert_eq!(result.vulns.len(), 1);
        assert_eq!(result.vulns[0].severity, "high");
    }
}
