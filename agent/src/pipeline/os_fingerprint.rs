//! OS fingerprint stage (§4.4): combines the alive-probe's TTL bucket with
//! any OS hint nmap itself already reported for the host, preferring the
//! more specific nmap guess when both are present.

use super::alive::ttl_to_os;

pub fn resolve_os(ttl: Option<u8>, nmap_os_guess: Option<&str>) -> Option<String> {
    if let Some(guess) = nmap_os_guess {
        return Some(guess.to_string());
    }
    ttl.and_then(ttl_to_os).map(str::to_string)
}
