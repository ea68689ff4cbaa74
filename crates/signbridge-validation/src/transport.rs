//! Transport security checks for caller-supplied URLs.

use signbridge_protocol::OBJECT_ID_PLACEHOLDER;
use url::Url;

/// Neutral stand-in for the placeholder so templates parse as URLs.
const PLACEHOLDER_STAND_IN: &str = "object-id";

/// Hosts allowed over plain http for local development.
const LOOPBACK_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

pub fn is_loopback_host(host: &str) -> bool {
    LOOPBACK_HOSTS.contains(&host)
}

/// Returns a message describing why `raw` is not an acceptable URL.
pub fn check_transport(raw: &str) -> Result<(), String> {
    let candidate = raw.replace(OBJECT_ID_PLACEHOLDER, PLACEHOLDER_STAND_IN);
    let url = Url::parse(&candidate).map_err(|error| format!("invalid URL ({error})"))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if url.host_str().is_some_and(is_loopback_host) => Ok(()),
        "http" => Err("must use https (plain http is only allowed for localhost)".to_owned()),
        other => Err(format!("unsupported URL scheme '{other}' (must use https)")),
    }
}
