use std::net::IpAddr;

use super::snapshot::{ServerAddress, normalize_host};

/// Maximum hostname length (RFC 1035).
pub const MAX_HOST_LENGTH: usize = 253;

/// Maximum length of a single DNS label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum rendering-surface id length.
pub const MAX_SURFACE_ID_LENGTH: usize = 128;

/// Validate a host. Accepts an IP address or a DNS name, with or without a
/// pasted `http(s)://` prefix.
pub fn validate_host(raw: &str) -> Result<(), String> {
    let host = normalize_host(raw);
    if host.is_empty() {
        return Err("Host cannot be empty".into());
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.len() > MAX_HOST_LENGTH {
        return Err(format!(
            "Host too long (max {} characters)",
            MAX_HOST_LENGTH
        ));
    }
    for label in host.split('.') {
        validate_label(label).map_err(|e| format!("Invalid hostname \"{host}\": {e}"))?;
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err("empty label".into());
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(format!("label longer than {} characters", MAX_LABEL_LENGTH));
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("labels may only contain letters, digits and hyphens".into());
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err("labels cannot start or end with a hyphen".into());
    }
    Ok(())
}

/// Validate a port. Zero is the only value `u16` admits that is not a usable port.
pub fn validate_port(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("Port must be between 1 and 65535".into());
    }
    Ok(())
}

pub fn validate_server(server: &ServerAddress) -> Result<(), String> {
    validate_host(&server.host)?;
    validate_port(server.port)
}

/// Validate a rendering-surface id. Opaque, but must be non-empty and printable.
pub fn validate_surface_id(id: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err("Surface id cannot be empty".into());
    }
    if id.len() > MAX_SURFACE_ID_LENGTH {
        return Err(format!(
            "Surface id too long (max {} characters)",
            MAX_SURFACE_ID_LENGTH
        ));
    }
    if id.chars().any(char::is_control) {
        return Err("Surface id cannot contain control characters".into());
    }
    Ok(())
}
