//! Input validation for configuration values

use crate::error::{FrontendError, FrontendResult};
use crate::wire::bpf::BPF_HDR_SIZE;
use crate::wire::route::RT_MSG_PREFIX_LEN;

/// Maximum length for interface names (IFNAMSIZ minus the terminator)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Maximum length of a host name carried in one DHCP option
const MAX_HOSTNAME_LEN: usize = 255;

/// Largest read buffer accepted for capture or routing sockets
const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Validate a kernel interface name
///
/// Interface names must be alphanumeric with optional dashes, underscores
/// and dots, and no longer than 15 characters.
pub fn validate_interface_name(name: &str) -> FrontendResult<()> {
    if name.is_empty() {
        return Err(FrontendError::InvalidParameter(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(FrontendError::InvalidParameter(format!(
            "Interface name too long (max {} characters)",
            MAX_INTERFACE_NAME_LEN
        )));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(FrontendError::InvalidParameter(format!(
                "Invalid interface name '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    if name.starts_with('-') {
        return Err(FrontendError::InvalidParameter(
            "Interface name cannot start with dash".to_string(),
        ));
    }

    Ok(())
}

/// Validate a host name override for the DHCP host-name option
pub fn validate_hostname(host: &str) -> FrontendResult<()> {
    if host.is_empty() {
        return Err(FrontendError::InvalidParameter(
            "Hostname cannot be empty".to_string(),
        ));
    }

    if host.len() > MAX_HOSTNAME_LEN {
        return Err(FrontendError::InvalidParameter(format!(
            "Hostname too long (max {} bytes)",
            MAX_HOSTNAME_LEN
        )));
    }

    for c in host.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '.' {
            return Err(FrontendError::InvalidParameter(format!(
                "Invalid hostname character: {}",
                c
            )));
        }
    }

    if host.starts_with('-') || host.starts_with('.') {
        return Err(FrontendError::InvalidParameter(
            "Invalid hostname format".to_string(),
        ));
    }

    Ok(())
}

/// Validate the per-interface capture read buffer size
pub fn validate_capture_buffer(size: usize) -> FrontendResult<()> {
    validate_buffer("capture", size, BPF_HDR_SIZE)
}

/// Validate the routing socket read buffer size
pub fn validate_route_buffer(size: usize) -> FrontendResult<()> {
    validate_buffer("route", size, RT_MSG_PREFIX_LEN)
}

fn validate_buffer(what: &str, size: usize, min: usize) -> FrontendResult<()> {
    if size < min || size > MAX_BUFFER_SIZE {
        return Err(FrontendError::InvalidParameter(format!(
            "Invalid {} buffer size {} (must be {}-{})",
            what, size, min, MAX_BUFFER_SIZE
        )));
    }
    Ok(())
}
