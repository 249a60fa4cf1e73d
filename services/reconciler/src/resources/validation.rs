//! Validation rules shared by the virtual network kinds.

use std::collections::HashSet;
use std::net::IpAddr;

use azvnet_events::NetworkEvent;

use crate::error::{HandlerError, HandlerResult};

/// Check a virtual network event.
///
/// - `name` is required
/// - address spaces and subnet prefixes must be CIDR blocks
/// - subnet names must be unique
pub fn validate_network(event: &NetworkEvent) -> HandlerResult<()> {
    validate_name(event)?;

    for prefix in &event.address_spaces {
        check_cidr(prefix).map_err(|reason| {
            HandlerError::Validation(format!("address space '{prefix}': {reason}"))
        })?;
    }

    let mut seen = HashSet::new();
    for subnet in &event.subnets {
        if subnet.name.is_empty() {
            return Err(HandlerError::Validation("subnet name is required".to_string()));
        }
        if !seen.insert(subnet.name.as_str()) {
            return Err(HandlerError::Validation(format!(
                "duplicate subnet '{}'",
                subnet.name
            )));
        }
        check_cidr(&subnet.address_prefix).map_err(|reason| {
            HandlerError::Validation(format!(
                "subnet '{}' prefix '{}': {reason}",
                subnet.name, subnet.address_prefix
            ))
        })?;
    }

    Ok(())
}

/// Check only that the event names a network, for reads and deletes.
pub fn validate_name(event: &NetworkEvent) -> HandlerResult<()> {
    if event.name.trim().is_empty() {
        return Err(HandlerError::Validation("name is required".to_string()));
    }
    Ok(())
}

fn check_cidr(s: &str) -> Result<(), String> {
    let Some((addr, len)) = s.split_once('/') else {
        return Err("missing '/'".to_string());
    };

    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("invalid address '{addr}'"))?;
    let len: u8 = len
        .parse()
        .map_err(|_| format!("invalid prefix length '{len}'"))?;

    let max = if addr.is_ipv4() { 32 } else { 128 };
    if len > max {
        return Err(format!("prefix length {len} exceeds {max}"));
    }
    Ok(())
}
