use std::path::Path;

use tracing::debug;

use crate::error::{Result, RouteAgentError};

pub const PROC_NET_ROUTE: &str = "/proc/net/route";

const RTF_UP: u32 = 0x0001;

pub fn default_gateway_interface() -> Result<String> {
    default_gateway_interface_from(Path::new(PROC_NET_ROUTE))
}

pub fn default_gateway_interface_from(route_table: &Path) -> Result<String> {
    let table = std::fs::read_to_string(route_table).map_err(|e| {
        RouteAgentError::HostDiscovery(format!("reading {}: {}", route_table.display(), e))
    })?;

    let iface = parse_default_route(&table).ok_or_else(|| {
        RouteAgentError::HostDiscovery("no default route found in IPv4 routing table".to_string())
    })?;

    debug!("Default gateway interface is {}", iface);
    Ok(iface)
}

/// Picks the up default route (destination and mask both zero) with the
/// lowest metric from a `/proc/net/route` dump.
pub fn parse_default_route(table: &str) -> Option<String> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return None;
            }
            let destination = u32::from_str_radix(fields[1], 16).ok()?;
            let flags = u32::from_str_radix(fields[3], 16).ok()?;
            let metric: u32 = fields[6].parse().ok()?;
            let mask = u32::from_str_radix(fields[7], 16).ok()?;

            (destination == 0 && mask == 0 && flags & RTF_UP != 0)
                .then(|| (metric, fields[0].to_string()))
        })
        .min_by_key(|(metric, _)| *metric)
        .map(|(_, iface)| iface)
}
