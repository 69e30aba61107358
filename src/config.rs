use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Result, RouteAgentError};

pub const ENV_PREFIX: &str = "SUBMARINER";
pub const MINUTE: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub cluster_id: String,
    pub namespace: String,
    pub cluster_cidr: Vec<String>,
    pub service_cidr: Vec<String>,
    pub resync_interval_minutes: u64,
}

fn env_key(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.to_uppercase())
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster_id = required(&lookup, "ClusterID")?;
        let namespace = required(&lookup, "Namespace")?;
        let cluster_cidr = cidr_list(&lookup, "ClusterCidr")?;
        let service_cidr = cidr_list(&lookup, "ServiceCidr")?;

        let resync_key = env_key("ResyncIntervalMinutes");
        let resync_interval_minutes = match lookup(&resync_key) {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<u64>().map_err(|e| {
                RouteAgentError::Configuration(format!(
                    "{} must be a non-negative integer, got {:?}: {}",
                    resync_key, raw, e
                ))
            })?,
            _ => 0,
        };

        Ok(Self {
            cluster_id,
            namespace,
            cluster_cidr,
            service_cidr,
            resync_interval_minutes,
        })
    }

    /// Zero disables periodic resync.
    pub fn resync_interval(&self) -> Duration {
        let minutes = u32::try_from(self.resync_interval_minutes).unwrap_or(u32::MAX);
        MINUTE * minutes
    }
}

fn required<F>(lookup: &F, field: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let key = env_key(field);
    match lookup(&key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(RouteAgentError::Configuration(format!(
            "required key {} missing value",
            key
        ))),
    }
}

fn cidr_list<F>(lookup: &F, field: &str) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let key = env_key(field);
    let raw = required(lookup, field)?;

    let cidrs: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if cidrs.is_empty() {
        return Err(RouteAgentError::Configuration(format!(
            "{} contains no CIDR blocks",
            key
        )));
    }

    for cidr in &cidrs {
        validate_cidr(cidr).map_err(|reason| {
            RouteAgentError::Configuration(format!("{}: invalid CIDR {:?}: {}", key, cidr, reason))
        })?;
    }

    Ok(cidrs)
}

fn validate_cidr(cidr: &str) -> std::result::Result<(), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| "missing prefix length".to_string())?;

    let addr: IpAddr = addr.parse().map_err(|e| format!("bad address: {}", e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|e| format!("bad prefix length: {}", e))?;

    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(format!("prefix length {} exceeds {}", prefix, max));
    }

    Ok(())
}
