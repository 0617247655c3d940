//! Port mapping parsing, merging and conflict detection.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A `host:container` TCP port pair. Both sides are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

impl FromStr for PortMapping {
    type Err = Error;

    /// Accepts `"8080:80"` or a bare `"8080"` meaning `8080:8080`.
    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let (host, container) = match input.split_once(':') {
            Some((h, c)) => (parse_port(s, h)?, parse_port(s, c)?),
            None => {
                let p = parse_port(s, input)?;
                (p, p)
            }
        };
        Ok(PortMapping { host, container })
    }
}

fn parse_port(input: &str, part: &str) -> Result<u16> {
    let invalid = |reason: &str| Error::InvalidPortMapping {
        input: input.to_string(),
        reason: reason.to_string(),
    };
    let value: u32 = part
        .trim()
        .parse()
        .map_err(|_| invalid("port must be a number"))?;
    match value {
        0 => Err(invalid("port 0 is not allowed")),
        1..=65535 => Ok(value as u16),
        _ => Err(invalid("port must be at most 65535")),
    }
}

/// Stable override: override entries replace declared ones with the same host
/// port in place, everything else is appended in override order.
pub fn merge(declared: &[PortMapping], overrides: &[PortMapping]) -> Vec<PortMapping> {
    let mut merged = declared.to_vec();
    for o in overrides {
        match merged.iter_mut().find(|m| m.host == o.host) {
            Some(existing) => existing.container = o.container,
            None => merged.push(*o),
        }
    }
    merged
}

/// Rejects a host port mapped to two different container ports.
pub fn validate_no_conflicts(mappings: &[PortMapping]) -> Result<()> {
    let mut seen: BTreeMap<u16, u16> = BTreeMap::new();
    for m in mappings {
        match seen.get(&m.host) {
            Some(&first) if first != m.container => {
                return Err(Error::PortConflict {
                    host_port: m.host,
                    first,
                    second: m.container,
                })
            }
            Some(_) => {}
            None => {
                seen.insert(m.host, m.container);
            }
        }
    }
    Ok(())
}

/// Maps each host port claimed by more than one service to those services.
/// Every service is examined before returning.
pub fn detect_cross_service_conflicts(
    per_service: &BTreeMap<String, Vec<PortMapping>>,
) -> BTreeMap<u16, Vec<String>> {
    let mut claims: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (service, mappings) in per_service {
        for m in mappings {
            let owners = claims.entry(m.host).or_default();
            if !owners.contains(service) {
                owners.push(service.clone());
            }
        }
    }
    claims.retain(|_, owners| owners.len() > 1);
    claims
}
