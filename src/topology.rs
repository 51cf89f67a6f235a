//! Static run topology and role resolution.
//!
//! The topology is a flat list of `{hostId, ipAddress, role}` entries handed to
//! every agent in a run. Each agent resolves its own [`Role`] once at start-up
//! and binds its state store endpoints from it:
//!
//! - an empty topology means single-host mode ([`Role::Unassigned`])
//! - a secondary binds its peer endpoint to the first entry tagged primary
//! - a primary never addresses a specific secondary

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordError, Result};
use crate::state::{HttpStateClient, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
    /// Single-host mode: one process plays both roles.
    Unassigned,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
            Role::Unassigned => write!(f, "single-host"),
        }
    }
}

impl FromStr for Role {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "server" => Ok(Role::Primary),
            "secondary" | "client" => Ok(Role::Secondary),
            "unassigned" | "single-host" => Ok(Role::Unassigned),
            other => Err(CoordError::Topology(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEntry {
    pub host_id: String,
    pub ip_address: String,
    pub role: Role,
}

impl HostEntry {
    pub fn new(host_id: impl Into<String>, ip_address: impl Into<String>, role: Role) -> Self {
        Self {
            host_id: host_id.into(),
            ip_address: ip_address.into(),
            role,
        }
    }
}

/// Source of the static host list for the current run.
pub trait TopologyProvider: Send + Sync {
    fn hosts(&self) -> Result<Vec<HostEntry>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    hosts: Vec<HostEntry>,
}

impl StaticTopology {
    pub fn new(hosts: Vec<HostEntry>) -> Self {
        Self { hosts }
    }

    /// Parse a comma-separated `id:ip:role` list, e.g.
    /// `"vm-1:10.0.0.4:primary,vm-2:[fd00::5]:secondary"`.
    ///
    /// The id ends at the first `:` and the role starts after the last one, so
    /// IPv6 addresses may be given bare or in brackets.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut hosts = Vec::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || {
                CoordError::Topology(format!(
                    "invalid host entry '{}', expected id:ip:role",
                    entry
                ))
            };
            let (host_id, rest) = entry.split_once(':').ok_or_else(invalid)?;
            let (ip_address, role) = rest.rsplit_once(':').ok_or_else(invalid)?;
            let ip_address = ip_address.trim_start_matches('[').trim_end_matches(']');
            if host_id.is_empty() || ip_address.is_empty() {
                return Err(invalid());
            }
            hosts.push(HostEntry::new(host_id, ip_address, role.parse()?));
        }
        Ok(Self { hosts })
    }

    /// Load a JSON array of host entries.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoordError::Config(format!("failed to read topology {}: {}", path.display(), e))
        })?;
        let hosts: Vec<HostEntry> = serde_json::from_str(&raw).map_err(|e| {
            CoordError::Config(format!("invalid topology {}: {}", path.display(), e))
        })?;
        Ok(Self { hosts })
    }
}

impl TopologyProvider for StaticTopology {
    fn hosts(&self) -> Result<Vec<HostEntry>> {
        Ok(self.hosts.clone())
    }
}

/// Resolve the role of `host_id` within `hosts`.
pub fn resolve_role(hosts: &[HostEntry], host_id: &str) -> Result<Role> {
    if hosts.is_empty() {
        return Ok(Role::Unassigned);
    }

    hosts
        .iter()
        .find(|h| h.host_id.eq_ignore_ascii_case(host_id))
        .map(|h| h.role)
        .ok_or_else(|| {
            CoordError::Topology(format!("host '{}' is not part of the topology", host_id))
        })
}

/// First topology entry tagged primary.
pub fn primary_host(hosts: &[HostEntry]) -> Result<&HostEntry> {
    hosts
        .iter()
        .find(|h| h.role == Role::Primary)
        .ok_or_else(|| CoordError::Topology("no primary host in topology".to_string()))
}

/// Concrete state store clients bound to the logical `Local` and `Peer` endpoints.
#[derive(Clone)]
pub struct EndpointBindings {
    pub local: Arc<dyn StateStore>,
    pub peer: Option<Arc<dyn StateStore>>,
}

impl EndpointBindings {
    pub fn new(local: Arc<dyn StateStore>, peer: Option<Arc<dyn StateStore>>) -> Self {
        Self { local, peer }
    }

    /// Bind endpoints for `role`. `local` must target this host's own API.
    pub fn resolve(
        role: Role,
        hosts: &[HostEntry],
        local: Arc<dyn StateStore>,
        api_port: u16,
        request_timeout: Duration,
    ) -> Result<Self> {
        let peer: Option<Arc<dyn StateStore>> = match role {
            Role::Primary => None,
            Role::Unassigned => Some(local.clone()),
            Role::Secondary => {
                let primary = primary_host(hosts)?;
                let client =
                    HttpStateClient::for_host(&primary.ip_address, api_port, request_timeout)?;
                tracing::info!(
                    primary = %primary.host_id,
                    endpoint = %client.base_url(),
                    "Bound peer endpoint"
                );
                Some(Arc::new(client))
            }
        };

        Ok(Self { local, peer })
    }

    pub fn peer(&self) -> Result<&Arc<dyn StateStore>> {
        self.peer
            .as_ref()
            .ok_or_else(|| CoordError::Topology("no peer endpoint bound for this role".to_string()))
    }
}
