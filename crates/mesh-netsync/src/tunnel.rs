//! Tunnel endpoint records and startup recovery.
//!
//! Every established tunnel to a remote cluster leaves a record saying
//! which CIDR the cluster advertised and whether it was remapped. On restart
//! these records are the only memory of which subnets are already in use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use mesh_ipam::{ClusterId, parse_cidr};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SyncError;

/// Remapping decision recorded for a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RemapStatus {
    /// No subnet has been decided yet.
    #[default]
    Pending,
    /// The cluster uses its advertised Pod CIDR.
    NotRemapped,
    /// The cluster was given an alias subnet.
    Remapped {
        /// The alias subnet.
        cidr: String,
    },
}

/// A tunnel to one remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    /// Remote cluster identifier.
    #[serde(rename = "clusterID")]
    pub cluster_id: ClusterId,
    /// Pod CIDR advertised by the remote cluster.
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    /// Remapping decision.
    #[serde(default)]
    pub remap: RemapStatus,
}

impl TunnelEndpoint {
    /// CIDR actually used for the cluster, if one has been decided.
    #[must_use]
    pub fn effective_pod_cidr(&self) -> Option<&str> {
        match &self.remap {
            RemapStatus::Pending => None,
            RemapStatus::NotRemapped => Some(self.pod_cidr.as_str()),
            RemapStatus::Remapped { cidr } => Some(cidr.as_str()),
        }
    }
}

/// Lists the tunnel records that exist at startup.
pub trait TunnelLister: Send + Sync {
    /// Returns every tunnel record.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, SyncError>;
}

/// Fixed, in-memory set of tunnel records.
#[derive(Debug, Clone, Default)]
pub struct StaticTunnelLister {
    endpoints: Vec<TunnelEndpoint>,
}

impl StaticTunnelLister {
    /// Creates a lister returning `endpoints`.
    #[must_use]
    pub fn new(endpoints: Vec<TunnelEndpoint>) -> Self {
        Self { endpoints }
    }
}

impl TunnelLister for StaticTunnelLister {
    fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, SyncError> {
        Ok(self.endpoints.clone())
    }
}

/// Reads tunnel records from a JSON array on disk.
///
/// A missing file means no tunnels exist yet.
#[derive(Debug, Clone)]
pub struct JsonTunnelLister {
    path: PathBuf,
}

impl JsonTunnelLister {
    /// Creates a lister reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this lister reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TunnelLister for JsonTunnelLister {
    fn list_tunnel_endpoints(&self) -> Result<Vec<TunnelEndpoint>, SyncError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::TunnelListing(e.to_string())),
        };
        serde_json::from_str(&content).map_err(|e| SyncError::Load {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

/// Builds the cluster subnet mapping implied by existing tunnel records.
///
/// Pending records are skipped, as are records whose effective CIDR does not
/// parse.
#[must_use]
pub fn recover_cluster_subnets(endpoints: &[TunnelEndpoint]) -> HashMap<ClusterId, IpNet> {
    let mut subnets = HashMap::new();
    for endpoint in endpoints {
        let Some(cidr) = endpoint.effective_pod_cidr() else {
            continue;
        };
        match parse_cidr(cidr) {
            Ok(network) => {
                info!(cluster = %endpoint.cluster_id, %network, "subnet already in use by cluster");
                subnets.insert(endpoint.cluster_id.clone(), network);
            }
            Err(e) => {
                warn!(cluster = %endpoint.cluster_id, cidr, error = %e, "ignoring unparseable tunnel subnet");
            }
        }
    }
    subnets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(cluster: &str, pod: &str, remap: RemapStatus) -> TunnelEndpoint {
        TunnelEndpoint {
            cluster_id: ClusterId::from(cluster),
            pod_cidr: pod.to_string(),
            remap,
        }
    }

    fn net(s: &str) -> IpNet {
        s.parse().expect("valid CIDR")
    }

    #[test]
    fn test_effective_pod_cidr() {
        assert_eq!(
            endpoint("a", "10.0.0.0/16", RemapStatus::Pending).effective_pod_cidr(),
            None
        );
        assert_eq!(
            endpoint("a", "10.0.0.0/16", RemapStatus::NotRemapped).effective_pod_cidr(),
            Some("10.0.0.0/16")
        );
        assert_eq!(
            endpoint(
                "a",
                "10.0.0.0/16",
                RemapStatus::Remapped {
                    cidr: "10.1.0.0/16".to_string()
                }
            )
            .effective_pod_cidr(),
            Some("10.1.0.0/16")
        );
    }

    #[test]
    fn test_recover_cluster_subnets() {
        let endpoints = vec![
            endpoint("pending", "10.0.0.0/16", RemapStatus::Pending),
            endpoint("natural", "10.2.0.0/16", RemapStatus::NotRemapped),
            endpoint(
                "remapped",
                "10.0.0.0/16",
                RemapStatus::Remapped {
                    cidr: "10.3.0.0/16".to_string(),
                },
            ),
            endpoint(
                "broken",
                "10.0.0.0/16",
                RemapStatus::Remapped {
                    cidr: "not-a-cidr".to_string(),
                },
            ),
        ];

        let recovered = recover_cluster_subnets(&endpoints);
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered.get("natural"), Some(&net("10.2.0.0/16")));
        assert_eq!(recovered.get("remapped"), Some(&net("10.3.0.0/16")));
    }

    #[test]
    fn test_endpoint_json_shape() {
        let parsed: TunnelEndpoint = serde_json::from_str(
            r#"{"clusterID":"c1","podCIDR":"10.0.0.0/16","remap":{"state":"remapped","cidr":"10.9.0.0/16"}}"#,
        )
        .expect("valid JSON");
        assert_eq!(
            parsed.remap,
            RemapStatus::Remapped {
                cidr: "10.9.0.0/16".to_string()
            }
        );

        let pending: TunnelEndpoint =
            serde_json::from_str(r#"{"clusterID":"c2","podCIDR":"10.0.0.0/16"}"#).expect("valid JSON");
        assert_eq!(pending.remap, RemapStatus::Pending);
    }

    #[test]
    fn test_json_lister_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lister = JsonTunnelLister::new(dir.path().join("tunnels.json"));
        assert!(lister.list_tunnel_endpoints().expect("missing is empty").is_empty());
    }

    #[test]
    fn test_json_lister_reads_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnels.json");
        let records = vec![endpoint("c1", "10.0.0.0/16", RemapStatus::NotRemapped)];
        std::fs::write(&path, serde_json::to_string(&records).expect("serialize")).expect("write");

        let listed = JsonTunnelLister::new(&path)
            .list_tunnel_endpoints()
            .expect("should list");
        assert_eq!(listed, records);
    }

    #[test]
    fn test_json_lister_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tunnels.json");
        std::fs::write(&path, "{").expect("write");

        let result = JsonTunnelLister::new(&path).list_tunnel_endpoints();
        assert!(matches!(result, Err(SyncError::Load { .. })));
    }
}
