//! Network settings snapshot.
//!
//! A snapshot carries the whole desired state: the local Pod CIDR, the local
//! Service CIDR and any extra ranges the operator wants kept out of remote
//! cluster allocation.

use std::collections::BTreeSet;
use std::path::Path;

use ipnet::IpNet;
use mesh_ipam::parse_cidr;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;

/// Cluster network settings as delivered by the configuration source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    /// Local Pod CIDR.
    #[serde(rename = "podCIDR")]
    pub pod_cidr: String,
    /// Local Service CIDR.
    #[serde(rename = "serviceCIDR")]
    pub service_cidr: String,
    /// Extra ranges that must never be given to remote clusters.
    #[serde(default)]
    pub reserved_subnets: Vec<String>,
}

/// Parsed local Pod and Service CIDRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetParameters {
    /// Local Pod CIDR.
    pub pod_cidr: IpNet,
    /// Local Service CIDR.
    pub service_cidr: IpNet,
}

impl NetworkSettings {
    /// Parses settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Load`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| SyncError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parses the local Pod and Service CIDRs.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidPodCidr`] or [`SyncError::InvalidServiceCidr`].
    pub fn net_parameters(&self) -> Result<NetParameters, SyncError> {
        let pod_cidr = parse_cidr(&self.pod_cidr).map_err(|e| SyncError::InvalidPodCidr {
            value: self.pod_cidr.clone(),
            message: e.to_string(),
        })?;
        let service_cidr =
            parse_cidr(&self.service_cidr).map_err(|e| SyncError::InvalidServiceCidr {
                value: self.service_cidr.clone(),
                message: e.to_string(),
            })?;

        Ok(NetParameters {
            pod_cidr,
            service_cidr,
        })
    }

    /// Returns the full set of networks to keep reserved.
    ///
    /// Every malformed extra range is logged and reported together.
    ///
    /// # Errors
    ///
    /// Returns an error if the Pod CIDR, the Service CIDR or any extra range
    /// does not parse.
    pub fn reserved_networks(&self) -> Result<BTreeSet<IpNet>, SyncError> {
        let params = self.net_parameters()?;

        let mut networks = BTreeSet::from([params.pod_cidr, params.service_cidr]);
        let mut invalid = Vec::new();
        for subnet in &self.reserved_subnets {
            match parse_cidr(subnet) {
                Ok(network) => {
                    networks.insert(network);
                }
                Err(e) => {
                    warn!(subnet = %subnet, error = %e, "cannot parse reserved subnet");
                    invalid.push(subnet.clone());
                }
            }
        }

        if invalid.is_empty() {
            Ok(networks)
        } else {
            Err(SyncError::InvalidReservedSubnets { entries: invalid })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn settings(pod: &str, service: &str, extra: &[&str]) -> NetworkSettings {
        NetworkSettings {
            pod_cidr: pod.to_string(),
            service_cidr: service.to_string(),
            reserved_subnets: extra.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn net(s: &str) -> IpNet {
        s.parse().expect("valid CIDR")
    }

    #[test]
    fn test_reserved_networks_merges_everything() {
        let reserved = settings("10.244.0.0/16", "10.96.0.0/12", &["192.168.50.0/24"])
            .reserved_networks()
            .expect("valid settings");

        assert_eq!(
            reserved,
            BTreeSet::from([net("10.244.0.0/16"), net("10.96.0.0/12"), net("192.168.50.0/24")])
        );
    }

    #[test]
    fn test_reserved_networks_deduplicates() {
        let reserved = settings("10.244.0.0/16", "10.96.0.0/12", &["10.244.0.0/16"])
            .reserved_networks()
            .expect("valid settings");
        assert_eq!(reserved.len(), 2);
    }

    #[test_case("", "10.96.0.0/12" ; "empty pod cidr")]
    #[test_case("10.244.0.0", "10.96.0.0/12" ; "pod cidr without prefix")]
    fn test_invalid_pod_cidr(pod: &str, service: &str) {
        let result = settings(pod, service, &[]).reserved_networks();
        assert!(matches!(result, Err(SyncError::InvalidPodCidr { .. })));
    }

    #[test]
    fn test_invalid_service_cidr() {
        let result = settings("10.244.0.0/16", "10.96.0.0/99", &[]).reserved_networks();
        assert!(matches!(result, Err(SyncError::InvalidServiceCidr { .. })));
    }

    #[test]
    fn test_invalid_reserved_subnets_are_all_reported() {
        let result = settings(
            "10.244.0.0/16",
            "10.96.0.0/12",
            &["bad", "192.168.0.0/16", "10.0.0.0/40"],
        )
        .reserved_networks();

        let Err(SyncError::InvalidReservedSubnets { entries }) = result else {
            unreachable!("expected InvalidReservedSubnets, got {result:?}");
        };
        assert_eq!(entries, vec!["bad".to_string(), "10.0.0.0/40".to_string()]);
    }

    #[test]
    fn test_from_json_uses_cluster_field_names() {
        let parsed = NetworkSettings::from_json(
            r#"{"podCIDR":"10.244.0.0/16","serviceCIDR":"10.96.0.0/12","reservedSubnets":["172.20.0.0/16"]}"#,
        )
        .expect("valid JSON");

        assert_eq!(
            parsed,
            settings("10.244.0.0/16", "10.96.0.0/12", &["172.20.0.0/16"])
        );
    }

    #[test]
    fn test_from_json_reserved_subnets_optional() {
        let parsed =
            NetworkSettings::from_json(r#"{"podCIDR":"10.244.0.0/16","serviceCIDR":"10.96.0.0/12"}"#)
                .expect("valid JSON");
        assert!(parsed.reserved_subnets.is_empty());
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = NetworkSettings::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(SyncError::Load { .. })));
    }
}
