//! Core types shared by the allocator and the engine.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::error::IpamError;

/// Pools used when the caller does not configure any, tried in this order.
pub const DEFAULT_POOLS: &[&str] = &["10.0.0.0/8", "192.168.0.0/16", "172.16.0.0/12"];

/// Identifier of a remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Creates a cluster identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClusterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Conversion into a normalised CIDR.
///
/// Host bits are cleared, so `192.168.1.0/16` becomes `192.168.0.0/16`.
pub trait IntoCidr {
    /// Converts `self` into a CIDR.
    ///
    /// # Errors
    ///
    /// Returns [`IpamError::InvalidCidr`] if the input does not parse.
    fn into_cidr(self) -> Result<IpNet, IpamError>;
}

impl IntoCidr for IpNet {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        Ok(self.trunc())
    }
}

impl IntoCidr for &IpNet {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        Ok(self.trunc())
    }
}

impl IntoCidr for Ipv4Net {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        Ok(IpNet::V4(self.trunc()))
    }
}

impl IntoCidr for Ipv6Net {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        Ok(IpNet::V6(self.trunc()))
    }
}

impl IntoCidr for &str {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        parse_cidr(self)
    }
}

impl IntoCidr for &String {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        parse_cidr(self)
    }
}

impl IntoCidr for String {
    fn into_cidr(self) -> Result<IpNet, IpamError> {
        parse_cidr(&self)
    }
}

/// Parses a CIDR string and clears its host bits.
///
/// # Errors
///
/// Returns [`IpamError::InvalidCidr`] if `input` is not `address/prefix`.
pub fn parse_cidr(input: &str) -> Result<IpNet, IpamError> {
    input
        .trim()
        .parse::<IpNet>()
        .map(|net| net.trunc())
        .map_err(|e| IpamError::InvalidCidr {
            input: input.to_string(),
            message: e.to_string(),
        })
}

/// Returns true if the two networks share at least one address.
#[must_use]
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b) || b.contains(a)
}

/// Snapshot of engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IpamStats {
    /// Configured pools, in scan order.
    pub pools: Vec<IpNet>,
    /// Every registered network except the pools themselves.
    pub registered: Vec<IpNet>,
    /// Subnet in effect for each remote cluster.
    pub clusters: HashMap<ClusterId, IpNet>,
}

impl IpamStats {
    /// Number of remote clusters holding a subnet.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}
