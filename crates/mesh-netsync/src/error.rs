//! Error types for configuration synchronization.

use std::path::PathBuf;

use mesh_ipam::IpamError;
use thiserror::Error;

/// Errors that can occur while applying network settings.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local Pod CIDR does not parse.
    #[error("invalid pod CIDR '{value}': {message}")]
    InvalidPodCidr {
        /// The configured value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// The local Service CIDR does not parse.
    #[error("invalid service CIDR '{value}': {message}")]
    InvalidServiceCidr {
        /// The configured value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// One or more operator-declared reserved subnets do not parse.
    #[error("invalid reserved subnets: {}", .entries.join(", "))]
    InvalidReservedSubnets {
        /// The rejected entries.
        entries: Vec<String>,
    },

    /// Existing tunnel records could not be listed.
    #[error("cannot list tunnel endpoints: {0}")]
    TunnelListing(String),

    /// A settings or state file could not be read or parsed.
    #[error("cannot load {}: {message}", .path.display())]
    Load {
        /// The file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The IPAM engine rejected an operation.
    #[error(transparent)]
    Ipam(#[from] IpamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reserved_subnets_display() {
        let err = SyncError::InvalidReservedSubnets {
            entries: vec!["10.0.0.0/33".to_string(), "garbage".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid reserved subnets: 10.0.0.0/33, garbage"
        );
    }

    #[test]
    fn test_ipam_error_is_transparent() {
        let err = SyncError::from(IpamError::NotInitialized);
        assert_eq!(err.to_string(), "IPAM is not initialised");
    }

    #[test]
    fn test_load_error_display() {
        let err = SyncError::Load {
            path: PathBuf::from("/etc/mesh/settings.json"),
            message: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "cannot load /etc/mesh/settings.json: not found");
    }
}
