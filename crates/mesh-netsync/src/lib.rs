//! Keeps the mesh IPAM in step with the cluster network configuration.
//!
//! The configuration source publishes [`NetworkSettings`] snapshots. The
//! [`NetworkSynchronizer`] initialises the IPAM engine from the first one,
//! recovering the subnets already held by existing tunnels, and applies the
//! reserved-subnet difference for every later one.
//!
//! ```
//! use std::sync::Arc;
//! use mesh_ipam::Ipam;
//! use mesh_netsync::{NetworkSettings, NetworkSynchronizer, StaticTunnelLister, SyncOutcome};
//!
//! let sync = NetworkSynchronizer::new(Arc::new(Ipam::new()), StaticTunnelLister::default(), Vec::new());
//! let settings = NetworkSettings::from_json(
//!     r#"{"podCIDR":"10.244.0.0/16","serviceCIDR":"10.96.0.0/12"}"#,
//! ).expect("valid settings");
//!
//! let outcome = sync.handle(&settings)?;
//! assert!(matches!(outcome, SyncOutcome::Initialized { reserved: 2, .. }));
//! assert!(sync.is_configured());
//! # Ok::<(), mesh_netsync::SyncError>(())
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod settings;
pub mod source;
pub mod syncer;
pub mod tunnel;

pub use error::SyncError;
pub use settings::{NetParameters, NetworkSettings};
pub use source::FileSettingsSource;
pub use syncer::{NetworkSynchronizer, SyncOutcome};
pub use tunnel::{
    JsonTunnelLister, RemapStatus, StaticTunnelLister, TunnelEndpoint, TunnelLister,
    recover_cluster_subnets,
};
