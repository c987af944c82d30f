//! Subnet allocation for cross-cluster tunnels.
//!
//! Keeps every remote cluster's Pod/Service address space unique from the
//! local cluster's point of view. A remote cluster whose advertised CIDR
//! collides with local or already-assigned networks is transparently
//! remapped to an alias subnet of the same size.
//!
//! ```
//! use std::collections::HashMap;
//! use mesh_ipam::{ClusterId, Ipam, SubnetAllocator};
//!
//! let ipam = Ipam::new();
//! ipam.init(["10.244.0.0/16"], ["10.0.0.0/8"], HashMap::new())?;
//!
//! let a = ipam.get_subnet_per_cluster("10.0.0.0/16", &ClusterId::from("a"))?;
//! let b = ipam.get_subnet_per_cluster("10.0.0.0/16", &ClusterId::from("b"))?;
//! assert_eq!(a.to_string(), "10.0.0.0/16");
//! assert_ne!(a, b);
//! assert_eq!(b.prefix_len(), 16);
//! # Ok::<(), mesh_ipam::IpamError>(())
//! ```

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod prefix;
pub mod types;

pub use engine::{Ipam, SubnetAllocator};
pub use error::{IpamError, PrefixError};
pub use ipnet::IpNet;
pub use prefix::{PrefixAllocator, PrefixTree};
pub use types::{ClusterId, DEFAULT_POOLS, IntoCidr, IpamStats, parse_cidr};
