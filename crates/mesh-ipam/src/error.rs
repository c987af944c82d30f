//! Error types for prefix registration and subnet allocation.

use ipnet::IpNet;
use thiserror::Error;

use crate::types::ClusterId;

/// Errors reported by a [`PrefixAllocator`](crate::PrefixAllocator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    /// The prefix intersects a prefix that is already registered.
    #[error("prefix {prefix} overlaps registered prefix {existing}")]
    Overlaps {
        /// The prefix that was rejected.
        prefix: IpNet,
        /// The registered prefix it collides with.
        existing: IpNet,
    },

    /// The prefix is not registered.
    #[error("prefix {prefix} is not registered")]
    NotFound {
        /// The missing prefix.
        prefix: IpNet,
    },

    /// The child does not lie strictly inside the parent.
    #[error("prefix {child} is not inside parent {parent}")]
    NotInParent {
        /// The parent prefix.
        parent: IpNet,
        /// The requested child.
        child: IpNet,
    },

    /// The requested child is already (partially) in use within its parent.
    #[error("prefix {child} is not available in {parent}")]
    NotAvailable {
        /// The parent prefix.
        parent: IpNet,
        /// The requested child.
        child: IpNet,
    },

    /// The requested child length cannot be carved out of the parent.
    #[error("cannot carve a /{prefix_len} out of {parent}")]
    InvalidLength {
        /// The parent prefix.
        parent: IpNet,
        /// The requested prefix length.
        prefix_len: u8,
    },

    /// Every child of the requested length is taken.
    #[error("no free /{prefix_len} left in {parent}")]
    Exhausted {
        /// The parent prefix.
        parent: IpNet,
        /// The requested prefix length.
        prefix_len: u8,
    },

    /// The prefix was registered standalone, not carved from a parent.
    #[error("prefix {prefix} was not carved from a parent")]
    NotAChild {
        /// The prefix.
        prefix: IpNet,
    },

    /// The prefix was carved from a parent and cannot be deleted standalone.
    #[error("prefix {prefix} is a child of {parent}")]
    IsAChild {
        /// The prefix.
        prefix: IpNet,
        /// Its parent.
        parent: IpNet,
    },

    /// The prefix still has children carved out of it.
    #[error("prefix {prefix} still has {children} child prefixes")]
    HasChildren {
        /// The prefix.
        prefix: IpNet,
        /// Number of remaining children.
        children: usize,
    },
}

/// Errors returned by the IPAM engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpamError {
    /// Input is not a CIDR.
    #[error("invalid CIDR '{input}': {message}")]
    InvalidCidr {
        /// The rejected input.
        input: String,
        /// Parser message.
        message: String,
    },

    /// A pool is not a CIDR.
    #[error("invalid pool '{pool}': {message}")]
    InvalidPool {
        /// The rejected pool.
        pool: String,
        /// Parser message.
        message: String,
    },

    /// The allocator refused to register a pool, typically because it
    /// duplicates or overlaps an earlier one.
    #[error("cannot register pool {pool}: {source}")]
    PoolConflict {
        /// The pool.
        pool: IpNet,
        /// Allocator error.
        #[source]
        source: PrefixError,
    },

    /// `init` was called on an engine that is already initialised.
    #[error("IPAM is already initialised")]
    AlreadyInitialized,

    /// An operation was attempted before `init`.
    #[error("IPAM is not initialised")]
    NotInitialized,

    /// Unexpected allocator failure while registering a cluster subnet.
    #[error("cannot allocate {network}: {source}")]
    Allocation {
        /// The requested network.
        network: IpNet,
        /// Allocator error.
        #[source]
        source: PrefixError,
    },

    /// No pool has a free subnet of the required length.
    #[error("no pool can provide a /{prefix_len} for cluster {cluster} (requested {network})")]
    PoolExhausted {
        /// The requested network.
        network: IpNet,
        /// Its prefix length.
        prefix_len: u8,
        /// The cluster that asked.
        cluster: ClusterId,
    },

    /// The network is not registered as a reservation.
    #[error("network {network} is not reserved")]
    NotReserved {
        /// The network.
        network: IpNet,
    },

    /// The network is registered but could neither be released nor deleted.
    #[error("cannot release network {network}: {source}")]
    CannotRelease {
        /// The network.
        network: IpNet,
        /// Error from the final release attempt.
        #[source]
        source: PrefixError,
    },
}
