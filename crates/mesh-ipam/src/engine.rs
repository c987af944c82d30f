//! The IPAM engine.
//!
//! Hands out subnets to remote clusters so that every cluster's address
//! space is unique from the local cluster's point of view. A remote cluster
//! keeps its advertised CIDR when it collides with nothing; otherwise it is
//! remapped to a free subnet of the same prefix length taken from the pools.
//!
//! All state sits behind one lock, so every operation, reads included, is a
//! critical section.

use std::collections::{BTreeSet, HashMap};

use ipnet::IpNet;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{IpamError, PrefixError};
use crate::prefix::{PrefixAllocator, PrefixTree};
use crate::types::{ClusterId, DEFAULT_POOLS, IntoCidr, IpamStats, overlaps};

/// Subnet allocation operations consumed by the control plane.
pub trait SubnetAllocator: Send + Sync {
    /// Registers the pools, reserves `reserved` and seeds the cluster mapping.
    ///
    /// An empty `pools` selects [`DEFAULT_POOLS`]. Must be called once,
    /// before any other operation.
    ///
    /// # Errors
    ///
    /// [`IpamError::InvalidPool`] or [`IpamError::PoolConflict`] for bad
    /// pools, [`IpamError::InvalidCidr`] for a bad reservation,
    /// [`IpamError::AlreadyInitialized`] on a second call.
    fn init<R, P>(
        &self,
        reserved: R,
        pools: P,
        existing: HashMap<ClusterId, IpNet>,
    ) -> Result<(), IpamError>
    where
        R: IntoIterator,
        R::Item: IntoCidr,
        P: IntoIterator,
        P::Item: IntoCidr;

    /// Marks `network` as never available to clusters. Idempotent.
    ///
    /// # Errors
    ///
    /// [`IpamError::InvalidCidr`] if `network` does not parse.
    fn acquire_reserved_subnet(&self, network: impl IntoCidr) -> Result<(), IpamError>;

    /// Releases a reservation made by [`acquire_reserved_subnet`](Self::acquire_reserved_subnet).
    ///
    /// A network that is also a cluster's subnet stays registered until
    /// [`free_subnet_per_cluster`](Self::free_subnet_per_cluster) releases it.
    ///
    /// # Errors
    ///
    /// [`IpamError::NotReserved`] if `network` is not registered,
    /// [`IpamError::CannotRelease`] if it cannot be removed.
    fn free_reserved_subnet(&self, network: impl IntoCidr) -> Result<(), IpamError>;

    /// Returns the subnet in effect for `cluster`, allocating it on first use.
    ///
    /// # Errors
    ///
    /// [`IpamError::PoolExhausted`] when a remap is needed and no pool has a
    /// free subnet of the same length.
    fn get_subnet_per_cluster(
        &self,
        network: impl IntoCidr,
        cluster: &ClusterId,
    ) -> Result<IpNet, IpamError>;

    /// Releases the subnet held by `cluster`. Unknown clusters are a no-op.
    ///
    /// # Errors
    ///
    /// [`IpamError::NotInitialized`] before `init`.
    fn free_subnet_per_cluster(&self, cluster: &ClusterId) -> Result<(), IpamError>;
}

#[derive(Debug)]
struct IpamState<A> {
    allocator: A,
    /// Scan order for containment tests and remapping.
    pools: Vec<IpNet>,
    /// Reservations that equal or cover whole pools. Kept outside the
    /// allocator; every pool they contain is closed to clusters.
    covering: BTreeSet<IpNet>,
    subnet_per_cluster: HashMap<ClusterId, IpNet>,
    initialized: bool,
}

/// IPAM engine over a [`PrefixAllocator`].
#[derive(Debug)]
pub struct Ipam<A = PrefixTree> {
    state: Mutex<IpamState<A>>,
}

impl Ipam<PrefixTree> {
    /// Creates an uninitialised engine backed by a [`PrefixTree`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(PrefixTree::new())
    }
}

impl Default for Ipam<PrefixTree> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: PrefixAllocator> Ipam<A> {
    /// Creates an uninitialised engine over a custom allocator.
    #[must_use]
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            state: Mutex::new(IpamState {
                allocator,
                pools: Vec::new(),
                covering: BTreeSet::new(),
                subnet_per_cluster: HashMap::new(),
                initialized: false,
            }),
        }
    }

    /// Returns true once `init` has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Configured pools in scan order.
    #[must_use]
    pub fn pools(&self) -> Vec<IpNet> {
        self.state.lock().pools.clone()
    }

    /// Subnet currently assigned to `cluster`.
    #[must_use]
    pub fn subnet_for_cluster(&self, cluster: &str) -> Option<IpNet> {
        self.state.lock().subnet_per_cluster.get(cluster).copied()
    }

    /// Copy of the whole cluster subnet mapping.
    #[must_use]
    pub fn cluster_subnets(&self) -> HashMap<ClusterId, IpNet> {
        self.state.lock().subnet_per_cluster.clone()
    }

    /// Returns true if `network` is registered, as a reservation, a cluster
    /// subnet or a pool. Unparseable input is never registered.
    pub fn is_registered(&self, network: impl IntoCidr) -> bool {
        network.into_cidr().is_ok_and(|net| {
            let state = self.state.lock();
            state.allocator.contains(net) || state.covering.contains(&net)
        })
    }

    /// Snapshot of pools, registered networks and cluster mapping.
    #[must_use]
    pub fn stats(&self) -> IpamStats {
        let state = self.state.lock();
        let mut registered: Vec<IpNet> = state
            .allocator
            .prefixes()
            .into_iter()
            .filter(|net| !state.pools.contains(net))
            .chain(state.covering.iter().copied())
            .collect();
        registered.sort_unstable();
        registered.dedup();

        IpamStats {
            pools: state.pools.clone(),
            registered,
            clusters: state.subnet_per_cluster.clone(),
        }
    }
}

impl<A: PrefixAllocator> IpamState<A> {
    fn ensure_initialized(&self) -> Result<(), IpamError> {
        if self.initialized {
            Ok(())
        } else {
            Err(IpamError::NotInitialized)
        }
    }

    fn pool_for(&self, network: &IpNet) -> Option<IpNet> {
        self.pools.iter().find(|pool| pool.contains(network)).copied()
    }

    fn register_pools(&mut self, pools: &[IpNet]) -> Result<(), IpamError> {
        for (i, pool) in pools.iter().enumerate() {
            if let Err(source) = self.allocator.new_prefix(*pool) {
                for registered in &pools[..i] {
                    if let Err(e) = self.allocator.delete_prefix(*registered) {
                        warn!(pool = %registered, error = %e, "cannot roll back pool registration");
                    }
                }
                return Err(IpamError::PoolConflict {
                    pool: *pool,
                    source,
                });
            }
        }
        Ok(())
    }

    fn is_covered(&self, network: &IpNet) -> bool {
        self.covering.iter().any(|reservation| overlaps(reservation, network))
    }

    fn is_pool_closed(&self, pool: &IpNet) -> bool {
        self.covering.iter().any(|reservation| reservation.contains(pool))
    }

    fn is_cluster_subnet(&self, network: &IpNet) -> bool {
        self.subnet_per_cluster.values().any(|subnet| subnet == network)
    }

    fn acquire_reserved(&mut self, network: IpNet) {
        if self.covering.iter().any(|reservation| reservation.contains(&network)) {
            debug!(%network, "network is inside a pool-wide reservation");
            return;
        }
        if self.pools.iter().any(|pool| network.contains(pool)) {
            self.covering.insert(network);
            info!(%network, "reserved network covers whole pools, closing them to clusters");
            return;
        }

        let (result, pool) = match self.pool_for(&network) {
            Some(pool) => (self.allocator.acquire_specific_child(pool, network), Some(pool)),
            None => (self.allocator.new_prefix(network), None),
        };

        match result {
            Ok(()) => match pool {
                Some(pool) => info!(%network, %pool, "reserved network inside pool"),
                None => info!(%network, "reserved network outside pools"),
            },
            Err(_) if self.allocator.contains(network) => {
                debug!(%network, "network is already reserved");
            }
            Err(e) => {
                warn!(%network, error = %e, "network collides with existing allocations, leaving it as is");
            }
        }
    }

    fn release_reservation(&mut self, network: IpNet) -> Result<(), IpamError> {
        if self.covering.remove(&network) {
            info!(%network, "pool-wide reservation released");
            return Ok(());
        }
        if self.is_cluster_subnet(&network) {
            if !self.allocator.contains(network) {
                return Err(IpamError::NotReserved { network });
            }
            info!(%network, "network is still assigned to a cluster, keeping it registered");
            return Ok(());
        }
        self.release(network)?;
        info!(%network, "released reserved network");
        Ok(())
    }

    fn release(&mut self, network: IpNet) -> Result<(), IpamError> {
        if self.pools.contains(&network) || !self.allocator.contains(network) {
            return Err(IpamError::NotReserved { network });
        }

        if let Err(e) = self.allocator.release_child(network) {
            debug!(%network, error = %e, "not a pool subnet, deleting standalone network");
            self.allocator
                .delete_prefix(network)
                .map_err(|source| IpamError::CannotRelease { network, source })?;
        }
        Ok(())
    }

    fn assign(&mut self, cluster: &ClusterId, network: IpNet) -> IpNet {
        self.subnet_per_cluster.insert(cluster.clone(), network);
        network
    }

    fn get_subnet(&mut self, network: IpNet, cluster: &ClusterId) -> Result<IpNet, IpamError> {
        if let Some(assigned) = self.subnet_per_cluster.get(cluster) {
            return Ok(*assigned);
        }

        debug!(%network, %cluster, "subnet requested for cluster");
        if self.is_covered(&network) {
            debug!(%network, "advertised network overlaps a pool-wide reservation");
            return self.remap(network, cluster);
        }

        match self.allocator.new_prefix(network) {
            Ok(()) => {
                info!(%network, %cluster, "assigned advertised network to cluster");
                return Ok(self.assign(cluster, network));
            }
            Err(PrefixError::Overlaps { existing, .. }) => {
                debug!(%network, %existing, "advertised network overlaps a registered one");
            }
            Err(source) => return Err(IpamError::Allocation { network, source }),
        }

        if let Some(pool) = self.pool_for(&network) {
            match self.allocator.acquire_specific_child(pool, network) {
                Ok(()) => {
                    info!(%network, %pool, %cluster, "assigned advertised network from pool");
                    return Ok(self.assign(cluster, network));
                }
                Err(PrefixError::NotAvailable { .. }) => {
                    debug!(%network, %pool, "advertised network is taken in its pool");
                }
                Err(source) => return Err(IpamError::Allocation { network, source }),
            }
        }

        self.remap(network, cluster)
    }

    fn remap(&mut self, network: IpNet, cluster: &ClusterId) -> Result<IpNet, IpamError> {
        let prefix_len = network.prefix_len();
        let mut remapped = None;
        for pool in &self.pools {
            if !same_family(pool, &network) || self.is_pool_closed(pool) {
                continue;
            }
            match self.allocator.acquire_child(*pool, prefix_len) {
                Ok(child) => {
                    remapped = Some(child);
                    break;
                }
                Err(e) => debug!(%pool, prefix_len, error = %e, "pool cannot provide remap"),
            }
        }

        let Some(remapped) = remapped else {
            warn!(%network, %cluster, prefix_len, "no pool can remap network");
            return Err(IpamError::PoolExhausted {
                network,
                prefix_len,
                cluster: cluster.clone(),
            });
        };

        info!(%network, %remapped, %cluster, "remapped cluster network");
        Ok(self.assign(cluster, remapped))
    }
}

const fn same_family(a: &IpNet, b: &IpNet) -> bool {
    matches!(
        (a, b),
        (IpNet::V4(_), IpNet::V4(_)) | (IpNet::V6(_), IpNet::V6(_))
    )
}

impl<A: PrefixAllocator> SubnetAllocator for Ipam<A> {
    fn init<R, P>(
        &self,
        reserved: R,
        pools: P,
        existing: HashMap<ClusterId, IpNet>,
    ) -> Result<(), IpamError>
    where
        R: IntoIterator,
        R::Item: IntoCidr,
        P: IntoIterator,
        P::Item: IntoCidr,
    {
        let mut state = self.state.lock();
        if state.initialized {
            return Err(IpamError::AlreadyInitialized);
        }

        let mut pools = pools
            .into_iter()
            .map(|pool| pool.into_cidr().map_err(invalid_pool))
            .collect::<Result<Vec<_>, _>>()?;
        if pools.is_empty() {
            pools = DEFAULT_POOLS
                .iter()
                .map(|pool| pool.into_cidr().map_err(invalid_pool))
                .collect::<Result<Vec<_>, _>>()?;
        }
        let reserved = reserved
            .into_iter()
            .map(IntoCidr::into_cidr)
            .collect::<Result<Vec<_>, _>>()?;

        state.register_pools(&pools)?;
        state.pools = pools;

        for network in &reserved {
            state.acquire_reserved(*network);
        }

        state.subnet_per_cluster.extend(existing);
        state.initialized = true;

        info!(
            pools = ?state.pools,
            reserved = reserved.len(),
            clusters = state.subnet_per_cluster.len(),
            "IPAM initialised"
        );
        Ok(())
    }

    fn acquire_reserved_subnet(&self, network: impl IntoCidr) -> Result<(), IpamError> {
        let network = network.into_cidr()?;
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.acquire_reserved(network);
        Ok(())
    }

    fn free_reserved_subnet(&self, network: impl IntoCidr) -> Result<(), IpamError> {
        let network = network.into_cidr()?;
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.release_reservation(network)
    }

    fn get_subnet_per_cluster(
        &self,
        network: impl IntoCidr,
        cluster: &ClusterId,
    ) -> Result<IpNet, IpamError> {
        let network = network.into_cidr()?;
        let mut state = self.state.lock();
        state.ensure_initialized()?;
        state.get_subnet(network, cluster)
    }

    fn free_subnet_per_cluster(&self, cluster: &ClusterId) -> Result<(), IpamError> {
        let mut state = self.state.lock();
        state.ensure_initialized()?;

        let Some(network) = state.subnet_per_cluster.remove(cluster) else {
            debug!(%cluster, "no subnet assigned to cluster");
            return Ok(());
        };

        match state.release(network) {
            Ok(()) => info!(%network, %cluster, "released cluster subnet"),
            Err(e) => warn!(%network, %cluster, error = %e, "cannot release cluster subnet, dropping mapping anyway"),
        }
        Ok(())
    }
}

fn invalid_pool(err: IpamError) -> IpamError {
    match err {
        IpamError::InvalidCidr { input, message } => IpamError::InvalidPool {
            pool: input,
            message,
        },
        other => other,
    }
}
