//! Configuration synchronizer.
//!
//! The first snapshot initialises the IPAM engine, folding in every subnet
//! already used by an existing tunnel. Later snapshots are diffed against the
//! last applied reserved set: new entries are acquired, dropped entries are
//! freed. A failed acquisition aborts the rest of the cycle; a failed release
//! is logged and skipped, leaving that subnet reserved.

use std::collections::BTreeSet;
use std::sync::Arc;

use ipnet::IpNet;
use mesh_ipam::SubnetAllocator;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::settings::{NetParameters, NetworkSettings};
use crate::tunnel::{TunnelLister, recover_cluster_subnets};

/// What a single snapshot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The engine was initialised from this snapshot.
    Initialized {
        /// Reserved networks taken from the settings.
        reserved: usize,
        /// Cluster subnets recovered from tunnel records.
        clusters: usize,
    },
    /// The reserved set changed and was applied.
    Updated {
        /// Newly reserved networks.
        acquired: usize,
        /// Released networks.
        released: usize,
        /// Releases that failed and were skipped.
        failed_releases: usize,
    },
    /// The snapshot matched what is already applied.
    Unchanged,
}

#[derive(Debug, Default)]
struct SyncState {
    configured: bool,
    applied: BTreeSet<IpNet>,
    params: Option<NetParameters>,
}

/// Applies network settings snapshots to a [`SubnetAllocator`].
pub struct NetworkSynchronizer<I, L> {
    ipam: Arc<I>,
    lister: L,
    pools: Vec<IpNet>,
    state: Mutex<SyncState>,
    configured: watch::Sender<bool>,
}

impl<I: SubnetAllocator, L: TunnelLister> NetworkSynchronizer<I, L> {
    /// Creates a synchronizer. An empty `pools` lets the engine use its defaults.
    pub fn new(ipam: Arc<I>, lister: L, pools: Vec<IpNet>) -> Self {
        let (configured, _) = watch::channel(false);
        Self {
            ipam,
            lister,
            pools,
            state: Mutex::new(SyncState::default()),
            configured,
        }
    }

    /// The engine this synchronizer drives.
    #[must_use]
    pub fn ipam(&self) -> &Arc<I> {
        &self.ipam
    }

    /// Returns true once a snapshot has initialised the engine.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.state.lock().configured
    }

    /// Reserved networks from the last applied snapshot.
    #[must_use]
    pub fn applied_reservations(&self) -> BTreeSet<IpNet> {
        self.state.lock().applied.clone()
    }

    /// Local Pod and Service CIDRs from the last applied snapshot.
    #[must_use]
    pub fn net_parameters(&self) -> Option<NetParameters> {
        self.state.lock().params
    }

    /// Watches the configured flag.
    #[must_use]
    pub fn subscribe_configured(&self) -> watch::Receiver<bool> {
        self.configured.subscribe()
    }

    /// Waits until a snapshot has initialised the engine.
    pub async fn wait_configured(&self) {
        let mut rx = self.configured.subscribe();
        let _ = rx.wait_for(|configured| *configured).await;
    }

    /// Applies one snapshot. Snapshots are serialized: a second caller waits
    /// until the running cycle has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is malformed, tunnel records cannot
    /// be listed, or the engine rejects an initialisation or acquisition.
    pub fn handle(&self, settings: &NetworkSettings) -> Result<SyncOutcome, SyncError> {
        let mut state = self.state.lock();

        let outcome = if state.configured {
            self.update(&mut state, settings)?
        } else {
            self.initialize(&mut state, settings)?
        };

        let params = settings.net_parameters()?;
        if state.params != Some(params) {
            info!(pod_cidr = %params.pod_cidr, service_cidr = %params.service_cidr, "local network parameters set");
            state.params = Some(params);
        }

        if !*self.configured.borrow() {
            self.configured.send_replace(true);
        }
        Ok(outcome)
    }

    fn initialize(
        &self,
        state: &mut SyncState,
        settings: &NetworkSettings,
    ) -> Result<SyncOutcome, SyncError> {
        let reserved = settings.reserved_networks()?;
        let endpoints = self.lister.list_tunnel_endpoints()?;
        let clusters = recover_cluster_subnets(&endpoints);

        let all: Vec<IpNet> = reserved.iter().chain(clusters.values()).copied().collect();
        let cluster_count = clusters.len();
        self.ipam.init(all, self.pools.iter().copied(), clusters)?;

        info!(
            reserved = reserved.len(),
            clusters = cluster_count,
            "IPAM configured from network settings"
        );
        let outcome = SyncOutcome::Initialized {
            reserved: reserved.len(),
            clusters: cluster_count,
        };
        state.applied = reserved;
        state.configured = true;
        Ok(outcome)
    }

    fn update(
        &self,
        state: &mut SyncState,
        settings: &NetworkSettings,
    ) -> Result<SyncOutcome, SyncError> {
        let desired = settings.reserved_networks()?;
        if desired == state.applied {
            debug!("reserved networks unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        let mut acquired = 0;
        for network in desired.difference(&state.applied) {
            self.ipam.acquire_reserved_subnet(*network)?;
            info!(%network, "reserved network added to configuration");
            acquired += 1;
        }

        let mut released = 0;
        let mut failed_releases = 0;
        for network in state.applied.difference(&desired) {
            match self.ipam.free_reserved_subnet(*network) {
                Ok(()) => {
                    info!(%network, "reserved network removed from configuration");
                    released += 1;
                }
                Err(e) => {
                    error!(%network, error = %e, "cannot free reserved network, keeping it reserved");
                    failed_releases += 1;
                }
            }
        }

        state.applied = desired;
        Ok(SyncOutcome::Updated {
            acquired,
            released,
            failed_releases,
        })
    }

    /// Consumes snapshots until the feed closes, applying each to completion
    /// before taking the next. Failures are logged and the loop continues.
    pub async fn run(&self, mut feed: mpsc::Receiver<NetworkSettings>) {
        while let Some(settings) = feed.recv().await {
            match self.handle(&settings) {
                Ok(outcome) => debug!(?outcome, "network settings applied"),
                Err(e) => error!(error = %e, "cannot apply network settings"),
            }
        }
        info!("network settings feed closed");
    }
}
