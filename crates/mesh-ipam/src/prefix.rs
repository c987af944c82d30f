//! Hierarchical prefix registry.
//!
//! A [`PrefixAllocator`] tracks two kinds of networks:
//!
//! ```text
//! 10.0.0.0/8            top-level (registered with new_prefix)
//! ├── 10.0.0.0/16       child (acquire_specific_child / acquire_child)
//! └── 10.1.0.0/16       child
//! 100.64.0.0/24         top-level, no children
//! ```
//!
//! Top-level prefixes never overlap each other and children never overlap
//! their siblings, so every registered network is either disjoint from or
//! nested inside any other.

use std::collections::{BTreeMap, BTreeSet};

use ipnet::IpNet;

use crate::error::PrefixError;
use crate::types::overlaps;

/// Address-space tracker the IPAM engine is built on.
pub trait PrefixAllocator: Send {
    /// Registers a standalone top-level prefix.
    ///
    /// # Errors
    ///
    /// [`PrefixError::Overlaps`] if it intersects a registered top-level prefix.
    fn new_prefix(&mut self, prefix: IpNet) -> Result<(), PrefixError>;

    /// Carves exactly `child` out of `parent`.
    ///
    /// # Errors
    ///
    /// [`PrefixError::NotAvailable`] if any part of `child` is already used.
    fn acquire_specific_child(&mut self, parent: IpNet, child: IpNet) -> Result<(), PrefixError>;

    /// Carves the lowest free child of length `prefix_len` out of `parent`.
    ///
    /// # Errors
    ///
    /// [`PrefixError::Exhausted`] if no such child is free.
    fn acquire_child(&mut self, parent: IpNet, prefix_len: u8) -> Result<IpNet, PrefixError>;

    /// Returns a carved child to its parent.
    ///
    /// # Errors
    ///
    /// [`PrefixError::NotAChild`] if `child` was registered standalone.
    fn release_child(&mut self, child: IpNet) -> Result<(), PrefixError>;

    /// Deletes a standalone top-level prefix.
    ///
    /// # Errors
    ///
    /// [`PrefixError::IsAChild`] if `prefix` was carved from a parent.
    fn delete_prefix(&mut self, prefix: IpNet) -> Result<(), PrefixError>;

    /// Returns true if `prefix` is registered, as top-level or as a child.
    fn contains(&self, prefix: IpNet) -> bool;

    /// Lists every registered prefix.
    fn prefixes(&self) -> Vec<IpNet>;
}

#[derive(Debug, Clone, Default)]
struct Node {
    parent: Option<IpNet>,
    children: BTreeSet<IpNet>,
}

/// In-memory [`PrefixAllocator`] keyed by prefix.
#[derive(Debug, Clone, Default)]
pub struct PrefixTree {
    nodes: BTreeMap<IpNet, Node>,
}

impl PrefixTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered prefixes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the parent `prefix` was carved from, if any.
    #[must_use]
    pub fn parent_of(&self, prefix: IpNet) -> Option<IpNet> {
        self.nodes.get(&prefix).and_then(|node| node.parent)
    }

    fn node(&self, prefix: IpNet) -> Result<&Node, PrefixError> {
        self.nodes.get(&prefix).ok_or(PrefixError::NotFound { prefix })
    }

    fn insert_child(&mut self, parent: IpNet, child: IpNet) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.insert(child);
        }
        self.nodes.insert(
            child,
            Node {
                parent: Some(parent),
                children: BTreeSet::new(),
            },
        );
    }
}

const fn max_prefix_len(net: &IpNet) -> u8 {
    match net {
        IpNet::V4(_) => 32,
        IpNet::V6(_) => 128,
    }
}

impl PrefixAllocator for PrefixTree {
    fn new_prefix(&mut self, prefix: IpNet) -> Result<(), PrefixError> {
        let existing = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(net, _)| *net)
            .find(|net| overlaps(net, &prefix));

        if let Some(existing) = existing {
            return Err(PrefixError::Overlaps { prefix, existing });
        }

        self.nodes.insert(prefix, Node::default());
        Ok(())
    }

    fn acquire_specific_child(&mut self, parent: IpNet, child: IpNet) -> Result<(), PrefixError> {
        let node = self.node(parent)?;

        if !parent.contains(&child) {
            return Err(PrefixError::NotInParent { parent, child });
        }
        if child.prefix_len() <= parent.prefix_len() {
            return Err(PrefixError::InvalidLength {
                parent,
                prefix_len: child.prefix_len(),
            });
        }
        if node.children.iter().any(|used| overlaps(used, &child)) {
            return Err(PrefixError::NotAvailable { parent, child });
        }

        self.insert_child(parent, child);
        Ok(())
    }

    fn acquire_child(&mut self, parent: IpNet, prefix_len: u8) -> Result<IpNet, PrefixError> {
        let node = self.node(parent)?;

        if prefix_len <= parent.prefix_len() || prefix_len > max_prefix_len(&parent) {
            return Err(PrefixError::InvalidLength { parent, prefix_len });
        }

        let mut candidates = parent
            .subnets(prefix_len)
            .map_err(|_| PrefixError::InvalidLength { parent, prefix_len })?;

        let child = candidates
            .find(|candidate| !node.children.iter().any(|used| overlaps(used, candidate)))
            .ok_or(PrefixError::Exhausted { parent, prefix_len })?;

        self.insert_child(parent, child);
        Ok(child)
    }

    fn release_child(&mut self, child: IpNet) -> Result<(), PrefixError> {
        let node = self.node(child)?;
        let parent = node.parent.ok_or(PrefixError::NotAChild { prefix: child })?;
        if !node.children.is_empty() {
            return Err(PrefixError::HasChildren {
                prefix: child,
                children: node.children.len(),
            });
        }

        self.nodes.remove(&child);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.remove(&child);
        }
        Ok(())
    }

    fn delete_prefix(&mut self, prefix: IpNet) -> Result<(), PrefixError> {
        let node = self.node(prefix)?;
        if let Some(parent) = node.parent {
            return Err(PrefixError::IsAChild { prefix, parent });
        }
        if !node.children.is_empty() {
            return Err(PrefixError::HasChildren {
                prefix,
                children: node.children.len(),
            });
        }

        self.nodes.remove(&prefix);
        Ok(())
    }

    fn contains(&self, prefix: IpNet) -> bool {
        self.nodes.contains_key(&prefix)
    }

    fn prefixes(&self) -> Vec<IpNet> {
        self.nodes.keys().copied().collect()
    }
}
