use std::{collections::HashMap, fmt};

use qos_common::Rate;
use qos_tc::Direction;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Capacity assumed for interfaces that don't declare one.
pub const DEFAULT_CAPACITY: Rate = Rate::mbit(100);

/// What the controller does with an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceRole {
    /// Egress toward the monitored destination.
    Forward,
    /// Egress toward the monitored source.
    Backward,
    /// Never shaped, but still cleared by `remove`.
    Unmanaged,
}

impl InterfaceRole {
    /// The classification direction, or `None` for unmanaged interfaces.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Self::Forward => Some(Direction::Forward),
            Self::Backward => Some(Direction::Backward),
            Self::Unmanaged => None,
        }
    }
}

/// One network interface of a [`NetworkNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Device name as `tc` addresses it, e.g. `r_trans1-eth0`.
    pub name: String,
    /// Link capacity the plan is scaled to.
    pub capacity: Rate,
    pub role: InterfaceRole,
}

impl Interface {
    /// An interface with the [default capacity](DEFAULT_CAPACITY).
    pub fn new(name: impl Into<String>, role: InterfaceRole) -> Self {
        Self { name: name.into(), capacity: DEFAULT_CAPACITY, role }
    }

    pub fn forward(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceRole::Forward)
    }

    pub fn backward(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceRole::Backward)
    }

    pub fn unmanaged(name: impl Into<String>) -> Self {
        Self::new(name, InterfaceRole::Unmanaged)
    }

    pub fn with_capacity(mut self, capacity: Rate) -> Self {
        self.capacity = capacity;
        self
    }
}

/// A transit node whose traffic-control state the controller manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    /// Unique within a registry.
    pub name: String,
    /// Network namespace the node's commands run in. `None` runs them on the host.
    pub namespace: Option<String>,
    pub interfaces: Vec<Interface>,
}

impl NetworkNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: None, interfaces: Vec::new() }
    }

    /// Run this node's commands inside `namespace`.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Interfaces that get a plan, with their classification direction.
    pub fn managed(&self) -> impl Iterator<Item = (&Interface, Direction)> {
        self.interfaces.iter().filter_map(|i| i.role.direction().map(|d| (i, d)))
    }
}

/// Index of a node in its [`NodeRegistry`]. Stable for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The validated set of managed nodes, in sweep order.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<NetworkNode>,
    by_name: HashMap<String, NodeId>,
}

impl NodeRegistry {
    /// Validates and indexes `nodes`. Node names must be unique, interface names must be unique
    /// per node and addressable by `tc`.
    pub fn new(nodes: Vec<NetworkNode>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::NoNodes);
        }

        let mut by_name = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if by_name.insert(node.name.clone(), NodeId(idx)).is_some() {
                return Err(Error::DuplicateNode(node.name.clone()));
            }

            let mut seen = Vec::with_capacity(node.interfaces.len());
            for interface in &node.interfaces {
                if seen.contains(&interface.name.as_str()) {
                    return Err(Error::DuplicateInterface {
                        node: node.name.clone(),
                        dev: interface.name.clone(),
                    });
                }
                seen.push(interface.name.as_str());

                qos_tc::validate_dev(&interface.name).map_err(|source| Error::Interface {
                    node: node.name.clone(),
                    dev: interface.name.clone(),
                    source,
                })?;
            }
        }

        Ok(Self { nodes, by_name })
    }

    pub fn get(&self, id: NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id.0)
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&NetworkNode> {
        self.id(name).and_then(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NetworkNode)> {
        self.nodes.iter().enumerate().map(|(idx, node)| (NodeId(idx), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(name: &str) -> NetworkNode {
        NetworkNode::new(name)
            .with_interface(Interface::backward("eth0"))
            .with_interface(Interface::forward("eth1").with_capacity(Rate::mbit(50)))
    }

    #[test]
    fn indexes_nodes_in_order() {
        let registry = NodeRegistry::new(vec![router("r1"), router("r2")]).unwrap();

        assert_eq!(registry.len(), 2);
        let ids: Vec<NodeId> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(registry.id("r2"), Some(ids[1]));
        assert_eq!(registry.by_name("r1").unwrap().interfaces[1].capacity, Rate::mbit(50));
        assert!(registry.by_name("r9").is_none());
    }

    #[test]
    fn default_capacity() {
        assert_eq!(Interface::forward("eth1").capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn managed_skips_unmanaged() {
        let node = router("r3").with_interface(Interface::unmanaged("eth2"));
        let managed: Vec<(&str, Direction)> =
            node.managed().map(|(i, d)| (i.name.as_str(), d)).collect();
        assert_eq!(managed, [("eth0", Direction::Backward), ("eth1", Direction::Forward)]);
    }

    #[test]
    fn rejects_bad_registries() {
        assert!(matches!(NodeRegistry::new(vec![]), Err(Error::NoNodes)));
        assert!(matches!(
            NodeRegistry::new(vec![router("r1"), router("r1")]),
            Err(Error::DuplicateNode(name)) if name == "r1"
        ));

        let twice = router("r1").with_interface(Interface::unmanaged("eth0"));
        assert!(matches!(
            NodeRegistry::new(vec![twice]),
            Err(Error::DuplicateInterface { dev, .. }) if dev == "eth0"
        ));

        let long = NetworkNode::new("r1").with_interface(Interface::forward("a-very-long-ifname0"));
        assert!(matches!(NodeRegistry::new(vec![long]), Err(Error::Interface { .. })));
    }
}
