// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) records for snapshots and inspection.
//!
//! Live edges are stored on the ports themselves; a [`Connection`] is the flat,
//! serializable view of one of them.

use crate::node::NodeId;
use crate::port::{InputRef, OutputRef};
use serde::{Deserialize, Serialize};

/// A connection between an output and an input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source node ID
    pub from_node: NodeId,
    /// Source output index
    pub from_port: usize,
    /// Target node ID
    pub to_node: NodeId,
    /// Target input index
    pub to_port: usize,
    /// Position in the source output's downstream list
    #[serde(default)]
    pub order: usize,
}

impl Connection {
    /// Create a new connection
    pub fn new(from_node: NodeId, from_port: usize, to_node: NodeId, to_port: usize) -> Self {
        Self {
            from_node,
            from_port,
            to_node,
            to_port,
            order: 0,
        }
    }

    /// Set the downstream order
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Source end
    pub fn from(&self) -> OutputRef {
        OutputRef::new(self.from_node, self.from_port)
    }

    /// Target end
    pub fn to(&self) -> InputRef {
        InputRef::new(self.to_node, self.to_port)
    }

    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from_node == node_id || self.to_node == node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_involves_node() {
        let a = NodeId::new();
        let b = NodeId::new();
        let c = Connection::new(a, 0, b, 1).with_order(2);
        assert!(c.involves_node(a));
        assert!(c.involves_node(b));
        assert!(!c.involves_node(NodeId::new()));
        assert_eq!(c.from(), OutputRef::new(a, 0));
        assert_eq!(c.to(), InputRef::new(b, 1));
        assert_eq!(c.order, 2);
    }
}
