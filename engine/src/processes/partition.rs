use trellis_engine_core::{Didentifier, NodeId};

/// Where a dataset identifier is owned, from this node's point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Responsibility {
    /// This node owns the dataset id
    Local,
    /// Owned by the peer at this position in the self-excluded peer list
    Remote(usize),
}

/// The keyspace stretch assigned to each node
pub fn space_size(keyspace_size: u64, num_nodes: usize) -> u64 {
    (keyspace_size / num_nodes as u64).max(1)
}

/// The single node responsible for a dataset identifier. The last node also
/// absorbs the remainder stretch of an undivisible keyspace.
pub fn responsible_node(didentifier: Didentifier, keyspace_size: u64, num_nodes: usize) -> NodeId {
    ((didentifier / space_size(keyspace_size, num_nodes)) as NodeId).min(num_nodes - 1)
}

pub fn find_responsibility(didentifier: Didentifier, keyspace_size: u64, node_idx: NodeId, num_nodes: usize) -> Responsibility {
    let responsible = responsible_node(didentifier, keyspace_size, num_nodes);
    if responsible == node_idx {
        Responsibility::Local
    } else {
        Responsibility::Remote(peer_position(node_idx, responsible))
    }
}

/// Position of `target` in the ascending, self-excluded peer list
pub fn peer_position(node_idx: NodeId, target: NodeId) -> usize {
    debug_assert_ne!(node_idx, target);
    if target < node_idx {
        target
    } else {
        target - 1
    }
}

/// Ring neighbors as positions in the self-excluded peer list: `(left, right)`.
/// Ghost exchange uses these irrespective of dataset ownership.
pub fn neighbors(node_idx: NodeId, num_nodes: usize) -> Option<(usize, usize)> {
    if num_nodes < 2 {
        return None;
    }
    let left = (node_idx + num_nodes - 1) % num_nodes;
    let right = (node_idx + 1) % num_nodes;
    Some((peer_position(node_idx, left), peer_position(node_idx, right)))
}
