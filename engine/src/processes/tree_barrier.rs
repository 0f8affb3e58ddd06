use trellis_engine_core::NodeId;

/// A node's role in one reduction round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStep {
    /// Forward the local partial to this node and stop participating
    SendTo(NodeId),
    /// Hold the local partial and wait for this node's value
    ReceiveFrom(NodeId),
    /// No partner falls inside the ring this round; advance to the next one
    Idle,
    /// The reduction has converged (or this node already forwarded its part)
    Done,
}

/// The pairing schedule of the tree barrier.
///
/// Mapping every node to a virtual index `v = (node - root) mod n` makes the
/// reduction converge on `v == 0` regardless of which node roots the job.
/// In round `itr` the senders are the indices whose low bits equal `2^itr`;
/// each forwards to the partner `2^itr` below it, so the set of live partials
/// halves every round until the root absorbs the last one.
pub fn round_step(node_idx: NodeId, num_nodes: usize, root_idx: NodeId, itr: usize) -> RoundStep {
    debug_assert!(node_idx < num_nodes && root_idx < num_nodes);
    let v = (node_idx + num_nodes - root_idx) % num_nodes;
    let stride = match 1usize.checked_shl(itr as u32) {
        Some(stride) if stride < num_nodes => stride,
        // No pairs remain at this distance: the reduction is over
        _ => return RoundStep::Done,
    };
    let span = stride << 1;
    if v % span == stride {
        RoundStep::SendTo((root_idx + v - stride) % num_nodes)
    } else if v % span == 0 {
        if v + stride < num_nodes {
            RoundStep::ReceiveFrom((root_idx + v + stride) % num_nodes)
        } else {
            RoundStep::Idle
        }
    } else {
        // This node forwarded its partial in an earlier round
        RoundStep::Done
    }
}

/// How many peer partials this node absorbs before it forwards its own (or,
/// at the root, before the reduction is complete).
///
/// Reduction hops travel asynchronously and may arrive out of round order;
/// counting absorbed partials against this bound is what decides when a node
/// moves on, so an early hop can never terminate the reduction prematurely.
pub fn expected_receives(node_idx: NodeId, num_nodes: usize, root_idx: NodeId) -> usize {
    let mut count = 0;
    for itr in 0.. {
        match round_step(node_idx, num_nodes, root_idx, itr) {
            RoundStep::ReceiveFrom(_) => count += 1,
            RoundStep::Idle => {}
            RoundStep::SendTo(_) | RoundStep::Done => return count,
        }
    }
    unreachable!("round_step reports Done once the stride covers the ring")
}

/// The round at which this node forwards its partial, and to whom; `None` at
/// the root, which absorbs partials until the reduction converges
pub fn send_target(node_idx: NodeId, num_nodes: usize, root_idx: NodeId) -> Option<(usize, NodeId)> {
    for itr in 0.. {
        match round_step(node_idx, num_nodes, root_idx, itr) {
            RoundStep::SendTo(target) => return Some((itr, target)),
            RoundStep::Done => return None,
            RoundStep::ReceiveFrom(_) | RoundStep::Idle => {}
        }
    }
    unreachable!("round_step reports Done once the stride covers the ring")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// Drives a full reduction over `num_nodes` nodes, modelling each node's
    /// value as the multiset of original contributions it absorbed so far.
    /// Returns the root's final multiset and the per-node combine counts.
    fn simulate(num_nodes: usize, root_idx: NodeId) -> (Vec<NodeId>, HashMap<NodeId, usize>) {
        let mut values: HashMap<NodeId, Vec<NodeId>> = (0..num_nodes).map(|idx| (idx, vec![idx])).collect();
        let mut combines: HashMap<NodeId, usize> = HashMap::new();
        // Messages in flight: (receiver, itr, payload)
        let mut queue: VecDeque<(NodeId, usize, Vec<NodeId>)> = VecDeque::new();
        let mut done_at_root = false;

        // Every node walks its rounds from zero until it sends, waits or finishes
        let walk = |node: NodeId,
                        start: usize,
                        values: &mut HashMap<NodeId, Vec<NodeId>>,
                        queue: &mut VecDeque<(NodeId, usize, Vec<NodeId>)>,
                        done: &mut bool| {
            let mut itr = start;
            loop {
                match round_step(node, num_nodes, root_idx, itr) {
                    RoundStep::SendTo(target) => {
                        let payload = values.get(&node).unwrap().clone();
                        queue.push_back((target, itr + 1, payload));
                        return;
                    }
                    RoundStep::ReceiveFrom(_) => return,
                    RoundStep::Idle => itr += 1,
                    RoundStep::Done => {
                        if node == root_idx {
                            *done = true;
                        }
                        return;
                    }
                }
            }
        };

        for node in 0..num_nodes {
            walk(node, 0, &mut values, &mut queue, &mut done_at_root);
        }
        while let Some((receiver, itr, payload)) = queue.pop_front() {
            values.get_mut(&receiver).unwrap().extend(payload);
            *combines.entry(receiver).or_default() += 1;
            walk(receiver, itr, &mut values, &mut queue, &mut done_at_root);
        }

        assert!(done_at_root, "the root must observe the terminal signal");
        (values.remove(&root_idx).unwrap(), combines)
    }

    #[test]
    fn test_every_partial_reduces_exactly_once() {
        for num_nodes in 1..=9 {
            for root_idx in 0..num_nodes {
                let (absorbed, _) = simulate(num_nodes, root_idx);
                let mut sorted = absorbed.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, (0..num_nodes).collect::<Vec<_>>(), "n={num_nodes} root={root_idx}");
            }
        }
    }

    #[test]
    fn test_total_combines_match_node_count() {
        for num_nodes in 2..=9 {
            let (_, combines) = simulate(num_nodes, 0);
            let total: usize = combines.values().sum();
            assert_eq!(total, num_nodes - 1);
        }
    }

    #[test]
    fn test_single_node_is_immediately_done() {
        assert_eq!(round_step(0, 1, 0, 0), RoundStep::Done);
        assert_eq!(expected_receives(0, 1, 0), 0);
        assert_eq!(send_target(0, 1, 0), None);
    }

    #[test]
    fn test_schedule_summaries() {
        for num_nodes in 1..=9 {
            for root_idx in 0..num_nodes {
                // The root absorbs partials and never forwards
                assert_eq!(send_target(root_idx, num_nodes, root_idx), None);
                // Every absorbed partial is one node's single send
                let total: usize = (0..num_nodes).map(|node| expected_receives(node, num_nodes, root_idx)).sum();
                assert_eq!(total, num_nodes - 1);
                for node in (0..num_nodes).filter(|&node| node != root_idx) {
                    assert!(send_target(node, num_nodes, root_idx).is_some());
                }
            }
        }
        // Five nodes rooted at 0: the root hears 1, 2 and 4; node 4 sends late
        assert_eq!(expected_receives(0, 5, 0), 3);
        assert_eq!(send_target(4, 5, 0), Some((2, 0)));
        assert_eq!(send_target(3, 5, 0), Some((0, 2)));
    }

    #[test]
    fn test_round_zero_pairing() {
        // Four nodes rooted at 0: 1 -> 0 and 3 -> 2 in round zero
        assert_eq!(round_step(1, 4, 0, 0), RoundStep::SendTo(0));
        assert_eq!(round_step(0, 4, 0, 0), RoundStep::ReceiveFrom(1));
        assert_eq!(round_step(3, 4, 0, 0), RoundStep::SendTo(2));
        assert_eq!(round_step(2, 4, 0, 0), RoundStep::ReceiveFrom(3));
        // Round one: 2 -> 0
        assert_eq!(round_step(2, 4, 0, 1), RoundStep::SendTo(0));
        assert_eq!(round_step(0, 4, 0, 1), RoundStep::ReceiveFrom(2));
        // Round two: the root is alone
        assert_eq!(round_step(0, 4, 0, 2), RoundStep::Done);
    }

    #[test]
    fn test_rooted_elsewhere() {
        // Three nodes rooted at 2: virtual order is 2, 0, 1
        assert_eq!(round_step(0, 3, 2, 0), RoundStep::SendTo(2));
        assert_eq!(round_step(2, 3, 2, 0), RoundStep::ReceiveFrom(0));
        assert_eq!(round_step(1, 3, 2, 0), RoundStep::Idle);
        assert_eq!(round_step(1, 3, 2, 1), RoundStep::SendTo(2));
        assert_eq!(round_step(2, 3, 2, 1), RoundStep::ReceiveFrom(1));
    }
}
