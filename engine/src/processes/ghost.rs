use crate::cache::GhostEntry;
use trellis_engine_core::ops::{GhostType, OperationContext};
use trellis_engine_core::value::Block;

/// Edge slices cut from the local shard, named by the context side they fill
/// in at the receiver: `left` holds block tails bound for the right neighbor,
/// `right` holds block heads bound for the left neighbor.
#[derive(Clone, Debug, PartialEq)]
pub struct GhostPlan {
    pub left: Option<Vec<Option<Block>>>,
    pub right: Option<Vec<Option<Block>>>,
    pub needs_both: bool,
}

/// Decides and extracts the edge slices for one job.
///
/// Returns `None` when the context declares no ghost sides: execution can
/// start immediately. Slices are always taken on the sender; receivers never
/// re-derive them.
///
/// `local` marks a single-node deployment, where the node exchanges with
/// itself: the slices are then self-aligned so that block `i` borrows the
/// head of block `i + 1` (and nothing wraps past either dataset end).
pub fn extract_ghosts(context: &OperationContext, blocks: &[Block], is_root: bool, local: bool) -> Option<GhostPlan> {
    if !context.needs_ghost() {
        return None;
    }
    debug_assert!(matches!(context.ghost_type, GhostType::Entry));
    let count = context.ghost_count;

    // Heads travel leftward and become the left neighbor's right-side context
    let right = context.ghost_right.then(|| {
        let mut heads: Vec<Option<Block>> =
            blocks.iter().map(|block| Some(block[..count.min(block.len())].to_vec())).collect();
        if is_root && !heads.is_empty() {
            // The dataset starts here; nothing precedes the first block
            heads[0] = None;
        }
        if local && !heads.is_empty() {
            heads.remove(0);
            heads.push(None);
        }
        heads
    });

    // Tails travel rightward and become the right neighbor's left-side context
    let left = context
        .ghost_left
        .then(|| blocks.iter().map(|block| Some(block[block.len().saturating_sub(count)..].to_vec())).collect::<Vec<_>>());

    debug_assert!(left.is_some() || right.is_some());
    Some(GhostPlan { left, right, needs_both: context.ghost_left && context.ghost_right })
}

/// Receiver-side alignment of an incoming left-context list.
///
/// At the dataset root the sender holds the *final* stretch of the dataset,
/// so its tail slices belong one block further down and nothing precedes
/// block 0 (no wrap-around at the dataset start). This also covers the
/// single-node self-exchange, where the receiver is always the root.
pub fn align_incoming_left(mut left: Vec<Option<Block>>, receiver_is_root: bool) -> Vec<Option<Block>> {
    if receiver_is_root && !left.is_empty() {
        left.pop();
        left.insert(0, None);
    }
    left
}

/// Stitches the stored ghost context into the local shard:
/// `left[i] ++ block[i] ++ right[i]`, with missing sides treated as empty.
pub fn merge_ghosts(blocks: Vec<Block>, entry: &GhostEntry) -> Vec<Block> {
    blocks
        .into_iter()
        .enumerate()
        .map(|(idx, block)| {
            let side = |ghosts: &Option<Vec<Option<Block>>>| {
                ghosts.as_ref().and_then(|slices| slices.get(idx)).and_then(|slice| slice.clone()).unwrap_or_default()
            };
            let mut merged = side(&entry.left);
            merged.extend(block);
            merged.extend(side(&entry.right));
            merged
        })
        .collect()
}
