//! Keyed block merging with monotonic status upgrades.

use crate::types::Block;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Merge `next` into `prev`, keyed by block identity.
///
/// Order is `prev` first, then unseen keys from `next` in their order. On a
/// key collision the block with the higher status rank wins, then the longer
/// detail; remaining ties are broken on content so the result does not
/// depend on argument order.
pub fn merge_blocks(prev: &[Block], next: &[Block]) -> Vec<Block> {
    let mut merged = Vec::<Block>::with_capacity(prev.len() + next.len());
    let mut index = HashMap::<String, usize>::new();

    for list in [prev, next] {
        for (position, block) in list.iter().enumerate() {
            let key = block.identity_key(position);
            match index.get(&key) {
                Some(&slot) => {
                    if compare_blocks(block, &merged[slot]) == Ordering::Greater {
                        merged[slot] = block.clone();
                    }
                }
                None => {
                    index.insert(key, merged.len());
                    merged.push(block.clone());
                }
            }
        }
    }
    merged
}

/// Total preference order between two versions of the same block.
pub(crate) fn compare_blocks(a: &Block, b: &Block) -> Ordering {
    a.status
        .rank()
        .cmp(&b.status.rank())
        .then_with(|| a.detail.len().cmp(&b.detail.len()))
        .then_with(|| a.summary.len().cmp(&b.summary.len()))
        .then_with(|| a.title.len().cmp(&b.title.len()))
        .then_with(|| a.detail.cmp(&b.detail))
        .then_with(|| a.summary.cmp(&b.summary))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.kind.cmp(&b.kind))
}
