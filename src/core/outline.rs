use chrono::NaiveDate;
use crate::core::types::Block;

/// One past the last descendant of `blocks[index]`: the following blocks
/// that are indented deeper than it
pub fn subtree_end(blocks: &[Block], index: usize) -> usize {
    let Some(parent) = blocks.get(index) else {
        return blocks.len();
    };

    blocks[index + 1..].iter()
        .position(|b| b.indent <= parent.indent)
        .map_or(blocks.len(), |offset| index + 1 + offset)
}

/// The block at `index` with all of its descendants
pub fn subtree(blocks: &[Block], index: usize) -> &[Block] {
    if index >= blocks.len() {
        return &[];
    }
    &blocks[index..subtree_end(blocks, index)]
}

/// Each block whose content contains `needle` (case-insensitive), followed
/// by its descendants. A match inside an already collected subtree is not
/// collected twice.
pub fn mentioning_subtrees(blocks: &[Block], needle: &str) -> Vec<Block> {
    let needle = needle.to_lowercase();
    let mut out = Vec::new();
    let mut i = 0;

    while i < blocks.len() {
        if blocks[i].content.to_lowercase().contains(&needle) {
            let end = subtree_end(blocks, i);
            out.extend_from_slice(&blocks[i..end]);
            i = end;
        } else {
            i += 1;
        }
    }

    out
}

/// Title of a day's journal page, e.g. "Monday, January 2, 2006"
pub fn journal_title(day: NaiveDate) -> String {
    day.format("%A, %B %-d, %Y").to_string()
}
