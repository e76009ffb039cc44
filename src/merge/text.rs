//! Snapshot-or-delta text merging.
//!
//! A fragment may be a full snapshot of the part so far, a re-delivered
//! snapshot, or an unrelated continuation. Naive concatenation duplicates
//! repeated snapshots; naive replacement truncates on true appends.

/// Shortest suffix/prefix overlap accepted as a splice point, in chars.
pub const MIN_SPLICE_OVERLAP: usize = 4;

/// Separator used when two fragments share nothing.
const APPEND_SEPARATOR: &str = "\n\n";

/// Merge an incoming fragment into the existing accumulated text.
///
/// 1. Superset wins: if either contains the other, keep the longer one.
/// 2. Splice on the longest suffix-of-existing / prefix-of-incoming overlap
///    of at least [`MIN_SPLICE_OVERLAP`] chars.
/// 3. Otherwise a longer incoming fragment is taken as a full replacement,
///    and a shorter one is appended after a blank line.
pub fn merge_text(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        return existing.to_string();
    }
    if existing.is_empty() {
        return incoming.to_string();
    }
    if incoming.contains(existing) {
        return incoming.to_string();
    }
    if existing.contains(incoming) {
        return existing.to_string();
    }
    if let Some(overlap) = splice_overlap(existing, incoming) {
        let mut merged = existing.to_string();
        merged.push_str(&incoming[overlap..]);
        return merged;
    }
    if incoming.len() > existing.len() {
        return incoming.to_string();
    }
    format!("{existing}{APPEND_SEPARATOR}{incoming}")
}

/// Byte length of the longest prefix of `incoming` that is also a suffix of
/// `existing`, when at least `MIN_SPLICE_OVERLAP` chars long.
fn splice_overlap(existing: &str, incoming: &str) -> Option<usize> {
    // Candidate cut points are char boundaries of `incoming`, longest first.
    let mut boundaries: Vec<usize> = incoming
        .char_indices()
        .map(|(idx, _)| idx)
        .skip(1)
        .chain(std::iter::once(incoming.len()))
        .collect();
    boundaries.reverse();
    boundaries.into_iter().find(|&end| {
        let candidate = &incoming[..end];
        candidate.chars().count() >= MIN_SPLICE_OVERLAP && existing.ends_with(candidate)
    })
}
