//! Pairing Rule
//!
//! Greedy first-fit over Waiting entries in insertion order. The earliest
//! joined player is the anchor; its partner is the earliest compatible
//! player after it. Only one pair is chosen per scan.

use crate::matchmaking::entry::QueueEntry;

/// Default maximum rating gap for a pairing.
pub const DEFAULT_SKILL_WINDOW: u32 = 200;

/// Check if two entries may be paired.
///
/// Same time control tag and a rating gap of at most `skill_window`.
#[inline]
pub fn is_compatible(a: &QueueEntry, b: &QueueEntry, skill_window: u32) -> bool {
    a.time_control == b.time_control
        && a.skill_level.abs_diff(b.skill_level) <= skill_window
}

/// Find the first compatible pair in scan order.
///
/// Returns indices `(i, j)` with `i < j`. Entries are expected in
/// insertion order and all Waiting.
pub fn find_first_pair(waiting: &[QueueEntry], skill_window: u32) -> Option<(usize, usize)> {
    for (i, anchor) in waiting.iter().enumerate() {
        for (offset, candidate) in waiting[i + 1..].iter().enumerate() {
            if anchor.user_id != candidate.user_id
                && is_compatible(anchor, candidate, skill_window)
            {
                return Some((i, i + 1 + offset));
            }
        }
    }
    None
}
