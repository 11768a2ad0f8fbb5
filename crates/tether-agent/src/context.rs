//! Token-budget truncation of the reasoning context.
//!
//! The estimate is a length heuristic (bytes / 4, rounded up), not a tokenizer.

/// Estimate token count for a single entry
pub fn estimate_tokens(entry: &str) -> u32 {
    entry.len().div_ceil(4) as u32
}

/// Estimate total tokens for a slice of entries
pub fn estimate_total_tokens(entries: &[String]) -> u32 {
    entries.iter().map(|e| estimate_tokens(e)).sum()
}

/// Keep the most recent entries whose cumulative estimate fits in `budget`.
///
/// Walks backwards from the newest entry and stops at the first entry that
/// would overflow the budget. The result is always a suffix of `entries`, so
/// chronological order is preserved. A non-empty input always yields at least
/// the newest entry, even when that entry alone exceeds the budget.
pub fn truncate(entries: &[String], budget: u32) -> &[String] {
    let mut accumulated: u64 = 0;
    let mut start = entries.len();

    for i in (0..entries.len()).rev() {
        accumulated += u64::from(estimate_tokens(&entries[i]));
        if accumulated > u64::from(budget) && start < entries.len() {
            break;
        }
        start = i;
        if accumulated > u64::from(budget) {
            // The newest entry alone is over budget; keep just that one.
            break;
        }
    }

    &entries[start..]
}
