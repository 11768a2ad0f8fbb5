//! Context compaction for long conversations
//!
//! The condensation itself is produced by the external compact operation. This
//! module only decides what survives it: the condensed entry followed by the
//! most recent raw entries.

/// Number of raw entries kept verbatim after a compaction
pub const KEEP_RECENT_ENTRIES: usize = 3;

/// Result of a compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// The new transcript: condensed entry + recent raw entries
    pub entries: Vec<String>,
    /// Number of entries before compaction
    pub entries_before: usize,
}

/// Build the post-compaction transcript: `[condensed, ...last 3 originals]`.
///
/// Transcripts shorter than three entries keep all of their entries after the
/// condensed one.
pub fn splice(condensed: impl Into<String>, entries: &[String]) -> CompactionResult {
    let keep_from = entries.len().saturating_sub(KEEP_RECENT_ENTRIES);
    let mut spliced = Vec::with_capacity(1 + entries.len() - keep_from);
    spliced.push(condensed.into());
    spliced.extend_from_slice(&entries[keep_from..]);

    CompactionResult {
        entries: spliced,
        entries_before: entries.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("entry{}", i)).collect()
    }

    #[test]
    fn test_splice_ten_entries() {
        let result = splice("C", &numbered(10));
        assert_eq!(result.entries, vec!["C", "entry8", "entry9", "entry10"]);
        assert_eq!(result.entries.len(), 4);
        assert_eq!(result.entries_before, 10);
    }

    #[test]
    fn test_splice_exactly_three() {
        let result = splice("C", &numbered(3));
        assert_eq!(result.entries, vec!["C", "entry1", "entry2", "entry3"]);
    }

    #[test]
    fn test_splice_short_transcript() {
        let result = splice("C", &numbered(2));
        assert_eq!(result.entries, vec!["C", "entry1", "entry2"]);
    }

    #[test]
    fn test_splice_empty_transcript() {
        let result = splice("C", &[]);
        assert_eq!(result.entries, vec!["C"]);
        assert_eq!(result.entries_before, 0);
    }
}
