//! Decoded view of one stored log sequence

use crate::common::{Error, Result, METRICS};
use serde_json::Value;

/// Zero-based position of an entry within its log
pub type Offset = u64;

/// A log entry value
pub type Entry = i64;

/// One log's sequence as read from the substrate.
///
/// Keeps the stored value verbatim (it is the `expected` side of the next
/// CAS) next to the decoded entries. Elements that are not integers still
/// occupy their offset but decode to `None`, so offsets are never shifted.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSequence {
    stored: Value,
    entries: Vec<Option<Entry>>,
}

impl LogSequence {
    /// Sequence of a log that has never been written
    pub fn empty() -> Self {
        Self {
            stored: Value::Array(Vec::new()),
            entries: Vec::new(),
        }
    }

    /// Decode a stored value, skipping non-integer elements with a warning.
    ///
    /// `null` reads as empty. Anything else that is not an array is
    /// `Error::Corrupted`.
    pub fn decode(key: &str, stored: Value) -> Result<Self> {
        let entries = match &stored {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(offset, item)| {
                    let entry = item.as_i64();
                    if entry.is_none() {
                        METRICS.corrupt_entries_total.inc();
                        tracing::warn!(key, offset, value = %item, "Skipping non-integer log entry");
                    }
                    entry
                })
                .collect(),
            other => {
                return Err(Error::Corrupted(format!(
                    "log {} holds a non-sequence value: {}",
                    key, other
                )))
            }
        };
        Ok(Self { stored, entries })
    }

    /// Number of occupied offsets, including skipped ones
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, offset: Offset) -> Option<Entry> {
        usize::try_from(offset)
            .ok()
            .and_then(|idx| self.entries.get(idx).copied().flatten())
    }

    /// Readable entries at or after `from`, in offset order
    pub fn entries_from(&self, from: Offset) -> Vec<(Offset, Entry)> {
        let start = usize::try_from(from).unwrap_or(usize::MAX);
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .filter_map(|(offset, entry)| entry.map(|e| (offset as Offset, e)))
            .collect()
    }

    /// Count of elements that failed to decode
    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.is_none()).count()
    }

    /// The value exactly as it was read
    pub fn stored(&self) -> &Value {
        &self.stored
    }

    /// Stored value with `value` appended, and the offset it will occupy
    pub fn appended(&self, value: Entry) -> (Value, Offset) {
        let mut items = match &self.stored {
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        items.push(Value::from(value));
        let offset = (items.len() - 1) as Offset;
        (Value::Array(items), offset)
    }
}

impl Default for LogSequence {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_integers() {
        let seq = LogSequence::decode("k", json!([10, 11, 12])).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(1), Some(11));
        assert_eq!(seq.entries_from(1), vec![(1, 11), (2, 12)]);
        assert!(seq.entries_from(3).is_empty());
        assert!(seq.entries_from(u64::MAX).is_empty());
    }

    #[test]
    fn test_decode_skips_corrupt_element() {
        let seq = LogSequence::decode("k", json!([10, "oops", 12])).unwrap();

        assert_eq!(seq.len(), 3);
        assert_eq!(seq.skipped(), 1);
        assert_eq!(seq.get(1), None);
        assert_eq!(seq.entries_from(0), vec![(0, 10), (2, 12)]);
    }

    #[test]
    fn test_decode_null_is_empty() {
        let seq = LogSequence::decode("k", Value::Null).unwrap();
        assert!(seq.is_empty());
        assert_eq!(seq.stored(), &Value::Null);
    }

    #[test]
    fn test_decode_rejects_non_sequence() {
        assert!(matches!(
            LogSequence::decode("k", json!({"a": 1})),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_appended_keeps_stored_elements() {
        let seq = LogSequence::decode("k", json!([1, "x"])).unwrap();
        let (candidate, offset) = seq.appended(7);

        assert_eq!(candidate, json!([1, "x", 7]));
        assert_eq!(offset, 2);
        // The read value itself is untouched
        assert_eq!(seq.stored(), &json!([1, "x"]));
    }

    #[test]
    fn test_appended_to_empty() {
        let (candidate, offset) = LogSequence::empty().appended(5);
        assert_eq!(candidate, json!([5]));
        assert_eq!(offset, 0);
    }
}
