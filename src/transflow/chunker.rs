//! Packs translatable items into byte-budgeted batches for a single LLM round-trip.
//!
//! The same routine backs translation chunking, terminology-identification
//! chunking, and term-verification batching — only the character
//! budget and the function used to extract each item's text differ.
//!
//! # Example
//!
//! ```rust
//! use transflow::transflow::chunker::{chunk_by_chars, ChunkedItem};
//!
//! let items = vec!["short", "also short", "x"];
//! let chunks = chunk_by_chars(&items, 20, |s| s.len());
//! assert_eq!(chunks.len(), 2);
//! ```

use std::fmt;

/// A single packed batch: the original items plus their 0-based positions in
/// the input sequence (needed by callers that reconstruct a "context window"
/// of preceding items).
#[derive(Debug, Clone)]
pub struct ChunkedItem<T> {
    /// The packed items, in original order.
    pub items: Vec<T>,
    /// Index of `items[0]` in the original input sequence.
    pub start_index: usize,
}

impl<T> fmt::Display for ChunkedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk(start={}, len={})",
            self.start_index,
            self.items.len()
        )
    }
}

/// Pack `items` into chunks whose combined text length (per `len_of`) stays
/// under `char_budget`, isolating any single item whose own length exceeds
/// the budget into its own chunk.
///
/// Deterministic single pass:
/// 1. Accumulate items into `current` while the running character sum stays
///    under budget.
/// 2. An item whose own length exceeds `char_budget` flushes `current` (if
///    non-empty) and is emitted alone.
/// 3. Adding an item that would push `current` over budget flushes first.
/// 4. The tail is flushed at the end.
///
/// Property: concatenating every chunk's items reproduces `items` in order;
/// every chunk's character sum is `<= char_budget` except a singleton chunk
/// whose one item exceeds the budget on its own.
pub fn chunk_by_chars<T: Clone>(
    items: &[T],
    char_budget: usize,
    len_of: impl Fn(&T) -> usize,
) -> Vec<ChunkedItem<T>> {
    let mut chunks = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_start = 0usize;
    let mut chars = 0usize;

    for (index, item) in items.iter().enumerate() {
        let length = len_of(item);

        if length > char_budget {
            if !current.is_empty() {
                chunks.push(ChunkedItem {
                    items: std::mem::take(&mut current),
                    start_index: current_start,
                });
                chars = 0;
            }
            chunks.push(ChunkedItem {
                items: vec![item.clone()],
                start_index: index,
            });
            current_start = index + 1;
            continue;
        }

        if current.is_empty() {
            current_start = index;
        } else if chars + length > char_budget {
            chunks.push(ChunkedItem {
                items: std::mem::take(&mut current),
                start_index: current_start,
            });
            chars = 0;
            current_start = index;
        }

        current.push(item.clone());
        chars += length;
    }

    if !current.is_empty() {
        chunks.push(ChunkedItem {
            items: current,
            start_index: current_start,
        });
    }

    chunks
}

/// Build the "context window" of up to `window` items immediately preceding
/// `start_index` in `all_items` (the context window of up to the
/// last `K` preceding atoms).
pub fn context_window<T: Clone>(all_items: &[T], start_index: usize, window: usize) -> Vec<T> {
    let from = start_index.saturating_sub(window);
    all_items[from..start_index].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_items_under_budget_together() {
        let items = vec!["aaa", "bbb", "ccc"];
        let chunks = chunk_by_chars(&items, 6, |s| s.len());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].items, vec!["aaa", "bbb"]);
        assert_eq!(chunks[1].items, vec!["ccc"]);
    }

    #[test]
    fn isolates_extreme_long_item() {
        let items = vec!["a".repeat(200), "b".repeat(200), "c".repeat(8000), "d".repeat(200)];
        let chunks = chunk_by_chars(&items, 6000, |s| s.len());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].items.len(), 2);
        assert_eq!(chunks[1].items.len(), 1);
        assert_eq!(chunks[1].items[0].len(), 8000);
        assert_eq!(chunks[2].items.len(), 1);
    }

    #[test]
    fn concatenation_of_chunks_reproduces_input() {
        let items: Vec<String> = (0..50).map(|i| "x".repeat(i % 13 + 1)).collect();
        let chunks = chunk_by_chars(&items, 37, |s| s.len());
        let rebuilt: Vec<String> = chunks.into_iter().flat_map(|c| c.items).collect();
        assert_eq!(rebuilt, items);
    }

    #[test]
    fn every_chunk_respects_budget_unless_singleton_oversize() {
        let items: Vec<String> = vec!["a".repeat(10), "b".repeat(10), "c".repeat(100), "d".repeat(5)];
        let budget = 25;
        let chunks = chunk_by_chars(&items, budget, |s| s.len());
        for chunk in &chunks {
            let total: usize = chunk.items.iter().map(|s| s.len()).sum();
            if chunk.items.len() == 1 && total > budget {
                continue;
            }
            assert!(total <= budget);
        }
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        let items: Vec<String> = vec![];
        let chunks = chunk_by_chars(&items, 100, |s| s.len());
        assert!(chunks.is_empty());
    }

    #[test]
    fn context_window_clamps_at_sequence_start() {
        let items = vec![0, 1, 2, 3, 4];
        assert_eq!(context_window(&items, 2, 3), vec![0, 1]);
        assert_eq!(context_window(&items, 0, 3), Vec::<i32>::new());
        assert_eq!(context_window(&items, 4, 3), vec![1, 2, 3]);
    }
}
