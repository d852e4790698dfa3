//! Fixed-window text chunker.
//!
//! Splits document text into [`Chunk`]s using a sliding character window with
//! overlap, so context that straddles a window boundary is present in both
//! neighboring chunks. Window ends prefer a whitespace boundary when one
//! falls in the back half of the window.

use uuid::Uuid;

use crate::models::Chunk;

/// Split text into overlapping windows of at most `chunk_chars` characters.
/// Returns chunks with contiguous indices starting at 0; whitespace-only
/// input yields no chunks.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    assert!(chunk_chars > 0, "chunk_chars must be > 0");
    assert!(overlap_chars < chunk_chars, "overlap must be < window");

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let byte_at = |ci: usize| {
        if ci < n {
            chars[ci].0
        } else {
            text.len()
        }
    };

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;
    let mut start = 0usize;

    while start < n {
        let hard_end = (start + chunk_chars).min(n);
        let mut end = hard_end;

        // Prefer a whitespace split if one falls in the back half of the
        // window; otherwise cut at the hard boundary.
        if hard_end < n {
            let window = &chars[start..hard_end];
            if let Some(pos) = window.iter().rposition(|(_, c)| c.is_whitespace()) {
                if pos + 1 > chunk_chars / 2 {
                    end = start + pos + 1;
                }
            }
        }

        let piece = text[byte_at(start)..byte_at(end)].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, piece));
            chunk_index += 1;
        }

        if end == n {
            break;
        }

        // Carry overlap into the next window, always making forward progress.
        let next = end.saturating_sub(overlap_chars);
        start = if next > start { next } else { end };
    }

    chunks
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        embedding: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert!(chunks[0].embedding.is_none());
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text("doc1", "", 500, 50).is_empty());
        assert!(chunk_text("doc1", "   \n\n  ", 500, 50).is_empty());
    }

    #[test]
    fn test_long_text_multiple_windows() {
        let text = "word ".repeat(200); // 1000 chars
        let chunks = chunk_text("doc1", &text, 100, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Sentence number {} in a long document.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 80, 20);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_overlap_carries_context() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_text("doc1", text, 30, 10);
        assert!(chunks.len() >= 2);
        // The tail of each chunk reappears at the head of the next.
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(5).collect();
            let tail: String = tail.chars().rev().collect();
            assert!(
                pair[1].text.contains(tail.trim()),
                "no overlap between {:?} and {:?}",
                pair[0].text,
                pair[1].text
            );
        }
    }

    #[test]
    fn test_prefers_whitespace_boundary() {
        let text = "aaaa bbbb cccc dddd eeee ffff";
        let words: Vec<&str> = text.split(' ').collect();
        let chunks = chunk_text("doc1", text, 12, 2);
        assert!(chunks.len() > 1);
        // A window never ends mid-word when a space fell in its back half.
        for c in &chunks {
            let last = c.text.split_whitespace().last().unwrap();
            assert!(words.contains(&last), "chunk cut mid-word: {:?}", c.text);
        }
    }

    #[test]
    fn test_unsplittable_run_hard_cut() {
        let text = "x".repeat(120);
        let chunks = chunk_text("doc1", &text, 50, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 50);
    }

    #[test]
    fn test_multibyte_boundary_safety() {
        let text = "héllo wörld ".repeat(30);
        let chunks = chunk_text("doc1", &text, 25, 5);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 25);
        }
    }

    #[test]
    fn test_deterministic_text() {
        let text = "Alpha beta gamma delta epsilon zeta.";
        let c1 = chunk_text("doc1", text, 15, 3);
        let c2 = chunk_text("doc1", text, 15, 3);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
