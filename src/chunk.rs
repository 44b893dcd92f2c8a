//! Recursive character text chunker.
//!
//! Splits extracted document text into chunks of at most `chunk_size`
//! characters, preferring semantically meaningful boundaries: paragraph
//! breaks first, then line breaks, sentence-final punctuation, spaces, and
//! finally hard character cuts. Consecutive chunks overlap by up to
//! `chunk_overlap` characters so context is not lost at a cut point.
//!
//! Splitting is deterministic: the same text and parameters always produce
//! the same chunk sequence.

use std::collections::VecDeque;

/// Separator priority list. Each separator is tried in order; pieces that
/// still exceed the chunk size recurse with the remaining separators. The
/// empty separator is a hard per-character cut and always matches.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Split text into overlapping chunks of at most `chunk_size` characters.
///
/// `chunk_overlap` must be smaller than `chunk_size` (validated at config
/// load). Chunks are trimmed and empty chunks dropped; a chunk may exceed
/// `chunk_size` only when no separator permits a smaller split (which cannot
/// happen with the hard-cut fallback in place).
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    // Pick the first separator that occurs in the text; "" always matches.
    let pos = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(separators.len() - 1);
    let separator = separators[pos];
    let remaining = &separators[pos + 1..];

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    };

    let mut final_chunks = Vec::new();
    let mut good: Vec<String> = Vec::new();

    for piece in splits {
        if char_len(&piece) < chunk_size {
            good.push(piece);
        } else {
            // Flush what fits before recursing into the oversized piece.
            if !good.is_empty() {
                final_chunks.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
                good.clear();
            }
            if remaining.is_empty() {
                final_chunks.push(piece);
            } else {
                final_chunks.extend(split_recursive(&piece, remaining, chunk_size, chunk_overlap));
            }
        }
    }

    if !good.is_empty() {
        final_chunks.extend(merge_splits(&good, separator, chunk_size, chunk_overlap));
    }

    final_chunks
}

/// Merge small splits back into chunks of at most `chunk_size` characters,
/// sliding a window so consecutive chunks share up to `chunk_overlap`
/// characters of trailing content.
fn merge_splits(
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs: Vec<String> = Vec::new();
    let mut window: VecDeque<&String> = VecDeque::new();
    let mut total = 0usize;

    for piece in splits {
        let len = char_len(piece);
        let extra = if window.is_empty() { 0 } else { sep_len };

        if total + len + extra > chunk_size && !window.is_empty() {
            if let Some(doc) = join_window(&window, separator) {
                docs.push(doc);
            }
            // Slide: drop from the front until the retained tail is within
            // the overlap budget and the next piece fits.
            loop {
                let extra = if window.is_empty() { 0 } else { sep_len };
                let over_overlap = total > chunk_overlap;
                let over_size = total + len + extra > chunk_size && total > 0;
                if !(over_overlap || over_size) {
                    break;
                }
                let Some(first) = window.pop_front() else {
                    break;
                };
                total -= char_len(first) + if window.is_empty() { 0 } else { sep_len };
            }
        }

        window.push_back(piece);
        total += len + if window.len() > 1 { sep_len } else { 0 };
    }

    if let Some(doc) = join_window(&window, separator) {
        docs.push(doc);
    }

    docs
}

fn join_window(window: &VecDeque<&String>, separator: &str) -> Option<String> {
    let joined = window
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
