//! Separator-driven text splitting with character budgets.
//!
//! Text is cut on the configured separator and the pieces are merged greedily into chunks of at
//! most `chunk_size` characters. When a chunk is emitted, trailing pieces totalling no more than
//! `chunk_overlap` characters are carried into the next chunk. A single piece longer than the
//! budget is handed to `semchunk-rs` with a character counter, which cuts it on the best
//! available semantic boundary.

use semchunk_rs::Chunker;
use std::collections::VecDeque;

use super::IngestError;

/// Split `text` into chunks no longer than `chunk_size` characters.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separator: &str,
) -> Result<Vec<String>, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pieces: Vec<&str> = if separator.is_empty() {
        vec![text]
    } else {
        text.split(separator).collect()
    };

    let mut splits = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if char_len(piece) > chunk_size {
            splits.extend(split_oversized(piece, chunk_size));
        } else {
            splits.push(piece.to_string());
        }
    }

    Ok(merge_splits(splits, chunk_size, chunk_overlap, separator))
}

fn split_oversized(piece: &str, chunk_size: usize) -> Vec<String> {
    let chunker = Chunker::new(chunk_size, Box::new(|segment: &str| char_len(segment)));
    chunker
        .chunk(piece)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

fn merge_splits(
    splits: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    separator: &str,
) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut current: VecDeque<String> = VecDeque::new();
    let mut total = 0usize;

    for split in splits {
        let len = char_len(&split);
        let joiner = if current.is_empty() { 0 } else { separator_len };

        if total + len + joiner > chunk_size && !current.is_empty() {
            chunks.push(join(&current, separator));
            // Drop from the front until what's left fits the overlap and leaves room for `split`.
            while total > chunk_overlap
                || (total > 0 && total + len + separator_len > chunk_size)
            {
                let Some(front) = current.pop_front() else {
                    break;
                };
                let removed_joiner = if current.is_empty() { 0 } else { separator_len };
                total = total.saturating_sub(char_len(&front) + removed_joiner);
            }
        }

        let joiner = if current.is_empty() { 0 } else { separator_len };
        total += len + joiner;
        current.push_back(split);
    }

    if !current.is_empty() {
        chunks.push(join(&current, separator));
    }
    chunks
}

fn join(parts: &VecDeque<String>, separator: &str) -> String {
    parts
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
