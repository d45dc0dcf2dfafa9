//! Sentence-respecting text chunker.
//!
//! Splits storefront content into bounded [`ChunkSpan`]s. When
//! `preserve_sentences` is set, splitting happens at sentence boundaries
//! (`.`, `!`, `?`), greedily accumulating sentences until the next one would
//! exceed `max_chunk_size`. A sentence that fits within the limit is never
//! split mid-sentence; oversized sentences are hard-split at word boundaries.
//!
//! Every chunk except possibly the last is at least `min_chunk_size` long.

use crate::error::AssistError;
use crate::models::ChunkSpan;

/// Smallest max_chunk_size the chunker accepts.
pub const ABSOLUTE_MIN_CHUNK_SIZE: usize = 50;

/// Split `content` into ordered chunks with 0-based, strictly increasing
/// indices.
pub fn chunk(
    content: &str,
    max_chunk_size: usize,
    min_chunk_size: usize,
    preserve_sentences: bool,
) -> Result<Vec<ChunkSpan>, AssistError> {
    if content.trim().is_empty() {
        return Err(AssistError::InvalidArgument(
            "content must not be empty".to_string(),
        ));
    }
    if max_chunk_size < ABSOLUTE_MIN_CHUNK_SIZE {
        return Err(AssistError::InvalidArgument(format!(
            "max_chunk_size must be at least {}",
            ABSOLUTE_MIN_CHUNK_SIZE
        )));
    }
    if min_chunk_size == 0 || min_chunk_size >= max_chunk_size {
        return Err(AssistError::InvalidArgument(
            "min_chunk_size must be > 0 and < max_chunk_size".to_string(),
        ));
    }

    // Whole input fits: exactly one chunk spanning it.
    if content.len() <= max_chunk_size {
        return Ok(vec![make_span(content, 0, 0, content.len())]);
    }

    let sentences = if preserve_sentences {
        split_sentences(content)
    } else {
        vec![(0, content.len())]
    };

    let mut spans: Vec<ChunkSpan> = Vec::new();
    let mut index: i64 = 0;
    // Current accumulation window as byte offsets into `content`.
    let mut buf: Option<(usize, usize)> = None;

    for &(s_start, s_end) in &sentences {
        let sentence_len = s_end - s_start;

        if sentence_len > max_chunk_size {
            // A buffer that already meets the minimum flushes on its own; a
            // shorter one is folded into the hard split so no undersized
            // chunk lands mid-document.
            let split_start = match buf.take() {
                Some((b_start, b_end)) if b_end - b_start >= min_chunk_size => {
                    spans.push(make_span(content, index, b_start, b_end));
                    index += 1;
                    s_start
                }
                Some((b_start, _)) => b_start,
                None => s_start,
            };
            let pieces = hard_split(content, split_start, s_end, max_chunk_size, min_chunk_size);
            for (i, &(p_start, p_end)) in pieces.iter().enumerate() {
                // An undersized tail seeds the next buffer instead of
                // closing as its own chunk.
                if i + 1 == pieces.len() && p_end - p_start < min_chunk_size {
                    buf = Some((p_start, p_end));
                } else {
                    spans.push(make_span(content, index, p_start, p_end));
                    index += 1;
                }
            }
            continue;
        }

        match buf {
            None => buf = Some((s_start, s_end)),
            Some((b_start, b_end)) => {
                let would_be = s_end - b_start;
                // Flush only once the buffer satisfies the minimum; a buffer
                // still below min_chunk_size absorbs the next sentence even
                // if that overshoots the max slightly.
                if would_be > max_chunk_size && (b_end - b_start) >= min_chunk_size {
                    spans.push(make_span(content, index, b_start, b_end));
                    index += 1;
                    buf = Some((s_start, s_end));
                } else {
                    buf = Some((b_start, s_end));
                }
            }
        }
    }

    if let Some((b_start, b_end)) = buf {
        spans.push(make_span(content, index, b_start, b_end));
    }

    Ok(spans)
}

fn make_span(content: &str, index: i64, start: usize, end: usize) -> ChunkSpan {
    // Positions are tightened along with the text, so the span's byte range
    // always maps back to exactly `content`.
    let raw = &content[start..end];
    let text = raw.trim_start();
    let start = start + (raw.len() - text.len());
    let text = text.trim_end();
    let end = start + text.len();

    let word_count = text.split_whitespace().count();
    let sentence_count = text
        .chars()
        .filter(|c| matches!(c, '.' | '!' | '?'))
        .count()
        .max(1);

    ChunkSpan {
        content: text.to_string(),
        index,
        start_pos: start,
        end_pos: end,
        word_count,
        sentence_count,
    }
}

/// Byte ranges of sentences, each ending just after its terminator
/// (trailing whitespace folded into the same range).
fn split_sentences(content: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    for (pos, ch) in content.char_indices() {
        prev_end = pos + ch.len_utf8();
        if matches!(ch, '.' | '!' | '?') {
            ranges.push((start, prev_end));
            start = prev_end;
        }
    }

    // Trailing text without a terminator.
    if start < prev_end && !content[start..].trim().is_empty() {
        ranges.push((start, content.len()));
    }

    if ranges.is_empty() {
        ranges.push((0, content.len()));
    }

    ranges
}

/// Split an oversized range at `max` boundaries, preferring the last space
/// before the cut so words stay intact. A space cut that would leave the
/// piece under `min` is skipped in favor of the plain byte boundary.
fn hard_split(content: &str, start: usize, end: usize, max: usize, min: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut cursor = start;

    while cursor < end {
        if end - cursor <= max {
            pieces.push((cursor, end));
            break;
        }

        let mut cut = cursor + max;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        let cut = match content[cursor..cut].rfind(' ') {
            Some(pos) if pos >= min => cursor + pos + 1,
            _ => cut,
        };
        pieces.push((cursor, cut));
        cursor = cut;
    }

    pieces
}
