//! Split a completion into ordered, length-bounded chunks.
//!
//! Lengths are counted in `char`s. Each character of the input lands in exactly one chunk,
//! so joining the chunk texts in order gives back the input.

/// One segment of a longer response, tagged with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_index: usize,
    pub text: String,
}

impl Chunk {
    /// The whole text as a one-element sequence.
    pub fn single(text: impl Into<String>) -> Vec<Chunk> {
        vec![Chunk {
            sequence_index: 0,
            text: text.into(),
        }]
    }
}

/// Split `text` into chunks of at most `max_chunk_len` characters.
///
/// A chunk ends just after the last space inside its window, so a separating space stays
/// with the word before it. A window with no space past its first character is cut at
/// exactly `max_chunk_len`. Empty input gives no chunks.
pub fn split(text: &str, max_chunk_len: usize) -> Vec<Chunk> {
    let max = max_chunk_len.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset of the first char past the window; None when the rest fits.
        let Some((window_end, _)) = remaining.char_indices().nth(max) else {
            chunks.push(remaining);
            break;
        };
        let cut = match remaining[..window_end].rfind(' ') {
            Some(p) if p > 0 => p + 1,
            _ => window_end,
        };
        chunks.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            sequence_index,
            text: text.to_string(),
        })
        .collect()
}
