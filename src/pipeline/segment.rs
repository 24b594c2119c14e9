//! Sentence splitting and chunk/batch grouping.

use super::{BatchPlan, Chunk};

/// Default number of sentences per synthesis chunk.
pub const DEFAULT_SENTENCES_PER_CHUNK: usize = 2;

/// Default number of chunks stitched into one playable batch.
pub const DEFAULT_CHUNKS_PER_BATCH: usize = 4;

/// Ordered chunks plus their grouping into batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub chunks: Vec<Chunk>,
    pub batches: Vec<BatchPlan>,
}

impl Segmentation {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits normalized text into chunks of N sentences and batches of M chunks.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    sentences_per_chunk: usize,
    chunks_per_batch: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_SENTENCES_PER_CHUNK, DEFAULT_CHUNKS_PER_BATCH)
    }
}

impl Segmenter {
    /// Bounds of zero are treated as one.
    pub fn new(sentences_per_chunk: usize, chunks_per_batch: usize) -> Self {
        Self {
            sentences_per_chunk: sentences_per_chunk.max(1),
            chunks_per_batch: chunks_per_batch.max(1),
        }
    }

    pub fn segment(&self, text: &str) -> Segmentation {
        let sentences = split_sentences(text);

        let chunks: Vec<Chunk> = sentences
            .chunks(self.sentences_per_chunk)
            .enumerate()
            .map(|(index, group)| Chunk {
                index,
                batch_index: index / self.chunks_per_batch,
                text: group.join(" "),
            })
            .collect();

        let batches = chunks
            .chunks(self.chunks_per_batch)
            .enumerate()
            .map(|(index, group)| BatchPlan {
                index,
                chunk_indices: group.iter().map(|c| c.index).collect(),
            })
            .collect();

        Segmentation { chunks, batches }
    }
}

/// Split text into sentences.
///
/// A sentence ends at `.`, `!`, `?` or `…` (plus any closing quotes or
/// brackets) followed by whitespace or end of text, or at a blank line.
/// Whitespace inside a sentence is collapsed. Never yields empty strings.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            // Blank line: paragraph break
            let mut j = i;
            let mut newlines = 0;
            while j < len && chars[j].is_whitespace() {
                if chars[j] == '\n' {
                    newlines += 1;
                }
                j += 1;
            }
            if newlines >= 2 {
                flush(&mut current, &mut sentences);
            } else if !current.is_empty() {
                current.push(' ');
            }
            i = j;
            continue;
        }

        current.push(c);

        if matches!(c, '.' | '!' | '?' | '…') {
            // Swallow repeated terminators and closing punctuation
            while i + 1 < len
                && matches!(
                    chars[i + 1],
                    '.' | '!' | '?' | '…' | '"' | '\'' | ')' | ']' | '”' | '’' | '»'
                )
            {
                i += 1;
                current.push(chars[i]);
            }
            if i + 1 >= len || chars[i + 1].is_whitespace() {
                flush(&mut current, &mut sentences);
            }
        }
        i += 1;
    }

    flush(&mut current, &mut sentences);
    sentences
}

fn flush(current: &mut String, sentences: &mut Vec<String>) {
    let s = current.trim();
    if !s.is_empty() {
        sentences.push(s.to_string());
    }
    current.clear();
}
