//! Recursive text chunking with overlap

use std::collections::VecDeque;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;

/// Splits page text into bounded, overlapping chunks.
///
/// Text is cut at the coarsest boundary that yields pieces no longer than
/// `chunk_size` characters: paragraphs, then lines, sentences, words and
/// finally grapheme clusters. Pieces are then merged greedily back up to
/// `chunk_size`, and each chunk after the first starts with the trailing
/// pieces of its predecessor that fit in `overlap`.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Maximum chunk length in characters
    chunk_size: usize,
    /// Characters carried over between chunks
    overlap: usize,
}

/// Boundary used at each recursion depth
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
    Grapheme,
    Char,
}

impl Boundary {
    const ORDER: [Boundary; 6] = [
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Word,
        Boundary::Grapheme,
        Boundary::Char,
    ];

    /// Split keeping separators attached, so pieces concatenate back to the input
    fn split<'a>(self, text: &'a str, chunk_size: usize) -> Vec<&'a str> {
        match self {
            Boundary::Paragraph => text.split_inclusive("\n\n").collect(),
            Boundary::Line => text.split_inclusive('\n').collect(),
            Boundary::Sentence => text.split_sentence_bounds().collect(),
            Boundary::Word => text.split_word_bounds().collect(),
            Boundary::Grapheme => text.graphemes(true).collect(),
            Boundary::Char => hard_cut(text, chunk_size),
        }
    }
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    /// Create a chunker from configuration
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Maximum chunk length in characters
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split one page of text.
    ///
    /// Empty or whitespace-only text yields a single empty chunk so the page
    /// is still represented in the index.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![String::new()];
        }

        let mut pieces = Vec::new();
        self.collect_pieces(text, 0, &mut pieces);

        let chunks = self.merge(&pieces);
        if chunks.is_empty() {
            vec![String::new()]
        } else {
            chunks
        }
    }

    fn collect_pieces<'a>(&self, text: &'a str, depth: usize, out: &mut Vec<(&'a str, usize)>) {
        let len = text.chars().count();
        if len <= self.chunk_size {
            if len > 0 {
                out.push((text, len));
            }
            return;
        }

        let boundary = Boundary::ORDER[depth.min(Boundary::ORDER.len() - 1)];
        for part in boundary.split(text, self.chunk_size) {
            self.collect_pieces(part, depth + 1, out);
        }
    }

    fn merge(&self, pieces: &[(&str, usize)]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut window_len = 0usize;

        for &(piece, len) in pieces {
            if window_len + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window);

                while window_len > self.overlap
                    || (window_len + len > self.chunk_size && window_len > 0)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => window_len -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            window_len += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, &window);
        }

        chunks
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

fn push_trimmed(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Last resort: fixed-width character slices
fn hard_cut(text: &str, width: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % width == 0 {
            parts.push(&text[start..idx]);
            start = idx;
        }
    }
    parts.push(&text[start..]);
    parts
}
