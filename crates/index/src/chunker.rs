//! Recursive character text splitter.
//!
//! Text is cut at the coarsest separator that yields pieces no longer than
//! `chunk_size` characters: Markdown headers first, then lines, then words,
//! then raw characters. Pieces are then packed greedily into chunks, and each
//! new chunk starts with up to `chunk_overlap` characters carried over from
//! the end of the previous one. Separators stay attached to the piece they
//! introduce so a header is never split from its heading text.

use std::collections::VecDeque;

/// Preferred cut points, coarsest first. The empty separator means
/// "split between any two characters".
pub const DEFAULT_SEPARATORS: &[&str] = &["\n### ", "\n## ", "\n# ", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into trimmed, non-empty chunks of at most `chunk_size`
    /// characters each.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        self.pieces(text, 0, &mut pieces);
        self.merge(pieces)
    }

    fn pieces<'a>(&self, text: &'a str, level: usize, out: &mut Vec<&'a str>) {
        if char_len(text) <= self.chunk_size {
            out.push(text);
            return;
        }
        match self.separators.get(level).map(String::as_str) {
            None | Some("") => out.extend(hard_split(text, self.chunk_size)),
            Some(sep) if !text.contains(sep) => self.pieces(text, level + 1, out),
            Some(sep) => {
                for part in split_keeping_separator(text, sep) {
                    self.pieces(part, level + 1, out);
                }
            }
        }
    }

    fn merge(&self, pieces: Vec<&str>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut window_len = 0;

        for piece in pieces {
            let len = char_len(piece);
            if window_len + len > self.chunk_size && !window.is_empty() {
                push_chunk(&mut chunks, &window);
                // keep only the overlap tail, and make room for the new piece
                while window_len > self.chunk_overlap || window_len + len > self.chunk_size {
                    match window.pop_front() {
                        Some(front) => window_len -= char_len(front),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            window_len += len;
        }
        if !window.is_empty() {
            push_chunk(&mut chunks, &window);
        }
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let text: String = window.iter().copied().collect();
    let text = text.trim();
    if !text.is_empty() && chunks.last().is_none_or(|last: &String| last != text) {
        chunks.push(text.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split before every occurrence of `sep`, keeping `sep` at the start of
/// the following part.
fn split_keeping_separator<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            parts.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

fn hard_split(text: &str, size: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == size {
            parts.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}
