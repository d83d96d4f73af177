//! Bounded chunk buffer for terminal output.
//!
//! [`ChunkBuffer`] stores ordered text chunks produced by a shell process so
//! that late subscribers can replay everything they missed. The bound uses a
//! burst-drop policy: pushing past `max_chunks` drains the front in one go so
//! that exactly `keep_chunks` remain, rather than evicting one entry per push.
//! Retained chunks are never reordered.

use std::collections::VecDeque;

/// Bounded, append-only store of output chunks.
pub struct ChunkBuffer {
    chunks: VecDeque<String>,
    max_chunks: usize,
    keep_chunks: usize,
}

impl ChunkBuffer {
    /// Create a buffer that truncates to `keep_chunks` once it grows past
    /// `max_chunks`.
    pub fn new(max_chunks: usize, keep_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(keep_chunks.min(256)),
            max_chunks,
            keep_chunks: keep_chunks.min(max_chunks),
        }
    }

    /// Append a chunk, truncating to the most recent `keep_chunks` if the
    /// buffer has grown past `max_chunks`.
    pub fn push(&mut self, data: String) {
        self.chunks.push_back(data);
        if self.chunks.len() > self.max_chunks {
            let drop = self.chunks.len() - self.keep_chunks;
            self.chunks.drain(..drop);
        }
    }

    /// Concatenation of all retained chunks, oldest first.
    pub fn snapshot(&self) -> String {
        let total: usize = self.chunks.iter().map(String::len).sum();
        let mut out = String::with_capacity(total);
        for chunk in &self.chunks {
            out.push_str(chunk);
        }
        out
    }

    /// Number of retained chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
