//! Bounded output history replayed to viewers that join late

use std::collections::VecDeque;

/// Recent shell output, capped at a byte budget
///
/// Oldest chunks are evicted first. When a single chunk alone exceeds the
/// budget its head is cut at a character boundary, so the retained text is
/// always the newest output.
#[derive(Debug)]
pub struct Scrollback {
    chunks: VecDeque<String>,
    bytes: usize,
    capacity: usize,
}

impl Scrollback {
    /// Create an empty history holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            capacity,
        }
    }

    /// Append a chunk, evicting old output as needed
    pub fn push(&mut self, chunk: &str) {
        if self.capacity == 0 || chunk.is_empty() {
            return;
        }

        self.chunks.push_back(chunk.to_owned());
        self.bytes += chunk.len();

        while self.bytes > self.capacity && self.chunks.len() > 1 {
            if let Some(old) = self.chunks.pop_front() {
                self.bytes -= old.len();
            }
        }

        if self.bytes > self.capacity {
            if let Some(front) = self.chunks.front_mut() {
                let mut cut = self.bytes - self.capacity;
                while !front.is_char_boundary(cut) {
                    cut += 1;
                }
                front.drain(..cut);
                self.bytes -= cut;
            }
        }
    }

    /// Everything retained, oldest first, as one string
    pub fn snapshot(&self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for chunk in &self.chunks {
            out.push_str(chunk);
        }
        out
    }

    /// Bytes retained
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Drop all history
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }
}
