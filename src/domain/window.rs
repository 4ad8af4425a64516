//! Rolling window over the most recent segment transcripts.

use std::collections::VecDeque;

/// Default number of transcripts kept in the window
pub const DEFAULT_WINDOW_SIZE: usize = 7;

/// Fixed-capacity FIFO of transcripts, oldest first
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: usize,
    texts: VecDeque<String>,
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SlidingWindow {
    /// Create an empty window; a capacity of zero is treated as one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            texts: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a transcript, evicting the oldest beyond capacity, and return
    /// the joined window text
    pub fn push(&mut self, text: impl Into<String>) -> String {
        self.texts.push_back(text.into());
        while self.texts.len() > self.capacity {
            self.texts.pop_front();
        }
        self.text()
    }

    /// Space-joined window contents, trimmed
    pub fn text(&self) -> String {
        self.texts
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
