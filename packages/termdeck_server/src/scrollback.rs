use std::collections::VecDeque;
use termdeck_protocol::CLEAR_AND_HOME;

/// Bounded line history of one session's output.
///
/// Output is split on `\n` only. Complete lines are kept oldest-first up to
/// `capacity`; the text after the last newline waits in `fragment` until its
/// line is finished. No escape sequences are interpreted.
#[derive(Debug, Clone)]
pub struct ScrollbackBuffer {
    lines: VecDeque<String>,
    fragment: String,
    capacity: usize,
    evicted: u64,
}

/// A viewport-sized window into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySlice {
    /// Clear-and-home prefix followed by the selected lines joined with `\n`
    pub data: String,
    /// The offset actually served, after clamping to the buffer length
    pub confirmed_offset: usize,
}

impl ScrollbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            fragment: String::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn ingest(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut combined = std::mem::take(&mut self.fragment);
        combined.push_str(chunk);

        let mut pieces = combined.split('\n');
        // split always yields at least one piece; the last is the unterminated tail
        let mut pending = pieces.next().unwrap_or_default();
        for piece in pieces {
            self.lines.push_back(pending.to_string());
            pending = piece;
        }
        self.fragment = pending.to_string();

        while self.lines.len() > self.capacity {
            self.lines.pop_front();
            self.evicted += 1;
        }
    }

    /// The `viewport_rows` lines ending `lines_back` lines before the newest one.
    pub fn slice(&self, lines_back: usize, viewport_rows: usize) -> HistorySlice {
        let n = self.lines.len();
        let end = n.saturating_sub(lines_back);
        let start = end.saturating_sub(viewport_rows);

        let mut data = String::from(CLEAR_AND_HOME);
        for (i, line) in self.lines.range(start..end).enumerate() {
            if i > 0 {
                data.push('\n');
            }
            data.push_str(line);
        }

        HistorySlice {
            data,
            confirmed_offset: n - end,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Complete lines dropped so far to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
