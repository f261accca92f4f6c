/// Turns raw PTY reads into text without splitting multi-byte characters.
///
/// A UTF-8 sequence cut off at the end of a read is held back and completed
/// by the next read. Bytes that can never be valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = self.pending.len() - incomplete_tail_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    /// Bytes waiting for the rest of their character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Length of a trailing sequence that is a valid but unfinished character.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for start in (len.saturating_sub(3)..len).rev() {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return 0,
            Err(e) if e.valid_up_to() == 0 && e.error_len().is_none() => return len - start,
            // a lone continuation byte; its lead may be further back
            Err(_) => continue,
        }
    }
    0
}
