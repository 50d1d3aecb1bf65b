//! UTF-8 reassembly for chunked text streams.
//!
//! Transport chunks can split a multi-byte character anywhere, so bytes are
//! not safe to treat as text until the sequence is complete. This assembler
//! holds back an incomplete trailing sequence and completes it with the next
//! chunk; truly invalid bytes become U+FFFD.

/// Incremental UTF-8 decoder for byte chunks arriving in order.
pub struct Utf8Assembler {
    /// Bytes from the previous chunk that did not end on a character boundary.
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Decode as much of `chunk` as possible, appending complete characters
    /// to `out`. An incomplete trailing sequence (at most 3 bytes) is kept
    /// until the next call.
    pub fn push(&mut self, chunk: &[u8], out: &mut String) {
        if chunk.is_empty() && self.pending.is_empty() {
            return;
        }
        self.pending.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // Incomplete sequence at the end of the buffer: keep
                        // it and wait for the next chunk.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return;
                        }
                        // Invalid sequence: replace and keep decoding.
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid_up_to + bad);
                        }
                    }
                }
            }
        }
    }

    /// Bytes currently held back waiting for a sequence to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Utf8Assembler {
    fn default() -> Self {
        Self::new()
    }
}
