//! Tagged-section stream demultiplexer.
//!
//! Consumes an incrementally arriving text stream and extracts two named
//! sections delimited by literal start/end markers, in a fixed required
//! order: `<developer>…</developer>` first, then `<marketing>…</marketing>`.
//! A section is emitted as soon as both of its markers have arrived; the
//! marketing markers are not searched for until the developer section has
//! been fully extracted.
//!
//! Markers are matched as fixed strings, first occurrence wins. This is not
//! a markup parser: no nesting, no case folding, no attribute handling.

mod utf8;

pub use utf8::Utf8Assembler;

pub const DEVELOPER_OPEN: &str = "<developer>";
pub const DEVELOPER_CLOSE: &str = "</developer>";
pub const MARKETING_OPEN: &str = "<marketing>";
pub const MARKETING_CLOSE: &str = "</marketing>";

/// Which of the two sections a completed extraction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Developer,
    Marketing,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "developer",
            Self::Marketing => "marketing",
        }
    }
}

/// Extraction state. Transitions only forward for the lifetime of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractState {
    AwaitingDeveloper,
    AwaitingMarketing,
    Complete,
}

/// Stateful demultiplexer fed one chunk at a time.
///
/// The buffer grows monotonically for the lifetime of one stream; it is
/// bounded in practice by the length of one completion. Already-scanned
/// text is deliberately not discarded (matches the original behavior).
pub struct SectionDemux {
    buf: String,
    utf8: Utf8Assembler,
    state: ExtractState,
}

impl SectionDemux {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            utf8: Utf8Assembler::new(),
            state: ExtractState::AwaitingDeveloper,
        }
    }

    /// Append a chunk of bytes to the buffer. Empty chunks are a no-op.
    /// Bytes that split a multi-byte character at the chunk boundary are
    /// held back and reassembled before they become searchable text.
    pub fn push(&mut self, chunk: &[u8]) {
        self.utf8.push(chunk, &mut self.buf);
    }

    /// Scan the buffer for the section currently awaited. Returns the
    /// trimmed section content once both of its markers are present, and
    /// advances the state; returns `None` while the section is incomplete.
    ///
    /// At most one section completes per call, so the caller can run its
    /// between-sections side effect before asking for the next one.
    pub fn next_section(&mut self) -> Option<(SectionKind, String)> {
        match self.state {
            ExtractState::AwaitingDeveloper => {
                let content = extract_between(&self.buf, DEVELOPER_OPEN, DEVELOPER_CLOSE)?;
                self.state = ExtractState::AwaitingMarketing;
                Some((SectionKind::Developer, content))
            }
            ExtractState::AwaitingMarketing => {
                let content = extract_between(&self.buf, MARKETING_OPEN, MARKETING_CLOSE)?;
                self.state = ExtractState::Complete;
                Some((SectionKind::Marketing, content))
            }
            ExtractState::Complete => None,
        }
    }

    /// True once both sections have been extracted. The caller should stop
    /// reading from upstream at this point; trailing bytes carry no content.
    pub fn is_complete(&self) -> bool {
        self.state == ExtractState::Complete
    }
}

impl Default for SectionDemux {
    fn default() -> Self {
        Self::new()
    }
}

/// First-match extraction: content strictly between the first `open` and the
/// first `close` that follows it, trimmed. Linear substring search, nothing
/// more.
fn extract_between(buf: &str, open: &str, close: &str) -> Option<String> {
    let start = buf.find(open)? + open.len();
    let end = start + buf[start..].find(close)?;
    Some(buf[start..end].trim().to_string())
}
