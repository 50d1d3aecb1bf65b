//! Typed errors for the note-extraction pipeline.

use thiserror::Error;

/// Errors from driving a completion stream through the demultiplexer.
///
/// A stream that ends before both sections are found is NOT an error — the
/// missing sections are simply never emitted. Cancellation is not an error
/// either. The one terminal failure is the upstream transport breaking
/// mid-stream; sections already emitted before the failure stand.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream transport failed mid-stream: {0}")]
    Transport(#[source] anyhow::Error),
}
