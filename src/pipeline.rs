//! Sequential driver feeding the completion stream through the section
//! demultiplexer and emitting enriched section events.
//!
//! Single consumer, single producer. Chunks are read one at a time; the only
//! suspension points are the chunk read and the enrichment lookup, and both
//! select on an explicit cancellation signal. No chunk is read while the
//! lookup is outstanding, so the enrichment result is always appended to the
//! developer note before any marketing text is emitted.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::demux::{SectionDemux, SectionKind};
use crate::errors::PipelineError;

/// Enrichment lookup invoked once per stream, keyed by a request-scoped
/// identifier. Returning `None` (or an empty summary, or an error) means
/// nothing is appended to the developer note.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn lookup(&self, key: &str) -> anyhow::Result<Option<String>>;
}

/// A completed section, delivered in order: developer first, marketing second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionEvent {
    pub kind: SectionKind,
    pub text: String,
}

/// Final extraction result. A section the stream never completed is `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NoteSet {
    pub developer: Option<String>,
    pub marketing: Option<String>,
}

/// Resolves once the cancellation signal fires. If the sender side is gone,
/// cancellation can no longer fire and this pends forever.
async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drive a chunked byte stream through the section demultiplexer.
///
/// Emits each section on `events` the moment it completes. After the
/// developer section, `enricher.lookup(key)` runs exactly once; a non-empty
/// summary is appended to the developer text after a blank line, and a
/// failed lookup degrades to no appended text. Reading stops as soon as the
/// marketing section is out. If `events` has no receiver anymore the driver
/// treats that as cancellation and returns the partial result.
pub async fn extract_notes<S>(
    mut chunks: S,
    enricher: &dyn Enricher,
    key: &str,
    mut cancel: watch::Receiver<bool>,
    events: mpsc::Sender<SectionEvent>,
) -> Result<NoteSet, PipelineError>
where
    S: Stream<Item = anyhow::Result<Bytes>> + Unpin,
{
    let mut demux = SectionDemux::new();
    let mut notes = NoteSet::default();

    loop {
        // Drain sections already satisfiable from the buffer before reading
        // more: one chunk can complete both sections, and the enrichment
        // must still land between them.
        while let Some((kind, text)) = demux.next_section() {
            match kind {
                SectionKind::Developer => {
                    debug!(chars = text.len(), "developer section complete");
                    let mut text = text;
                    let summary = tokio::select! {
                        biased;
                        _ = wait_cancelled(&mut cancel) => {
                            info!("cancelled during enrichment lookup");
                            notes.developer = Some(text);
                            return Ok(notes);
                        }
                        res = enricher.lookup(key) => match res {
                            Ok(summary) => summary,
                            Err(e) => {
                                warn!(key, "enrichment lookup failed: {e:#}");
                                None
                            }
                        },
                    };
                    if let Some(summary) = summary.filter(|s| !s.is_empty()) {
                        text.push_str("\n\n");
                        text.push_str(&summary);
                    }
                    notes.developer = Some(text.clone());
                    if events
                        .send(SectionEvent {
                            kind: SectionKind::Developer,
                            text,
                        })
                        .await
                        .is_err()
                    {
                        info!("event receiver dropped, stopping extraction");
                        return Ok(notes);
                    }
                }
                SectionKind::Marketing => {
                    debug!(chars = text.len(), "marketing section complete");
                    notes.marketing = Some(text.clone());
                    let _ = events
                        .send(SectionEvent {
                            kind: SectionKind::Marketing,
                            text,
                        })
                        .await;
                }
            }
        }

        // Trailing bytes after the marketing section carry no content.
        if demux.is_complete() {
            break;
        }

        let next = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => {
                info!("cancelled while awaiting next chunk");
                return Ok(notes);
            }
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(chunk)) => demux.push(&chunk),
            Some(Err(e)) => return Err(PipelineError::Transport(e)),
            // Stream ended before both sections were found: not an error,
            // whatever was not found is simply never emitted.
            None => break,
        }
    }

    Ok(notes)
}
