use crate::state::Phase;

/// Errors returned by configuration and setup APIs.
///
/// Event application never returns these; stream problems travel as
/// `StreamEvent::Failure` or as an [`Anomaly`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReducerError {
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to a builder or setter.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport failed outside the event stream (for example a poll request).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Frame-level decode problems. Internal to the decoder and frame mappers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame payload was not valid JSON.
    #[error("malformed event payload: {reason}")]
    MalformedPayload { reason: String },
    /// The JSON parsed but did not have the shape the mapper expects.
    #[error("unexpected frame shape: {reason}")]
    UnexpectedShape { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::UnexpectedShape {
            reason: reason.into(),
        }
    }
}

/// Non-fatal, developer-visible irregularity in event sequencing.
///
/// Anomalies are logged and returned to the caller but never reach the sink
/// as user-visible errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Anomaly {
    /// An event arrived after the stream reached a terminal phase.
    #[error("{event} event after terminal phase {phase:?} dropped")]
    EventAfterTerminal { event: &'static str, phase: Phase },
    /// An event arrived after the end-of-stream marker.
    #[error("{event} event after done marker dropped")]
    EventAfterDone { event: &'static str },
    /// `Start` arrived while the stream was already open.
    #[error("duplicate start event dropped")]
    DuplicateStart,
    /// Content arrived before `Start`; the stream was opened implicitly.
    #[error("{event} event before start, stream opened implicitly")]
    ImplicitStart { event: &'static str },
    /// A numbered frame repeated an already-applied sequence number.
    #[error("duplicate sequence {got} dropped (current {current})")]
    DuplicateSequence { got: u64, current: u64 },
    /// A numbered frame skipped ahead of the next expected sequence number.
    #[error("out-of-order sequence {got} dropped (expected {expected})")]
    OutOfOrderSequence { got: u64, expected: u64 },
    /// A closing thinking marker appeared outside a thinking span.
    #[error("unmatched closing marker dropped")]
    UnmatchedCloseMarker,
    /// An opening thinking marker appeared inside a thinking span.
    #[error("nested opening marker dropped")]
    NestedOpenMarker,
    /// The decoder skipped a frame it could not parse.
    #[error("malformed frame skipped: {reason}")]
    SkippedMalformedFrame { reason: String },
}
