//! Raw transport chunks to [`StreamEvent`]s.
//!
//! [`EventDecoder`] owns the framing (partial lines, `data:` prefixes, the
//! `[DONE]` sentinel) and hands each parsed JSON frame to a [`FrameMapper`],
//! which knows the protocol shape. Two mappers ship with the crate:
//! [`OpenAiChatMapper`] for chat-completion chunks and [`EnvelopeMapper`] for
//! `{type, data}` envelopes.

mod envelope;
mod lines;
mod openai;

pub use envelope::EnvelopeMapper;
pub use openai::OpenAiChatMapper;

use tracing::{debug, warn};

use crate::config::{MalformedFramePolicy, ReducerConfig};
use crate::errors::{Anomaly, DecodeError};
use crate::event::StreamEvent;

use lines::{LineBuffer, LineItem};

/// Message carried by the `Failure` emitted for an unusable frame.
pub const MALFORMED_FRAME_MESSAGE: &str = "malformed event payload";

const DONE_SENTINEL: &str = "[DONE]";

/// Maps one parsed JSON frame to zero or more events.
///
/// Implemented for closures, so an integration point can pass its own
/// protocol mapping inline.
pub trait FrameMapper: Send {
    fn map_frame(&mut self, frame: &serde_json::Value) -> Result<Vec<StreamEvent>, DecodeError>;
}

impl<F> FrameMapper for F
where
    F: FnMut(&serde_json::Value) -> Result<Vec<StreamEvent>, DecodeError> + Send,
{
    fn map_frame(&mut self, frame: &serde_json::Value) -> Result<Vec<StreamEvent>, DecodeError> {
        self(frame)
    }
}

/// Adapts a `frame -> Option<event>` function into a [`FrameMapper`].
pub fn single_event_mapper<F>(mut map: F) -> impl FrameMapper
where
    F: FnMut(&serde_json::Value) -> Option<StreamEvent> + Send,
{
    move |frame: &serde_json::Value| -> Result<Vec<StreamEvent>, DecodeError> {
        Ok(map(frame).into_iter().collect())
    }
}

/// Incremental decoder for one stream.
pub struct EventDecoder<M> {
    lines: LineBuffer,
    mapper: M,
    policy: MalformedFramePolicy,
    anomalies: Vec<Anomaly>,
}

impl<M: FrameMapper> EventDecoder<M> {
    pub fn new(mapper: M, config: &ReducerConfig) -> Self {
        Self {
            lines: LineBuffer::new(config.max_line_bytes),
            mapper,
            policy: config.on_malformed_frame,
            anomalies: Vec::new(),
        }
    }

    /// Feeds raw bytes and returns every event completed by them, in order.
    ///
    /// Returns an empty list while no full frame is available.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for item in self.lines.push_chunk(chunk) {
            self.decode_item(item, &mut events);
        }
        events
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.push_chunk(chunk.as_bytes())
    }

    /// Decodes a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(item) = self.lines.finish() {
            self.decode_item(item, &mut events);
        }
        events
    }

    /// Takes the anomalies recorded for skipped frames.
    pub fn drain_anomalies(&mut self) -> Vec<Anomaly> {
        std::mem::take(&mut self.anomalies)
    }

    fn decode_item(&mut self, item: LineItem, events: &mut Vec<StreamEvent>) {
        match item {
            LineItem::Payload(payload) => self.decode_payload(&payload, events),
            LineItem::Invalid(reason) => self.malformed(reason, events),
        }
    }

    fn decode_payload(&mut self, payload: &str, events: &mut Vec<StreamEvent>) {
        if payload == DONE_SENTINEL {
            events.push(StreamEvent::Done);
            return;
        }
        let mapped = serde_json::from_str::<serde_json::Value>(payload)
            .map_err(|e| DecodeError::malformed(e.to_string()))
            .and_then(|frame| self.mapper.map_frame(&frame));
        match mapped {
            Ok(mapped) => {
                debug!(count = mapped.len(), "frame decoded");
                events.extend(mapped);
            }
            Err(err) => self.malformed(err.to_string(), events),
        }
    }

    fn malformed(&mut self, reason: String, events: &mut Vec<StreamEvent>) {
        match self.policy {
            MalformedFramePolicy::EmitFailure => {
                warn!(%reason, "malformed frame, emitting failure");
                events.push(StreamEvent::failure(MALFORMED_FRAME_MESSAGE));
            }
            MalformedFramePolicy::SkipFrame => {
                warn!(%reason, "malformed frame skipped");
                self.anomalies.push(Anomaly::SkippedMalformedFrame { reason });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Channel;

    fn envelope_decoder(policy: MalformedFramePolicy) -> EventDecoder<EnvelopeMapper> {
        EventDecoder::new(
            EnvelopeMapper::default(),
            &ReducerConfig::default().on_malformed_frame(policy),
        )
    }

    #[test]
    fn returns_nothing_until_a_frame_completes() {
        let mut decoder = envelope_decoder(MalformedFramePolicy::EmitFailure);
        assert!(decoder.push_str("data: {\"type\":\"content\",\"da").is_empty());
        let events = decoder.push_str("ta\":\"hi\"}\n");
        assert_eq!(events, vec![StreamEvent::unclassified("hi")]);
    }

    #[test]
    fn done_sentinel_decodes_to_done() {
        let mut decoder = envelope_decoder(MalformedFramePolicy::EmitFailure);
        assert_eq!(decoder.push_str("data: [DONE]\n"), vec![StreamEvent::Done]);
    }

    #[test]
    fn malformed_json_emits_failure_by_default() {
        let mut decoder = envelope_decoder(MalformedFramePolicy::EmitFailure);
        let events = decoder.push_str("data: {not json}\n");
        assert_eq!(events, vec![StreamEvent::failure(MALFORMED_FRAME_MESSAGE)]);
        assert!(decoder.drain_anomalies().is_empty());
    }

    #[test]
    fn malformed_json_is_skipped_when_configured() {
        let mut decoder = envelope_decoder(MalformedFramePolicy::SkipFrame);
        let events = decoder.push_str("data: {not json}\ndata: {\"type\":\"done\"}\n");
        assert_eq!(events, vec![StreamEvent::Done]);
        let anomalies = decoder.drain_anomalies();
        assert!(matches!(anomalies.as_slice(), [Anomaly::SkippedMalformedFrame { .. }]));
        assert!(decoder.drain_anomalies().is_empty());
    }

    #[test]
    fn finish_decodes_trailing_frame() {
        let mut decoder = envelope_decoder(MalformedFramePolicy::EmitFailure);
        assert!(decoder.push_str("{\"type\":\"complete\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamEvent::Complete { final_text: None }]
        );
    }

    #[test]
    fn closure_mapper_is_accepted() {
        let mapper = single_event_mapper(|frame| {
            frame
                .get("token")
                .and_then(|v| v.as_str())
                .map(|text| StreamEvent::Delta {
                    text: text.to_string(),
                    channel: Channel::Content,
                })
        });
        let mut decoder = EventDecoder::new(mapper, &ReducerConfig::default());
        let events = decoder.push_str("{\"token\":\"a\"}\n{\"other\":1}\n{\"token\":\"b\"}\n");
        assert_eq!(events, vec![StreamEvent::content("a"), StreamEvent::content("b")]);
    }
}
