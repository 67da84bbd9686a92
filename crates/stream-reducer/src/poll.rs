//! Polling front-end.
//!
//! Some backends expose a status endpoint instead of a stream. [`PollDecoder`]
//! turns successive status documents into the same events a streaming
//! transport would produce, so the accumulator logic is shared.

use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::ReducerConfig;
use crate::controller::StreamController;
use crate::errors::ReducerError;
use crate::event::StreamEvent;
use crate::state::AccumulatorState;

/// Failure message used when polling exceeds the configured timeout.
pub const POLL_TIMEOUT_MESSAGE: &str = "poll timed out";

/// Source of status documents, typically an HTTP status endpoint.
#[async_trait::async_trait]
pub trait PollSource: Send {
    /// Fetches the current status document.
    async fn poll(&mut self) -> Result<Value, ReducerError>;
}

/// Converts status documents into stream events.
///
/// Recognized fields: `status` (`pending`, `processing`, `running`,
/// `completed`, `failed`), `content` or `result` (full text so far),
/// `message` (progress note or failure reason), `error`.
#[derive(Debug, Default)]
pub struct PollDecoder {
    started: bool,
    emitted: String,
    last_note: Option<String>,
}

impl PollDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, doc: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        let status = doc
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("pending")
            .to_ascii_lowercase();
        let text = doc
            .get("content")
            .or_else(|| doc.get("result"))
            .and_then(Value::as_str);
        let message = doc.get("message").and_then(Value::as_str);

        match status.as_str() {
            "completed" | "complete" | "succeeded" | "success" | "done" => {
                events.push(StreamEvent::Complete {
                    final_text: text.map(str::to_string),
                });
            }
            "failed" | "error" | "cancelled" => {
                let reason = doc
                    .get("error")
                    .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
                    .or(message)
                    .unwrap_or("request failed");
                events.push(StreamEvent::failure(reason));
            }
            _ => {
                if let Some(note) = message
                    && self.last_note.as_deref() != Some(note)
                {
                    self.last_note = Some(note.to_string());
                    events.push(StreamEvent::StatusNote {
                        message: note.to_string(),
                    });
                }
                if let Some(text) = text {
                    self.push_text(text, &mut events);
                }
            }
        }
        events
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        match text.strip_prefix(self.emitted.as_str()) {
            Some("") => {}
            Some(suffix) => {
                events.push(StreamEvent::content(suffix));
                self.emitted = text.to_string();
            }
            // The backend rewrote earlier text; the final document's text
            // replaces the answer on completion.
            None => debug!(
                emitted_len = self.emitted.len(),
                text_len = text.len(),
                "polled text diverged from emitted prefix"
            ),
        }
    }
}

/// Polls `source` every `config.poll_interval` until the controller is terminal.
///
/// A poll error fails the stream with the error text. When `config.timeout`
/// is set and elapses first, the stream fails with [`POLL_TIMEOUT_MESSAGE`].
pub async fn poll_until_terminal<S: PollSource>(
    controller: &StreamController,
    source: &mut S,
    config: &ReducerConfig,
) -> AccumulatorState {
    let mut decoder = PollDecoder::new();
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut phase = controller.subscribe_phase();
    let deadline = config.timeout.map(|t| Instant::now() + t);

    while !controller.is_terminal() {
        tokio::select! {
            biased;
            _ = phase.wait_for(|p| p.is_terminal()) => break,
            _ = sleep_until_deadline(deadline) => {
                warn!(stream_id = %controller.stream_id(), "poll timeout");
                controller.fail_and_abort(POLL_TIMEOUT_MESSAGE);
                break;
            }
            _ = ticker.tick() => {}
        }

        match source.poll().await {
            Ok(doc) => {
                for event in decoder.decode(&doc) {
                    controller.apply(&event);
                }
            }
            Err(err) => {
                warn!(stream_id = %controller.stream_id(), error = %err, "poll failed");
                controller.fail(&err.to_string());
            }
        }
    }
    controller.snapshot()
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
