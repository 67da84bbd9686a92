use std::fmt::Display;
use std::pin::{Pin, pin};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ReducerConfig;
use crate::controller::StreamController;
use crate::decoder::{EventDecoder, FrameMapper};
use crate::event::StreamEvent;
use crate::state::AccumulatorState;

/// Failure message used when the whole-stream timeout fires.
pub const TIMEOUT_MESSAGE: &str = "stream timed out";
/// Failure message used when the transport ends before a terminal event.
pub const INCOMPLETE_MESSAGE: &str = "stream ended without completion";

/// Boxed byte stream as produced by typical HTTP clients.
pub type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send + 'static>>;

/// Feeds a byte stream through `decoder` into `controller` until the stream
/// is terminal, and returns the final state.
///
/// - Stops reading as soon as the controller turns terminal (including a
///   `cancel()` from another task); unread bytes are discarded.
/// - A transport error fails the stream with its message, even after the
///   done marker.
/// - Frames skipped by the decoder are counted as anomalies on the state.
/// - When the stream ends without `Complete`/`Failure`, a trailing frame is
///   decoded and the stream fails with [`INCOMPLETE_MESSAGE`].
/// - When `timeout` elapses, the stream fails with [`TIMEOUT_MESSAGE`] and
///   the attached transport abort fires.
pub async fn drive<M, S, E>(
    controller: &StreamController,
    decoder: &mut EventDecoder<M>,
    stream: S,
    timeout: Option<Duration>,
) -> AccumulatorState
where
    M: FrameMapper,
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = pin!(stream);
    let mut phase = controller.subscribe_phase();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut expired = pin!(async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    });
    let stream_id = controller.stream_id();

    loop {
        tokio::select! {
            biased;
            _ = phase.wait_for(|p| p.is_terminal()) => {
                debug!(%stream_id, "controller terminal, stop reading");
                break;
            }
            _ = &mut expired => {
                warn!(%stream_id, ?timeout, "stream timeout");
                controller.fail_and_abort(TIMEOUT_MESSAGE);
                break;
            }
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    let events = decoder.push_chunk(&chunk);
                    apply_all(controller, decoder, &events);
                }
                Some(Err(err)) => {
                    warn!(%stream_id, error = %err, "transport error");
                    controller.fail(&err.to_string());
                    break;
                }
                None => {
                    let events = decoder.finish();
                    apply_all(controller, decoder, &events);
                    if !controller.is_terminal() {
                        controller.fail(INCOMPLETE_MESSAGE);
                    }
                    break;
                }
            },
        }
    }
    controller.snapshot()
}

/// [`drive`] with a fresh decoder built from `config`.
pub async fn drive_with_config<M, S, E>(
    controller: &StreamController,
    mapper: M,
    stream: S,
    config: &ReducerConfig,
) -> AccumulatorState
where
    M: FrameMapper,
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut decoder = EventDecoder::new(mapper, config);
    drive(controller, &mut decoder, stream, config.timeout).await
}

fn apply_all<M: FrameMapper>(
    controller: &StreamController,
    decoder: &mut EventDecoder<M>,
    events: &[StreamEvent],
) {
    for event in events {
        controller.apply(event);
    }
    controller.record_anomalies(decoder.drain_anomalies());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MalformedFramePolicy;
    use crate::decoder::{EnvelopeMapper, OpenAiChatMapper};
    use crate::sink::RecordingSink;
    use crate::state::Phase;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn chunks(parts: &[&str]) -> Vec<Result<Bytes, String>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn openai_stream_with_split_frames_completes() {
        let sink = RecordingSink::new();
        let controller = StreamController::new(sink.clone());
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"<think>hmm</th\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"ink>The answer\"}}]}\n\nda",
            "ta: {\"choices\":[{\"delta\":{\"content\":\" is 42.\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let state = drive_with_config(
            &controller,
            OpenAiChatMapper::new(),
            stream::iter(body),
            &ReducerConfig::default(),
        )
        .await;

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.reasoning_buffer, "hmm");
        assert_eq!(state.answer_buffer, "The answer is 42.");
        assert_eq!(sink.terminals().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_becomes_failure_with_partial_answer() {
        let controller = StreamController::new(RecordingSink::new());
        let body: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"type\":\"start\"}\n{\"type\":\"content\",\"data\":{\"content\":\"partial\"}}\n")),
            Err("connection reset".to_string()),
        ];
        let state = drive_with_config(
            &controller,
            EnvelopeMapper,
            stream::iter(body),
            &ReducerConfig::default(),
        )
        .await;

        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.answer_buffer, "partial");
        assert_eq!(state.failure_message.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn transport_error_after_done_still_fails_the_stream() {
        let sink = RecordingSink::new();
        let controller = StreamController::new(sink.clone());
        let body: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"abc\"}}]}\n\ndata: [DONE]\n\n",
            )),
            Err("connection reset".to_string()),
        ];
        let state = drive_with_config(
            &controller,
            OpenAiChatMapper::new(),
            stream::iter(body),
            &ReducerConfig::default(),
        )
        .await;

        assert!(state.channel_closed);
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.answer_buffer, "abc");
        assert_eq!(state.failure_message.as_deref(), Some("connection reset"));
        assert_eq!(sink.terminals().len(), 1);
    }

    #[tokio::test]
    async fn skipped_frames_are_counted_on_the_state() {
        let controller = StreamController::new(RecordingSink::new());
        let config = ReducerConfig::default().on_malformed_frame(MalformedFramePolicy::SkipFrame);
        let mut decoder = EventDecoder::new(EnvelopeMapper, &config);
        let body = chunks(&[
            "{\"type\":\"start\"}\n{bad}\n{bad}\n",
            "{bad}\n{\"type\":\"content\",\"data\":\"ok\"}\n{\"type\":\"complete\"}\n",
        ]);
        let state = drive(&controller, &mut decoder, stream::iter(body), None).await;

        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.answer_buffer, "ok");
        assert_eq!(state.anomaly_count, 3);
        assert!(decoder.drain_anomalies().is_empty());
    }

    #[tokio::test]
    async fn stream_ending_without_completion_fails() {
        let controller = StreamController::new(RecordingSink::new());
        let body = chunks(&["{\"type\":\"start\"}\n", "{\"type\":\"content\",\"data\":\"abc\"}"]);
        let state = drive_with_config(
            &controller,
            EnvelopeMapper,
            stream::iter(body),
            &ReducerConfig::default(),
        )
        .await;

        assert_eq!(state.answer_buffer, "abc");
        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.failure_message.as_deref(), Some(INCOMPLETE_MESSAGE));
    }

    #[tokio::test]
    async fn cancel_from_another_task_stops_reading() {
        let controller = StreamController::new(RecordingSink::new());
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = aborted.clone();
        controller.attach_abort(move || flag.store(true, Ordering::SeqCst));

        let body = stream::iter(chunks(&["{\"type\":\"start\"}\n{\"type\":\"content\",\"data\":\"abc\"}\n"]))
            .chain(stream::pending());
        let task_controller = controller.clone();
        let task = tokio::spawn(async move {
            drive_with_config(&task_controller, EnvelopeMapper, body, &ReducerConfig::default())
                .await
        });

        while controller.snapshot().answer_buffer != "abc" {
            tokio::task::yield_now().await;
        }
        controller.cancel();
        let state = task.await.expect("join");

        assert_eq!(state.phase, Phase::Cancelled);
        assert_eq!(state.answer_buffer, "abc");
        assert!(aborted.load(Ordering::SeqCst));
        assert_eq!(controller.apply(&StreamEvent::content("xyz")).len(), 1);
        assert_eq!(controller.snapshot().answer_buffer, "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_and_aborts() {
        let controller = StreamController::new(RecordingSink::new());
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = aborted.clone();
        controller.attach_abort(move || flag.store(true, Ordering::SeqCst));

        let body = stream::iter(chunks(&["{\"type\":\"start\"}\n"])).chain(stream::pending());
        let config = ReducerConfig::default().timeout(Duration::from_secs(30));
        let state = drive_with_config(&controller, EnvelopeMapper, body, &config).await;

        assert_eq!(state.phase, Phase::Failed);
        assert_eq!(state.failure_message.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(aborted.load(Ordering::SeqCst));
    }
}
