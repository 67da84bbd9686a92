//! Incremental reducer for AI response streams.
//!
//! Turns a chunked response (OpenAI-style chat-completion chunks, `{type, data}`
//! envelopes, or polled status documents) into an ordered, cancellable
//! [`AccumulatorState`] with reasoning and answer text kept apart.
//!
//! Transport and rendering stay outside: bytes come in through a
//! `futures::Stream`, snapshots go out through a [`Sink`].
//!
//! # Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use stream_reducer::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = ReducerConfig::default();
//! let (sink, mut updates) = ChannelSink::channel();
//! let controller = StreamController::from_config(&config, sink);
//!
//! let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
//!     b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}]}\n\n",
//! ))]);
//! let state = drive_with_config(&controller, OpenAiChatMapper::new(), body, &config).await;
//! assert_eq!(state.answer_buffer, "Hi");
//!
//! while let Ok(update) = updates.try_recv() {
//!     println!("{update:?}");
//! }
//! # }
//! ```

/// Configuration options and environment loading.
pub mod config;
/// Cancellation and completion authority for one stream.
pub mod controller;
/// Raw chunk framing and protocol frame mappers.
pub mod decoder;
/// Driving a byte stream through the decoder and controller.
pub mod driver;
/// Public error and anomaly types.
pub mod errors;
/// Typed stream events.
pub mod event;
/// Tracing subscriber setup.
pub mod observability;
/// Polling front-end for status-endpoint backends.
pub mod poll;
/// Common imports for typical usage.
pub mod prelude;
/// Inline thinking-marker segmentation.
pub mod segmenter;
/// Sink interface and stock sinks.
pub mod sink;
/// Accumulated state and its transition function.
pub mod state;

pub use config::{MalformedFramePolicy, MarkerConfig, ReducerConfig};
pub use controller::StreamController;
pub use decoder::{
    EnvelopeMapper, EventDecoder, FrameMapper, OpenAiChatMapper, single_event_mapper,
};
pub use driver::{ByteStream, drive, drive_with_config};
pub use errors::{Anomaly, DecodeError, ReducerError};
pub use event::{Channel, StreamEvent};
pub use observability::init_observability;
pub use poll::{PollDecoder, PollSource, poll_until_terminal};
pub use segmenter::{Segment, Segmentation, segment};
pub use sink::{ChannelSink, RecordingSink, Sink, SinkUpdate};
pub use state::{Accumulator, AccumulatorState, Outcome, Phase, Transition};
