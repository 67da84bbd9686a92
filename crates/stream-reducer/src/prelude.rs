//! Common imports for typical reducer usage.
//!
//! Pulls in the controller, config, sinks, mappers and driver entry points so
//! integration code needs fewer import lines.
pub use crate::{
    AccumulatorState, Channel, ChannelSink, EnvelopeMapper, EventDecoder, OpenAiChatMapper, Phase,
    RecordingSink, ReducerConfig, ReducerError, Sink, SinkUpdate, StreamController, StreamEvent,
    drive, drive_with_config, init_observability,
};
