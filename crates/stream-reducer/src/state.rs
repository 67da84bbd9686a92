use tracing::{debug, info, warn};

use crate::config::MarkerConfig;
use crate::errors::Anomaly;
use crate::event::{Channel, StreamEvent};
use crate::segmenter::{self, Segment};

/// Lifecycle phase of one stream.
///
/// `Thinking` and `Answering` are sub-phases of `Streaming` that follow the
/// channel of the most recent delta.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
    Thinking,
    Answering,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True for `Streaming` and its sub-phases.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming | Self::Thinking | Self::Answering)
    }
}

/// Accumulated content and status for one stream.
///
/// Owned by whoever drives the stream and passed by value through
/// [`Accumulator`] transitions; never shared between streams.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccumulatorState {
    /// Correlates log lines and snapshots for this stream.
    pub stream_id: uuid::Uuid,
    pub reasoning_buffer: String,
    pub answer_buffer: String,
    pub phase: Phase,
    /// Whether unclassified deltas currently belong to the reasoning channel.
    pub is_in_thinking_span: bool,
    /// Trailing unclassified text that may still turn out to be a marker.
    pub held_marker_prefix: String,
    /// Count of applied events.
    pub sequence_number: u64,
    /// Count of anomaly notices recorded for this stream.
    pub anomaly_count: u64,
    /// Latest ephemeral status note, if any.
    pub last_status: Option<String>,
    /// Message recorded by a `Failure`.
    pub failure_message: Option<String>,
    /// Set once the end-of-stream marker has been seen.
    pub channel_closed: bool,
}

impl Default for AccumulatorState {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatorState {
    /// Creates an idle state with a fresh stream id.
    pub fn new() -> Self {
        Self::with_stream_id(uuid::Uuid::new_v4())
    }

    /// Creates an idle state with the given stream id.
    pub fn with_stream_id(stream_id: uuid::Uuid) -> Self {
        Self {
            stream_id,
            reasoning_buffer: String::new(),
            answer_buffer: String::new(),
            phase: Phase::Idle,
            is_in_thinking_span: false,
            held_marker_prefix: String::new(),
            sequence_number: 0,
            anomaly_count: 0,
            last_status: None,
            failure_message: None,
            channel_closed: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// UI "loading" flag: the stream is open and not yet terminal.
    pub fn is_loading(&self) -> bool {
        self.phase.is_streaming()
    }

    /// UI "thinking" flag: the latest delta was reasoning.
    pub fn is_thinking(&self) -> bool {
        self.phase == Phase::Thinking
    }

    fn append(&mut self, segment: Segment) {
        match segment.channel {
            Channel::Reasoning => self.reasoning_buffer.push_str(&segment.text),
            Channel::Content | Channel::Unclassified => self.answer_buffer.push_str(&segment.text),
        }
    }

    fn flush_held(&mut self) {
        let held = std::mem::take(&mut self.held_marker_prefix);
        if let Some(segment) = segmenter::flush_held(&held, self.is_in_thinking_span) {
            self.append(segment);
        }
    }
}

/// How a transition treated its input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The input was applied and `sequence_number` advanced.
    Applied,
    /// The end-of-stream marker closed the channel; nothing else changed.
    ChannelClosed,
    /// The input was rejected as a protocol anomaly.
    Dropped,
    /// The input had no effect and is not an anomaly (for example a repeated cancel).
    Ignored,
}

/// Result of one transition: the new state plus anything worth reporting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: AccumulatorState,
    pub outcome: Outcome,
    /// Protocol anomalies noticed while handling the input.
    pub anomalies: Vec<Anomaly>,
    /// Ephemeral status note to surface, not stored in any buffer.
    pub status: Option<String>,
}

impl Transition {
    fn new(state: AccumulatorState, outcome: Outcome) -> Self {
        Self {
            state,
            outcome,
            anomalies: Vec::new(),
            status: None,
        }
    }

    /// True when this transition moved the state into a terminal phase.
    pub fn entered_terminal(&self) -> bool {
        self.outcome == Outcome::Applied && self.state.is_terminal()
    }
}

/// Applies stream events to an [`AccumulatorState`].
///
/// Every entry point takes the state by value and returns it inside a
/// [`Transition`]; none of them fail.
#[derive(Clone, Debug, Default)]
pub struct Accumulator {
    markers: MarkerConfig,
}

impl Accumulator {
    pub fn new(markers: MarkerConfig) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &MarkerConfig {
        &self.markers
    }

    /// Applies one decoded event.
    pub fn apply_event(&self, mut state: AccumulatorState, event: &StreamEvent) -> Transition {
        if state.is_terminal() {
            if matches!(event, StreamEvent::Done) && !state.channel_closed {
                state.channel_closed = true;
                return Transition::new(state, Outcome::ChannelClosed);
            }
            let phase = state.phase;
            return drop_event(state, Anomaly::EventAfterTerminal {
                event: event.kind(),
                phase,
            });
        }
        if state.channel_closed {
            return drop_event(state, Anomaly::EventAfterDone {
                event: event.kind(),
            });
        }

        let mut anomalies = Vec::new();
        match event {
            StreamEvent::Start if state.phase == Phase::Idle => {}
            StreamEvent::Start => return drop_event(state, Anomaly::DuplicateStart),
            StreamEvent::Done => {
                state.channel_closed = true;
                debug!(stream_id = %state.stream_id, phase = ?state.phase, "done marker before terminal event");
                return Transition::new(state, Outcome::ChannelClosed);
            }
            StreamEvent::Delta { .. } | StreamEvent::StatusNote { .. }
                if state.phase == Phase::Idle =>
            {
                anomalies.push(Anomaly::ImplicitStart {
                    event: event.kind(),
                });
                state.phase = Phase::Streaming;
            }
            _ => {}
        }

        state.sequence_number = state.sequence_number.saturating_add(1);
        let mut status = None;
        match event {
            StreamEvent::Start => {
                state.phase = Phase::Streaming;
                debug!(stream_id = %state.stream_id, "stream started");
            }
            StreamEvent::Delta { text, channel } => {
                self.apply_delta(&mut state, text, *channel, &mut anomalies);
            }
            StreamEvent::StatusNote { message } => {
                state.last_status = Some(message.clone());
                status = Some(message.clone());
            }
            StreamEvent::Complete { final_text } => {
                match final_text {
                    Some(text) => {
                        state.held_marker_prefix.clear();
                        state.answer_buffer = text.clone();
                    }
                    None => state.flush_held(),
                }
                state.is_in_thinking_span = false;
                state.phase = Phase::Completed;
                info!(
                    stream_id = %state.stream_id,
                    seq = state.sequence_number,
                    answer_len = state.answer_buffer.len(),
                    reasoning_len = state.reasoning_buffer.len(),
                    "stream completed"
                );
            }
            StreamEvent::Failure { message } => {
                state.flush_held();
                record_failure(&mut state, message);
            }
            StreamEvent::Done => {}
        }

        log_anomalies(&state, &anomalies);
        state.anomaly_count = state.anomaly_count.saturating_add(anomalies.len() as u64);
        Transition {
            state,
            outcome: Outcome::Applied,
            anomalies,
            status,
        }
    }

    /// Applies an event carrying a transport-assigned sequence number.
    ///
    /// Only `current + 1` is accepted; repeats and gaps are dropped.
    pub fn apply_sequenced(
        &self,
        state: AccumulatorState,
        seq: u64,
        event: &StreamEvent,
    ) -> Transition {
        if state.is_terminal() {
            return self.apply_event(state, event);
        }
        let current = state.sequence_number;
        let expected = current.saturating_add(1);
        if seq <= current {
            return drop_event(state, Anomaly::DuplicateSequence { got: seq, current });
        }
        if seq > expected {
            return drop_event(state, Anomaly::OutOfOrderSequence { got: seq, expected });
        }
        self.apply_event(state, event)
    }

    /// Moves a non-terminal stream to `Cancelled`, freezing both buffers.
    ///
    /// Cancelling a terminal stream is ignored.
    pub fn cancel(&self, mut state: AccumulatorState) -> Transition {
        if state.is_terminal() {
            return Transition::new(state, Outcome::Ignored);
        }
        state.sequence_number = state.sequence_number.saturating_add(1);
        state.phase = Phase::Cancelled;
        info!(stream_id = %state.stream_id, seq = state.sequence_number, "stream cancelled");
        Transition::new(state, Outcome::Applied)
    }

    /// Fails a non-terminal stream with a locally produced message.
    ///
    /// Unlike a transport `Failure` this is accepted after the done marker,
    /// so a stream that closes without a terminal event can still end.
    pub fn fail(&self, mut state: AccumulatorState, message: &str) -> Transition {
        if state.is_terminal() {
            return Transition::new(state, Outcome::Ignored);
        }
        state.sequence_number = state.sequence_number.saturating_add(1);
        state.flush_held();
        record_failure(&mut state, message);
        Transition::new(state, Outcome::Applied)
    }

    /// Logs and counts anomalies noticed before the transition function,
    /// leaving buffers and phase untouched.
    pub fn record_anomalies(
        &self,
        mut state: AccumulatorState,
        anomalies: Vec<Anomaly>,
    ) -> Transition {
        log_anomalies(&state, &anomalies);
        state.anomaly_count = state.anomaly_count.saturating_add(anomalies.len() as u64);
        Transition {
            state,
            outcome: Outcome::Ignored,
            anomalies,
            status: None,
        }
    }

    fn apply_delta(
        &self,
        state: &mut AccumulatorState,
        text: &str,
        channel: Channel,
        anomalies: &mut Vec<Anomaly>,
    ) {
        if text.is_empty() {
            return;
        }
        match channel {
            Channel::Reasoning => {
                state.flush_held();
                state.reasoning_buffer.push_str(text);
                state.phase = Phase::Thinking;
            }
            Channel::Content => {
                state.flush_held();
                state.answer_buffer.push_str(text);
                state.phase = Phase::Answering;
            }
            Channel::Unclassified => {
                let out = segmenter::segment(
                    text,
                    state.is_in_thinking_span,
                    &state.held_marker_prefix,
                    &self.markers,
                );
                let span_changed = out.next_is_in_thinking_span != state.is_in_thinking_span;
                let last_channel = out.segments.last().map(|s| s.channel);
                for segment in out.segments {
                    state.append(segment);
                }
                state.is_in_thinking_span = out.next_is_in_thinking_span;
                state.held_marker_prefix = out.held;
                anomalies.extend(out.anomalies);
                state.phase = match (last_channel, span_changed) {
                    (Some(Channel::Reasoning), _) => Phase::Thinking,
                    (Some(_), _) => Phase::Answering,
                    (None, true) if state.is_in_thinking_span => Phase::Thinking,
                    (None, true) => Phase::Answering,
                    (None, false) => state.phase,
                };
            }
        }
        debug!(
            stream_id = %state.stream_id,
            seq = state.sequence_number,
            channel = %channel,
            len = text.len(),
            "delta applied"
        );
    }
}

fn record_failure(state: &mut AccumulatorState, message: &str) {
    state.failure_message = Some(message.to_string());
    state.is_in_thinking_span = false;
    state.phase = Phase::Failed;
    info!(
        stream_id = %state.stream_id,
        seq = state.sequence_number,
        error = %message,
        "stream failed"
    );
}

fn drop_event(mut state: AccumulatorState, anomaly: Anomaly) -> Transition {
    let anomalies = vec![anomaly];
    log_anomalies(&state, &anomalies);
    state.anomaly_count = state.anomaly_count.saturating_add(1);
    Transition {
        state,
        outcome: Outcome::Dropped,
        anomalies,
        status: None,
    }
}

fn log_anomalies(state: &AccumulatorState, anomalies: &[Anomaly]) {
    for anomaly in anomalies {
        warn!(
            stream_id = %state.stream_id,
            seq = state.sequence_number,
            phase = ?state.phase,
            %anomaly,
            "protocol anomaly"
        );
    }
}
