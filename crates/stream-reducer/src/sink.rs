use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::state::AccumulatorState;

/// Display-side consumer of state snapshots.
///
/// Callbacks run while the controller holds its lock, so they see snapshots
/// strictly in order. A sink must not call back into its own controller.
pub trait Sink: Send {
    /// Called after every applied event with the resulting state.
    fn on_snapshot(&mut self, state: &AccumulatorState);

    /// Called for ephemeral status notes, before the matching snapshot.
    fn on_status(&mut self, _message: &str, _state: &AccumulatorState) {}

    /// Called exactly once, when the stream reaches a terminal phase.
    fn on_terminal(&mut self, state: &AccumulatorState);
}

/// One notification delivered to a queue-backed sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkUpdate {
    Snapshot(AccumulatorState),
    Status {
        message: String,
        sequence_number: u64,
    },
    Terminal(AccumulatorState),
}

impl SinkUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Sink that forwards updates into an unbounded tokio channel.
///
/// Lets an async UI task consume snapshots without sharing the controller.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkUpdate>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SinkUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: SinkUpdate) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.tx.send(update);
    }
}

impl Sink for ChannelSink {
    fn on_snapshot(&mut self, state: &AccumulatorState) {
        self.send(SinkUpdate::Snapshot(state.clone()));
    }

    fn on_status(&mut self, message: &str, state: &AccumulatorState) {
        self.send(SinkUpdate::Status {
            message: message.to_string(),
            sequence_number: state.sequence_number,
        });
    }

    fn on_terminal(&mut self, state: &AccumulatorState) {
        self.send(SinkUpdate::Terminal(state.clone()));
    }
}

/// Sink that keeps every update in memory. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<SinkUpdate>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn updates(&self) -> Vec<SinkUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded snapshots only.
    pub fn snapshots(&self) -> Vec<AccumulatorState> {
        self.updates()
            .into_iter()
            .filter_map(|update| match update {
                SinkUpdate::Snapshot(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Returns the terminal notifications (at most one for a well-behaved controller).
    pub fn terminals(&self) -> Vec<AccumulatorState> {
        self.updates()
            .into_iter()
            .filter_map(|update| match update {
                SinkUpdate::Terminal(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    fn push(&self, update: SinkUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(update);
    }
}

impl Sink for RecordingSink {
    fn on_snapshot(&mut self, state: &AccumulatorState) {
        self.push(SinkUpdate::Snapshot(state.clone()));
    }

    fn on_status(&mut self, message: &str, state: &AccumulatorState) {
        self.push(SinkUpdate::Status {
            message: message.to_string(),
            sequence_number: state.sequence_number,
        });
    }

    fn on_terminal(&mut self, state: &AccumulatorState) {
        self.push(SinkUpdate::Terminal(state.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_updates_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel();
        let state = AccumulatorState::new();
        sink.on_status("working", &state);
        sink.on_snapshot(&state);
        sink.on_terminal(&state);

        assert!(matches!(rx.recv().await, Some(SinkUpdate::Status { message, .. }) if message == "working"));
        assert!(matches!(rx.recv().await, Some(SinkUpdate::Snapshot(_))));
        assert!(rx.recv().await.is_some_and(|u| u.is_terminal()));
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.on_snapshot(&AccumulatorState::new());
    }

    #[test]
    fn recording_sink_clones_share_log() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.on_snapshot(&AccumulatorState::new());
        assert_eq!(sink.snapshots().len(), 1);
        assert!(sink.terminals().is_empty());
    }
}
