use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::config::ReducerConfig;
use crate::errors::Anomaly;
use crate::event::StreamEvent;
use crate::sink::Sink;
use crate::state::{Accumulator, AccumulatorState, Outcome, Phase, Transition};

type AbortFn = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    accumulator: Accumulator,
    state: AccumulatorState,
    sink: Box<dyn Sink>,
    abort: Option<AbortFn>,
    terminal_reported: bool,
}

/// Single authority over one stream's terminal transition.
///
/// Transport events, user cancellation and local failures all go through the
/// same lock, so whichever reaches it first decides the terminal phase.
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<Mutex<Inner>>,
    phase_tx: Arc<watch::Sender<Phase>>,
}

impl StreamController {
    /// Creates a controller with default markers.
    pub fn new(sink: impl Sink + 'static) -> Self {
        Self::with_accumulator(Accumulator::default(), sink)
    }

    /// Creates a controller using the markers from `config`.
    pub fn from_config(config: &ReducerConfig, sink: impl Sink + 'static) -> Self {
        Self::with_accumulator(Accumulator::new(config.markers.clone()), sink)
    }

    pub fn with_accumulator(accumulator: Accumulator, sink: impl Sink + 'static) -> Self {
        let state = AccumulatorState::new();
        let (phase_tx, _) = watch::channel(state.phase);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                accumulator,
                state,
                sink: Box::new(sink),
                abort: None,
                terminal_reported: false,
            })),
            phase_tx: Arc::new(phase_tx),
        }
    }

    pub fn stream_id(&self) -> uuid::Uuid {
        self.lock().state.stream_id
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> AccumulatorState {
        self.lock().state.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.lock().state.is_terminal()
    }

    /// Applies a transport event and returns any anomalies it raised.
    pub fn apply(&self, event: &StreamEvent) -> Vec<Anomaly> {
        self.transition(|acc, state| acc.apply_event(state, event))
    }

    /// Applies an event numbered by the transport, rejecting repeats and gaps.
    pub fn apply_sequenced(&self, seq: u64, event: &StreamEvent) -> Vec<Anomaly> {
        self.transition(|acc, state| acc.apply_sequenced(state, seq, event))
    }

    /// Counts anomalies raised outside the transition function, such as
    /// frames the decoder skipped. No snapshot is sent.
    pub fn record_anomalies(&self, anomalies: Vec<Anomaly>) {
        if anomalies.is_empty() {
            return;
        }
        self.transition(move |acc, state| acc.record_anomalies(state, anomalies));
    }

    /// Cancels the stream and signals the attached transport abort.
    ///
    /// The state is `Cancelled` when this returns. Calling it on a terminal
    /// stream does nothing.
    pub fn cancel(&self) {
        self.transition(|acc, state| acc.cancel(state));
    }

    /// Fails the stream with a locally produced message.
    ///
    /// Used when the transport ends without a terminal event.
    pub fn fail(&self, message: &str) {
        self.transition(|acc, state| acc.fail(state, message));
    }

    /// Fails the stream, then aborts the transport.
    ///
    /// This is the timeout primitive: the user sees a failure rather than a
    /// cancellation, and the connection is still torn down.
    pub fn fail_and_abort(&self, message: &str) {
        self.fail(message);
        self.abort_transport();
    }

    /// Registers the callback that tears down the underlying connection.
    ///
    /// Fires immediately if the stream was already cancelled. Replaces any
    /// previously attached callback.
    pub fn attach_abort(&self, abort: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.lock();
            if inner.state.phase != Phase::Cancelled {
                inner.abort = Some(Box::new(abort));
                return;
            }
        }
        abort();
    }

    /// Invokes the attached abort callback, at most once.
    pub fn abort_transport(&self) {
        let abort = self.lock().abort.take();
        if let Some(abort) = abort {
            debug!("aborting transport");
            abort();
        }
    }

    /// Subscribes to phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Waits until the stream is terminal and returns the final state.
    pub async fn terminated(&self) -> AccumulatorState {
        let mut rx = self.subscribe_phase();
        // The sender lives in `self`, so the wait cannot observe a closed channel.
        let _ = rx.wait_for(|phase| phase.is_terminal()).await;
        self.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        step: impl FnOnce(&Accumulator, AccumulatorState) -> Transition,
    ) -> Vec<Anomaly> {
        let (anomalies, abort) = {
            let mut inner = self.lock();
            let placeholder = AccumulatorState::with_stream_id(inner.state.stream_id);
            let state = std::mem::replace(&mut inner.state, placeholder);
            let Transition {
                state,
                outcome,
                anomalies,
                status,
            } = step(&inner.accumulator, state);
            inner.state = state;

            let mut abort = None;
            if outcome == Outcome::Applied {
                let Inner {
                    state,
                    sink,
                    terminal_reported,
                    abort: abort_slot,
                    ..
                } = &mut *inner;
                if let Some(message) = status {
                    sink.on_status(&message, state);
                }
                sink.on_snapshot(state);
                if state.is_terminal() && !*terminal_reported {
                    *terminal_reported = true;
                    sink.on_terminal(state);
                    if state.phase == Phase::Cancelled {
                        abort = abort_slot.take();
                    }
                }
                self.phase_tx.send_replace(state.phase);
            }
            (anomalies, abort)
        };

        // Outside the lock: the transport may call back into the controller.
        if let Some(abort) = abort {
            debug!("cancel requested, aborting transport");
            abort();
        }
        anomalies
    }
}
