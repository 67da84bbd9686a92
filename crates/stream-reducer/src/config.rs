use std::time::Duration;

use crate::errors::ReducerError;

/// What the decoder does with a frame whose payload cannot be parsed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedFramePolicy {
    /// Emit `Failure { message: "malformed event payload" }`.
    #[default]
    EmitFailure,
    /// Drop the frame and record an anomaly.
    SkipFrame,
}

impl MalformedFramePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "emit_failure" | "emitfailure" | "failure" => Some(Self::EmitFailure),
            "skip_frame" | "skipframe" | "skip" => Some(Self::SkipFrame),
            _ => None,
        }
    }
}

/// Inline markers that open and close a thinking span.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarkerConfig {
    pub open: String,
    pub close: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            open: "<think>".to_string(),
            close: "</think>".to_string(),
        }
    }
}

/// Reducer behavior options shared by the decoder, segmenter and driver.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReducerConfig {
    /// Thinking span markers used when the transport does not tag channels.
    pub markers: MarkerConfig,
    /// Decoder behavior for unparseable frames.
    pub on_malformed_frame: MalformedFramePolicy,
    /// Optional whole-stream timeout enforced by the driver.
    pub timeout: Option<Duration>,
    /// Delay between status requests for the polling front-end.
    pub poll_interval: Duration,
    /// Upper bound on a single buffered line in the decoder.
    pub max_line_bytes: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            markers: MarkerConfig::default(),
            on_malformed_frame: MalformedFramePolicy::default(),
            timeout: None,
            poll_interval: Duration::from_secs(1),
            max_line_bytes: 1024 * 1024,
        }
    }
}

impl ReducerConfig {
    /// Builds a config from defaults overridden by `STREAM_REDUCER_*` variables.
    ///
    /// Recognized variables:
    /// - `STREAM_REDUCER_MALFORMED_FRAME`: `emit_failure` or `skip_frame`.
    /// - `STREAM_REDUCER_TIMEOUT_MS`: whole-stream timeout in milliseconds.
    /// - `STREAM_REDUCER_POLL_INTERVAL_MS`: polling interval in milliseconds.
    /// - `STREAM_REDUCER_THINK_OPEN` / `STREAM_REDUCER_THINK_CLOSE`: marker overrides.
    pub fn from_env() -> Result<Self, ReducerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ReducerError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("STREAM_REDUCER_MALFORMED_FRAME") {
            config.on_malformed_frame = MalformedFramePolicy::parse(&raw).ok_or_else(|| {
                ReducerError::Config(format!(
                    "STREAM_REDUCER_MALFORMED_FRAME must be emit_failure or skip_frame, got {raw:?}"
                ))
            })?;
        }
        if let Some(raw) = lookup("STREAM_REDUCER_TIMEOUT_MS") {
            config.timeout = Some(parse_millis("STREAM_REDUCER_TIMEOUT_MS", &raw)?);
        }
        if let Some(raw) = lookup("STREAM_REDUCER_POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("STREAM_REDUCER_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(open) = lookup("STREAM_REDUCER_THINK_OPEN") {
            config.markers.open = open;
        }
        if let Some(close) = lookup("STREAM_REDUCER_THINK_CLOSE") {
            config.markers.close = close;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the thinking markers.
    pub fn markers(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.markers = MarkerConfig {
            open: open.into(),
            close: close.into(),
        };
        self
    }

    /// Overrides the malformed frame policy.
    pub fn on_malformed_frame(mut self, policy: MalformedFramePolicy) -> Self {
        self.on_malformed_frame = policy;
        self
    }

    /// Sets the whole-stream timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the decoder line limit.
    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Checks invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), ReducerError> {
        if self.markers.open.is_empty() || self.markers.close.is_empty() {
            return Err(ReducerError::Validation(
                "thinking markers must not be empty".into(),
            ));
        }
        if self.markers.open == self.markers.close {
            return Err(ReducerError::Validation(
                "open and close markers must differ".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ReducerError::Validation(
                "poll_interval must be greater than 0".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ReducerError::Validation(
                "max_line_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ReducerError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ReducerError::Config(format!("{key} must be milliseconds: {e}")))
}
