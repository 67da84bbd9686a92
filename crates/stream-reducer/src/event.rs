use std::fmt;

/// Logical category a piece of streamed text belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Model reasoning ("thinking") text.
    Reasoning,
    /// Final answer text.
    Content,
    /// The transport did not say; inline markers decide.
    Unclassified,
}

impl Channel {
    /// Returns the lowercase wire name (`reasoning`, `content`, `unclassified`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Content => "content",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed notification decoded from a chunked response.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream opened.
    Start,
    /// Incremental text fragment.
    Delta { text: String, channel: Channel },
    /// Non-content progress notice (for example `thinking...`).
    StatusNote { message: String },
    /// Terminal success. `final_text`, when present, replaces the accumulated answer.
    Complete { final_text: Option<String> },
    /// Terminal error.
    Failure { message: String },
    /// End-of-stream marker. Closes the channel without touching content.
    Done,
}

impl StreamEvent {
    /// Shorthand for a reasoning delta.
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Delta {
            text: text.into(),
            channel: Channel::Reasoning,
        }
    }

    /// Shorthand for a content delta.
    pub fn content(text: impl Into<String>) -> Self {
        Self::Delta {
            text: text.into(),
            channel: Channel::Content,
        }
    }

    /// Shorthand for a delta whose channel is decided by inline markers.
    pub fn unclassified(text: impl Into<String>) -> Self {
        Self::Delta {
            text: text.into(),
            channel: Channel::Unclassified,
        }
    }

    /// Shorthand for a failure event.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Short kind name used in log fields and anomaly notices.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Delta { .. } => "delta",
            Self::StatusNote { .. } => "status_note",
            Self::Complete { .. } => "complete",
            Self::Failure { .. } => "failure",
            Self::Done => "done",
        }
    }

    /// True for `Complete` and `Failure`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(StreamEvent::content("hi")).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"type": "delta", "text": "hi", "channel": "content"})
        );
    }

    #[test]
    fn only_complete_and_failure_are_terminal() {
        assert!(StreamEvent::Complete { final_text: None }.is_terminal());
        assert!(StreamEvent::failure("x").is_terminal());
        assert!(!StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::Start.is_terminal());
    }
}
