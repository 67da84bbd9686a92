use serde_json::Value;
use tracing::debug;

use super::FrameMapper;
use crate::errors::DecodeError;
use crate::event::{Channel, StreamEvent};

/// Mapper for `{type, data}` envelopes.
///
/// | `type`       | event                                             |
/// |--------------|---------------------------------------------------|
/// | `start`      | `Start`                                           |
/// | `processing` | `StatusNote` (string data or `data.message`)      |
/// | `content`    | `Delta` (string data is unclassified)             |
/// | `complete`   | `Complete` (string data or `data.content` is final text) |
/// | `error`      | `Failure`                                         |
/// | `done`       | `Done`                                            |
///
/// Unknown types are skipped.
#[derive(Debug, Default)]
pub struct EnvelopeMapper;

impl FrameMapper for EnvelopeMapper {
    fn map_frame(&mut self, frame: &Value) -> Result<Vec<StreamEvent>, DecodeError> {
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::shape("envelope without a string type"))?;
        let data = frame.get("data").unwrap_or(&Value::Null);

        let events = match kind {
            "start" => vec![StreamEvent::Start],
            "processing" => vec![StreamEvent::StatusNote {
                message: text_field(data, &["message", "status"])
                    .unwrap_or("processing")
                    .to_string(),
            }],
            "content" => content_events(data)?,
            "complete" => vec![StreamEvent::Complete {
                final_text: text_field(data, &["content", "text", "answer"]).map(str::to_string),
            }],
            "error" => vec![StreamEvent::failure(
                text_field(data, &["message", "error"]).unwrap_or("stream error"),
            )],
            "done" => vec![StreamEvent::Done],
            other => {
                debug!(kind = other, "unknown envelope type skipped");
                Vec::new()
            }
        };
        Ok(events)
    }
}

fn content_events(data: &Value) -> Result<Vec<StreamEvent>, DecodeError> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => Ok(vec![StreamEvent::unclassified(text.as_str())]),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                let channel = map
                    .get("channel")
                    .and_then(Value::as_str)
                    .map(parse_channel)
                    .unwrap_or(Channel::Unclassified);
                return Ok(vec![StreamEvent::Delta {
                    text: text.to_string(),
                    channel,
                }]);
            }
            let mut events = Vec::new();
            if let Some(reasoning) = map.get("reasoning_content").and_then(Value::as_str) {
                events.push(StreamEvent::reasoning(reasoning));
            }
            if let Some(content) = map.get("content").and_then(Value::as_str) {
                events.push(StreamEvent::content(content));
            }
            Ok(events)
        }
        _ => Err(DecodeError::shape("content data must be a string or object")),
    }
}

fn parse_channel(value: &str) -> Channel {
    match value {
        "reasoning" | "thinking" => Channel::Reasoning,
        "content" | "answer" => Channel::Content,
        _ => Channel::Unclassified,
    }
}

/// Returns string data directly, or the first string field found in an object.
fn text_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    if let Some(text) = data.as_str() {
        return Some(text);
    }
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(frame: Value) -> Vec<StreamEvent> {
        EnvelopeMapper.map_frame(&frame).expect("map")
    }

    #[test]
    fn maps_lifecycle_types() {
        assert_eq!(map(json!({"type": "start"})), vec![StreamEvent::Start]);
        assert_eq!(map(json!({"type": "done"})), vec![StreamEvent::Done]);
        assert_eq!(
            map(json!({"type": "processing", "data": {"message": "thinking..."}})),
            vec![StreamEvent::StatusNote {
                message: "thinking...".into()
            }]
        );
        assert_eq!(
            map(json!({"type": "error", "data": "quota exceeded"})),
            vec![StreamEvent::failure("quota exceeded")]
        );
    }

    #[test]
    fn complete_carries_authoritative_text_when_present() {
        assert_eq!(
            map(json!({"type": "complete", "data": {"content": "final"}})),
            vec![StreamEvent::Complete {
                final_text: Some("final".into())
            }]
        );
        assert_eq!(
            map(json!({"type": "complete"})),
            vec![StreamEvent::Complete { final_text: None }]
        );
    }

    #[test]
    fn content_data_shapes() {
        assert_eq!(
            map(json!({"type": "content", "data": "tok"})),
            vec![StreamEvent::unclassified("tok")]
        );
        assert_eq!(
            map(json!({"type": "content", "data": {"text": "why", "channel": "thinking"}})),
            vec![StreamEvent::reasoning("why")]
        );
        assert_eq!(
            map(json!({"type": "content", "data": {"reasoning_content": "r", "content": "c"}})),
            vec![StreamEvent::reasoning("r"), StreamEvent::content("c")]
        );
    }

    #[test]
    fn unknown_type_is_skipped_and_missing_type_is_an_error() {
        assert!(map(json!({"type": "heartbeat"})).is_empty());
        let err = EnvelopeMapper
            .map_frame(&json!({"data": "x"}))
            .expect_err("should fail");
        assert!(matches!(err, DecodeError::UnexpectedShape { .. }));
    }
}
