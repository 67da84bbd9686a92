use serde_json::Value;

use super::FrameMapper;
use crate::errors::DecodeError;
use crate::event::StreamEvent;

/// Mapper for OpenAI-compatible chat-completion chunks.
///
/// Expected shape: `{choices: [{delta: {content?, reasoning_content?}, finish_reason?}]}`.
/// `Start` is synthesized on the first frame. Once a stream has used a
/// structured reasoning field, its `content` is trusted as answer text;
/// before that, `content` is left unclassified so inline thinking markers
/// are still honored.
#[derive(Debug, Default)]
pub struct OpenAiChatMapper {
    started: bool,
    saw_reasoning_field: bool,
}

impl OpenAiChatMapper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameMapper for OpenAiChatMapper {
    fn map_frame(&mut self, frame: &Value) -> Result<Vec<StreamEvent>, DecodeError> {
        if let Some(message) = error_message(frame) {
            return Ok(vec![StreamEvent::failure(message)]);
        }

        let mut events = Vec::new();
        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        let Some(choices) = frame.get("choices") else {
            // Usage-only or keepalive chunk.
            return Ok(events);
        };
        let choices = choices
            .as_array()
            .ok_or_else(|| DecodeError::shape("choices is not an array"))?;
        let Some(choice) = choices.first() else {
            return Ok(events);
        };

        if let Some(delta) = choice.get("delta").or_else(|| choice.get("message")) {
            let reasoning = delta
                .get("reasoning_content")
                .or_else(|| delta.get("reasoning"))
                .and_then(Value::as_str);
            if let Some(reasoning) = reasoning {
                self.saw_reasoning_field = true;
                if !reasoning.is_empty() {
                    events.push(StreamEvent::reasoning(reasoning));
                }
            }
            if let Some(content) = delta.get("content").and_then(Value::as_str)
                && !content.is_empty()
            {
                events.push(if self.saw_reasoning_field {
                    StreamEvent::content(content)
                } else {
                    StreamEvent::unclassified(content)
                });
            }
        }

        if choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .is_some()
        {
            events.push(StreamEvent::Complete { final_text: None });
        }
        Ok(events)
    }
}

fn error_message(frame: &Value) -> Option<String> {
    let error = frame.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("stream error");
    Some(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(delta: Value, finish_reason: Value) -> Value {
        json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]})
    }

    #[test]
    fn first_frame_synthesizes_start() {
        let mut mapper = OpenAiChatMapper::new();
        let events = mapper
            .map_frame(&chunk(json!({"role": "assistant", "content": ""}), Value::Null))
            .expect("map");
        assert_eq!(events, vec![StreamEvent::Start]);
        let events = mapper
            .map_frame(&chunk(json!({"content": "Hi"}), Value::Null))
            .expect("map");
        assert_eq!(events, vec![StreamEvent::unclassified("Hi")]);
    }

    #[test]
    fn structured_reasoning_takes_precedence_over_inline_markers() {
        let mut mapper = OpenAiChatMapper::new();
        let events = mapper
            .map_frame(&chunk(json!({"reasoning_content": "let me see"}), Value::Null))
            .expect("map");
        assert_eq!(events, vec![StreamEvent::Start, StreamEvent::reasoning("let me see")]);

        let events = mapper
            .map_frame(&chunk(json!({"content": "<think>not reasoning"}), Value::Null))
            .expect("map");
        assert_eq!(events, vec![StreamEvent::content("<think>not reasoning")]);
    }

    #[test]
    fn finish_reason_completes_after_trailing_content() {
        let mut mapper = OpenAiChatMapper::new();
        let _ = mapper.map_frame(&chunk(json!({}), Value::Null));
        let events = mapper
            .map_frame(&chunk(json!({"content": "end."}), json!("stop")))
            .expect("map");
        assert_eq!(
            events,
            vec![
                StreamEvent::unclassified("end."),
                StreamEvent::Complete { final_text: None }
            ]
        );
    }

    #[test]
    fn error_object_becomes_failure() {
        let mut mapper = OpenAiChatMapper::new();
        let events = mapper
            .map_frame(&json!({"error": {"message": "rate limited"}}))
            .expect("map");
        assert_eq!(events, vec![StreamEvent::failure("rate limited")]);
    }

    #[test]
    fn non_array_choices_is_a_shape_error() {
        let mut mapper = OpenAiChatMapper::new();
        let err = mapper
            .map_frame(&json!({"choices": {"delta": {}}}))
            .expect_err("should fail");
        assert!(matches!(err, DecodeError::UnexpectedShape { .. }));
    }
}
