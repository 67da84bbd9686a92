//! Inline thinking-marker segmentation.
//!
//! Some transports never tag a delta's channel and instead wrap reasoning in
//! inline markers (`<think>...</think>`). [`segment`] splits one fragment into
//! reasoning and content pieces. A marker split across two fragments is
//! caught by holding back the fragment's trailing text when it is a proper
//! prefix of a marker; that held text is at most one byte shorter than the
//! longest marker and is handed back to the caller to prepend next time.

use crate::config::MarkerConfig;
use crate::errors::Anomaly;
use crate::event::Channel;

/// One classified piece of text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Always `Reasoning` or `Content`.
    pub channel: Channel,
}

impl Segment {
    fn new(text: impl Into<String>, channel: Channel) -> Self {
        Self {
            text: text.into(),
            channel,
        }
    }
}

/// Result of segmenting one fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segmentation {
    /// Classified text in input order. Adjacent pieces never share a channel.
    pub segments: Vec<Segment>,
    /// Span flag the caller should store for the next fragment.
    pub next_is_in_thinking_span: bool,
    /// Trailing text that might be the start of a marker.
    pub held: String,
    /// Markers that were dropped because they did not fit the span state.
    pub anomalies: Vec<Anomaly>,
}

enum Marker {
    Open,
    Close,
}

/// Classifies `fragment` given the current span flag and previously held text.
///
/// Pure: the caller owns and applies `next_is_in_thinking_span` and `held`.
/// Reasoning emitted before the closing marker arrives is final; a later
/// marker ends the span without revisiting earlier output.
pub fn segment(
    fragment: &str,
    is_in_thinking_span: bool,
    held: &str,
    markers: &MarkerConfig,
) -> Segmentation {
    let input = if held.is_empty() {
        fragment.to_string()
    } else {
        format!("{held}{fragment}")
    };

    let mut out = Segmentation {
        next_is_in_thinking_span: is_in_thinking_span,
        ..Segmentation::default()
    };
    let mut cursor = 0;

    while let Some((pos, marker)) = next_marker(&input[cursor..], markers) {
        let start = cursor + pos;
        push_segment(&mut out, &input[cursor..start]);
        match marker {
            Marker::Open => {
                if out.next_is_in_thinking_span {
                    out.anomalies.push(Anomaly::NestedOpenMarker);
                } else {
                    out.next_is_in_thinking_span = true;
                }
                cursor = start + markers.open.len();
            }
            Marker::Close => {
                if out.next_is_in_thinking_span {
                    out.next_is_in_thinking_span = false;
                } else {
                    out.anomalies.push(Anomaly::UnmatchedCloseMarker);
                }
                cursor = start + markers.close.len();
            }
        }
    }

    let rest = &input[cursor..];
    let held_len = partial_marker_suffix(rest, markers);
    let split = rest.len() - held_len;
    push_segment(&mut out, &rest[..split]);
    out.held = rest[split..].to_string();
    out
}

/// Returns held text as a segment of the span it was held in.
///
/// Used when the stream ends and the held text can no longer become a marker.
pub fn flush_held(held: &str, is_in_thinking_span: bool) -> Option<Segment> {
    if held.is_empty() {
        return None;
    }
    Some(Segment::new(held, span_channel(is_in_thinking_span)))
}

fn span_channel(is_in_thinking_span: bool) -> Channel {
    if is_in_thinking_span {
        Channel::Reasoning
    } else {
        Channel::Content
    }
}

fn push_segment(out: &mut Segmentation, text: &str) {
    if text.is_empty() {
        return;
    }
    let channel = span_channel(out.next_is_in_thinking_span);
    match out.segments.last_mut() {
        Some(last) if last.channel == channel => last.text.push_str(text),
        _ => out.segments.push(Segment::new(text, channel)),
    }
}

fn next_marker(haystack: &str, markers: &MarkerConfig) -> Option<(usize, Marker)> {
    let open = haystack.find(&markers.open);
    let close = haystack.find(&markers.close);
    match (open, close) {
        (Some(o), Some(c)) if o < c => Some((o, Marker::Open)),
        (Some(o), Some(c)) if c < o => Some((c, Marker::Close)),
        // Same position: the longer marker wins.
        (Some(o), Some(_)) if markers.open.len() >= markers.close.len() => Some((o, Marker::Open)),
        (Some(_), Some(c)) => Some((c, Marker::Close)),
        (Some(o), None) => Some((o, Marker::Open)),
        (None, Some(c)) => Some((c, Marker::Close)),
        (None, None) => None,
    }
}

fn partial_marker_suffix(text: &str, markers: &MarkerConfig) -> usize {
    let longest = markers.open.len().max(markers.close.len());
    let max = longest.saturating_sub(1).min(text.len());
    for len in (1..=max).rev() {
        let start = text.len() - len;
        if !text.is_char_boundary(start) {
            continue;
        }
        let suffix = &text[start..];
        if markers.open.starts_with(suffix) || markers.close.starts_with(suffix) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> MarkerConfig {
        MarkerConfig::default()
    }

    fn seg(text: &str, channel: Channel) -> Segment {
        Segment::new(text, channel)
    }

    #[test]
    fn plain_text_is_content() {
        let out = segment("just an answer", false, "", &markers());
        assert_eq!(out.segments, vec![seg("just an answer", Channel::Content)]);
        assert!(!out.next_is_in_thinking_span);
        assert!(out.held.is_empty());
    }

    #[test]
    fn marker_split_at_chunk_boundary_is_detected() {
        let first = segment("Hello <thi", false, "", &markers());
        assert_eq!(first.segments, vec![seg("Hello ", Channel::Content)]);
        assert_eq!(first.held, "<thi");
        assert!(!first.next_is_in_thinking_span);

        let second = segment(
            "nk>world</think> end",
            first.next_is_in_thinking_span,
            &first.held,
            &markers(),
        );
        assert_eq!(
            second.segments,
            vec![seg("world", Channel::Reasoning), seg(" end", Channel::Content)]
        );
        assert!(!second.next_is_in_thinking_span);
        assert!(second.held.is_empty());
        assert!(second.anomalies.is_empty());
    }

    #[test]
    fn open_span_stays_open_across_fragments() {
        let first = segment("<think>step one", false, "", &markers());
        assert_eq!(first.segments, vec![seg("step one", Channel::Reasoning)]);
        assert!(first.next_is_in_thinking_span);

        let second = segment(" and two</th", true, &first.held, &markers());
        assert_eq!(second.segments, vec![seg(" and two", Channel::Reasoning)]);
        assert_eq!(second.held, "</th");

        let third = segment("ink>Answer", true, &second.held, &markers());
        assert_eq!(third.segments, vec![seg("Answer", Channel::Content)]);
        assert!(!third.next_is_in_thinking_span);
    }

    #[test]
    fn unmatched_close_marker_is_dropped_as_anomaly() {
        let out = segment("a</think>b", false, "", &markers());
        assert_eq!(out.segments, vec![seg("ab", Channel::Content)]);
        assert_eq!(out.anomalies, vec![Anomaly::UnmatchedCloseMarker]);
    }

    #[test]
    fn nested_open_marker_is_dropped_as_anomaly() {
        let out = segment("x<think>y", true, "", &markers());
        assert_eq!(out.segments, vec![seg("xy", Channel::Reasoning)]);
        assert_eq!(out.anomalies, vec![Anomaly::NestedOpenMarker]);
        assert!(out.next_is_in_thinking_span);
    }

    #[test]
    fn held_text_that_never_becomes_a_marker_is_released() {
        let first = segment("a <", false, "", &markers());
        assert_eq!(first.held, "<");
        let second = segment(" b", false, &first.held, &markers());
        assert_eq!(second.segments, vec![seg("< b", Channel::Content)]);
        assert!(second.held.is_empty());
    }

    #[test]
    fn multibyte_text_is_not_split_mid_char() {
        let out = segment("答案<", false, "", &markers());
        assert_eq!(out.segments, vec![seg("答案", Channel::Content)]);
        assert_eq!(out.held, "<");
    }

    #[test]
    fn flush_held_uses_current_span() {
        assert_eq!(flush_held("", false), None);
        assert_eq!(flush_held("</th", true), Some(seg("</th", Channel::Reasoning)));
    }

    #[test]
    fn custom_markers_are_honored() {
        let markers = MarkerConfig {
            open: "[[r]]".into(),
            close: "[[/r]]".into(),
        };
        let out = segment("[[r]]why[[/r]]what", false, "", &markers);
        assert_eq!(
            out.segments,
            vec![seg("why", Channel::Reasoning), seg("what", Channel::Content)]
        );
    }
}
