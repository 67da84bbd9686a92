/// One complete line taken off the byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineItem {
    /// Frame payload with any `data:` prefix removed.
    Payload(String),
    /// The line could not be used (invalid UTF-8 or over the size limit).
    Invalid(String),
}

/// Splits a byte stream into newline-terminated frame payloads.
///
/// Bytes are kept until a `\n` arrives, so frames and multi-byte characters
/// split across chunks are reassembled before decoding.
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<LineItem> {
        let mut items = Vec::new();
        for piece in chunk.split_inclusive(|b| *b == b'\n') {
            let complete = piece.last() == Some(&b'\n');
            let body = if complete {
                &piece[..piece.len() - 1]
            } else {
                piece
            };

            if self.discarding {
                if complete {
                    self.discarding = false;
                }
                continue;
            }

            self.buf.extend_from_slice(body);
            if self.buf.len() > self.max_line_bytes {
                self.buf.clear();
                self.discarding = !complete;
                items.push(LineItem::Invalid(format!(
                    "line exceeds {} bytes",
                    self.max_line_bytes
                )));
                continue;
            }
            if complete {
                let line = std::mem::take(&mut self.buf);
                if let Some(item) = parse_line(&line) {
                    items.push(item);
                }
            }
        }
        items
    }

    /// Takes whatever is left after the last newline.
    pub fn finish(&mut self) -> Option<LineItem> {
        self.discarding = false;
        let line = std::mem::take(&mut self.buf);
        parse_line(&line)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn parse_line(bytes: &[u8]) -> Option<LineItem> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return Some(LineItem::Invalid(format!("invalid utf-8: {e}"))),
    };
    let line = text.trim_end_matches('\r').trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None => line,
    };
    if payload.is_empty() {
        return None;
    }
    Some(LineItem::Payload(payload.to_string()))
}
