//! Line-delimited JSON codec for worker communication.
//!
//! The worker speaks one JSON object per line over stdin/stdout, with no
//! length prefix. Workers may flush a single object across several OS
//! writes, so [`decode`] treats an unterminated tail that does not parse yet
//! as "wait for more bytes" rather than as an error.

use serde::Serialize;
use serde_json::Value;
use serde_json::error::Category;

/// Maximum retained partial line (16 MiB) to prevent unbounded buffering.
pub const MAX_PARTIAL_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A complete line failed to parse and was dropped.
    #[error("malformed worker line: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    /// The retained partial line grew past [`MAX_PARTIAL_BYTES`] and was discarded.
    #[error("partial worker line exceeded {MAX_PARTIAL_BYTES} bytes ({len} buffered)")]
    Oversized { len: usize },
}

impl DecodeError {
    /// Whether this is an "unexpected end of input" class failure.
    ///
    /// These come from ordinary fragmentation and are logged quietly.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        match self {
            Self::Malformed { source, .. } => source.classify() == Category::Eof,
            Self::Oversized { .. } => false,
        }
    }
}

/// Result of one decode pass.
#[derive(Debug, Default)]
pub struct Decoded {
    pub messages: Vec<Value>,
    /// Unterminated bytes to prepend to the next chunk.
    pub remaining: Vec<u8>,
    pub errors: Vec<DecodeError>,
}

/// Serialize `msg` as compact JSON terminated by `\n`.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    Ok(line)
}

/// Split `buffer` into complete JSON values plus the retained tail.
#[must_use]
pub fn decode(buffer: &[u8]) -> Decoded {
    let mut out = Decoded::default();
    let mut rest = buffer;

    while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
        let (line, tail) = rest.split_at(newline);
        rest = &tail[1..];
        parse_line(line, &mut out);
    }

    match parse_tail(rest) {
        Some(value) => out.messages.push(value),
        None if trim_line(rest).is_empty() => {}
        None => out.remaining = rest.to_vec(),
    }
    out
}

fn parse_line(line: &[u8], out: &mut Decoded) {
    let line = trim_line(line);
    if line.is_empty() {
        return;
    }
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => out.messages.push(value),
        Err(source) => out.errors.push(DecodeError::Malformed {
            line: String::from_utf8_lossy(line).into_owned(),
            source,
        }),
    }
}

/// Accept an unterminated tail only if it already holds a whole value.
///
/// Worker messages are objects or arrays, so anything not closed by `}` or
/// `]` is still in flight and is not worth a parse attempt.
fn parse_tail(tail: &[u8]) -> Option<Value> {
    let tail = trim_line(tail);
    if !matches!(tail.last(), Some(b'}' | b']')) {
        return None;
    }
    serde_json::from_slice(tail).ok()
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// Incremental form of [`decode`] owning the partial-line buffer.
///
/// The retained partial never contains a newline, so each push only scans
/// the bytes it adds.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of worker stdout.
    pub fn push(&mut self, chunk: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(newline);
            rest = &tail[1..];
            if self.pending.is_empty() {
                parse_line(head, &mut decoded);
            } else {
                self.pending.extend_from_slice(head);
                parse_line(&self.pending, &mut decoded);
                self.pending.clear();
            }
        }
        self.pending.extend_from_slice(rest);

        if let Some(value) = parse_tail(&self.pending) {
            decoded.messages.push(value);
            self.pending.clear();
        } else if trim_line(&self.pending).is_empty() {
            self.pending.clear();
        } else if self.pending.len() > MAX_PARTIAL_BYTES {
            decoded.errors.push(DecodeError::Oversized {
                len: self.pending.len(),
            });
            self.pending.clear();
        }
        decoded
    }

    /// Bytes currently held back waiting for a line terminator.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop any partial line, e.g. when the worker is replaced.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_newline() {
        let line = encode_line(&serde_json::json!({"id": 1})).unwrap();
        assert_eq!(line, b"{\"id\":1}\n");
    }

    #[test]
    fn test_multiple_lines() {
        let decoded = decode(b"{\"id\":1}\n{\"id\":2}\n");
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[1]["id"], 2);
        assert!(decoded.remaining.is_empty());
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_malformed_tail_is_retained() {
        let input = b"{\"id\":1,\"results\":[]}\n{\"id\":2,\"resu";
        let decoded = decode(input);
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0]["id"], 1);
        assert_eq!(decoded.remaining, b"{\"id\":2,\"resu");
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_unterminated_complete_value_is_accepted() {
        let decoded = decode(b"{\"id\":3,\"results\":[]}");
        assert_eq!(decoded.messages.len(), 1);
        assert!(decoded.remaining.is_empty());
    }

    #[test]
    fn test_complete_garbage_line_is_reported_and_dropped() {
        let decoded = decode(b"not json\n{\"id\":4}\n");
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0]["id"], 4);
        assert_eq!(decoded.errors.len(), 1);
        assert!(!decoded.errors[0].is_incomplete());
        assert!(decoded.remaining.is_empty());
    }

    #[test]
    fn test_truncated_complete_line_is_incomplete_class() {
        let decoded = decode(b"{\"id\":\n");
        assert_eq!(decoded.errors.len(), 1);
        assert!(decoded.errors[0].is_incomplete());
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let decoded = decode(b"\r\n{\"id\":1}\r\n\n");
        assert_eq!(decoded.messages.len(), 1);
        assert!(decoded.errors.is_empty());
    }

    #[test]
    fn test_split_at_every_offset_matches_single_write() {
        let msg = serde_json::json!({
            "id": 7,
            "results": [{"type": "function", "text": "foo", "description": "é"}]
        });
        let encoded = encode_line(&msg).unwrap();

        for a in 0..=encoded.len() {
            for b in a..=encoded.len() {
                let mut decoder = LineDecoder::new();
                let mut messages = Vec::new();
                for chunk in [&encoded[..a], &encoded[a..b], &encoded[b..]] {
                    let decoded = decoder.push(chunk);
                    assert!(decoded.errors.is_empty(), "split at {a}/{b}");
                    messages.extend(decoded.messages);
                }
                assert_eq!(messages, vec![msg.clone()], "split at {a}/{b}");
                assert!(decoder.pending().is_empty());
            }
        }
    }

    #[test]
    fn test_decoder_carries_partial_between_pushes() {
        let mut decoder = LineDecoder::new();
        let first = decoder.push(b"{\"id\":2,\"resu");
        assert!(first.messages.is_empty());
        assert_eq!(decoder.pending(), b"{\"id\":2,\"resu");

        let second = decoder.push(b"lts\":[]}\n");
        assert_eq!(second.messages.len(), 1);
        assert_eq!(second.messages[0]["id"], 2);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_scalar_tail_waits_for_terminator() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"42").messages.is_empty());
        assert_eq!(decoder.pending(), b"42");
        let decoded = decoder.push(b"\n");
        assert_eq!(decoded.messages, vec![serde_json::json!(42)]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_large_line_in_small_chunks() {
        let body = "a".repeat(4 * 1024 * 1024);
        let encoded = encode_line(&serde_json::json!({"id": 11, "results": body})).unwrap();

        let mut decoder = LineDecoder::new();
        let mut messages = Vec::new();
        for chunk in encoded.chunks(4096) {
            let decoded = decoder.push(chunk);
            assert!(decoded.errors.is_empty());
            messages.extend(decoded.messages);
        }
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], 11);
        assert_eq!(messages[0]["results"].as_str().map(str::len), Some(body.len()));
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"id\":");
        decoder.reset();
        let decoded = decoder.push(b"{\"id\":9}\n");
        assert_eq!(decoded.messages[0]["id"], 9);
    }

    #[test]
    fn test_oversized_partial_is_discarded() {
        let mut decoder = LineDecoder::new();
        let mut chunk = b"{\"k\":\"".to_vec();
        chunk.resize(MAX_PARTIAL_BYTES + 8, b'a');
        let decoded = decoder.push(&chunk);
        assert!(matches!(
            decoded.errors.as_slice(),
            [DecodeError::Oversized { .. }]
        ));
        assert!(decoder.pending().is_empty());
    }
}
