//! Server-Sent-Events framing.
//!
//! Bytes arrive in arbitrary chunks. `Utf8Decoder` turns them into text without
//! splitting multi-byte characters, `FrameSplitter` cuts the text into complete
//! frames on the blank-line delimiter, and `parse_event` pulls the `event:` and
//! `data:` fields out of one frame.

use crate::errors::StreamError;

/// Blank-line delimiter between two SSE frames.
pub const FRAME_DELIMITER: &str = "\n\n";

/// One parsed SSE event.
///
/// `name` is empty when the frame carried no `event:` line; some producers
/// rely on a JSON `type` field inside `data` instead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub name: String,
    pub data: String,
}

impl Event {
    /// Creates an event from its name and data payload.
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Splits `previous_remainder + chunk` into complete frames.
///
/// Returns the complete frames in arrival order (possibly none) and the text
/// after the last delimiter, which must be passed back in with the next chunk.
pub fn split_frames(previous_remainder: &str, chunk: &str) -> (Vec<String>, String) {
    let mut buffer = String::with_capacity(previous_remainder.len() + chunk.len());
    buffer.push_str(previous_remainder);
    buffer.push_str(chunk);

    let mut frames = Vec::new();
    let mut rest = buffer.as_str();
    while let Some((idx, delim_len)) = find_frame_delimiter(rest) {
        frames.push(rest[..idx].to_string());
        rest = &rest[idx + delim_len..];
    }
    (frames, rest.to_string())
}

fn find_frame_delimiter(text: &str) -> Option<(usize, usize)> {
    let lf = text.find("\n\n");
    let crlf = text.find("\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

/// Incremental form of [`split_frames`].
///
/// Keeps one buffer, drains complete frames in place and only rescans the
/// tail that may still complete a delimiter.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    remainder: String,
    scanned: usize,
}

impl FrameSplitter {
    /// Appends a decoded chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }
        // A delimiter may straddle the old tail and the new chunk.
        let mut start = self.scanned.saturating_sub(3);
        while !self.remainder.is_char_boundary(start) {
            start -= 1;
        }
        self.remainder.push_str(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.remainder[start..]) {
            let end = start + idx;
            frames.push(self.remainder[consumed..end].to_string());
            consumed = end + delim_len;
            start = consumed;
        }
        self.remainder.drain(..consumed);
        self.scanned = self.remainder.len();
        frames
    }

    /// Unconsumed text waiting for a delimiter.
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// Force-flushes the remainder at end of stream.
    ///
    /// A trailing event without its blank line is still returned as a frame.
    pub fn finish(&mut self) -> Vec<String> {
        if self.remainder.trim().is_empty() {
            self.remainder.clear();
            self.scanned = 0;
            return Vec::new();
        }
        let frames = self.push(FRAME_DELIMITER);
        self.remainder.clear();
        self.scanned = 0;
        frames
    }
}

/// Extracts the event name and data payload from one frame.
///
/// Returns `None` when the frame carries no data. Lines other than `event:`
/// and `data:` (comments, `id:`, `retry:`) are ignored. Both `data:X` and
/// `data: X` yield `X`; only one leading space is stripped so payload
/// whitespace survives.
pub fn parse_event(frame: &str) -> Option<Event> {
    let mut name = String::new();
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in frame.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if let Some(rest) = line.strip_prefix("event:") {
            name = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    let data = data_lines.join("\n");
    if data.is_empty() {
        return None;
    }
    Some(Event { name, data })
}

/// Encodes one outgoing frame, one `data:` line per payload line.
pub fn encode_frame(event: Option<&str>, payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 16);
    if let Some(name) = event.filter(|n| !n.is_empty()) {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in payload.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Incremental UTF-8 decoder for a chunked byte stream.
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decodes as much of `bytes` (plus held-back bytes) as forms whole characters.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, StreamError> {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_owned();
                self.pending.clear();
                Ok(text)
            }
            Err(err) if err.error_len().is_some() => Err(StreamError::decode(format!(
                "invalid UTF-8 sequence at byte {}",
                err.valid_up_to()
            ))),
            Err(err) => {
                let valid = err.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                Ok(text)
            }
        }
    }

    /// Fails if the stream ended in the middle of a character.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let held = self.pending.len();
        self.pending.clear();
        Err(StreamError::decode(format!(
            "stream ended inside a multi-byte sequence ({held} bytes pending)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_incomplete_tail_as_remainder() {
        let (frames, rest) = split_frames("", "data: a\n\ndata: b\n\ndata: c");
        assert_eq!(frames, vec!["data: a", "data: b"]);
        assert_eq!(rest, "data: c");

        let (frames, rest) = split_frames(&rest, "\n\n");
        assert_eq!(frames, vec!["data: c"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn split_handles_crlf_delimiters() {
        let (frames, rest) = split_frames("", "data: a\r\n\r\ndata: b\n\n");
        assert_eq!(frames, vec!["data: a", "data: b"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn delimiter_split_across_chunks_is_found() {
        let mut splitter = FrameSplitter::default();
        assert!(splitter.push("data: x\n").is_empty());
        assert_eq!(splitter.push("\ndata: y"), vec!["data: x"]);
        assert_eq!(splitter.remainder(), "data: y");
    }

    #[test]
    fn long_frame_in_small_chunks_matches_split_frames() {
        let payload = "é".repeat(2_000);
        let stream = format!("data: {payload}\r\n\r\ndata: next\n\ndata: tail");
        let (expected, rest) = split_frames("", &stream);

        let mut splitter = FrameSplitter::default();
        let mut frames = Vec::new();
        let chars: Vec<char> = stream.chars().collect();
        for piece in chars.chunks(3) {
            frames.extend(splitter.push(&piece.iter().collect::<String>()));
        }
        assert_eq!(frames, expected);
        assert_eq!(splitter.remainder(), rest);
    }

    #[test]
    fn finish_flushes_trailing_frame_without_blank_line() {
        let mut splitter = FrameSplitter::default();
        assert!(splitter.push("data: {\"delta\":\"x\"}").is_empty());
        assert_eq!(splitter.finish(), vec!["data: {\"delta\":\"x\"}"]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn finish_ignores_whitespace_remainder() {
        let mut splitter = FrameSplitter::default();
        assert_eq!(splitter.push("data: a\n\n\n"), vec!["data: a"]);
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn data_prefix_with_and_without_space_yields_same_payload() {
        let spaced = parse_event("data: X").expect("event");
        let tight = parse_event("data:X").expect("event");
        assert_eq!(spaced.data, "X");
        assert_eq!(spaced, tight);
    }

    #[test]
    fn only_one_leading_space_is_stripped() {
        let event = parse_event("data:  indented").expect("event");
        assert_eq!(event.data, " indented");
    }

    #[test]
    fn parse_reads_event_name_and_ignores_other_fields() {
        let frame = ": keep-alive\nid: 7\nretry: 100\nevent: first\nevent:  response.output_text.delta \ndata: {\"delta\":\"hi\"}\r";
        let event = parse_event(frame).expect("event");
        assert_eq!(event.name, "response.output_text.delta");
        assert_eq!(event.data, "{\"delta\":\"hi\"}");
    }

    #[test]
    fn multiple_data_lines_are_joined_in_order() {
        let event = parse_event("data: one\ndata: two").expect("event");
        assert_eq!(event.data, "one\ntwo");
        assert!(event.name.is_empty());
    }

    #[test]
    fn frame_without_data_is_dropped() {
        assert_eq!(parse_event("event: ping"), None);
        assert_eq!(parse_event("data:"), None);
        assert_eq!(parse_event(""), None);
    }

    #[test]
    fn encoded_frame_parses_back() {
        let frame = encode_frame(Some("text"), "{\"text\":\"a b\"}");
        let (frames, rest) = split_frames("", &frame);
        assert!(rest.is_empty());
        let event = parse_event(&frames[0]).expect("event");
        assert_eq!(event, Event::new("text", "{\"text\":\"a b\"}"));
    }

    #[test]
    fn decoder_holds_back_split_multibyte_character() {
        let bytes = "réponse".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let first = decoder.decode(&bytes[..2]).expect("first");
        let second = decoder.decode(&bytes[2..]).expect("second");
        assert_eq!(first, "r");
        assert_eq!(format!("{first}{second}"), "réponse");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn decoder_rejects_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let err = decoder.decode(&[b'a', 0xFF, b'b']).expect_err("invalid");
        assert!(matches!(err, StreamError::Decode { .. }));
    }

    #[test]
    fn decoder_reports_truncated_character_at_end() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "é".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]).expect("partial"), "");
        assert!(matches!(decoder.finish(), Err(StreamError::Decode { .. })));
    }

    #[test]
    fn frames_are_identical_for_every_chunk_boundary() {
        let stream = "event: text\ndata: {\"text\":\"Ça va\"}\r\n\r\ndata:plain\n\ndata: tail";
        let bytes = stream.as_bytes();

        let collect = |cut: usize| {
            let mut decoder = Utf8Decoder::default();
            let mut splitter = FrameSplitter::default();
            let mut frames = Vec::new();
            for part in [&bytes[..cut], &bytes[cut..]] {
                let text = decoder.decode(part).expect("decode");
                frames.extend(splitter.push(&text));
            }
            decoder.finish().expect("finish");
            frames.extend(splitter.finish());
            frames
        };

        let expected = collect(0);
        assert_eq!(expected.len(), 3);
        for cut in 1..=bytes.len() {
            assert_eq!(collect(cut), expected, "cut at byte {cut}");
        }
    }
}
