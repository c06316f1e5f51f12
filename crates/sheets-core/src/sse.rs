//! Incremental decoder for OpenAI-style completion event streams.
//!
//! The upstream API frames its response as server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Network chunks do not respect line boundaries, so [`DeltaDecoder`]
//! buffers the trailing partial line between [`feed`](DeltaDecoder::feed)
//! calls. Splitting happens on raw bytes: `\n` never occurs inside a
//! multi-byte UTF-8 sequence, so a character cut across two chunks is
//! reassembled before decoding.
//!
//! Each byte is scanned once. A partial line longer than
//! [`MAX_LINE_BYTES`] is discarded up to its next newline.

use serde::Deserialize;

/// Payload of the termination event. Produces no output.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest line buffered while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classification of one event-stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// A text delta to forward.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Comments, other fields, empty deltas, and malformed JSON.
    Skip,
}

/// Classify a single line (without its trailing newline).
pub fn parse_line(line: &str) -> SseLine {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data == DONE_SENTINEL {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChunkEvent>(data) {
        Ok(event) => event
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|content| !content.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(_) => SseLine::Skip,
    }
}

/// Stateful line splitter that turns raw chunks into text deltas.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    pending: Vec<u8>,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
    done: bool,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return the deltas completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.is_empty() {
                self.push_line(&String::from_utf8_lossy(head), &mut deltas);
            } else {
                self.pending.extend_from_slice(head);
                let line = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                self.push_line(&line, &mut deltas);
            }
        }

        self.buffer_partial(rest);
        deltas
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&line);
            self.push_line(&line, &mut deltas);
        }
        self.discarding = false;
        deltas
    }

    fn buffer_partial(&mut self, partial: &[u8]) {
        if self.discarding || partial.is_empty() {
            return;
        }
        if self.pending.len() + partial.len() > MAX_LINE_BYTES {
            self.pending = Vec::new();
            self.discarding = true;
            return;
        }
        self.pending.extend_from_slice(partial);
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn push_line(&mut self, line: &str, deltas: &mut Vec<String>) {
        match parse_line(line) {
            SseLine::Delta(text) => deltas.push(text),
            SseLine::Done => self.done = true,
            SseLine::Skip => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseLine::Delta("Hi".into())
        );
        assert_eq!(parse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_line("data: {not json"), SseLine::Skip);
        assert_eq!(parse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_line("event: message"), SseLine::Skip);
        assert_eq!(parse_line(""), SseLine::Skip);
    }

    #[test]
    fn test_role_only_and_empty_deltas_skipped() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        );
        assert_eq!(parse_line(r#"data: {"choices":[]}"#), SseLine::Skip);
    }

    #[test]
    fn test_no_space_after_colon_and_crlf() {
        assert_eq!(
            parse_line("data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r"),
            SseLine::Delta("x".into())
        );
    }

    #[test]
    fn test_concatenation_matches_upstream() {
        let mut body = String::new();
        body.push_str(": OPENROUTER PROCESSING\n\n");
        body.push_str(&event("# Report\n"));
        body.push_str("data: {broken\n\n");
        body.push_str(&event("Line with \"quotes\""));
        body.push_str(&event(" and ünïcödé"));
        body.push_str("data: [DONE]\n\n");

        // Feed in awkward 7-byte slices to cross every boundary.
        let mut decoder = DeltaDecoder::new();
        let mut out = String::new();
        for chunk in body.as_bytes().chunks(7) {
            for delta in decoder.feed(chunk) {
                out.push_str(&delta);
            }
        }
        for delta in decoder.finish() {
            out.push_str(&delta);
        }

        assert_eq!(out, "# Report\nLine with \"quotes\" and ünïcödé");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_delta_boundaries_preserved() {
        let body = format!("{}{}", event("a"), event("b"));
        let mut decoder = DeltaDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()), vec!["a", "b"]);
    }

    #[test]
    fn test_oversized_line_discarded() {
        let mut decoder = DeltaDecoder::new();
        let filler = vec![b'x'; 64 * 1024];
        for _ in 0..(MAX_LINE_BYTES / filler.len() + 2) {
            assert!(decoder.feed(&filler).is_empty());
            assert!(decoder.pending.len() <= MAX_LINE_BYTES);
        }
        assert!(decoder.pending.is_empty());

        let tail = format!("xxx\n{}", event("after"));
        assert_eq!(decoder.feed(tail.as_bytes()), vec!["after"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_line_split_across_many_chunks() {
        let body = event("one byte at a time");
        let mut decoder = DeltaDecoder::new();
        let mut out = Vec::new();
        for b in body.as_bytes() {
            out.extend(decoder.feed(std::slice::from_ref(b)));
        }
        assert_eq!(out, vec!["one byte at a time"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = DeltaDecoder::new();
        let body = event("tail");
        let trimmed = body.trim_end_matches('\n');
        assert!(decoder.feed(trimmed.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }
}
