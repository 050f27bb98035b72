//! Function Call Detector
//!
//! A stateful pipeline consumer that recognizes a tool-invocation request
//! embedded inline in the token stream. The backend marks the request with
//! a literal sentinel, `function_call` followed by a colon, preceding a JSON
//! object; both the sentinel and the payload may be split across any number
//! of fragment deliveries, so reconstruction must be independent of the
//! split points.
//!
//! On normal stream completion the accumulated buffer is closed best-effort
//! and parsed. The closure heuristic is deliberately narrow: a dangling
//! trailing `:` gets an empty-object literal, and unmatched top-level braces
//! are closed. It handles the single-level truncation the wire actually
//! produces and nothing more; it is not a general JSON repairer. A payload
//! that still fails to parse is logged and treated as plain answer text.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chat::FunctionCall;
use crate::streaming::pipeline::StreamConsumer;

/// Literal marker preceding an embedded tool-invocation payload
pub const FUNCTION_CALL_SENTINEL: &str = "function_call";

/// Detector states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DetectorState {
    /// Nothing buffered; watching for the sentinel
    Idle,
    /// Sentinel prefix seen; buffering every fragment until completion
    Accumulating,
    /// Stream provably does not start with the sentinel; ignore the rest
    Discarded,
}

/// Recognizes and parses an embedded tool-call payload in the fragment stream
///
/// Emits at most one [`FunctionCall`] per stream on the detection channel,
/// at stream completion.
pub struct FunctionCallDetector {
    state: DetectorState,
    buffer: String,
    detected: mpsc::UnboundedSender<FunctionCall>,
}

impl FunctionCallDetector {
    /// Create a detector that reports detections on `detected`
    #[must_use]
    pub fn new(detected: mpsc::UnboundedSender<FunctionCall>) -> Self {
        Self {
            state: DetectorState::Idle,
            buffer: String::new(),
            detected,
        }
    }

    /// Reset to the stream-start state
    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.buffer.clear();
    }

    /// Consume one fragment
    fn feed(&mut self, fragment: &str) {
        match self.state {
            DetectorState::Discarded => {}
            DetectorState::Idle => {
                if fragment.is_empty() {
                    return;
                }
                if sentinel_prefix_compatible(fragment) {
                    self.buffer.push_str(fragment);
                    self.state = DetectorState::Accumulating;
                } else {
                    // Ordinary answer text; other consumers already got it
                    self.state = DetectorState::Discarded;
                }
            }
            DetectorState::Accumulating => {
                self.buffer.push_str(fragment);
                if self.buffer.len() >= FUNCTION_CALL_SENTINEL.len()
                    && !self.buffer.starts_with(FUNCTION_CALL_SENTINEL)
                {
                    self.buffer.clear();
                    self.state = DetectorState::Discarded;
                }
            }
        }
    }

    /// Finalize at stream completion; returns the parsed call, if any
    fn finish(&mut self) -> Option<FunctionCall> {
        let buffer = std::mem::take(&mut self.buffer);
        self.state = DetectorState::Idle;

        if !buffer.starts_with(FUNCTION_CALL_SENTINEL) {
            return None;
        }
        let rest = buffer[FUNCTION_CALL_SENTINEL.len()..].trim_start();
        let rest = rest.strip_prefix(':')?;
        let start = rest.find('{')?;

        let mut payload = rest[start..].trim_end().to_string();
        // Drop trailing garbage after the object actually closes
        if let Some(end) = object_end(&payload) {
            payload.truncate(end);
        }
        // Best-effort closure: dangling `:` gets an empty object, then
        // unmatched top-level braces are closed
        if payload.ends_with(':') {
            payload.push_str(" {}");
        }
        for _ in 0..unmatched_open_braces(&payload) {
            payload.push('}');
        }

        match serde_json::from_str::<FunctionCall>(&payload) {
            Ok(call) => {
                tracing::debug!(name = %call.name, id = %call.id, "embedded function call detected");
                Some(call)
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedded function call payload did not parse; treating turn as plain text");
                None
            }
        }
    }
}

#[async_trait]
impl StreamConsumer for FunctionCallDetector {
    async fn on_fragment(&mut self, fragment: &str) {
        self.feed(fragment);
    }

    async fn on_complete(&mut self) {
        if let Some(call) = self.finish() {
            // Receiver gone means the send job already finished; the call
            // is dropped along with the turn
            let _ = self.detected.send(call);
        }
    }

    async fn on_error(&mut self, _error: &str) {
        self.reset();
    }
}

/// Whether `s` could still be the start of a sentinel-prefixed stream
fn sentinel_prefix_compatible(s: &str) -> bool {
    if s.len() >= FUNCTION_CALL_SENTINEL.len() {
        s.starts_with(FUNCTION_CALL_SENTINEL)
    } else {
        FUNCTION_CALL_SENTINEL.starts_with(s)
    }
}

/// Index just past the close of the first top-level JSON object, if it closes
///
/// Brace counting is string-aware: braces inside string literals (including
/// escaped quotes) do not count.
fn object_end(json: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in json.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Count of unmatched `{`, ignoring braces inside string literals
fn unmatched_open_braces(json: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for c in json.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAYLOAD: &str =
        r#"function_call: {"id":"1","name":"fs.read","arguments":{"path":"a.txt"}}"#;

    fn detector() -> (FunctionCallDetector, mpsc::UnboundedReceiver<FunctionCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FunctionCallDetector::new(tx), rx)
    }

    fn run(fragments: &[&str]) -> Option<FunctionCall> {
        let (mut det, _rx) = detector();
        for f in fragments {
            det.feed(f);
        }
        det.finish()
    }

    #[test]
    fn test_plain_text_is_discarded() {
        assert_eq!(run(&["Sure", ",", " here: ", "file.txt"]), None);
    }

    #[test]
    fn test_single_fragment_call() {
        let call = run(&[PAYLOAD]).unwrap();
        assert_eq!(call.id, "1");
        assert_eq!(call.name, "fs.read");
        assert_eq!(
            call.arguments.get("path"),
            Some(&serde_json::Value::String("a.txt".into()))
        );
    }

    #[test]
    fn test_split_across_five_fragments() {
        let call = run(&[
            "function",
            "_call: {\"id\":\"1\",",
            "\"name\":\"fs.read\",",
            "\"arguments\":{\"path\":",
            "\"a.txt\"}}",
        ])
        .unwrap();
        assert_eq!(call.name, "fs.read");
        assert_eq!(call.id, "1");
    }

    #[test]
    fn test_token_boundary_invariance() {
        // Every split position over the full payload parses identically
        let reference = run(&[PAYLOAD]).unwrap();
        for split in 1..PAYLOAD.len() {
            if !PAYLOAD.is_char_boundary(split) {
                continue;
            }
            let (a, b) = PAYLOAD.split_at(split);
            let call = run(&[a, b]).unwrap_or_else(|| panic!("split at {split} lost the call"));
            assert_eq!(call, reference);
        }
    }

    #[test]
    fn test_per_character_delivery() {
        let fragments: Vec<String> = PAYLOAD.chars().map(String::from).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        let call = run(&refs).unwrap();
        assert_eq!(call.name, "fs.read");
    }

    #[test]
    fn test_missing_closing_brace_is_repaired() {
        let call = run(&[r#"function_call: {"id":"1","name":"fs.read","arguments":{"path":"a.txt"}"#])
            .unwrap();
        assert_eq!(call.name, "fs.read");
    }

    #[test]
    fn test_dangling_colon_gets_empty_arguments() {
        let call = run(&[r#"function_call: {"id":"1","name":"time.now","arguments":"#]).unwrap();
        assert_eq!(call.name, "time.now");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_repair() {
        let call = run(&[
            r#"function_call: {"id":"1","name":"fs.write","arguments":{"text":"fn main() {}"}"#,
        ])
        .unwrap();
        assert_eq!(
            call.arguments.get("text"),
            Some(&serde_json::Value::String("fn main() {}".into()))
        );
    }

    #[test]
    fn test_unparseable_payload_is_no_call() {
        assert_eq!(run(&["function_call: {not json at all"]), None);
    }

    #[test]
    fn test_sentinel_without_colon_is_no_call() {
        assert_eq!(run(&["function_call {\"name\":\"fs.read\"}"]), None);
    }

    #[test]
    fn test_ordinary_text_starting_like_sentinel() {
        // Looks like the sentinel early on, then diverges
        assert_eq!(run(&["function", "s are fun"]), None);
    }

    #[test]
    fn test_error_resets_state() {
        let (mut det, mut rx) = detector();
        det.feed("function_call: {\"name\":");
        det.reset();
        assert_eq!(det.finish(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emits_exactly_once_on_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut det = FunctionCallDetector::new(tx);
        det.feed(PAYLOAD);
        if let Some(call) = det.finish() {
            det.detected.send(call).unwrap();
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scanner_helpers() {
        assert_eq!(object_end(r#"{"a":1} trailing"#), Some(7));
        assert_eq!(object_end(r#"{"a":"{"}"#), Some(9));
        assert_eq!(object_end(r#"{"a":1"#), None);
        assert_eq!(unmatched_open_braces(r#"{"a":{"#), 2);
        assert_eq!(unmatched_open_braces(r#"{"a":"}"}"#), 0);
        assert_eq!(unmatched_open_braces(r#"{"a":"\"{"}"#), 0);
    }
}
