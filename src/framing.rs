//! Tolerant line-delimited JSON-RPC framing, shared by the upstream stdio
//! channel and every downstream child's stdout. Real MCP servers interleave
//! log lines, stack traces, and pretty-printed multi-line JSON into a stream
//! that is nominally one-frame-per-line; this buffer copes with all three.

/// Lines folded into an in-progress multi-line frame are capped so a child
/// that never closes its braces can't grow the buffer without bound.
const MAX_PARTIAL_FRAME_BYTES: usize = 1_048_576;

/// Leading substrings that mark a line as diagnostic noise rather than a
/// JSON-RPC frame, independent of whether it happens to parse as JSON.
const NON_FRAME_PREFIXES: &[&str] = &[
    "[ERROR]", "[WARN]", "[INFO]", "[DEBUG]", "Error:", "Warning:", "<!DOCTYPE", "<html",
];

pub fn looks_like_non_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    NON_FRAME_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Accumulates decoded text and yields complete candidate frame strings.
/// A candidate is either a single `\n`-terminated line, or several lines
/// folded together once their unescaped brace/bracket nesting returns to
/// zero. Candidates are handed to the caller for JSON parsing and
/// frame-acceptance checks; this type makes no claim about JSON validity.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
    partial: Option<String>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if line.trim().is_empty() && self.partial.is_none() {
                continue;
            }
            let candidate = match self.partial.take() {
                Some(prefix) => format!("{prefix}\n{line}"),
                None => line,
            };
            if is_balanced(&candidate) {
                out.push(candidate);
            } else if candidate.len() > MAX_PARTIAL_FRAME_BYTES {
                tracing::warn!(bytes = candidate.len(), "discarding oversized unbalanced frame");
                self.partial = None;
            } else {
                self.partial = Some(candidate);
            }
        }
        out
    }
}

/// True if braces/brackets outside quoted strings balance to zero. A plain
/// text line with no braces at all balances trivially and is returned as a
/// single-line candidate for the caller's JSON-parse gate to reject.
fn is_balanced(s: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for c in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth == 0 && !in_string
}
