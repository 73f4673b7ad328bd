//! Byte-stream framing decoder.
//!
//! Clients speak one of two delimiting conventions over the same port:
//! header framing (`Content-Length: <n>` header block, blank line, exactly
//! `<n>` body bytes) or line framing (one JSON document per
//! newline-terminated line). The decoder consumes an append-only byte
//! buffer and yields complete JSON messages, resuming incrementally as
//! bytes arrive. Bytes belonging to extracted messages are consumed
//! exactly once and never re-examined.

use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, warn};

/// Bytes an unterminated line may accumulate before the whole buffer is
/// discarded.
pub const LINE_OVERFLOW_LIMIT: usize = 10_000;

const HEADER_TOKEN: &[u8] = b"Content-Length:";

/// The framing convention a connection has committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    Line,
    Header,
}

/// Framing progress for one connection. The states are mutually exclusive
/// and exhaustive; transitions happen only when a header block is parsed
/// (to `BodyAccumulation`) or a body is sliced off (back to `HeaderSearch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// No pending body length; the next bytes start a header block or a line.
    HeaderSearch,
    /// A header was parsed; this many body bytes are awaited.
    BodyAccumulation(usize),
}

/// Unrecoverable decode fault. Sessions close the connection on this
/// instead of letting the stream wedge with unconsumable bytes.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Content-Length header block without a parsable length")]
    MalformedHeader,
}

/// Incremental dual-mode framing decoder, one per connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: FrameState,
    committed: Option<WireMode>,
}

impl Default for FrameState {
    fn default() -> Self {
        Self::HeaderSearch
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes. Decoding happens in `next_message`.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The mode committed by the first complete frame, if any arrived yet.
    pub fn wire_mode(&self) -> Option<WireMode> {
        self.committed
    }

    /// Extract the next complete JSON message, consuming exactly its bytes.
    ///
    /// `Ok(None)` means no further progress is possible on the current
    /// buffer contents; call again after `extend`. Unparsable lines and
    /// bodies are dropped and decoding continues with whatever is already
    /// buffered.
    pub fn next_message(&mut self) -> Result<Option<Value>, FrameError> {
        loop {
            match self.state {
                FrameState::BodyAccumulation(expected) => {
                    if self.buf.len() < expected {
                        return Ok(None);
                    }
                    let body = self.buf.split_to(expected);
                    self.state = FrameState::HeaderSearch;
                    match serde_json::from_slice(&body) {
                        Ok(value) => {
                            self.committed.get_or_insert(WireMode::Header);
                            return Ok(Some(value));
                        }
                        Err(e) => {
                            // Unparsable body: dropped without a response,
                            // pipelined frames behind it still decode.
                            warn!("dropping unparsable framed body: {e}");
                            continue;
                        }
                    }
                }
                FrameState::HeaderSearch => {
                    if self.buf.starts_with(HEADER_TOKEN) {
                        let Some(block_len) = find_header_end(&self.buf) else {
                            // Header block still incomplete.
                            return Ok(None);
                        };
                        let header = self.buf.split_to(block_len);
                        match parse_content_length(&header) {
                            Some(expected) => {
                                self.state = FrameState::BodyAccumulation(expected);
                                continue;
                            }
                            // The token was present but no length parses:
                            // fail closed rather than wedge the stream.
                            None => return Err(FrameError::MalformedHeader),
                        }
                    }

                    // Line framing.
                    let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                        if self.buf.len() > LINE_OVERFLOW_LIMIT {
                            // Accepted data loss: an unterminated line past
                            // the limit discards everything buffered.
                            warn!(
                                "discarding {} unterminated buffered bytes",
                                self.buf.len()
                            );
                            self.buf.clear();
                        }
                        return Ok(None);
                    };
                    let line = self.buf.split_to(pos + 1);
                    let line = trim_line_terminator(&line);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_slice(line) {
                        Ok(value) => {
                            self.committed.get_or_insert(WireMode::Line);
                            return Ok(Some(value));
                        }
                        Err(e) => {
                            // Unparsable line: dropped, connection stays open.
                            debug!("dropping unparsable line: {e}");
                            continue;
                        }
                    }
                }
            }
        }
    }
}

/// Frame one serialized message for the wire in the given mode.
pub fn encode_frame(json: &str, mode: WireMode) -> String {
    match mode {
        WireMode::Line => format!("{json}\n"),
        WireMode::Header => format!("Content-Length: {}\r\n\r\n{json}", json.len()),
    }
}

/// Length of the header block including its blank-line terminator:
/// `\r\n\r\n`, with `\n\n` accepted as well. Whichever terminator ends
/// first wins, so a pipelined body cannot be swallowed into the block.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    let crlf = find(buf, b"\r\n\r\n").map(|pos| pos + 4);
    let lf = find(buf, b"\n\n").map(|pos| pos + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Parse the decimal length from a case-insensitive `Content-Length:` field
/// anywhere in the header block. The first field with a parsable value wins.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.lines().find_map(|line| {
        let line = line.trim();
        let prefix = line.get(..HEADER_TOKEN.len())?;
        if !prefix.eq_ignore_ascii_case("Content-Length:") {
            return None;
        }
        line[HEADER_TOKEN.len()..].trim().parse().ok()
    })
}

fn trim_line_terminator(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
