//! Newline-delimited JSON frame codec
//!
//! [`FrameCodec`] implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`] so that any duplex byte stream can be
//! wrapped with `FramedRead` / `FramedWrite` and consumed as a stream of
//! [`Message`] values.
//!
//! # Wire Format
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}\n
//! {"jsonrpc":"2.0","id":1,"result":{"tools":[...]}}\n
//! ```
//!
//! Decoding keeps an internal carry-over buffer (the `BytesMut` owned by the
//! framed reader). Every complete line is trimmed; blank lines are skipped
//! and lines that fail to parse are logged and dropped without ending the
//! stream. A line that is valid JSON with an integer `id` but not a valid
//! message is surfaced as [`Frame::Invalid`] so the receiver can answer it
//! with `-32600`. A line longer than the maximum frame length is dropped
//! without being buffered whole. Bytes left without a terminating newline
//! when the stream ends are discarded.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::QuerywireError;
use crate::mcp::types::Message;

/// Frame delimiter.
const DELIMITER: u8 = b'\n';

/// Longest line accepted by default, delimiter excluded.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// One decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed request, response or notification.
    Message(Message),
    /// A request-shaped object whose `id` could be read but whose body is
    /// not a valid message.
    Invalid { id: u64, reason: String },
}

impl Frame {
    /// The message, if this frame carried a valid one.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Frame::Message(message) => Some(message),
            Frame::Invalid { .. } => None,
        }
    }
}

/// The `id` of a malformed frame that deserves an answer: an object with an
/// unsigned integer `id` and no `result` or `error` key.
fn answerable_id(value: &Value) -> Option<u64> {
    let object = value.as_object()?;
    if object.contains_key("result") || object.contains_key("error") {
        return None;
    }
    object.get("id")?.as_u64()
}

/// Newline-delimited JSON-RPC frame codec.
///
/// One instance per connection direction; decode state is never shared.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::Decoder;
/// use querywire::mcp::codec::FrameCodec;
///
/// let mut codec = FrameCodec::new();
/// let mut buf = BytesMut::from(&b"{\"id\":1,\"method\":\"ping\"}\n{\"id\":2"[..]);
/// let first = codec.decode(&mut buf).unwrap();
/// assert!(first.and_then(|f| f.into_message()).is_some());
/// // The second frame is incomplete and stays buffered.
/// assert!(codec.decode(&mut buf).unwrap().is_none());
/// assert_eq!(&buf[..], b"{\"id\":2");
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Offset into the buffer already scanned for a delimiter, so a large
    /// partial frame is not rescanned on every chunk.
    next_index: usize,
    /// Count of frames dropped because they failed to parse or were too long.
    dropped: u64,
    max_frame_length: usize,
    /// Skipping the rest of an oversized line up to its delimiter.
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    /// Create a codec with the default maximum frame length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that drops lines longer than `max_frame_length` bytes.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            next_index: 0,
            dropped: 0,
            max_frame_length,
            discarding: false,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Number of malformed frames this codec has dropped.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<Frame> {
        let text = match std::str::from_utf8(line) {
            Ok(t) => t.trim(),
            Err(e) => {
                self.record_drop(&format!("invalid UTF-8: {e}"));
                return None;
            }
        };

        if text.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                self.record_drop(&e.to_string());
                return None;
            }
        };

        let id = answerable_id(&value);
        match Message::from_value(value) {
            Ok(message) => Some(Frame::Message(message)),
            Err(e) => {
                let reason = e.to_string();
                self.record_drop(&reason);
                id.map(|id| Frame::Invalid { id, reason })
            }
        }
    }

    fn record_oversized(&mut self) {
        let limit = self.max_frame_length;
        self.record_drop(&format!("frame exceeds {limit} bytes"));
    }

    fn record_drop(&mut self, reason: &str) {
        self.dropped += 1;
        metrics::increment_counter!("querywire_frames_dropped_total");
        tracing::warn!("dropping malformed frame: {reason}");
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = QuerywireError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, QuerywireError> {
        loop {
            let scan_from = self.next_index.min(buf.len());
            let newline = buf[scan_from..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| scan_from + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    buf.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    let mut line = buf.split_to(end + 1);
                    line.truncate(end);

                    if end > self.max_frame_length {
                        self.record_oversized();
                        continue;
                    }
                    if let Some(frame) = self.parse_line(&line) {
                        return Ok(Some(frame));
                    }
                }
                (false, None) if buf.len() > self.max_frame_length => {
                    self.record_oversized();
                    buf.clear();
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, QuerywireError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.has_remaining() {
            tracing::debug!(
                "discarding {} unterminated bytes at end of stream",
                buf.remaining()
            );
            buf.clear();
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = QuerywireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), QuerywireError> {
        let mut writer = dst.writer();
        serde_json::to_writer(&mut writer, &item)?;
        writer.into_inner().put_u8(DELIMITER);
        Ok(())
    }
}
