//! Header-delimited framing for JSON-RPC messages.
//!
//! Each message is `Content-Length: N\r\n` followed by optional further
//! headers, a blank line, and exactly `N` bytes of UTF-8 JSON.

use bytes::{Buf, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum accepted body size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of the header block before the blank line
const MAX_HEADER_SIZE: usize = 4 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Message too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Stream closed mid-message")]
    UnexpectedEof,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// `Content-Length` header codec
#[derive(Clone, Debug)]
pub struct HeaderCodec {
    max_message_size: usize,
}

impl HeaderCodec {
    /// Create a new codec with the specified maximum body size
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Encode a body with its header block
    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>, FramingError> {
        if body.len() > self.max_message_size {
            return Err(FramingError::TooLarge(body.len(), self.max_message_size));
        }

        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        let mut encoded = Vec::with_capacity(header.len() + body.len());
        encoded.extend_from_slice(header.as_bytes());
        encoded.extend_from_slice(body);
        Ok(encoded)
    }

    /// Streaming decoder for partial reads
    /// Returns Some(body) when a complete message is buffered, None if more data needed
    pub fn decode_stream(&self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError> {
        let header_end = match find(buf, HEADER_TERMINATOR) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_HEADER_SIZE {
                    return Err(FramingError::InvalidHeader("header block too large".into()));
                }
                return Ok(None);
            }
        };

        let header = std::str::from_utf8(&buf[..header_end])
            .map_err(|_| FramingError::InvalidHeader("not utf-8".into()))?;
        let len = parse_content_length(header)?;

        if len > self.max_message_size {
            return Err(FramingError::TooLarge(len, self.max_message_size));
        }

        let total = header_end + HEADER_TERMINATOR.len() + len;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(header_end + HEADER_TERMINATOR.len());
        Ok(Some(buf.split_to(len).to_vec()))
    }
}

impl Default for HeaderCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(header: &str) -> Result<usize, FramingError> {
    let mut length = None;
    for line in header.split("\r\n") {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::InvalidHeader(line.to_string()))?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidHeader(line.to_string()))?;
            length = Some(parsed);
        }
    }
    length.ok_or(FramingError::MissingContentLength)
}

/// Read the next body from `reader`, buffering partial data in `buf`.
/// Returns `Ok(None)` on a clean end of stream between messages.
pub async fn read_message<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    codec: &HeaderCodec,
) -> Result<Option<Vec<u8>>, FramingError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(body) = codec.decode_stream(buf)? {
            return Ok(Some(body));
        }
        let read = reader.read_buf(buf).await?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(FramingError::UnexpectedEof);
        }
    }
}
