//! Resumable HTTP/1.1 response parser.
//!
//! One parser per connection, fed whatever bytes the transport read and
//! re-parsed until a full message is available. Supports Content-Length
//! bodies, chunked transfer decoding, and header-only messages. Reset after
//! each completed response.

use bytes::{Buf, Bytes, BytesMut};

use crate::response::Response;

/// Outcome of a [`ResponseParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseStatus {
    /// More bytes are needed.
    Incomplete,
    /// A full response is available via `take_response`.
    Done,
}

pub(crate) struct ResponseParser {
    buf: BytesMut,
    response: Option<Response>,
}

impl ResponseParser {
    pub(crate) fn new() -> Self {
        ResponseParser {
            buf: BytesMut::with_capacity(4096),
            response: None,
        }
    }

    /// Append received bytes.
    pub(crate) fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempt to parse a complete response from the accumulated bytes.
    pub(crate) fn parse(&mut self) -> ParseStatus {
        if self.response.is_some() {
            return ParseStatus::Done;
        }

        let Some(header_end) = find_header_end(&self.buf) else {
            return ParseStatus::Incomplete;
        };
        let Some(head) = parse_head(&self.buf[..header_end]) else {
            // Malformed status line or headers; wait for reset.
            return ParseStatus::Incomplete;
        };

        let body_start = header_end + 4;
        let body = if let Some(len) = head.content_length {
            if self.buf.len() < body_start + len {
                return ParseStatus::Incomplete;
            }
            let mut body = self.buf.split_to(body_start + len);
            body.advance(body_start);
            body.freeze()
        } else if head.chunked {
            match decode_chunked(&self.buf[body_start..]) {
                Some((decoded, consumed)) => {
                    self.buf.advance(body_start + consumed);
                    decoded
                }
                None => return ParseStatus::Incomplete,
            }
        } else {
            // Neither framing header: complete with an empty body (204/304
            // style). Read-until-close bodies conflict with reuse.
            self.buf.advance(body_start);
            Bytes::new()
        };

        self.response = Some(Response::new(head.status, head.headers, body));
        ParseStatus::Done
    }

    /// Take the parsed response, leaving the parser Done-empty.
    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Discard all state, ready for the next response.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.response = None;
    }
}

/// Find the position of `\r\n\r\n`, returning the index of the first `\r`.
fn find_header_end(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(3)).find(|&i| {
        data[i] == b'\r' && data[i + 1] == b'\n' && data[i + 2] == b'\r' && data[i + 3] == b'\n'
    })
}

struct Head {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<usize>,
    chunked: bool,
}

/// Parse the status line and headers (everything before `\r\n\r\n`).
fn parse_head(data: &[u8]) -> Option<Head> {
    let text = std::str::from_utf8(data).ok()?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next()?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next()?;
    let status: u16 = parts.next()?.parse().ok()?;

    let mut headers = Vec::new();
    let mut content_length = None;
    let mut chunked = false;

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_string();
            let value = value.trim().to_string();

            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            }
            if name.eq_ignore_ascii_case("transfer-encoding")
                && value.eq_ignore_ascii_case("chunked")
            {
                chunked = true;
            }

            headers.push((name, value));
        }
    }

    Some(Head {
        status,
        headers,
        content_length,
        chunked,
    })
}

/// Decode a complete chunked body. Returns the decoded bytes and the number
/// of input bytes consumed, or None if the terminal chunk has not arrived.
fn decode_chunked(data: &[u8]) -> Option<(Bytes, usize)> {
    let mut decoded = BytesMut::new();
    let mut pos = 0;

    loop {
        let crlf = find_crlf(&data[pos..])?;
        let size_str = std::str::from_utf8(&data[pos..pos + crlf]).ok()?;
        // Strip chunk extensions (;key=value).
        let size_hex = size_str.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;

        if size == 0 {
            // Last chunk: size line + trailing \r\n.
            let end = pos + crlf + 2;
            if data.len() < end + 2 {
                return None;
            }
            return Some((decoded.freeze(), end + 2));
        }

        let chunk_start = pos + crlf + 2;
        let chunk_end = chunk_start + size;
        if data.len() < chunk_end + 2 {
            return None;
        }
        decoded.extend_from_slice(&data[chunk_start..chunk_end]);
        pos = chunk_end + 2;
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}
