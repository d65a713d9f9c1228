//! Minimal HTTP/1.1 framing for talking to the runtime over a Unix socket.

use crate::error::{Error, Result};

/// A parsed HTTP response.
#[derive(Debug)]
pub(crate) struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Encode a request. Every request closes the connection afterwards.
pub(crate) fn encode_request(method: &str, path: &str, body: Option<&[u8]>, upgrade: bool) -> Vec<u8> {
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
    if upgrade {
        head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
    } else {
        head.push_str("Connection: close\r\n");
    }
    if let Some(b) = body {
        head.push_str("Content-Type: application/json\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", b.len()));
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    if let Some(b) = body {
        out.extend_from_slice(b);
    }
    out
}

/// Position just past the `\r\n\r\n` that ends the header block.
pub(crate) fn header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Status code and lower-cased headers of a header block.
pub(crate) fn parse_head(head: &[u8]) -> Result<(u16, Vec<(String, String)>)> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::Protocol(format!("bad status line {status_line:?}")))?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    Ok((status, headers))
}

/// Parse a complete response read until the peer closed the connection.
pub(crate) fn parse_response(raw: &[u8]) -> Result<Response> {
    let end = header_end(raw).ok_or_else(|| Error::Protocol("truncated headers".to_string()))?;
    let (status, headers) = parse_head(&raw[..end])?;
    let rest = &raw[end..];

    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.eq_ignore_ascii_case("chunked"));
    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok());

    let body = if chunked {
        decode_chunked(rest)?
    } else if let Some(len) = length {
        rest.get(..len)
            .ok_or_else(|| Error::Protocol("body shorter than Content-Length".to_string()))?
            .to_vec()
    } else {
        rest.to_vec()
    };

    Ok(Response { status, body })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::Protocol("truncated chunk size".to_string()))?;
        let size_field = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_field.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::Protocol(format!("bad chunk size {size_hex:?}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        let chunk = data
            .get(..size)
            .ok_or_else(|| Error::Protocol("truncated chunk".to_string()))?;
        out.extend_from_slice(chunk);
        data = data.get(size + 2..).unwrap_or_default();
    }
}

/// Stream a multiplexed attach frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

/// Split the next frame off a multiplexed attach stream.
///
/// Frames are an 8-byte header (stream type, three padding bytes,
/// big-endian payload length) followed by the payload. Returns `None`
/// until a full frame is buffered.
pub fn next_frame(buf: &[u8]) -> Option<(StreamKind, &[u8], usize)> {
    let header = buf.get(..8)?;
    let kind = match header[0] {
        0 => StreamKind::Stdin,
        2 => StreamKind::Stderr,
        _ => StreamKind::Stdout,
    };
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let payload = buf.get(8..8 + len)?;
    Some((kind, payload, 8 + len))
}
