//! HTTP/1.1 message framing.
//!
//! Only what a keep-alive client needs: request serialisation and response
//! parsing with `Content-Length`, chunked and read-to-close bodies. Anything
//! the parser cannot make sense of is reported as [`HttpError::Protocol`] so
//! the executor can classify it as a bad response, while a peer that hangs up
//! before answering surfaces as an `UnexpectedEof` I/O error.

use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{StatusCode, Version};

use crate::error::{HttpError, Result};
use crate::message::{Request, Response};
use crate::types::Method;

/// Maximum size of a response status line plus headers.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of response headers.
pub const MAX_HEADERS: usize = 128;

/// Maximum length of one chunk-size line, extensions included.
pub const MAX_CHUNK_LINE: usize = 4 * 1024;

/// Maximum number of interim `1xx` responses before the final one.
pub const MAX_INTERIM_RESPONSES: usize = 16;

/// How a response body was delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body is allowed for this response.
    Empty,
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// `Content-Length` bytes.
    Length(u64),
    /// Body ran until the peer closed the socket.
    UntilClose,
}

impl BodyFraming {
    /// Check if the socket is unusable after this body.
    pub fn requires_close(&self) -> bool {
        matches!(self, BodyFraming::UntilClose)
    }
}

/// Write a complete request to a stream.
///
/// `target` is the request-target exactly as it goes on the request line
/// (origin-form, absolute-form for plain proxies, authority-form for
/// `CONNECT`). `host` is used when the request carries no `Host` header.
pub fn write_request<W: Write>(
    writer: &mut W,
    request: &Request,
    target: &str,
    host: &str,
) -> Result<()> {
    let mut buf = Vec::with_capacity(256 + request.body().len());
    buf.extend_from_slice(request.method().as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(target.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");

    let headers = request.headers();
    if !headers.contains_key(HOST) {
        write_header(&mut buf, HOST.as_str(), host.as_bytes());
    }
    for (name, value) in headers {
        write_header(&mut buf, name.as_str(), value.as_bytes());
    }
    if needs_content_length(request) {
        let len = request.body().len().to_string();
        write_header(&mut buf, CONTENT_LENGTH.as_str(), len.as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(request.body());

    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

fn write_header(buf: &mut Vec<u8>, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
}

fn needs_content_length(request: &Request) -> bool {
    let headers = request.headers();
    if headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING) {
        return false;
    }
    !request.body().is_empty() || matches!(request.method(), Method::Post | Method::Put | Method::Patch)
}

/// Read a complete response from a stream.
///
/// Interim `1xx` responses (other than `101`) are skipped, up to
/// [`MAX_INTERIM_RESPONSES`] of them.
pub fn read_response<R: BufRead>(reader: &mut R, method: Method) -> Result<(Response, BodyFraming)> {
    let mut interim = 0;
    loop {
        let (version, status, headers) = read_head(reader)?;
        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            interim += 1;
            if interim > MAX_INTERIM_RESPONSES {
                return Err(HttpError::protocol("too many interim responses"));
            }
            continue;
        }

        let framing = body_framing(method, status, &headers)?;
        let body = read_body(reader, framing)?;
        let response = Response {
            version,
            status,
            headers,
            body,
        };
        return Ok((response, framing));
    }
}

fn read_head<R: BufRead>(reader: &mut R) -> Result<(Version, StatusCode, HeaderMap)> {
    let mut budget = MAX_HEAD_SIZE;

    let status_line = match read_line(reader, &mut budget)? {
        Some(line) => line,
        None => {
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            )));
        }
    };
    let (version, status) = parse_status_line(&status_line)?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader, &mut budget)?.ok_or_else(|| {
            HttpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside response head",
            ))
        })?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(HttpError::protocol("too many response headers"));
        }
        let (name, value) = parse_header_line(&line)?;
        headers.append(name, value);
    }

    Ok((version, status, headers))
}

/// Read one CRLF (or bare LF) terminated line without the terminator.
///
/// Returns `None` on end-of-stream before any byte of the line.
fn read_line<R: BufRead>(reader: &mut R, budget: &mut usize) -> Result<Option<Vec<u8>>> {
    read_limited_line(reader, budget, "response head too large")
}

fn read_limited_line<R: BufRead>(
    reader: &mut R,
    budget: &mut usize,
    too_large: &'static str,
) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let limit = (*budget as u64) + 1;
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if n > *budget {
        return Err(HttpError::protocol(too_large));
    }
    *budget -= n;
    if line.last() != Some(&b'\n') {
        return Err(HttpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn parse_status_line(line: &[u8]) -> Result<(Version, StatusCode)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| HttpError::protocol("status line is not valid UTF-8"))?;
    let mut parts = text.splitn(3, ' ');

    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        _ => return Err(HttpError::protocol(format!("wrong status line: {text:?}"))),
    };

    let code = parts
        .next()
        .filter(|c| c.len() == 3 && c.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| HttpError::protocol(format!("wrong status line: {text:?}")))?;
    let status = StatusCode::from_bytes(code.as_bytes())
        .map_err(|_| HttpError::protocol(format!("invalid status code {code}")))?;

    Ok((version, status))
}

fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue)> {
    if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
        return Err(HttpError::protocol("obsolete header line folding"));
    }
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| HttpError::protocol("header line without colon"))?;

    let name = HeaderName::from_bytes(&line[..colon])
        .map_err(|_| HttpError::protocol("invalid header name"))?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
        .map_err(|_| HttpError::protocol(format!("invalid value for header {name}")))?;
    Ok((name, value))
}

fn body_framing(method: Method, status: StatusCode, headers: &HeaderMap) -> Result<BodyFraming> {
    if method.response_has_no_body()
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
        || (method == Method::Connect && status.is_success())
    {
        return Ok(BodyFraming::Empty);
    }

    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .next_back()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| HttpError::protocol("invalid Content-Length"))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(HttpError::protocol("conflicting Content-Length values"));
        }
        length = Some(parsed);
    }

    Ok(match length {
        Some(len) => BodyFraming::Length(len),
        None => BodyFraming::UntilClose,
    })
}

fn read_body<R: BufRead>(reader: &mut R, framing: BodyFraming) -> Result<Bytes> {
    match framing {
        BodyFraming::Empty => Ok(Bytes::new()),
        BodyFraming::Length(len) => {
            let mut body = Vec::with_capacity(len.min(1 << 20) as usize);
            let read = reader.by_ref().take(len).read_to_end(&mut body)?;
            if (read as u64) < len {
                return Err(HttpError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body truncated after {read} of {len} bytes"),
                )));
            }
            Ok(Bytes::from(body))
        }
        BodyFraming::Chunked => read_chunked(reader),
        BodyFraming::UntilClose => {
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            Ok(Bytes::from(body))
        }
    }
}

fn read_chunked<R: BufRead>(reader: &mut R) -> Result<Bytes> {
    let mut body = Vec::new();
    loop {
        let mut line_budget = MAX_CHUNK_LINE;
        let line = read_limited_line(reader, &mut line_budget, "chunk size line too long")?
            .ok_or_else(|| {
                HttpError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "missing chunk size"))
            })?;
        let size_field = line.split(|b| *b == b';').next().unwrap_or_default();
        let size = std::str::from_utf8(size_field)
            .ok()
            .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
            .ok_or_else(|| HttpError::protocol("invalid chunk size"))?;

        if size == 0 {
            // Trailers are read and dropped.
            let mut trailer_budget = MAX_HEAD_SIZE;
            while let Some(trailer) =
                read_limited_line(reader, &mut trailer_budget, "response trailers too large")?
            {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(Bytes::from(body));
        }

        let start = body.len();
        let read = reader.by_ref().take(size).read_to_end(&mut body)?;
        if (read as u64) < size {
            return Err(HttpError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunk truncated",
            )));
        }
        debug_assert_eq!(body.len() - start, size as usize);

        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if &crlf != b"\r\n" {
            return Err(HttpError::protocol("chunk not terminated by CRLF"));
        }
    }
}
