//! A minimal HTTP/1.1 client codec: request-line/header serialization plus
//! `httparse`-based response parsing and length/chunked/eof body framing.
//!
//! Reduced from the shape of a full server-capable codec (§4.2.1): no
//! trailers, no informational (1xx) responses, no pipelining. Bytes in,
//! events out — this module never touches a socket directly.

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, Method};

use crate::error::{Error, Kind};
use crate::request::Url;

const MAX_HEADERS: usize = 100;

/// How the response body is framed, decided from the response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyMode {
    Length(u64),
    Chunked,
    /// No framing header present; the body runs until the connection closes.
    Eof,
}

pub(crate) struct ParsedHead {
    pub status: u16,
    pub headers: HeaderMap,
    pub body_mode: BodyMode,
    pub close_after: bool,
}

/// Serializes a request line + headers. The body, if any, is written
/// separately by the caller via [`Encoder`].
pub(crate) fn encode_head(method: &Method, url: &Url, headers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(&url.target);
    buf.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Frames a single request-body chunk.
pub(crate) enum Encoder {
    Length,
    Chunked,
}

impl Encoder {
    pub(crate) fn for_headers(headers: &HeaderMap) -> Encoder {
        if headers.contains_key(http::header::TRANSFER_ENCODING) {
            Encoder::Chunked
        } else {
            Encoder::Length
        }
    }

    pub(crate) fn encode(&self, chunk: Bytes) -> Bytes {
        match self {
            Encoder::Length => chunk,
            Encoder::Chunked => {
                let mut buf = BytesMut::with_capacity(chunk.len() + 16);
                buf.put_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                buf.put_slice(&chunk);
                buf.put_slice(b"\r\n");
                buf.freeze()
            }
        }
    }

    pub(crate) fn encode_eof(&self) -> Option<Bytes> {
        match self {
            Encoder::Length => None,
            Encoder::Chunked => Some(Bytes::from_static(b"0\r\n\r\n")),
        }
    }
}

/// Attempts to parse a complete response head out of `buf`. Returns
/// `Ok(None)` if more bytes are needed; on success, returns the parsed head
/// and how many leading bytes of `buf` it consumed (the remainder may be
/// the start of the body).
pub(crate) fn parse_head(buf: &[u8], request_wants_close: bool) -> crate::Result<Option<(usize, ParsedHead)>> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut header_storage);
    let consumed = match response.parse(buf)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(n) => n,
    };
    let status = response.code.ok_or_else(|| Error::local_protocol("missing status code"))?;
    let mut headers = HeaderMap::new();
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut close_after = request_wants_close || response.version == Some(0);
    for h in response.headers.iter() {
        let name = http::HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::with(Kind::RemoteProtocolError, e))?;
        let value =
            http::HeaderValue::from_bytes(h.value).map_err(|e| Error::with(Kind::RemoteProtocolError, e))?;
        if name == http::header::CONTENT_LENGTH {
            let text = value
                .to_str()
                .map_err(|e| Error::with(Kind::RemoteProtocolError, e))?;
            content_length = Some(
                text.trim()
                    .parse()
                    .map_err(|_| Error::local_protocol("invalid Content-Length"))?,
            );
        } else if name == http::header::TRANSFER_ENCODING {
            if value.as_bytes().eq_ignore_ascii_case(b"chunked") {
                chunked = true;
            }
        } else if name == http::header::CONNECTION {
            if value.as_bytes().eq_ignore_ascii_case(b"close") {
                close_after = true;
            }
        }
        headers.append(name, value);
    }

    let body_mode = if matches!(status, 204 | 304) || status / 100 == 1 {
        BodyMode::Length(0)
    } else if chunked {
        BodyMode::Chunked
    } else if let Some(len) = content_length {
        BodyMode::Length(len)
    } else {
        close_after = true;
        BodyMode::Eof
    };

    Ok(Some((
        consumed,
        ParsedHead {
            status,
            headers,
            body_mode,
            close_after,
        },
    )))
}

/// Incremental chunked-body decoder, tracking position within the current
/// chunk across multiple `decode` calls.
#[derive(Debug, Default)]
pub(crate) struct ChunkedDecoder {
    remaining_in_chunk: u64,
    awaiting_trailer_crlf: bool,
    done: bool,
}

pub(crate) enum Decoded {
    /// A data chunk was extracted; `rest` is what's left unconsumed in `buf`.
    Chunk(Bytes),
    /// End of message reached (final chunk / trailers consumed).
    Done,
    /// Not enough bytes buffered yet.
    NeedMore,
}

impl ChunkedDecoder {
    /// Consumes as much of `buf` as forms one or more complete chunk-size +
    /// data segments, draining consumed bytes from the front of `buf`.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> crate::Result<Decoded> {
        if self.done {
            return Ok(Decoded::Done);
        }
        if self.awaiting_trailer_crlf {
            if buf.len() < 2 {
                return Ok(Decoded::NeedMore);
            }
            buf.advance(2);
            self.awaiting_trailer_crlf = false;
        }
        if self.remaining_in_chunk > 0 {
            let n = (self.remaining_in_chunk as usize).min(buf.len());
            if n == 0 {
                return Ok(Decoded::NeedMore);
            }
            let chunk = buf.split_to(n).freeze();
            self.remaining_in_chunk -= n as u64;
            if self.remaining_in_chunk == 0 {
                self.awaiting_trailer_crlf = true;
            }
            return Ok(Decoded::Chunk(chunk));
        }

        let line_end = match find_crlf(buf) {
            Some(i) => i,
            None => return Ok(Decoded::NeedMore),
        };
        let size_line = std::str::from_utf8(&buf[..line_end])
            .map_err(|_| Error::local_protocol("invalid chunk size"))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| Error::local_protocol("invalid chunk size"))?;
        buf.advance(line_end + 2);

        if size == 0 {
            self.done = true;
            // Trailers, if any, followed by a final CRLF; this client does
            // not surface trailers, so just wait for the terminator.
            if let Some(i) = find_crlf(buf) {
                buf.advance(i + 2);
            }
            return Ok(Decoded::Done);
        }

        self.remaining_in_chunk = size;
        self.decode(buf)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

use bytes::Buf;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_head() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: plain/text\r\nContent-Length: 13\r\n\r\nHello, world!";
        let (consumed, head) = parse_head(raw, false).unwrap().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.body_mode, BodyMode::Length(13));
        assert!(!head.close_after);
        assert_eq!(&raw[consumed..], b"Hello, world!");
    }

    #[test]
    fn detects_connection_close() {
        let raw = b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
        let (_, head) = parse_head(raw, false).unwrap().unwrap();
        assert!(head.close_after);
    }

    #[test]
    fn incomplete_head_returns_none() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: ";
        assert!(parse_head(raw, false).unwrap().is_none());
    }

    #[test]
    fn decodes_chunked_body() {
        let mut buf = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::default();
        let first = decoder.decode(&mut buf).unwrap();
        match first {
            Decoded::Chunk(b) => assert_eq!(&b[..], b"hello"),
            _ => panic!("expected chunk"),
        }
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Decoded::Done));
    }

    #[test]
    fn encodes_chunked_frame() {
        let encoder = Encoder::Chunked;
        let framed = encoder.encode(Bytes::from_static(b"hi"));
        assert_eq!(&framed[..], b"2\r\nhi\r\n");
        assert_eq!(encoder.encode_eof().unwrap(), Bytes::from_static(b"0\r\n\r\n"));
    }
}
