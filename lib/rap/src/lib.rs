//! Wire codec for the reflector's administrative protocol (RAP/1.0): a
//! text, CRLF-separated request/response format modelled on the example
//! `CLIENTS` frame used by the control front-end.
//!
//! This crate owns only the framing and parsing; it has no notion of what a
//! method *means* — that is the management master's job.

use std::fmt;

pub const PROTOCOL_VERSION: &str = "RAP/1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether this request carries `Sync: on`, selecting the reflector-wide
    /// synchronous request gate.
    pub fn wants_sync(&self) -> bool {
        self.header("Sync").map(|v| v.eq_ignore_ascii_case("on")).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(code: u16) -> Response {
        Response {
            code,
            id: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Response {
        self.id = Some(id.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Response {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Response {
        self.headers
            .push(("Content-Length".to_owned(), body.len().to_string()));
        self.body = body;
        self
    }

    /// Serializes the response as a CRLF-separated frame ready to write to
    /// the originating connection.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {}\r\n", self.code, PROTOCOL_VERSION).into_bytes();
        if let Some(ref id) = self.id {
            out.extend_from_slice(format!("Id: {}\r\n", id).as_bytes());
        }
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", k, v).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Line,
    Header,
    Content,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Line => write!(f, "malformed request line"),
            ParseError::Header => write!(f, "malformed header line"),
            ParseError::Content => write!(f, "body shorter than Content-Length"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of attempting to parse one request out of a buffer: either a
/// complete request plus the number of bytes it consumed, or a signal that
/// more bytes are needed before a full frame is available.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Complete { request: Request, consumed: usize },
    Incomplete,
}

/// Parses at most one request frame from the front of `buf`. Callers reading
/// off a streaming connection should buffer bytes, call this repeatedly, and
/// drain `consumed` bytes on `Complete` before parsing again.
pub fn parse_request(buf: &[u8]) -> Result<ParseOutcome, ParseError> {
    let header_end = match find_subslice(buf, b"\r\n\r\n") {
        Some(pos) => pos,
        None => return Ok(ParseOutcome::Incomplete),
    };

    let head = std::str::from_utf8(&buf[..header_end]).map_err(|_| ParseError::Line)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::Line)?;
    let mut parts = request_line.splitn(2, ' ');
    let method = parts.next().filter(|s| !s.is_empty()).ok_or(ParseError::Line)?;
    let proto = parts.next().ok_or(ParseError::Line)?;
    if proto != PROTOCOL_VERSION {
        return Err(ParseError::Line);
    }

    let mut headers = Vec::new();
    for line in lines {
        let colon = line.find(':').ok_or(ParseError::Header)?;
        let name = line[..colon].trim().to_owned();
        let value = line[colon + 1..].trim().to_owned();
        if name.is_empty() {
            return Err(ParseError::Header);
        }
        headers.push((name, value));
    }

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse().map_err(|_| ParseError::Header))
        .transpose()?
        .unwrap_or(0);

    const MAX_BODY_LEN: usize = 16 * 1024 * 1024;
    if content_length > MAX_BODY_LEN {
        return Err(ParseError::Content);
    }

    let body_start = header_end + 4;
    let body_end = body_start + content_length;
    if buf.len() < body_end {
        return Ok(ParseOutcome::Incomplete);
    }

    let request = Request {
        method: method.to_owned(),
        headers,
        body: buf[body_start..body_end].to_vec(),
    };

    Ok(ParseOutcome::Complete {
        request,
        consumed: body_end,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENTS_FRAME: &str = "CLIENTS RAP/1.0\r\nTarget: listener/udp-0.0.0.0:1234\r\nAction: add\r\nAddress: 192.0.2.17/32\r\n\r\n";

    #[test]
    fn parses_clients_example_frame() {
        let outcome = parse_request(CLIENTS_FRAME.as_bytes()).unwrap();
        match outcome {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(consumed, CLIENTS_FRAME.len());
                assert_eq!(request.method, "CLIENTS");
                assert_eq!(request.header("Target"), Some("listener/udp-0.0.0.0:1234"));
                assert_eq!(request.header("Action"), Some("add"));
                assert_eq!(request.header("Address"), Some("192.0.2.17/32"));
                assert!(request.body.is_empty());
            }
            ParseOutcome::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn incomplete_frame_requests_more_data() {
        let partial = "CLIENTS RAP/1.0\r\nTarget: x";
        assert!(matches!(parse_request(partial.as_bytes()), Ok(ParseOutcome::Incomplete)));
    }

    #[test]
    fn body_respects_content_length() {
        let frame = b"PROCESS RAP/1.0\r\nContent-Length: 5\r\n\r\nhellotrailing";
        let outcome = parse_request(frame).unwrap();
        match outcome {
            ParseOutcome::Complete { request, consumed } => {
                assert_eq!(request.body, b"hello");
                assert_eq!(consumed, frame.len() - "trailing".len());
            }
            ParseOutcome::Incomplete => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn rejects_mismatched_protocol_version() {
        let frame = "CLIENTS RAP/2.0\r\n\r\n";
        assert_eq!(parse_request(frame.as_bytes()), Err(ParseError::Line));
    }

    #[test]
    fn response_roundtrips_id_and_body() {
        let response = Response::new(200).with_id("abc").with_body(b"ok".to_vec());
        let encoded = String::from_utf8(response.encode()).unwrap();
        assert!(encoded.starts_with("200 RAP/1.0\r\n"));
        assert!(encoded.contains("Id: abc\r\n"));
        assert!(encoded.contains("Content-Length: 2\r\n"));
        assert!(encoded.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn sync_header_is_case_insensitive() {
        let frame = "STATUS RAP/1.0\r\nSync: ON\r\n\r\n";
        if let ParseOutcome::Complete { request, .. } = parse_request(frame.as_bytes()).unwrap() {
            assert!(request.wants_sync());
        } else {
            panic!("expected a complete frame");
        }
    }
}
