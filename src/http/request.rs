//! HTTP request-line parsing.
//!
//! Only the first line of a request is tokenized here: method, target and
//! protocol version. The parser is pure; it never performs I/O and never
//! returns a partially populated result.

use thiserror::Error;

use super::{Method, Version};

const CRLF: &[u8] = b"\r\n";
const SP: u8 = b' ';

/// Reasons a buffer does not hold a recognizable request line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("no CRLF found; the request line is not terminated")]
    MissingCrlf,

    #[error("request line is missing a space separator")]
    MissingSeparator,

    #[error("unrecognized method `{0}`")]
    UnknownMethod(String),

    #[error("unrecognized protocol version `{0}`")]
    UnknownVersion(String),

    #[error("request target is empty")]
    EmptyTarget,

    #[error("request target is not valid UTF-8")]
    NonUtf8,
}

impl MalformedRequest {
    /// Returns `true` if more input could still turn this into a valid request line.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::MissingCrlf)
    }
}

/// A successfully tokenized request line.
///
/// # Examples
///
/// ```
/// use pollserve::http::{Method, Version, parse_request_line};
///
/// let line = parse_request_line(b"GET /index.html HTTP/1.1\r\n").unwrap();
/// assert_eq!(line.method(), Method::Get);
/// assert_eq!(line.target(), "/index.html");
/// assert_eq!(line.version(), Version::Http11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    target: String,
    version: Version,
}

impl RequestLine {
    /// Returns the request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the request target, copied verbatim from the wire.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Number of bytes the line occupied on the wire, including the trailing CRLF.
    pub fn wire_len(&self) -> usize {
        self.method.as_str().len() + 1 + self.target.len() + 1 + self.version.as_str().len() + 2
    }
}

/// Parses the request line at the start of `buf`.
///
/// The buffer must contain a CRLF; everything before the first CRLF is the
/// request line. The line is split on the first space into the method token,
/// and the remainder on the next space into target and version.
///
/// # Errors
///
/// Returns a [`MalformedRequest`] describing the first rule the input broke.
/// [`MalformedRequest::MissingCrlf`] is the only failure that more input can fix.
pub fn parse_request_line(buf: &[u8]) -> Result<RequestLine, MalformedRequest> {
    let line_end = find_crlf(buf).ok_or(MalformedRequest::MissingCrlf)?;
    let line = &buf[..line_end];

    let (method_token, rest) = split_at_space(line).ok_or(MalformedRequest::MissingSeparator)?;
    let method = Method::from_token(method_token)
        .ok_or_else(|| MalformedRequest::UnknownMethod(lossy(method_token)))?;

    let (target, version_token) = split_at_space(rest).ok_or(MalformedRequest::MissingSeparator)?;
    if target.is_empty() {
        return Err(MalformedRequest::EmptyTarget);
    }
    let target = std::str::from_utf8(target).map_err(|_| MalformedRequest::NonUtf8)?;

    let version = Version::from_token(version_token)
        .ok_or_else(|| MalformedRequest::UnknownVersion(lossy(version_token)))?;

    Ok(RequestLine {
        method,
        target: target.to_owned(),
        version,
    })
}

pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

fn split_at_space(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == SP)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
