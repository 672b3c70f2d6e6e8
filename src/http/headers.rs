//! HTTP header section following the request line.
//!
//! Headers are order-preserving and case-insensitive (RFC 9110 §5). The
//! server only observes them; nothing downstream acts on their values.

use std::fmt;

/// Upper bound on header fields accepted in one section.
pub const MAX_HEADERS: usize = 64;

/// A case-insensitive, multi-value HTTP header map.
///
/// # Examples
///
/// ```
/// use pollserve::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Host", "localhost");
/// headers.insert("Accept", "text/html");
/// headers.insert("Accept", "text/plain");
///
/// assert_eq!(headers.get("host"), Some("localhost"));
/// let all: Vec<_> = headers.get_all("accept").collect();
/// assert_eq!(all, vec!["text/html", "text/plain"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

/// What was found after the request line in a single buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSection {
    /// The section ended with an empty line and every field parsed.
    Complete(Headers),
    /// The buffer ended before the terminating empty line.
    Partial,
    /// The bytes are not a valid header section.
    Invalid(httparse::Error),
}

/// Parses the header section that starts at `buf[0]` (the byte after the request line's CRLF).
///
/// Fields whose value is not UTF-8 are skipped.
///
/// # Examples
///
/// ```
/// use pollserve::http::{HeaderSection, headers::parse_headers};
///
/// match parse_headers(b"Host: localhost\r\n\r\n") {
///     HeaderSection::Complete(h) => assert_eq!(h.get("host"), Some("localhost")),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert_eq!(parse_headers(b"Host: local"), HeaderSection::Partial);
/// ```
pub fn parse_headers(buf: &[u8]) -> HeaderSection {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    match httparse::parse_headers(buf, &mut raw) {
        Ok(httparse::Status::Complete((_, fields))) => {
            let mut headers = Headers::with_capacity(fields.len());
            for field in fields {
                if let Ok(value) = std::str::from_utf8(field.value) {
                    headers.insert(field.name, value);
                }
            }
            HeaderSection::Complete(headers)
        }
        Ok(httparse::Status::Partial) => HeaderSection::Partial,
        Err(e) => HeaderSection::Invalid(e),
    }
}
