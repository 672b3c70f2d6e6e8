//! HTTP request-line primitives.
//!
//! This module provides the closed token sets the server recognizes
//! ([`Method`], [`Version`]), the request-line parser ([`request`]) and the
//! header-section model ([`headers`]).

use std::fmt;

pub mod headers;
pub mod request;

pub use headers::{HeaderSection, Headers};
pub use request::{MalformedRequest, RequestLine, parse_request_line};

/// An HTTP request method recognized by the server.
///
/// The set is closed: tokens outside it are a parse failure, never a
/// catch-all variant. Adding a method means adding a variant here and in
/// [`Method::from_token`].
///
/// # Examples
///
/// ```
/// use pollserve::http::Method;
///
/// assert_eq!(Method::from_token(b"GET"), Some(Method::Get));
/// assert_eq!(Method::from_token(b"get"), None);
/// assert_eq!(Method::Head.as_str(), "HEAD");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET — retrieve a representation of the target resource.
    Get,
    /// HEAD — identical to GET but without a response body.
    Head,
}

impl Method {
    /// Every recognized method, in declaration order.
    pub const ALL: [Method; 2] = [Method::Get, Method::Head];

    /// Matches a raw token case-sensitively against the recognized set.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            _ => None,
        }
    }

    /// Returns the method as a string slice.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP protocol version recognized by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// `HTTP/1.1`
    Http11,
}

impl Version {
    /// Matches a raw token exactly against the recognized versions.
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    /// Returns the version as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens_are_case_sensitive() {
        assert_eq!(Method::from_token(b"GET"), Some(Method::Get));
        assert_eq!(Method::from_token(b"HEAD"), Some(Method::Head));
        assert_eq!(Method::from_token(b"Get"), None);
        assert_eq!(Method::from_token(b"head"), None);
    }

    #[test]
    fn method_tokens_must_match_exactly() {
        assert_eq!(Method::from_token(b"GE"), None);
        assert_eq!(Method::from_token(b"GETS"), None);
        assert_eq!(Method::from_token(b"POST"), None);
        assert_eq!(Method::from_token(b""), None);
    }

    #[test]
    fn method_display_round_trips() {
        for method in Method::ALL {
            assert_eq!(Method::from_token(method.to_string().as_bytes()), Some(method));
        }
    }

    #[test]
    fn only_http11_is_recognized() {
        assert_eq!(Version::from_token(b"HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::from_token(b"HTTP/1.0"), None);
        assert_eq!(Version::from_token(b"HTTP/2"), None);
        assert_eq!(Version::from_token(b"http/1.1"), None);
        assert_eq!(Version::Http11.to_string(), "HTTP/1.1");
    }
}
