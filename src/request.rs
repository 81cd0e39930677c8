//! Request model, fluent builder, and HTTP/1.1 wire serialization.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::client::Client;
use crate::completion::Completion;
use crate::error::Error;
use crate::response::Response;

/// User-Agent emitted on every request, overriding any caller-supplied value.
pub(crate) const USER_AGENT: &str = "fetchline/0.1";

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// The wire form of the method token.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload, kept as one contiguous byte run for the send loop.
///
/// An empty payload is the no-body case: nothing after the blank line and
/// no `Content-Length` header on the wire.
#[derive(Debug, Clone, Default)]
pub struct Body {
    bytes: Bytes,
}

impl Body {
    /// Number of payload bytes; this is what `Content-Length` carries.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when there is no payload.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body { bytes }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body {
            bytes: Bytes::from(bytes),
        }
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body {
            bytes: Bytes::from(text.into_bytes()),
        }
    }
}

/// A logical HTTP request, immutable for the duration of a submission.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) resource: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) cookies: Vec<(String, String)>,
    pub(crate) body: Body,
}

impl Request {
    pub(crate) fn new(method: Method, resource: String) -> Self {
        Request {
            method,
            resource,
            query: Vec::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Body::default(),
        }
    }

    /// The request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The target resource as given to the builder.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Remove any caller-supplied User-Agent header; the engine emits its
    /// own on the wire.
    pub(crate) fn strip_user_agent(&mut self) {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("user-agent"));
    }
}

/// Split a request target of the form `[http://][www.]HOST[PATH_AND_QUERY]`
/// into `(host, path_and_query)`. The host part may carry an explicit
/// `:port`; the path part is empty or starts at the first `/` or `?`.
pub(crate) fn split_url(url: &str) -> (&str, &str) {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    match rest.find(['/', '?']) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}

/// Render a request into a complete HTTP/1.1 request message.
///
/// Header order: consolidated `Cookie:` (when any cookie exists), caller
/// headers, `User-Agent`, `Host`, `Content-Length` (body present only),
/// blank line, body bytes verbatim. Deterministic: repeated calls yield
/// identical bytes.
pub(crate) fn serialize(request: &Request) -> Result<Vec<u8>, Error> {
    let (host, path) = split_url(&request.resource);
    if host.is_empty() {
        return Err(Error::InvalidUrl(request.resource.clone()));
    }

    let body = request.body.as_bytes();
    let mut buf = Vec::with_capacity(256 + body.len());

    buf.extend_from_slice(request.method.as_str().as_bytes());
    buf.push(b' ');
    if !path.starts_with('/') {
        buf.push(b'/');
    }
    buf.extend_from_slice(path.as_bytes());
    if !request.query.is_empty() {
        buf.push(b'?');
        for (i, (name, value)) in request.query.iter().enumerate() {
            if i > 0 {
                buf.push(b'&');
            }
            buf.extend_from_slice(name.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(value.as_bytes());
        }
    }
    buf.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.cookies.is_empty() {
        buf.extend_from_slice(b"Cookie: ");
        for (i, (name, value)) in request.cookies.iter().enumerate() {
            if i > 0 {
                buf.extend_from_slice(b"; ");
            }
            buf.extend_from_slice(name.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(value.as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
    }

    for (name, value) in &request.headers {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"User-Agent: ");
    buf.extend_from_slice(USER_AGENT.as_bytes());
    buf.extend_from_slice(b"\r\n");

    buf.extend_from_slice(b"Host: ");
    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(b"\r\n");

    if !body.is_empty() {
        buf.extend_from_slice(b"Content-Length: ");
        buf.extend_from_slice(body.len().to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(body);

    Ok(buf)
}

/// Builder for an HTTP request, terminated by [`send()`](Self::send).
pub struct RequestBuilder<'a> {
    client: &'a Client,
    request: Request,
    timeout: Duration,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, resource: &str) -> Self {
        Self {
            client,
            request: Request::new(method, resource.to_string()),
            timeout: Duration::ZERO,
        }
    }

    /// Override the request method.
    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    /// Override the target resource.
    pub fn resource(mut self, resource: &str) -> Self {
        self.request.resource = resource.to_string();
        self
    }

    /// Append a query parameter.
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.request
            .query
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Append a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Append a cookie, consolidated into a single `Cookie:` header on the
    /// wire.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.request
            .cookies
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Set the per-request timeout. Zero (the default) disables the timer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Submit the request.
    pub fn send(self) -> Completion<Response> {
        self.client.do_request(self.request, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, resource: &str) -> Request {
        Request::new(method, resource.to_string())
    }

    #[test]
    fn split_strips_scheme_and_www() {
        assert_eq!(split_url("http://www.example.com/a/b"), ("example.com", "/a/b"));
        assert_eq!(split_url("example.com"), ("example.com", ""));
        assert_eq!(split_url("http://example.com?q=1"), ("example.com", "?q=1"));
        assert_eq!(split_url("127.0.0.1:8080/x"), ("127.0.0.1:8080", "/x"));
    }

    #[test]
    fn empty_path_normalized_to_slash() {
        let buf = serialize(&request(Method::Get, "http://example.com")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn query_path_gets_leading_slash() {
        let buf = serialize(&request(Method::Get, "example.com?q=1")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("GET /?q=1 HTTP/1.1\r\n"));
    }

    #[test]
    fn host_header_keeps_port() {
        let buf = serialize(&request(Method::Get, "http://127.0.0.1:8080/x")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Host: 127.0.0.1:8080\r\n"));
    }

    #[test]
    fn body_sets_content_length() {
        let mut req = request(Method::Post, "http://h/p");
        req.body = Body::from("abc");
        let buf = serialize(&req).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\nabc"));
    }

    #[test]
    fn empty_body_omits_content_length() {
        let buf = serialize(&request(Method::Get, "http://h/p")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn cookies_consolidated_in_one_header() {
        let mut req = request(Method::Get, "http://h/p");
        req.cookies.push(("a".into(), "1".into()));
        req.cookies.push(("b".into(), "2".into()));
        let buf = serialize(&req).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Cookie: a=1; b=2\r\n"));
        assert_eq!(text.matches("Cookie:").count(), 1);
    }

    #[test]
    fn no_cookie_header_when_empty() {
        let buf = serialize(&request(Method::Get, "http://h/p")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("Cookie:"));
    }

    #[test]
    fn fixed_user_agent_appears_exactly_once() {
        let mut req = request(Method::Get, "http://h/p");
        req.headers.push(("User-Agent".into(), "other/9".into()));
        req.strip_user_agent();
        let buf = serialize(&req).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches("User-Agent:").count(), 1);
        assert!(text.contains(&format!("User-Agent: {USER_AGENT}\r\n")));
        assert!(!text.contains("other/9"));
    }

    #[test]
    fn serialization_is_byte_stable() {
        let mut req = request(Method::Post, "http://h/p");
        req.headers.push(("X-One".into(), "1".into()));
        req.cookies.push(("s".into(), "t".into()));
        req.body = Body::from("payload");
        assert_eq!(serialize(&req).unwrap(), serialize(&req).unwrap());
    }

    #[test]
    fn header_order_is_cookie_caller_ua_host() {
        let mut req = request(Method::Get, "http://h/p");
        req.headers.push(("X-One".into(), "1".into()));
        req.cookies.push(("s".into(), "t".into()));
        let text = String::from_utf8(serialize(&req).unwrap()).unwrap();
        let cookie = text.find("Cookie:").unwrap();
        let caller = text.find("X-One:").unwrap();
        let ua = text.find("User-Agent:").unwrap();
        let host = text.find("Host:").unwrap();
        assert!(cookie < caller && caller < ua && ua < host);
    }

    #[test]
    fn missing_host_is_invalid() {
        assert!(matches!(
            serialize(&request(Method::Get, "/nohost")),
            Err(Error::InvalidUrl(_))
        ));
    }
}
