//! Parsed response handed back to callers.

use bytes::Bytes;

/// A complete HTTP response: status code, headers in wire order, and a
/// fully buffered body.
///
/// Header names keep whatever case the server sent; lookups fold ASCII
/// case.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Numeric code from the status line.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for 2xx codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Every header, in the order the server sent them.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Value of the first header whose name matches `name`, ignoring ASCII
    /// case. None when the server sent no such header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v.as_str()))
    }

    /// The buffered body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Take ownership of the body, discarding status and headers.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Borrow the body as UTF-8 text, when it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
