//! HTTP/1.1 request construction
//!
//! Requests are rendered into a single buffer: the header block followed by
//! the body. Every request asks the server to close the connection, which
//! is how the response is framed.

use crate::http::endpoint::Endpoint;

/// Ordered header multimap; duplicate names are kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// All values recorded for `name`, compared case-insensitively
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

/// A request ready to be written to a transport
#[derive(Debug, Clone)]
pub struct Request {
    pub endpoint: Endpoint,
    pub headers: Headers,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            headers: Headers::new(),
            accept: None,
            content_type: None,
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        for (k, v) in headers.iter() {
            self.headers.append(k, v);
        }
        self
    }

    pub fn accept(mut self, accept: Option<String>) -> Self {
        self.accept = accept;
        self
    }

    /// Content type is written whenever present, even without a body
    pub fn content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn content_length(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    /// Render the header block as sent on the wire
    pub fn head(&self) -> String {
        let mut head = format!(
            "{} {} HTTP/1.1\r\n",
            self.endpoint.method(),
            self.endpoint.target()
        );
        head.push_str(&format!("Host: {}\r\n", self.endpoint.host_header()));
        head.push_str("Connection: Close\r\n");

        if let Some(accept) = self.accept.as_deref().filter(|a| !a.trim().is_empty()) {
            head.push_str(&format!("Accept: {}\r\n", accept));
        }
        if let Some(content_type) = &self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        for (name, value) in self.headers.iter() {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        head.push_str(&format!("Content-Length: {}\r\n", self.content_length()));
        head.push_str("\r\n");
        head
    }

    /// Header block and body concatenated into one buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = self.head();
        let mut buffer = Vec::with_capacity(head.len() + self.content_length());
        buffer.extend_from_slice(head.as_bytes());
        if let Some(body) = self.body.as_deref().filter(|b| !b.is_empty()) {
            buffer.extend_from_slice(body);
        }
        buffer
    }
}
