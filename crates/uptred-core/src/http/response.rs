//! Response framing over a connection-close delimited stream

const HEADER_TERMINATOR: &str = "\r\n\r\n";

/// A response split into raw header lines and body text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Status line followed by header lines, in arrival order
    pub header_lines: Vec<String>,
    pub body: String,
}

impl Response {
    pub fn parse(raw: &str) -> Self {
        let (header_lines, body) = split(raw);
        Self { header_lines, body }
    }

    /// Decode raw bytes as UTF-8 (lossy) and frame them
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(raw))
    }

    /// Status code from the status line, if it parses
    pub fn status_code(&self) -> Option<u16> {
        let status_line = self.header_lines.first()?;
        if !status_line.starts_with("HTTP/") {
            return None;
        }
        status_line.split_whitespace().nth(1)?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code(), Some(200..=299))
    }

    /// Exact, case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<String> {
        header_value(&self.header_lines, name)
    }
}

/// Split at the first blank line.
///
/// Without a blank line the response is treated as empty rather than an
/// error: no header lines and no body.
pub fn split(raw: &str) -> (Vec<String>, String) {
    match raw.find(HEADER_TERMINATOR) {
        Some(pos) => {
            let header_lines = raw[..pos]
                .split("\r\n")
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            let body = raw[pos + HEADER_TERMINATOR.len()..].to_string();
            (header_lines, body)
        }
        None => (Vec::new(), String::new()),
    }
}

/// Value of the first header whose name equals `name`, ignoring case.
///
/// The status line is never matched.
pub fn header_value(header_lines: &[String], name: &str) -> Option<String> {
    header_lines.iter().skip_while(|l| l.starts_with("HTTP/")).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Value after the first `:` of the first line containing `name` anywhere.
///
/// Loose lookup kept for servers and callers that relied on it; it can match
/// `name` inside another header's name or value.
pub fn header_value_containing(header_lines: &[String], name: &str) -> Option<String> {
    header_lines.iter().find(|line| line.contains(name)).map(|line| {
        match line.find(':') {
            Some(i) => line[i + 1..].trim().to_string(),
            None => line.trim().to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_response() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nHello";
        let response = Response::parse(raw);
        assert_eq!(response.header_lines, vec!["HTTP/1.1 200 OK", "Content-Type: text/plain"]);
        assert_eq!(response.body, "Hello");
        assert_eq!(header_value(&response.header_lines, "Content-Type").as_deref(), Some("text/plain"));
        assert_eq!(response.status_code(), Some(200));
        assert!(response.is_success());
    }

    #[test]
    fn test_missing_delimiter_is_empty() {
        let response = Response::parse("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n");
        assert!(response.header_lines.is_empty());
        assert!(response.body.is_empty());
        assert_eq!(response.status_code(), None);
    }

    #[test]
    fn test_body_keeps_later_blank_lines() {
        let (_, body) = split("HTTP/1.1 200 OK\r\n\r\nline1\r\n\r\nline2");
        assert_eq!(body, "line1\r\n\r\nline2");
    }

    #[test]
    fn test_duplicate_headers_preserved() {
        let response = Response::parse("HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n");
        assert_eq!(response.header_lines.len(), 3);
        assert_eq!(response.header("set-cookie").as_deref(), Some("a=1"));
    }

    #[test]
    fn test_exact_lookup_ignores_substring_matches() {
        let lines = vec![
            "HTTP/1.1 308 Resume Incomplete".to_string(),
            "X-Range-Info: none".to_string(),
            "Range: bytes=0-99".to_string(),
        ];
        assert_eq!(header_value(&lines, "range").as_deref(), Some("bytes=0-99"));
        assert_eq!(header_value_containing(&lines, "Range").as_deref(), Some("none"));
        assert_eq!(header_value(&lines, "Location"), None);
        assert_eq!(header_value_containing(&lines, "Location"), None);
    }

    #[test]
    fn test_value_with_colons() {
        let lines = vec!["HTTP/1.1 201 Created".to_string(), "Location: https://x.test:8443/a".to_string()];
        assert_eq!(header_value(&lines, "Location").as_deref(), Some("https://x.test:8443/a"));
    }

    #[test]
    fn test_lossy_decoding() {
        let mut raw = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0x66, 0xff, 0x67]);
        let response = Response::from_bytes(&raw);
        assert_eq!(response.body, "f\u{fffd}g");
    }
}
