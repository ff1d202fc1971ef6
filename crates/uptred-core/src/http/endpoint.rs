//! Request endpoints: target URL, method, and connection parameters

use crate::error::UptredError;
use url::Url;

/// Transport mode selected by the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Where and how a request is sent
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// URL exactly as supplied; used verbatim as the request target
    raw: String,
    url: Url,
    scheme: Scheme,
    method: String,
    host_override: Option<String>,
}

impl Endpoint {
    pub fn parse(url: &str, method: &str) -> Result<Self, UptredError> {
        let parsed = Url::parse(url).map_err(|_| UptredError::InvalidUrl(url.to_string()))?;

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(UptredError::InvalidUrl(url.to_string())),
        };
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(UptredError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            raw: url.to_string(),
            url: parsed,
            scheme,
            method: method.to_string(),
            host_override: None,
        })
    }

    /// Send a different `Host` header than the URL's authority
    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host_override = host.filter(|h| !h.is_empty());
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.raw
    }

    /// Host name to resolve and to present for TLS identity
    pub fn host(&self) -> &str {
        // checked non-empty in `parse`
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or_else(|| self.scheme.default_port())
    }

    /// Value of the `Host` request header
    pub fn host_header(&self) -> String {
        if let Some(host) = &self.host_override {
            return host.clone();
        }
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Path component of the URL, as reported to the endpoint sink
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_defaults() {
        let endpoint = Endpoint::parse("https://api.example.com/upload?ticket=1", "PUT").unwrap();
        assert_eq!(endpoint.scheme(), Scheme::Https);
        assert_eq!(endpoint.port(), 443);
        assert_eq!(endpoint.host(), "api.example.com");
        assert_eq!(endpoint.host_header(), "api.example.com");
        assert_eq!(endpoint.path(), "/upload");
        assert_eq!(endpoint.target(), "https://api.example.com/upload?ticket=1");
    }

    #[test]
    fn test_explicit_port_and_host_override() {
        let endpoint = Endpoint::parse("http://127.0.0.1:8080/x", "GET").unwrap();
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.host_header(), "127.0.0.1:8080");

        let endpoint = endpoint.with_host(Some("upload.example.com".into()));
        assert_eq!(endpoint.host_header(), "upload.example.com");
        assert_eq!(endpoint.host(), "127.0.0.1");
    }

    #[test]
    fn test_rejects_unsupported_urls() {
        assert!(matches!(
            Endpoint::parse("ftp://example.com/file", "GET"),
            Err(UptredError::InvalidUrl(_))
        ));
        assert!(Endpoint::parse("not a url", "GET").is_err());
    }
}
