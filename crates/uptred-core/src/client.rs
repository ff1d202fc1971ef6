//! Fetch client - one request, one connection
//!
//! A fetch connects, writes the rendered request through the throttled
//! writer, reads until the server closes the connection, and frames the
//! result. The shared [`TransferState`] is marked active for the duration of
//! every fetch and released on every exit path.

use crate::codec;
use crate::engine::RateLimiter;
use crate::error::UptredError;
use crate::http::{self, Endpoint, Headers, Request, Response, Throttle, Transport};
use crate::state::{ProgressSink, TransferState};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uptred_types::{CertificatePolicy, TransferSettings, VerifyFeedback};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Client that performs fetches over raw sockets
#[derive(Clone)]
pub struct FetchClient {
    state: Arc<TransferState>,
    settings: Arc<RwLock<TransferSettings>>,
    strict: TlsConnector,
    accept_any: TlsConnector,
    limiter: RateLimiter,
}

impl FetchClient {
    pub fn new(settings: TransferSettings) -> Self {
        let state = Arc::new(TransferState::new(settings.throttle_rate));
        let limiter = RateLimiter::from_limit(settings.speed_limit);

        Self {
            state,
            settings: Arc::new(RwLock::new(settings)),
            strict: http::connector(CertificatePolicy::Strict),
            accept_any: http::connector(CertificatePolicy::AcceptAny),
            limiter,
        }
    }

    pub fn state(&self) -> &Arc<TransferState> {
        &self.state
    }

    pub fn settings(&self) -> TransferSettings {
        self.settings.read().clone()
    }

    /// Replace the settings used by subsequent fetches
    pub async fn apply_settings(&self, settings: TransferSettings) {
        self.state.set_throttle_rate(settings.throttle_rate);
        self.limiter.set_limit(settings.speed_limit).await;
        *self.settings.write() = settings;
    }

    /// Send `request`, reporting progress to the registered progress sink
    pub async fn fetch(
        &self,
        request: Request,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, UptredError> {
        let progress = self.state.progress_sink();
        self.fetch_with_progress(request, cancel, progress).await
    }

    /// Send `request`, reporting progress to `progress` instead of the
    /// registered sink
    pub async fn fetch_with_progress(
        &self,
        mut request: Request,
        cancel: Option<&CancellationToken>,
        progress: Option<ProgressSink>,
    ) -> Result<Response, UptredError> {
        let active = self.state.begin(cancel);
        let settings = self.settings();
        let target = request.endpoint.target().to_string();

        self.state.report_endpoint(request.endpoint.path());

        if let Some(agent) = &settings.user_agent {
            if request.headers.get_all("User-Agent").next().is_none() {
                request.headers.append("User-Agent", agent.clone());
            }
        }

        let buffer = request.to_bytes();
        let total = request.content_length() as u64;
        debug!(
            "{} {} ({} header bytes, {} body bytes)",
            request.endpoint.method(),
            target,
            buffer.len() as u64 - total,
            total
        );

        let result = async {
            let connector = match settings.certificate_policy {
                CertificatePolicy::Strict => &self.strict,
                CertificatePolicy::AcceptAny => &self.accept_any,
            };
            let mut transport = Transport::connect(
                &request.endpoint,
                connector,
                Duration::from_secs(settings.connect_timeout_seconds),
                active.token(),
            )
            .await?;

            http::send_throttled(
                &mut transport,
                &buffer,
                Throttle {
                    rate: self.state.throttle_rate(),
                    total,
                    progress: progress.as_ref(),
                    cancel: active.token(),
                    limiter: Some(&self.limiter),
                },
            )
            .await?;

            let raw = http::receive_all(
                &mut transport,
                Duration::from_secs(settings.read_idle_timeout_seconds),
                active.token(),
            )
            .await?;

            Ok::<_, UptredError>(Response::from_bytes(&raw))
        }
        .await;

        match result {
            Ok(response) => {
                info!(
                    "{} {} -> {}",
                    request.endpoint.method(),
                    target,
                    response.header_lines.first().map(String::as_str).unwrap_or("<no status line>")
                );
                self.state.trace(&format!("Response from URL {}:", target));
                self.state.trace(&response.body);
                Ok(response)
            }
            Err(e) => {
                warn!("{} {} failed: {}", request.endpoint.method(), target, e);
                Err(e)
            }
        }
    }

    /// Send a text body.
    ///
    /// The method is upper-cased. `json_body` selects the JSON content type,
    /// otherwise the form content type is used. An absent or empty body
    /// carries no content type; a whitespace-only body keeps the content type
    /// but is not sent.
    pub async fn request_raw(
        &self,
        url: &str,
        method: &str,
        json_body: bool,
        body: Option<&str>,
        headers: Headers,
    ) -> Result<Response, UptredError> {
        let endpoint = Endpoint::parse(url, &method.to_uppercase())?;
        let mut request = Request::new(endpoint).headers(headers);

        if let Some(body) = body.filter(|b| !b.is_empty()) {
            let content_type = if json_body { JSON_CONTENT_TYPE } else { FORM_CONTENT_TYPE };
            request = request.content_type(Some(content_type.to_string()));
            if !body.trim().is_empty() {
                request = request.body(body.as_bytes().to_vec());
            }
        }

        self.fetch(request, None).await
    }

    /// Send string pairs, form-encoded or as a JSON object
    pub async fn request_form(
        &self,
        url: &str,
        method: &str,
        json_body: bool,
        parameters: &[(String, String)],
        headers: Headers,
    ) -> Result<Response, UptredError> {
        let pairs = parameters.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        let body = if json_body {
            codec::json_encode(pairs)
        } else {
            codec::key_value_to_string(pairs)
        };
        self.request_raw(url, method, json_body, Some(&body), headers).await
    }

    /// Ask a resumable upload endpoint which bytes it already holds
    pub async fn verify_upload(
        &self,
        url: &str,
        content_size: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<VerifyFeedback, UptredError> {
        let endpoint = Endpoint::parse(url, "PUT")?;
        let request = Request::new(endpoint).header("Content-Range", format!("bytes */{}", content_size));

        let response = self.fetch_with_progress(request, cancel, None).await?;
        match response.status_code() {
            Some(200..=299) | Some(308) => {}
            Some(status) => {
                return Err(UptredError::Server {
                    status,
                    message: format!("verification of {} failed", url),
                })
            }
            None => {
                return Err(UptredError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "empty or malformed verification response",
                )))
            }
        }

        let feedback = response
            .header("Range")
            .map(|range| parse_range_header(&range, content_size))
            .unwrap_or_default();
        debug!("Verified {}: {:?}", url, feedback);
        Ok(feedback)
    }
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("state", &self.state)
            .field("settings", &*self.settings.read())
            .finish_non_exhaustive()
    }
}

/// Parse `bytes=F-L` into the confirmed range.
///
/// Anything unparseable yields an empty range.
pub fn parse_range_header(value: &str, content_size: i64) -> VerifyFeedback {
    let range = value.trim();
    let range = range.strip_prefix("bytes=").unwrap_or(range);
    // only the first range of a list is considered
    let range = range.split(',').next().unwrap_or_default();

    let parsed = range
        .split_once('-')
        .and_then(|(first, last)| Some((first.trim().parse::<i64>().ok()?, last.trim().parse::<i64>().ok()?)));

    match parsed {
        Some((first_byte, last_byte)) if first_byte <= last_byte => VerifyFeedback {
            first_byte,
            last_byte,
            content_size,
        },
        _ => VerifyFeedback::default(),
    }
}
