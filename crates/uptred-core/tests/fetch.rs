mod common;

use common::{response, serve, serve_silently};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use uptred_core::http::{Endpoint, Headers, Request};
use uptred_core::{UptredCore, UptredError};

async fn core() -> (tempfile::TempDir, UptredCore) {
    let dir = tempfile::tempdir().unwrap();
    let core = UptredCore::new(dir.path().to_path_buf()).await.unwrap();
    (dir, core)
}

#[tokio::test]
async fn fetch_sends_raw_request_and_frames_response() {
    let server = serve(|_, _| {
        response(
            "200 OK",
            &[("Content-Type", "application/json"), ("X-Request-Id", "abc")],
            r#"{"uri":"/videos/1"}"#,
        )
    })
    .await;
    let (_dir, core) = core().await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let paths = Arc::new(Mutex::new(Vec::new()));
    let traces = Arc::new(Mutex::new(Vec::new()));
    {
        let progress = progress.clone();
        core.set_progress_sink(Some(Arc::new(move |sent: u64, total: u64| progress.lock().push((sent, total)))));
        let paths = paths.clone();
        core.set_endpoint_sink(Some(Arc::new(move |path: &str| paths.lock().push(path.to_string()))));
        let traces = traces.clone();
        core.set_verbose_sink(Some(Arc::new(move |text: &str| traces.lock().push(text.to_string()))));
    }

    let url = server.url("/api/videos?fields=uri");
    let headers: Headers = [("Authorization", "Bearer token")].into_iter().collect();
    let response = core
        .request_raw(&url, "post", true, Some(r#"{"name":"clip"}"#), headers)
        .await
        .unwrap();

    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.header("content-type").as_deref(), Some("application/json"));
    assert_eq!(response.header("X-Request-Id").as_deref(), Some("abc"));
    assert_eq!(response.body, r#"{"uri":"/videos/1"}"#);
    assert!(!core.is_active());

    let recorded = server.recorded();
    assert_eq!(recorded.len(), 1);
    let request = &recorded[0];
    assert_eq!(request.request_line(), format!("POST {} HTTP/1.1", url));
    assert_eq!(request.header("Host"), Some(server.base_url.trim_start_matches("http://").to_string()));
    assert_eq!(request.header("Connection").as_deref(), Some("Close"));
    assert_eq!(request.header("Content-Type").as_deref(), Some("application/json; charset=utf-8"));
    assert_eq!(request.header("Authorization").as_deref(), Some("Bearer token"));
    assert_eq!(request.header("Content-Length").as_deref(), Some("15"));
    assert_eq!(request.body, br#"{"name":"clip"}"#);

    assert_eq!(progress.lock().last(), Some(&(15, 15)));
    assert_eq!(paths.lock().as_slice(), ["/api/videos".to_string()]);
    let traces = traces.lock();
    assert_eq!(traces[0], format!("Response from URL {}:", url));
    assert_eq!(traces[1], r#"{"uri":"/videos/1"}"#);
}

#[tokio::test]
async fn form_request_is_percent_encoded() {
    let server = serve(|_, _| response("201 Created", &[], "")).await;
    let (_dir, core) = core().await;

    let parameters = vec![
        ("title".to_string(), "My Video".to_string()),
        ("tags".to_string(), "a&b".to_string()),
    ];
    let response = core
        .request_form(&server.url("/form"), "PATCH", false, &parameters, Headers::new())
        .await
        .unwrap();
    assert_eq!(response.status_code(), Some(201));

    let request = &server.recorded()[0];
    assert!(request.request_line().starts_with("PATCH "));
    assert_eq!(
        request.header("Content-Type").as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(request.body, b"title=My%20Video&tags=a%26b");
}

#[tokio::test]
async fn empty_body_sends_no_content_type() {
    let server = serve(|_, _| response("204 No Content", &[], "")).await;
    let (_dir, core) = core().await;

    core.request_raw(&server.url("/ping"), "get", false, Some(""), Headers::new())
        .await
        .unwrap();
    core.request_raw(&server.url("/ping"), "get", true, None, Headers::new())
        .await
        .unwrap();

    for request in server.recorded() {
        assert_eq!(request.header("Content-Type"), None);
        assert_eq!(request.header("Content-Length").as_deref(), Some("0"));
        assert!(request.body.is_empty());
    }
}

#[tokio::test]
async fn whitespace_body_keeps_content_type_but_is_not_sent() {
    let server = serve(|_, _| response("204 No Content", &[], "")).await;
    let (_dir, core) = core().await;

    core.request_raw(&server.url("/ping"), "post", true, Some("   "), Headers::new())
        .await
        .unwrap();

    let request = &server.recorded()[0];
    assert_eq!(
        request.header("Content-Type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(request.header("Content-Length").as_deref(), Some("0"));
    assert!(request.body.is_empty());
}

#[tokio::test]
async fn malformed_response_is_empty_not_an_error() {
    let server = serve(|_, _| "garbage without a blank line".to_string()).await;
    let (_dir, core) = core().await;

    let response = core
        .request_raw(&server.url("/"), "GET", false, None, Headers::new())
        .await
        .unwrap();
    assert!(response.header_lines.is_empty());
    assert!(response.body.is_empty());
    assert_eq!(response.status_code(), None);
}

#[tokio::test]
async fn halt_cancels_fetch_in_flight() {
    let server = serve_silently().await;
    let (_dir, core) = core().await;

    let fetching = core.clone();
    let url = server.url("/slow");
    let handle = tokio::spawn(async move {
        let request = Request::new(Endpoint::parse(&url, "GET").unwrap());
        fetching.fetch(request, None).await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while !core.is_active() || server.recorded().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    core.halt();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(UptredError::Cancelled)));
    assert!(!core.is_active());

    // a halt only reaches fetches that were already running
    let answering = serve(|_, _| response("200 OK", &[], "ok")).await;
    let response = core
        .request_raw(&answering.url("/"), "GET", false, None, Headers::new())
        .await
        .unwrap();
    assert_eq!(response.body, "ok");
}

#[tokio::test]
async fn caller_token_cancels_only_its_fetch() {
    let server = serve_silently().await;
    let (_dir, core) = core().await;
    let token = tokio_util::sync::CancellationToken::new();

    let fetching = core.clone();
    let url = server.url("/slow");
    let fetch_token = token.clone();
    let handle = tokio::spawn(async move {
        let request = Request::new(Endpoint::parse(&url, "GET").unwrap());
        fetching.fetch(request, Some(&fetch_token)).await
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.recorded().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(UptredError::Cancelled)));
    assert!(!core.is_active());
}

#[tokio::test]
async fn verify_reads_range_header() {
    let server = serve(|n, _| match n {
        0 => response("308 Resume Incomplete", &[("Range", "bytes=0-1048575")], ""),
        _ => response("308 Resume Incomplete", &[], ""),
    })
    .await;
    let (_dir, core) = core().await;

    let feedback = core.verify_upload(&server.url("/upload"), 2_500_000).await.unwrap();
    assert_eq!(feedback.first_byte, 0);
    assert_eq!(feedback.last_byte, 1_048_575);
    assert_eq!(feedback.content_size, 2_500_000);

    let feedback = core.verify_upload(&server.url("/upload"), 2_500_000).await.unwrap();
    assert_eq!(feedback, Default::default());

    let request = &server.recorded()[0];
    assert!(request.request_line().starts_with("PUT "));
    assert_eq!(request.header("Content-Range").as_deref(), Some("bytes */2500000"));
    assert_eq!(request.header("Content-Length").as_deref(), Some("0"));
}
