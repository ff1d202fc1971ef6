//! A scripted HTTP peer for integration tests.
//!
//! Each connection carries one request. The responder receives the
//! zero-based request number and the recorded request and returns the raw
//! response, after which the connection is closed.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }
}

pub struct MockServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

/// Serve one response per connection, produced by `responder`
pub async fn serve<F>(responder: F) -> MockServer
where
    F: Fn(usize, &RecordedRequest) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        let mut count = 0;
        while let Ok((mut stream, _)) = listener.accept().await {
            let Some(request) = read_request(&mut stream).await else {
                continue;
            };
            let response = responder(count, &request);
            recorded.lock().push(request);
            count += 1;

            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    MockServer {
        base_url: format!("http://127.0.0.1:{}", port),
        requests,
    }
}

/// Accept connections and read requests without ever answering
pub async fn serve_silently() -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut stream).await {
                    recorded.lock().push(request);
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    MockServer {
        base_url: format!("http://127.0.0.1:{}", port),
        requests,
    }
}

pub fn response(status_line: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut raw = format!("HTTP/1.1 {}\r\n", status_line);
    for (name, value) in headers {
        raw.push_str(&format!("{}: {}\r\n", name, value));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    raw
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut block = [0u8; 4096];

    loop {
        let n = stream.read(&mut block).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&block[..n]);

        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..end]).into_owned();
            let length = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.eq_ignore_ascii_case("Content-Length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);

            let body_start = end + 4;
            while buffer.len() < body_start + length {
                let n = stream.read(&mut block).await.ok()?;
                if n == 0 {
                    return None;
                }
                buffer.extend_from_slice(&block[..n]);
            }

            return Some(RecordedRequest {
                head,
                body: buffer[body_start..body_start + length].to_vec(),
            });
        }
    }
}
