//! Upload task - drives one file to one upload URL, chunk by chunk
//!
//! Chunks are sent in order. Each accepted chunk is persisted before the
//! next one starts, so a task rebuilt from the database only sends what
//! is still missing.

use crate::client::FetchClient;
use crate::engine::UploadDatabase;
use crate::error::UptredError;
use crate::http::{Endpoint, Headers, Request};
use crate::payload;
use crate::state::ProgressSink;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uptred_types::{Chunk, ChunkState, TransferEvent, UploadSession, UploadStatus};

pub const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// A chunked upload of a single session
pub struct UploadTask {
    pub session: UploadSession,
    client: FetchClient,
    db: UploadDatabase,
    event_tx: broadcast::Sender<TransferEvent>,
    cancel: CancellationToken,
    /// Extra headers sent with every chunk
    headers: Headers,
    content_type: String,
    max_attempts: u32,
    retry_delay: Duration,
    /// Ask the server what it already holds before sending anything
    verify_first: bool,
    /// Highest `uploaded` value reported so far
    reported: Arc<AtomicI64>,
}

impl UploadTask {
    pub fn new(
        session: UploadSession,
        client: FetchClient,
        db: UploadDatabase,
        event_tx: broadcast::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let settings = client.settings();
        Self {
            session,
            client,
            db,
            event_tx,
            cancel,
            headers: Headers::new(),
            content_type: DEFAULT_UPLOAD_CONTENT_TYPE.to_string(),
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_secs(u64::from(settings.retry_delay_seconds)),
            verify_first: false,
            reported: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn verify_first(mut self, verify: bool) -> Self {
        self.verify_first = verify;
        self
    }

    /// Run the upload to completion, failure, or cancellation.
    ///
    /// Returns the final session. A cancelled upload is not an error; its
    /// status says so.
    pub async fn run(mut self) -> Result<UploadSession, UptredError> {
        info!(
            "Starting upload {} of {} ({} bytes) to {}",
            self.session.id,
            self.session.file_name(),
            self.session.file_size,
            self.session.url
        );

        if self.cancel.is_cancelled() {
            self.set_status(UploadStatus::Cancelled, None).await?;
            return Ok(self.session);
        }

        match self.transfer().await {
            Ok(()) => {
                self.set_status(UploadStatus::Completed, None).await?;
                info!("Upload completed: {}", self.session.file_name());
                Ok(self.session)
            }
            Err(UptredError::Cancelled) => {
                info!("Upload cancelled: {}", self.session.file_name());
                self.set_status(UploadStatus::Cancelled, None).await?;
                Ok(self.session)
            }
            Err(e) => {
                error!("Upload failed: {} - {}", self.session.file_name(), e);
                self.set_status(UploadStatus::Failed, Some(e.to_string())).await?;
                Err(e)
            }
        }
    }

    async fn transfer(&mut self) -> Result<(), UptredError> {
        let file_size = tokio::fs::metadata(&self.session.file_path).await?.len() as i64;
        if file_size != self.session.file_size {
            return Err(UptredError::InvalidInput(format!(
                "{} changed size since the upload started ({} -> {} bytes)",
                self.session.file_path.display(),
                self.session.file_size,
                file_size
            )));
        }

        if self.session.chunks.is_empty() {
            self.session.chunks = crate::chunk::plan(self.session.file_size, self.session.chunk_size)
                .into_iter()
                .map(|chunk| ChunkState { chunk, complete: false })
                .collect();
            info!("Planned {} chunks", self.session.chunks.len());
        }

        self.session.status = UploadStatus::Uploading;
        self.session.error = None;
        self.db.upsert_upload(&self.session).await?;
        self.emit(TransferEvent::UploadStatusChanged {
            id: self.session.id,
            status: UploadStatus::Uploading,
            error: None,
        });

        if self.verify_first {
            self.apply_verification().await?;
        }

        self.emit(TransferEvent::UploadProgress {
            id: self.session.id,
            uploaded: self.session.uploaded(),
            total: self.session.file_size,
        });

        let pending: Vec<Chunk> = self
            .session
            .chunks
            .iter()
            .filter(|c| !c.complete)
            .map(|c| c.chunk)
            .collect();

        for chunk in pending {
            self.send_with_retries(&chunk).await?;

            if let Some(state) = self.session.chunks.iter_mut().find(|c| c.chunk.index == chunk.index) {
                state.complete = true;
            }
            self.db.update_chunk(self.session.id, chunk.index, true).await?;
            self.emit(TransferEvent::ChunkCompleted {
                id: self.session.id,
                index: chunk.index,
            });
        }

        Ok(())
    }

    /// Mark chunks the server already holds as complete
    async fn apply_verification(&mut self) -> Result<(), UptredError> {
        let feedback = match self
            .client
            .verify_upload(&self.session.url, self.session.file_size, Some(&self.cancel))
            .await
        {
            Ok(feedback) => feedback,
            Err(UptredError::Cancelled) => return Err(UptredError::Cancelled),
            Err(e) => {
                warn!("Verification of {} failed, sending every pending chunk: {}", self.session.id, e);
                return Ok(());
            }
        };

        let mut newly_complete = Vec::new();
        for state in self.session.chunks.iter_mut().filter(|c| !c.complete) {
            if feedback.covers(&state.chunk) {
                state.complete = true;
                newly_complete.push(state.chunk.index);
            }
        }

        for index in newly_complete {
            self.db.update_chunk(self.session.id, index, true).await?;
            self.emit(TransferEvent::ChunkCompleted {
                id: self.session.id,
                index,
            });
        }

        info!(
            "Server holds bytes {}-{} of {}; {} of {} bytes already uploaded",
            feedback.first_byte,
            feedback.last_byte,
            feedback.content_size,
            self.session.uploaded(),
            self.session.file_size
        );
        Ok(())
    }

    async fn send_with_retries(&self, chunk: &Chunk) -> Result<(), UptredError> {
        let mut attempt = 1;
        loop {
            match self.send_chunk(chunk).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "Chunk {} of {} failed (attempt {}/{}): {}",
                        chunk.index, self.session.id, attempt, self.max_attempts, e
                    );
                    self.emit(TransferEvent::ChunkRetrying {
                        id: self.session.id,
                        index: chunk.index,
                        attempt,
                        error: e.to_string(),
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UptredError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_chunk(&self, chunk: &Chunk) -> Result<(), UptredError> {
        let data = payload::read_range(&self.session.file_path, chunk.offset, Some(chunk.size)).await?;
        if data.len() as i64 != chunk.size {
            return Err(UptredError::InvalidInput(format!(
                "chunk {} expected {} bytes, read {}",
                chunk.index,
                chunk.size,
                data.len()
            )));
        }

        let endpoint = Endpoint::parse(&self.session.url, &self.session.method)?;
        let request = Request::new(endpoint)
            .headers(self.headers.clone())
            .header("Content-Range", chunk.content_range(self.session.file_size))
            .content_type(Some(self.content_type.clone()))
            .body(data);

        debug!(
            "Sending chunk {} ({}) of {}",
            chunk.index,
            chunk.content_range(self.session.file_size),
            self.session.id
        );

        let response = self
            .client
            .fetch_with_progress(request, Some(&self.cancel), Some(self.progress_sink()))
            .await?;

        match response.status_code() {
            Some(200..=299) | Some(308) => Ok(()),
            Some(status) => Err(UptredError::Server {
                status,
                message: format!("chunk {} rejected: {}", chunk.index, response.body.trim()),
            }),
            None => Err(UptredError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("no status line in response to chunk {}", chunk.index),
            ))),
        }
    }

    /// Forward per-request progress to the registered sink and as
    /// session-wide progress events.
    ///
    /// Session progress never goes backwards; a retried chunk reports the
    /// high-water mark until it passes it again.
    fn progress_sink(&self) -> ProgressSink {
        let registered = self.client.state().progress_sink();
        let event_tx = self.event_tx.clone();
        let reported = self.reported.clone();
        let id = self.session.id;
        let base = self.session.uploaded();
        let total = self.session.file_size;

        Arc::new(move |sent: u64, request_total: u64| {
            if let Some(sink) = &registered {
                sink(sent, request_total);
            }
            let uploaded = base + sent as i64;
            let uploaded = reported.fetch_max(uploaded, Ordering::AcqRel).max(uploaded);
            let _ = event_tx.send(TransferEvent::UploadProgress { id, uploaded, total });
        })
    }

    async fn set_status(&mut self, status: UploadStatus, error: Option<String>) -> Result<(), UptredError> {
        self.session.status = status;
        self.session.error = error.clone();
        if status == UploadStatus::Completed {
            self.session.completed_at = Some(chrono::Utc::now());
        }
        self.db.upsert_upload(&self.session).await?;
        self.emit(TransferEvent::UploadStatusChanged {
            id: self.session.id,
            status,
            error,
        });
        Ok(())
    }

    fn emit(&self, event: TransferEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
