//! Uptred Core - Chunked Transfer Engine
//!
//! This crate sends files to resumable upload endpoints over raw TCP/TLS.
//! It handles chunk planning, throttled request writes with progress and
//! cancellation, connection-close response framing, and resumable sessions.

pub mod chunk;
mod client;
pub mod codec;
pub mod engine;
mod error;
pub mod http;
pub mod payload;
mod state;
mod storage;

pub use client::*;
pub use error::*;
pub use state::*;
pub use storage::*;

use engine::{UploadDatabase, UploadTask};
use http::{Endpoint, Headers, Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uptred_types::{
    Chunk, ChunkState, TransferEvent, TransferSettings, UploadSession, UploadStatus, VerifyFeedback,
};
use uuid::Uuid;

/// Per-upload options that are not part of the stored session
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// HTTP method, `PUT` when absent
    pub method: Option<String>,
    /// Overrides the configured chunk size for new uploads
    pub chunk_size: Option<i64>,
    pub content_type: Option<String>,
    /// Extra headers sent with every chunk
    pub headers: Headers,
    /// Ask the server which bytes it holds before sending
    pub verify_first: bool,
}

/// Tokens of one running upload
#[derive(Clone)]
struct ActiveUpload {
    cancel: CancellationToken,
    /// Cancelled once the upload task has returned
    finished: CancellationToken,
}

/// Unregisters a running upload however its future ends
struct UploadSlot<'a> {
    uploads: &'a Mutex<HashMap<Uuid, ActiveUpload>>,
    id: Uuid,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        if let Some(upload) = self.uploads.lock().remove(&self.id) {
            upload.finished.cancel();
        }
    }
}

/// The main Uptred core instance
#[derive(Clone)]
pub struct UptredCore {
    pub storage: Storage,
    db: UploadDatabase,
    client: FetchClient,
    /// Event broadcaster
    event_tx: broadcast::Sender<TransferEvent>,
    /// Cancellation tokens of running uploads
    active_uploads: Arc<Mutex<HashMap<Uuid, ActiveUpload>>>,
}

impl UptredCore {
    pub async fn new(data_dir: PathBuf) -> Result<Self, UptredError> {
        let storage = Storage::new(data_dir).await?;
        let settings = storage.load_settings().await?;
        let db = UploadDatabase::new(storage.database_path()).await?;
        let (event_tx, _) = broadcast::channel(1000);

        info!("Uptred core ready in {}", storage.data_dir().display());

        Ok(Self {
            storage,
            db,
            client: FetchClient::new(settings),
            event_tx,
            active_uploads: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    pub fn state(&self) -> &Arc<TransferState> {
        self.client.state()
    }

    // ========================================================================
    // Transfer control
    // ========================================================================

    /// Whether any fetch is in progress
    pub fn is_active(&self) -> bool {
        self.client.state().is_active()
    }

    /// Cancel every fetch in flight and every running upload
    pub fn halt(&self) {
        self.client.state().halt();
    }

    pub fn set_verbose_sink(&self, sink: Option<TextSink>) {
        self.client.state().set_verbose_sink(sink);
    }

    pub fn set_progress_sink(&self, sink: Option<ProgressSink>) {
        self.client.state().set_progress_sink(sink);
    }

    pub fn set_endpoint_sink(&self, sink: Option<TextSink>) {
        self.client.state().set_endpoint_sink(sink);
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub async fn fetch(&self, request: Request, cancel: Option<&CancellationToken>) -> Result<Response, UptredError> {
        self.client.fetch(request, cancel).await
    }

    pub async fn request_raw(
        &self,
        url: &str,
        method: &str,
        json_body: bool,
        body: Option<&str>,
        headers: Headers,
    ) -> Result<Response, UptredError> {
        self.client.request_raw(url, method, json_body, body, headers).await
    }

    pub async fn request_form(
        &self,
        url: &str,
        method: &str,
        json_body: bool,
        parameters: &[(String, String)],
        headers: Headers,
    ) -> Result<Response, UptredError> {
        self.client.request_form(url, method, json_body, parameters, headers).await
    }

    pub async fn verify_upload(&self, url: &str, content_size: i64) -> Result<VerifyFeedback, UptredError> {
        self.client.verify_upload(url, content_size, None).await
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Size of `path` and its chunks at `chunk_size` (or the configured size)
    pub async fn plan_chunks(&self, path: &Path, chunk_size: Option<i64>) -> Result<(i64, Vec<Chunk>), UptredError> {
        let file_size = tokio::fs::metadata(path).await?.len() as i64;
        let chunk_size = chunk_size.unwrap_or(self.client.settings().chunk_size);
        Ok((file_size, chunk::plan(file_size, chunk_size)))
    }

    /// Create a session for `path` and upload it.
    ///
    /// Completes when the upload finishes, fails, or is cancelled through
    /// [`UptredCore::cancel_upload`] or [`UptredCore::halt`].
    pub async fn start_upload(
        &self,
        path: &Path,
        url: &str,
        options: UploadOptions,
    ) -> Result<UploadSession, UptredError> {
        let method = options.method.clone().unwrap_or_else(|| "PUT".to_string()).to_uppercase();
        Endpoint::parse(url, &method)?;

        let chunk_size = options.chunk_size.unwrap_or(self.client.settings().chunk_size);
        if chunk_size == 0 {
            return Err(UptredError::InvalidInput("chunk size must not be zero".to_string()));
        }

        let (file_size, chunks) = self.plan_chunks(path, Some(chunk_size)).await?;
        if file_size == 0 {
            return Err(UptredError::InvalidInput(format!("{} is empty", path.display())));
        }

        let file_path = tokio::fs::canonicalize(path).await?;
        let mut session = UploadSession::new(url.to_string(), method, file_path, file_size, chunk_size);
        session.chunks = chunks
            .into_iter()
            .map(|chunk| ChunkState { chunk, complete: false })
            .collect();
        self.db.upsert_upload(&session).await?;

        info!("Created upload {} ({} chunks)", session.id, session.chunks.len());
        self.run_upload(session, options).await
    }

    /// Continue a stored upload, sending only chunks not yet accepted
    pub async fn resume_upload(&self, id: Uuid, options: UploadOptions) -> Result<UploadSession, UptredError> {
        let session = self.get_upload(id).await?;
        if session.status == UploadStatus::Completed {
            info!("Upload {} already completed", id);
            return Ok(session);
        }
        self.run_upload(session, options).await
    }

    async fn run_upload(&self, session: UploadSession, options: UploadOptions) -> Result<UploadSession, UptredError> {
        let id = session.id;
        let cancel = self.client.state().halt_child();
        {
            let mut active = self.active_uploads.lock();
            if active.contains_key(&id) {
                return Err(UptredError::InvalidInput(format!("upload {} is already running", id)));
            }
            active.insert(
                id,
                ActiveUpload {
                    cancel: cancel.clone(),
                    finished: CancellationToken::new(),
                },
            );
        }
        let _slot = UploadSlot {
            uploads: &self.active_uploads,
            id,
        };

        let mut task = UploadTask::new(session, self.client.clone(), self.db.clone(), self.event_tx.clone(), cancel)
            .with_headers(options.headers)
            .verify_first(options.verify_first);
        if let Some(content_type) = options.content_type {
            task = task.with_content_type(content_type);
        }

        task.run().await
    }

    /// Stop a running upload, or mark a stored one cancelled
    pub async fn cancel_upload(&self, id: Uuid) -> Result<(), UptredError> {
        if let Some(upload) = self.active_uploads.lock().get(&id) {
            upload.cancel.cancel();
            return Ok(());
        }

        let session = self.get_upload(id).await?;
        if session.status != UploadStatus::Completed {
            self.db.update_status(id, UploadStatus::Cancelled, None).await?;
            let _ = self.event_tx.send(TransferEvent::UploadStatusChanged {
                id,
                status: UploadStatus::Cancelled,
                error: None,
            });
        }
        Ok(())
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadSession>, UptredError> {
        self.db.load_all_uploads().await
    }

    pub async fn get_upload(&self, id: Uuid) -> Result<UploadSession, UptredError> {
        self.db.load_upload(id).await?.ok_or(UptredError::NotFound(id))
    }

    /// Delete a stored upload.
    ///
    /// A running upload is cancelled and waited for first, so its final
    /// status write cannot recreate the deleted rows.
    pub async fn delete_upload(&self, id: Uuid) -> Result<(), UptredError> {
        let running = self.active_uploads.lock().get(&id).cloned();
        if let Some(upload) = running {
            upload.cancel.cancel();
            upload.finished.cancelled().await;
        }
        if !self.db.delete_upload(id).await? {
            return Err(UptredError::NotFound(id));
        }
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> TransferSettings {
        self.client.settings()
    }

    /// Persist `settings` and apply them to subsequent fetches
    pub async fn update_settings(&self, settings: TransferSettings) -> Result<(), UptredError> {
        self.storage.save_settings(&settings).await?;
        self.client.apply_settings(settings).await;
        Ok(())
    }

    pub async fn reset_settings(&self) -> Result<TransferSettings, UptredError> {
        let settings = TransferSettings::default();
        self.update_settings(settings.clone()).await?;
        Ok(settings)
    }
}
