//! SQLite-based persistence layer for upload sessions
//!
//! Stores sessions and their chunks so an interrupted upload can resume
//! with only the chunks the server has not accepted yet.

use crate::error::UptredError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uptred_types::{Chunk, ChunkState, UploadSession, UploadStatus};
use uuid::Uuid;

/// Database connection pool for upload persistence
#[derive(Clone, Debug)]
pub struct UploadDatabase {
    pool: SqlitePool,
}

impl UploadDatabase {
    /// Open (and create if missing) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, UptredError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chunks (
                upload_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                offset_byte INTEGER NOT NULL,
                size INTEGER NOT NULL,
                complete INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (upload_id, chunk_index),
                FOREIGN KEY (upload_id) REFERENCES uploads(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);
            CREATE INDEX IF NOT EXISTS idx_chunks_upload ON chunks(upload_id);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Save or replace a session and all of its chunks
    pub async fn upsert_upload(&self, session: &UploadSession) -> Result<(), UptredError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, url, method, file_path, file_size, chunk_size,
                status, error, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                method = excluded.method,
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                chunk_size = excluded.chunk_size,
                status = excluded.status,
                error = excluded.error,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.url)
        .bind(&session.method)
        .bind(session.file_path.to_string_lossy().to_string())
        .bind(session.file_size)
        .bind(session.chunk_size)
        .bind(session.status.as_str())
        .bind(session.error.as_ref())
        .bind(session.created_at.to_rfc3339())
        .bind(session.completed_at.map(|d| d.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE upload_id = ?")
            .bind(session.id.to_string())
            .execute(&mut *tx)
            .await?;

        for state in &session.chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (upload_id, chunk_index, offset_byte, size, complete)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.id.to_string())
            .bind(state.chunk.index)
            .bind(state.chunk.offset)
            .bind(state.chunk.size)
            .bind(i64::from(state.complete))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_upload(&self, id: Uuid) -> Result<Option<UploadSession>, UptredError> {
        let row = sqlx::query("SELECT * FROM uploads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let chunks = sqlx::query("SELECT * FROM chunks WHERE upload_id = ? ORDER BY chunk_index")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_chunk)
            .collect();

        Ok(Some(row_to_session(row, chunks)?))
    }

    /// Load every session, newest first
    pub async fn load_all_uploads(&self) -> Result<Vec<UploadSession>, UptredError> {
        let upload_rows = sqlx::query("SELECT * FROM uploads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        let chunk_rows = sqlx::query("SELECT * FROM chunks ORDER BY upload_id, chunk_index")
            .fetch_all(&self.pool)
            .await?;

        let mut chunks_map: HashMap<String, Vec<ChunkState>> = HashMap::new();
        for row in &chunk_rows {
            let upload_id: String = row.get("upload_id");
            chunks_map.entry(upload_id).or_default().push(row_to_chunk(row));
        }

        let mut sessions = Vec::with_capacity(upload_rows.len());
        for row in upload_rows {
            let id: String = row.get("id");
            let chunks = chunks_map.remove(&id).unwrap_or_default();
            sessions.push(row_to_session(row, chunks)?);
        }

        Ok(sessions)
    }

    pub async fn update_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: i64,
        complete: bool,
    ) -> Result<(), UptredError> {
        sqlx::query("UPDATE chunks SET complete = ? WHERE upload_id = ? AND chunk_index = ?")
            .bind(i64::from(complete))
            .bind(upload_id.to_string())
            .bind(chunk_index)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn update_status(
        &self,
        upload_id: Uuid,
        status: UploadStatus,
        error: Option<String>,
    ) -> Result<(), UptredError> {
        let completed_at = (status == UploadStatus::Completed).then(|| Utc::now().to_rfc3339());
        sqlx::query(
            r#"
            UPDATE uploads
            SET status = ?, error = ?, completed_at = COALESCE(?, completed_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(completed_at)
        .bind(upload_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a session and its chunks; returns whether it existed
    pub async fn delete_upload(&self, upload_id: Uuid) -> Result<bool, UptredError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE upload_id = ?")
            .bind(upload_id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(upload_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_chunk(row: &SqliteRow) -> ChunkState {
    ChunkState {
        chunk: Chunk::new(
            row.get::<i64, _>("chunk_index"),
            row.get::<i64, _>("offset_byte"),
            row.get::<i64, _>("size"),
        ),
        complete: row.get::<i64, _>("complete") != 0,
    }
}

fn row_to_session(row: SqliteRow, chunks: Vec<ChunkState>) -> Result<UploadSession, UptredError> {
    let parse_time = |s: &str| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| UptredError::InvalidInput(format!("bad timestamp {}: {}", s, e)))
    };

    let id: String = row.get("id");
    Ok(UploadSession {
        id: Uuid::parse_str(&id).map_err(|e| UptredError::InvalidInput(e.to_string()))?,
        url: row.get("url"),
        method: row.get("method"),
        file_path: PathBuf::from(row.get::<String, _>("file_path")),
        file_size: row.get("file_size"),
        chunk_size: row.get("chunk_size"),
        chunks,
        status: UploadStatus::parse(row.get::<String, _>("status").as_str()),
        error: row.get("error"),
        created_at: parse_time(row.get::<String, _>("created_at").as_str())?,
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .and_then(|s| parse_time(&s).ok()),
    })
}
