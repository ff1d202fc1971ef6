//! Shared types for Uptred
//!
//! This crate contains the data structures shared between the transfer
//! engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Default chunk size for split uploads (1 MiB)
pub const DEFAULT_CHUNK_SIZE: i64 = 1024 * 1024;

/// Default number of attempts for an outer retry wrapper
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default number of body bytes written between progress notifications
pub const DEFAULT_THROTTLE_RATE: u32 = 10_240;

// ============================================================================
// Chunk Types
// ============================================================================

/// A contiguous byte range of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: i64,
    pub offset: i64,
    pub size: i64,
}

impl Chunk {
    pub fn new(index: i64, offset: i64, size: i64) -> Self {
        Self { index, offset, size }
    }

    /// Offset of the last byte in this chunk (inclusive)
    pub fn last_byte(&self) -> i64 {
        self.offset + self.size - 1
    }

    /// Value for a `Content-Range` request header covering this chunk
    pub fn content_range(&self, total: i64) -> String {
        format!("bytes {}-{}/{}", self.offset, self.last_byte(), total)
    }
}

/// Byte range a server confirmed it holds for a resumable upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyFeedback {
    pub first_byte: i64,
    pub last_byte: i64,
    pub content_size: i64,
}

impl VerifyFeedback {
    /// Whether the server reported holding every byte of the content
    pub fn is_complete(&self) -> bool {
        self.content_size > 0 && self.first_byte == 0 && self.last_byte + 1 >= self.content_size
    }

    /// Whether the confirmed range fully covers `chunk`
    pub fn covers(&self, chunk: &Chunk) -> bool {
        if self.content_size == 0 || chunk.size <= 0 {
            return false;
        }
        chunk.offset >= self.first_byte && chunk.last_byte() <= self.last_byte
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// How server certificates are checked during the TLS handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificatePolicy {
    /// Verify the chain against the bundled web PKI roots and the host name
    #[default]
    Strict,
    /// Accept any certificate the server presents
    AcceptAny,
}

impl std::str::FromStr for CertificatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept-any" | "insecure" => Ok(Self::AcceptAny),
            other => Err(format!("Invalid certificate policy: {}", other)),
        }
    }
}

/// Transfer engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Chunk size in bytes for split uploads
    pub chunk_size: i64,
    /// Attempts per chunk before an upload is marked failed
    pub max_attempts: u32,
    /// Delay in seconds between retry attempts
    pub retry_delay_seconds: u32,
    /// Body bytes written per progress step (0 disables throttling)
    pub throttle_rate: u32,
    /// Bandwidth cap in bytes per second (None = unlimited)
    pub speed_limit: Option<u64>,
    pub connect_timeout_seconds: u64,
    /// Maximum time a single response read may wait for data
    pub read_idle_timeout_seconds: u64,
    pub certificate_policy: CertificatePolicy,
    pub user_agent: Option<String>,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_seconds: 2,
            throttle_rate: DEFAULT_THROTTLE_RATE,
            speed_limit: None,
            connect_timeout_seconds: 30,
            read_idle_timeout_seconds: 120,
            certificate_policy: CertificatePolicy::Strict,
            user_agent: None,
        }
    }
}

// ============================================================================
// Upload Types
// ============================================================================

/// A chunked upload of one file to one upload URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub url: String,
    pub method: String,
    pub file_path: PathBuf,
    pub file_size: i64,
    pub chunk_size: i64,
    pub chunks: Vec<ChunkState>,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(url: String, method: String, file_path: PathBuf, file_size: i64, chunk_size: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            method,
            file_path,
            file_size,
            chunk_size,
            chunks: Vec::new(),
            status: UploadStatus::Pending,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Bytes belonging to chunks the server has accepted
    pub fn uploaded(&self) -> i64 {
        self.chunks
            .iter()
            .filter(|c| c.complete)
            .map(|c| c.chunk.size.max(0))
            .sum()
    }

    pub fn progress(&self) -> f64 {
        if self.file_size > 0 {
            (self.uploaded() as f64 / self.file_size as f64) * 100.0
        } else if self.status == UploadStatus::Completed {
            100.0
        } else {
            0.0
        }
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

/// A planned chunk and whether the server has accepted it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub chunk: Chunk,
    pub complete: bool,
}

/// Status of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "uploading" => UploadStatus::Uploading,
            "completed" => UploadStatus::Completed,
            "failed" => UploadStatus::Failed,
            "cancelled" => UploadStatus::Cancelled,
            _ => UploadStatus::Pending,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the engine to front ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    UploadProgress {
        id: Uuid,
        uploaded: i64,
        total: i64,
    },
    ChunkCompleted {
        id: Uuid,
        index: i64,
    },
    ChunkRetrying {
        id: Uuid,
        index: i64,
        attempt: u32,
        error: String,
    },
    UploadStatusChanged {
        id: Uuid,
        status: UploadStatus,
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_content_range_is_inclusive() {
        let chunk = Chunk::new(1, 1_048_576, 1_048_576);
        assert_eq!(chunk.content_range(2_500_000), "bytes 1048576-2097151/2500000");
    }

    #[test]
    fn verify_feedback_coverage() {
        let feedback = VerifyFeedback {
            first_byte: 0,
            last_byte: 199,
            content_size: 250,
        };
        assert!(feedback.covers(&Chunk::new(0, 0, 100)));
        assert!(feedback.covers(&Chunk::new(1, 100, 100)));
        assert!(!feedback.covers(&Chunk::new(2, 200, 50)));
        assert!(!feedback.is_complete());
        assert!(!VerifyFeedback::default().covers(&Chunk::new(0, 0, 1)));
    }

    #[test]
    fn settings_defaults_survive_partial_json() {
        let settings: TransferSettings = serde_json::from_str(r#"{"throttle_rate": 100}"#).unwrap();
        assert_eq!(settings.throttle_rate, 100);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.certificate_policy, CertificatePolicy::Strict);
    }

    #[test]
    fn certificate_policy_parses_aliases() {
        assert_eq!("insecure".parse::<CertificatePolicy>(), Ok(CertificatePolicy::AcceptAny));
        assert_eq!("STRICT".parse::<CertificatePolicy>(), Ok(CertificatePolicy::Strict));
        assert!("bogus".parse::<CertificatePolicy>().is_err());
    }

    #[test]
    fn session_progress_counts_completed_chunks() {
        let mut session = UploadSession::new(
            "https://example.com/upload".into(),
            "PUT".into(),
            PathBuf::from("/tmp/video.mp4"),
            250,
            100,
        );
        session.chunks = vec![
            ChunkState { chunk: Chunk::new(0, 0, 100), complete: true },
            ChunkState { chunk: Chunk::new(1, 100, 100), complete: false },
            ChunkState { chunk: Chunk::new(2, 200, 50), complete: true },
        ];
        assert_eq!(session.uploaded(), 150);
        assert!((session.progress() - 60.0).abs() < f64::EPSILON);
        assert_eq!(session.file_name(), "video.mp4");
    }
}
