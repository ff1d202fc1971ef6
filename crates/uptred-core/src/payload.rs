//! Byte-range extraction from source files

use crate::error::UptredError;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Read `size` bytes of `path` starting at `offset`.
///
/// A missing or non-positive `size` reads to the end of the file. Requests
/// that run past the end are clamped to the remaining length.
pub async fn read_range(
    path: impl AsRef<Path>,
    offset: i64,
    size: Option<i64>,
) -> Result<Vec<u8>, UptredError> {
    let path = path.as_ref();
    if offset < 0 {
        return Err(UptredError::InvalidInput(format!(
            "negative offset {} for {}",
            offset,
            path.display()
        )));
    }

    let mut file = File::open(path).await?;
    let file_len = file.metadata().await?.len() as i64;
    let remaining = (file_len - offset).max(0);

    let wanted = match size {
        Some(size) if size > 0 => size.min(remaining),
        _ => remaining,
    };

    file.seek(SeekFrom::Start(offset as u64)).await?;

    let mut data = vec![0u8; wanted as usize];
    file.read_exact(&mut data).await?;

    debug!(
        "Read {} bytes at offset {} from {}",
        data.len(),
        offset,
        path.display()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_exact_range() {
        let file = sample_file(1000);
        let data = read_range(file.path(), 10, Some(5)).await.unwrap();
        assert_eq!(data, vec![10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn test_clamps_overrun() {
        let file = sample_file(1000);
        let data = read_range(file.path(), 990, Some(100)).await.unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data[0], (990 % 251) as u8);
    }

    #[tokio::test]
    async fn test_missing_size_reads_rest() {
        let file = sample_file(300);
        assert_eq!(read_range(file.path(), 100, None).await.unwrap().len(), 200);
        assert_eq!(read_range(file.path(), 100, Some(0)).await.unwrap().len(), 200);
        assert_eq!(read_range(file.path(), 100, Some(-4)).await.unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_offset_past_end_is_empty() {
        let file = sample_file(50);
        assert!(read_range(file.path(), 80, Some(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_range(dir.path().join("nope.bin"), 0, None).await.unwrap_err();
        assert!(matches!(err, UptredError::Io(_)));
    }
}
