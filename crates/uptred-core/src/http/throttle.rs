//! Throttled request writer
//!
//! Writes a request buffer in fixed-size slices. Cancellation is checked
//! before every slice and progress is reported after every slice. Progress
//! counts body bytes only, even though the header block leads the buffer.

use crate::engine::RateLimiter;
use crate::error::UptredError;
use crate::state::ProgressSink;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Parameters for one throttled send
pub struct Throttle<'a> {
    /// Bytes per slice; zero sends the buffer in one write
    pub rate: u32,
    /// Body length reported as the progress total
    pub total: u64,
    pub progress: Option<&'a ProgressSink>,
    pub cancel: &'a CancellationToken,
    /// Optional bandwidth cap applied per slice
    pub limiter: Option<&'a RateLimiter>,
}

/// Write `buffer` to `writer` according to `throttle`.
pub async fn send_throttled<W>(
    writer: &mut W,
    buffer: &[u8],
    throttle: Throttle<'_>,
) -> Result<(), UptredError>
where
    W: AsyncWrite + Unpin,
{
    let progress = match throttle.progress {
        Some(progress) if throttle.rate > 0 => progress,
        _ => {
            if let Some(limiter) = throttle.limiter {
                limiter.acquire(buffer.len() as u64).await;
            }
            writer.write_all(buffer).await?;
            writer.flush().await?;
            return Ok(());
        }
    };

    let rate = throttle.rate as usize;
    let total = throttle.total;
    let mut sent = 0usize;

    while sent < buffer.len() {
        if throttle.cancel.is_cancelled() {
            debug!("Send cancelled after {} of {} bytes", sent, buffer.len());
            return Err(UptredError::Cancelled);
        }

        let end = (sent + rate).min(buffer.len());
        let slice = &buffer[sent..end];
        if let Some(limiter) = throttle.limiter {
            limiter.acquire(slice.len() as u64).await;
        }
        writer.write_all(slice).await?;
        sent = end;

        if sent == buffer.len() {
            progress(total, total);
        } else {
            progress((sent as u64).min(total), total);
        }
    }

    writer.flush().await?;
    Ok(())
}
