//! Output formatting utilities

use console::{style, StyledObject};
use serde::Serialize;
use uptred_types::{UploadSession, UploadStatus};

/// Print `value` as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: i64) -> String {
    human_bytes::human_bytes(bytes.max(0) as f64)
}

pub fn status_icon(status: UploadStatus) -> StyledObject<&'static str> {
    match status {
        UploadStatus::Completed => style("✓").green(),
        UploadStatus::Uploading => style("↑").cyan(),
        UploadStatus::Failed => style("✗").red(),
        UploadStatus::Cancelled => style("○").dim(),
        UploadStatus::Pending => style("·").dim(),
    }
}

pub fn print_session_summary(session: &UploadSession, detailed: bool) {
    let progress = format!("{:.1}%", session.progress());

    println!(
        "{} {} {} [{}]",
        status_icon(session.status),
        style(session.file_name()).bold(),
        style(&progress).dim(),
        style(session.status.as_str()).dim()
    );

    if detailed {
        println!("    ID: {}", session.id);
        println!("    URL: {}", session.url);
        println!("    Method: {}", session.method);
        println!("    File: {}", session.file_path.display());
        println!(
            "    Size: {} / {}",
            format_bytes(session.uploaded()),
            format_bytes(session.file_size)
        );
        println!(
            "    Chunks: {} of {} complete ({} each)",
            session.chunks.iter().filter(|c| c.complete).count(),
            session.chunks.len(),
            format_bytes(session.chunk_size)
        );
        println!("    Created: {}", session.created_at.format("%Y-%m-%d %H:%M:%S"));
        if let Some(completed_at) = session.completed_at {
            println!("    Completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(ref error) = session.error {
            println!("    Error: {}", style(error).red());
        }
        println!();
    }
}

/// Shorten to `max` characters with a trailing ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}
