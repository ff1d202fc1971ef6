//! CLI command implementations

use crate::output::{format_bytes, print_json, print_session_summary, status_icon, truncate};
use crate::progress::{request_bar, UploadProgress};
use crate::{ConfigAction, OutputFormat, SessionAction};
use anyhow::{anyhow, bail, Result};
use console::style;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uptred_core::http::Headers;
use uptred_core::{UploadOptions, UptredCore, UptredError};
use uptred_types::{TransferSettings, UploadSession, UploadStatus};
use uuid::Uuid;

/// Parse repeated `Name: value` arguments, keeping their order
pub fn parse_headers(raw: &[String]) -> Result<Headers> {
    raw.iter()
        .map(|header| {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Invalid header (expected \"Name: value\"): {}", header))?;
            let name = name.trim();
            if name.is_empty() {
                bail!("Invalid header (empty name): {}", header);
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

// ============================================================================
// Request Commands
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub async fn fetch(
    core: &UptredCore,
    url: &str,
    method: &str,
    data: Option<String>,
    json: bool,
    headers: &[String],
    include: bool,
    format: OutputFormat,
) -> Result<()> {
    let headers = parse_headers(headers)?;

    let pb = request_bar(url, matches!(format, OutputFormat::Human) && data.is_some());
    let sink_bar = pb.clone();
    core.set_progress_sink(Some(Arc::new(move |sent: u64, total: u64| {
        sink_bar.set_length(total);
        sink_bar.set_position(sent);
    })));

    let result = core.request_raw(url, method, json, data.as_deref(), headers).await;
    core.set_progress_sink(None);
    pb.finish_and_clear();
    let response = result?;

    match format {
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "status": response.status_code(),
                "headers": response.header_lines,
                "body": response.body,
            }))?;
        }
        OutputFormat::Human | OutputFormat::Table => {
            if include {
                for line in &response.header_lines {
                    println!("{}", line);
                }
                println!();
            }
            print!("{}", response.body);
            if !response.body.is_empty() && !response.body.ends_with('\n') {
                println!();
            }
            if !response.is_success() {
                eprintln!(
                    "{} {}",
                    style("!").yellow().bold(),
                    response
                        .header_lines
                        .first()
                        .map(String::as_str)
                        .unwrap_or("empty or malformed response")
                );
            }
        }
    }

    Ok(())
}

pub async fn verify(
    core: &UptredCore,
    url: &str,
    size: Option<i64>,
    file: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let size = match (size, file) {
        (Some(size), _) => size,
        (None, Some(file)) => tokio::fs::metadata(&file).await?.len() as i64,
        (None, None) => bail!("Either --size or --file is required"),
    };

    let feedback = core.verify_upload(url, size).await?;

    match format {
        OutputFormat::Json => print_json(&feedback)?,
        _ => {
            if feedback.content_size == 0 {
                println!("{} Server reported no received bytes", style("·").dim());
            } else {
                let icon = if feedback.is_complete() { style("✓").green() } else { style("↑").cyan() };
                println!(
                    "{} Server holds bytes {}-{} of {} ({})",
                    icon,
                    feedback.first_byte,
                    feedback.last_byte,
                    feedback.content_size,
                    format_bytes(feedback.last_byte - feedback.first_byte + 1)
                );
            }
        }
    }

    Ok(())
}

// ============================================================================
// Upload Commands
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub async fn upload(
    core: &UptredCore,
    file: &Path,
    url: &str,
    method: &str,
    chunk_size: Option<i64>,
    content_type: Option<String>,
    headers: &[String],
    format: OutputFormat,
) -> Result<()> {
    let options = UploadOptions {
        method: Some(method.to_string()),
        chunk_size,
        content_type,
        headers: parse_headers(headers)?,
        verify_first: false,
    };

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let session = with_progress(core, name, format, core.start_upload(file, url, options)).await?;
    report_session(&session, format)
}

pub async fn resume(
    core: &UptredCore,
    id: &str,
    verify: bool,
    content_type: Option<String>,
    headers: &[String],
    format: OutputFormat,
) -> Result<()> {
    let uuid = Uuid::parse_str(id)?;
    let stored = core.get_upload(uuid).await?;

    let options = UploadOptions {
        content_type,
        headers: parse_headers(headers)?,
        verify_first: verify,
        ..UploadOptions::default()
    };

    let session = with_progress(core, stored.file_name(), format, core.resume_upload(uuid, options)).await?;
    report_session(&session, format)
}

/// Drive `upload` while feeding core events into a progress bar
async fn with_progress<F>(core: &UptredCore, name: String, format: OutputFormat, upload: F) -> Result<UploadSession>
where
    F: Future<Output = Result<UploadSession, UptredError>>,
{
    let progress = UploadProgress::new(name, matches!(format, OutputFormat::Human));
    let mut events = core.subscribe();
    tokio::pin!(upload);

    let result = loop {
        tokio::select! {
            result = &mut upload => break result,
            Ok(event) = events.recv() => progress.handle_event(&event),
        }
    };
    while let Ok(event) = events.try_recv() {
        progress.handle_event(&event);
    }
    progress.clear();

    if result.is_err() && matches!(format, OutputFormat::Human) {
        eprintln!(
            "{} Run `uptred sessions list` to find the session and `uptred resume <ID>` to continue",
            style("!").yellow().bold()
        );
    }
    Ok(result?)
}

fn report_session(session: &UploadSession, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(session)?,
        OutputFormat::Table => print_session_table(std::slice::from_ref(session)),
        OutputFormat::Human => match session.status {
            UploadStatus::Completed => {
                println!(
                    "{} Uploaded {} ({})",
                    style("✓").green().bold(),
                    style(session.file_name()).cyan(),
                    format_bytes(session.file_size)
                );
                println!("  ID: {}", session.id);
            }
            UploadStatus::Cancelled => {
                println!(
                    "{} Upload cancelled at {:.1}%; continue with `uptred resume {}`",
                    style("○").dim(),
                    session.progress(),
                    session.id
                );
            }
            _ => print_session_summary(session, true),
        },
    }
    Ok(())
}

pub async fn plan(core: &UptredCore, file: &Path, chunk_size: Option<i64>, format: OutputFormat) -> Result<()> {
    let chunk_size = chunk_size.unwrap_or(core.settings().chunk_size);
    let (file_size, chunks) = core.plan_chunks(file, Some(chunk_size)).await?;

    match format {
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "file_size": file_size,
                "chunk_size": chunk_size,
                "chunks": chunks,
            }))?;
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ChunkRow {
                index: i64,
                offset: i64,
                size: i64,
                content_range: String,
            }

            let rows: Vec<ChunkRow> = chunks
                .iter()
                .map(|c| ChunkRow {
                    index: c.index,
                    offset: c.offset,
                    size: c.size,
                    content_range: c.content_range(file_size),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            println!(
                "{} ({}) splits into {} chunk(s) of up to {}",
                style(file.display()).bold(),
                format_bytes(file_size),
                style(chunks.len()).bold(),
                format_bytes(chunk_size)
            );
            for chunk in &chunks {
                println!(
                    "  #{:<4} {}  {}",
                    chunk.index,
                    chunk.content_range(file_size),
                    style(format_bytes(chunk.size)).dim()
                );
            }
        }
    }

    Ok(())
}

// ============================================================================
// Session Commands
// ============================================================================

fn print_session_table(sessions: &[UploadSession]) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct SessionRow {
        id: String,
        file: String,
        size: String,
        progress: String,
        status: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            id: s.id.to_string()[..8].to_string(),
            file: truncate(&s.file_name(), 30),
            size: format_bytes(s.file_size),
            progress: format!("{:.1}%", s.progress()),
            status: s.status.as_str().to_string(),
        })
        .collect();

    println!("{}", Table::new(rows));
}

pub async fn session_action(core: &UptredCore, action: SessionAction, format: OutputFormat) -> Result<()> {
    match action {
        SessionAction::List { status, all } => {
            let sessions: Vec<_> = core
                .list_uploads()
                .await?
                .into_iter()
                .filter(|s| {
                    status
                        .as_deref()
                        .map_or(true, |wanted| s.status.as_str().contains(&wanted.to_lowercase()))
                })
                .collect();

            match format {
                OutputFormat::Json => print_json(&sessions)?,
                OutputFormat::Table => print_session_table(&sessions),
                OutputFormat::Human => {
                    if sessions.is_empty() {
                        println!("{}", style("No upload sessions found").dim());
                        return Ok(());
                    }
                    for session in &sessions {
                        print_session_summary(session, all);
                    }
                    println!();
                    println!("{} session(s) total", style(sessions.len()).bold());
                }
            }
        }

        SessionAction::Show { id } => {
            let session = core.get_upload(Uuid::parse_str(&id)?).await?;
            match format {
                OutputFormat::Json => print_json(&session)?,
                _ => {
                    print_session_summary(&session, true);
                    for state in &session.chunks {
                        let icon = if state.complete { style("✓").green() } else { style("·").dim() };
                        println!(
                            "    {} #{:<4} {}",
                            icon,
                            state.chunk.index,
                            state.chunk.content_range(session.file_size)
                        );
                    }
                }
            }
        }

        SessionAction::Cancel { id } => {
            core.cancel_upload(Uuid::parse_str(&id)?).await?;
            println!("{} Upload cancelled", status_icon(UploadStatus::Cancelled));
        }

        SessionAction::Delete { id } => {
            core.delete_upload(Uuid::parse_str(&id)?).await?;
            println!("{} Session deleted", style("✓").green().bold());
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

fn optional<T: ToString>(value: &Option<T>, none: &str) -> String {
    value.as_ref().map(T::to_string).unwrap_or_else(|| none.to_string())
}

/// Current value of a config key, as text
pub fn setting_value(settings: &TransferSettings, key: &str) -> Result<String> {
    Ok(match key {
        "chunk_size" => settings.chunk_size.to_string(),
        "max_attempts" => settings.max_attempts.to_string(),
        "retry_delay_seconds" => settings.retry_delay_seconds.to_string(),
        "throttle_rate" => settings.throttle_rate.to_string(),
        "speed_limit" => optional(&settings.speed_limit, "unlimited"),
        "connect_timeout_seconds" => settings.connect_timeout_seconds.to_string(),
        "read_idle_timeout_seconds" => settings.read_idle_timeout_seconds.to_string(),
        "certificate_policy" => serde_json::to_value(settings.certificate_policy)?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        "user_agent" => optional(&settings.user_agent, "none"),
        _ => bail!("Unknown config key: {}", key),
    })
}

/// Parse `value` into the field named by `key`
pub fn apply_setting(settings: &mut TransferSettings, key: &str, value: &str) -> Result<()> {
    let cleared = matches!(value.to_lowercase().as_str(), "none" | "unlimited" | "");
    match key {
        "chunk_size" => {
            let chunk_size: i64 = value.parse()?;
            if chunk_size == 0 {
                bail!("chunk_size must not be zero");
            }
            settings.chunk_size = chunk_size;
        }
        "max_attempts" => settings.max_attempts = value.parse()?,
        "retry_delay_seconds" => settings.retry_delay_seconds = value.parse()?,
        "throttle_rate" => settings.throttle_rate = value.parse()?,
        "speed_limit" => settings.speed_limit = if cleared { None } else { Some(value.parse()?) },
        "connect_timeout_seconds" => settings.connect_timeout_seconds = value.parse()?,
        "read_idle_timeout_seconds" => settings.read_idle_timeout_seconds = value.parse()?,
        "certificate_policy" => settings.certificate_policy = value.parse().map_err(|e: String| anyhow!(e))?,
        "user_agent" => settings.user_agent = (!cleared).then(|| value.to_string()),
        _ => bail!("Unknown config key: {}", key),
    }
    Ok(())
}

pub async fn config_action(core: &UptredCore, action: Option<ConfigAction>, format: OutputFormat) -> Result<()> {
    // read from disk so per-run overrides such as --insecure are never saved
    let mut settings = core.storage.load_settings().await?;

    match action {
        None | Some(ConfigAction::Show) => match format {
            OutputFormat::Json => print_json(&settings)?,
            _ => {
                println!("Uptred Configuration:");
                println!("  Data directory: {}", core.storage.data_dir().display());
                println!();
                println!("  Chunk size: {}", format_bytes(settings.chunk_size));
                println!("  Max attempts: {}", settings.max_attempts);
                println!("  Retry delay: {}s", settings.retry_delay_seconds);
                println!("  Throttle rate: {} bytes per step", settings.throttle_rate);
                println!(
                    "  Speed limit: {}",
                    settings
                        .speed_limit
                        .map(|s| format!("{}/s", format_bytes(s as i64)))
                        .unwrap_or_else(|| "Unlimited".to_string())
                );
                println!("  Connect timeout: {}s", settings.connect_timeout_seconds);
                println!("  Read idle timeout: {}s", settings.read_idle_timeout_seconds);
                println!("  Certificate policy: {}", setting_value(&settings, "certificate_policy")?);
                println!("  User agent: {}", optional(&settings.user_agent, "none"));
            }
        },

        Some(ConfigAction::Get { key }) => {
            println!("{}", setting_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            apply_setting(&mut settings, &key, &value)?;
            core.update_settings(settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                core.reset_settings().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptred_types::CertificatePolicy;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Authorization: Bearer abc".to_string(),
            "X-Note:  a:b ".to_string(),
        ])
        .unwrap();
        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("Authorization", "Bearer abc"), ("X-Note", "a:b")]);

        assert!(parse_headers(&["no colon".to_string()]).is_err());
        assert!(parse_headers(&[": value".to_string()]).is_err());
    }

    #[test]
    fn test_settings_round_trip_through_text() {
        let mut settings = TransferSettings::default();
        apply_setting(&mut settings, "chunk_size", "4096").unwrap();
        apply_setting(&mut settings, "speed_limit", "1000").unwrap();
        apply_setting(&mut settings, "certificate_policy", "insecure").unwrap();
        apply_setting(&mut settings, "user_agent", "uptred/0.1").unwrap();

        assert_eq!(settings.chunk_size, 4096);
        assert_eq!(setting_value(&settings, "speed_limit").unwrap(), "1000");
        assert_eq!(settings.certificate_policy, CertificatePolicy::AcceptAny);
        assert_eq!(setting_value(&settings, "certificate_policy").unwrap(), "accept-any");
        assert_eq!(setting_value(&settings, "user_agent").unwrap(), "uptred/0.1");

        apply_setting(&mut settings, "speed_limit", "unlimited").unwrap();
        apply_setting(&mut settings, "user_agent", "none").unwrap();
        assert_eq!(settings.speed_limit, None);
        assert_eq!(settings.user_agent, None);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut settings = TransferSettings::default();
        assert!(apply_setting(&mut settings, "chunk_size", "0").is_err());
        assert!(apply_setting(&mut settings, "max_attempts", "many").is_err());
        assert!(apply_setting(&mut settings, "certificate_policy", "sometimes").is_err());
        assert!(apply_setting(&mut settings, "theme", "dark").is_err());
        assert!(setting_value(&settings, "theme").is_err());
        assert_eq!(settings, TransferSettings::default());
    }
}
