//! Uptred CLI - Command-line chunked uploader
//!
//! Sends files to resumable upload endpoints in byte-range chunks and
//! resumes interrupted uploads.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Uptred - Resumable chunked uploads over raw HTTP
#[derive(Parser)]
#[command(name = "uptred")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for Uptred
    #[arg(long, env = "UPTRED_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Accept any TLS certificate for this run
    #[arg(long)]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single request and print the response
    Fetch {
        /// Target URL
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Send the body as JSON instead of form data
        #[arg(long)]
        json: bool,

        /// Extra header, as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Print the status line and headers too
        #[arg(short, long)]
        include: bool,
    },

    /// Upload a file in chunks
    Upload {
        /// File to upload
        file: PathBuf,

        /// Upload URL
        url: String,

        /// HTTP method used for each chunk
        #[arg(short = 'X', long, default_value = "PUT")]
        method: String,

        /// Chunk size in bytes
        #[arg(short, long)]
        chunk_size: Option<i64>,

        /// Content type of the chunks
        #[arg(long)]
        content_type: Option<String>,

        /// Extra header, as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Resume an interrupted upload
    Resume {
        /// Upload ID
        id: String,

        /// Ask the server which bytes it already holds first
        #[arg(long)]
        verify: bool,

        /// Content type of the chunks
        #[arg(long)]
        content_type: Option<String>,

        /// Extra header, as "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Ask an upload URL which bytes it has received
    Verify {
        /// Upload URL
        url: String,

        /// Total size in bytes
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        size: Option<i64>,

        /// Take the total size from this file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show how a file would be split into chunks
    Plan {
        /// File to plan
        file: PathBuf,

        /// Chunk size in bytes
        #[arg(short, long)]
        chunk_size: Option<i64>,
    },

    /// Stored upload sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List upload sessions
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show one session with its chunks
    Show {
        /// Upload ID
        id: String,
    },

    /// Mark a session cancelled
    Cancel {
        /// Upload ID
        id: String,
    },

    /// Delete a session
    Delete {
        /// Upload ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "uptred_core=debug,uptred=info"
        } else {
            "warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("uptred"))
            .unwrap_or_else(|| PathBuf::from(".uptred"))
    });

    tracing::debug!("Using data directory {}", data_dir.display());

    // Initialize core
    let core = uptred_core::UptredCore::new(data_dir).await?;

    if cli.insecure {
        let mut settings = core.settings();
        settings.certificate_policy = uptred_types::CertificatePolicy::AcceptAny;
        core.client().apply_settings(settings).await;
    }
    if cli.verbose {
        core.set_verbose_sink(Some(std::sync::Arc::new(|text: &str| {
            eprintln!("{}", console::style(text).dim());
        })));
    }

    // Ctrl-C stops whatever is on the wire
    let halting = core.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            halting.halt();
        }
    });

    // Execute command
    match cli.command {
        Commands::Fetch {
            url,
            method,
            data,
            json,
            headers,
            include,
        } => commands::fetch(&core, &url, &method, data, json, &headers, include, cli.output).await?,

        Commands::Upload {
            file,
            url,
            method,
            chunk_size,
            content_type,
            headers,
        } => {
            commands::upload(&core, &file, &url, &method, chunk_size, content_type, &headers, cli.output)
                .await?
        }

        Commands::Resume {
            id,
            verify,
            content_type,
            headers,
        } => commands::resume(&core, &id, verify, content_type, &headers, cli.output).await?,

        Commands::Verify { url, size, file } => commands::verify(&core, &url, size, file, cli.output).await?,

        Commands::Plan { file, chunk_size } => commands::plan(&core, &file, chunk_size, cli.output).await?,

        Commands::Sessions { action } => commands::session_action(&core, action, cli.output).await?,

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "uptred", &mut std::io::stdout());
        }
    }

    Ok(())
}
