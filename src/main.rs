//! seafile_client CLI - interact with a Seafile server from the terminal.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use seafile_client::models::{format_eta, format_size};
use seafile_client::progress::{ProgressSnapshot, PROGRESS_CHANNEL_CAPACITY};
use seafile_client::Session;

/// CLI tool for interacting with a Seafile server.
#[derive(Parser)]
#[command(name = "seafile_client")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the Seafile server (the /api2 suffix is implied).
    #[arg(long, env = "SEAFILE_URL")]
    url: String,

    /// Account user name.
    #[arg(long, env = "SEAFILE_USER", default_value = "")]
    user: String,

    /// Account password; omit to rely on a cached token only.
    #[arg(long, env = "SEAFILE_PASSWORD")]
    password: Option<String>,

    /// Library to operate on.
    #[arg(long, short = 'l', env = "SEAFILE_LIBRARY", default_value = "My Library")]
    library: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the server is reachable.
    Ping,

    /// List the libraries available to the user.
    ListLibs,

    /// List files in a library path.
    List {
        /// Path inside the library (defaults to the root).
        #[arg(default_value = "")]
        path: String,
    },

    /// Upload a local file into the library.
    Upload {
        /// Local file to upload.
        file: PathBuf,

        /// Remote target path; defaults to the file name at the library
        /// root. A trailing slash keeps the local file name.
        #[arg(long, short = 't')]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let session = Session::new(&cli.url, &cli.user, cli.password.as_deref());

    match cli.command {
        Commands::Ping => {
            if session.ping().await {
                println!("pong");
            } else {
                anyhow::bail!("no ping reply from {}", session.base_url());
            }
        }

        Commands::ListLibs => {
            session
                .ensure_authenticated()
                .await
                .context("authentication failure")?;
            let libraries = session
                .list_libraries()
                .await
                .context("could not list libraries")?;
            for library in libraries {
                println!("{}", library.name);
            }
        }

        Commands::List { path } => {
            session
                .ensure_authenticated()
                .await
                .context("authentication failure")?;
            let library = session.get_library(&cli.library).await?;
            let entries = library.list(&path).await.with_context(|| {
                format!("could not list '{}' in library '{}'", path, cli.library)
            })?;

            println!("{:<6} {:>10} {}", "TYPE", "SIZE", "NAME");
            for entry in entries {
                println!("{}", entry);
            }
        }

        Commands::Upload { file, to } => {
            session
                .ensure_authenticated()
                .await
                .context("authentication failure")?;
            let library = session.get_library(&cli.library).await?;

            let filename = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("invalid file name: {}", file.display()))?;
            let target = match to {
                Some(to) if to.ends_with('/') => format!("{to}{filename}"),
                Some(to) => to,
                None => format!("/{filename}"),
            };

            let size = std::fs::metadata(&file)
                .with_context(|| format!("could not stat {}", file.display()))?
                .len();
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("could not open {}", file.display()))?;

            println!("Upload '{}' => '{}::{}'", file.display(), cli.library, target);

            let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
            let reporter = tokio::spawn(show_progress(rx));
            let outcome = library.upload(source, size, &target, Some(tx)).await;
            let _ = reporter.await;
            outcome.with_context(|| format!("could not upload {}", file.display()))?;
        }
    }

    Ok(())
}

/// Render a single-line progress display, rewritten in place.
async fn show_progress(mut rx: mpsc::Receiver<ProgressSnapshot>) {
    let mut clear = String::new();
    let mut last: Option<ProgressSnapshot> = None;

    while let Some(snapshot) = rx.recv().await {
        let eta = snapshot
            .remaining
            .map(|d| format_eta(d.as_secs_f64()))
            .unwrap_or_else(|| "--".to_string());
        let line = format!(
            "[{:.2}%] {}/{} (speed: {}/s, avg: {}/s, remaining: {})",
            snapshot.percent,
            format_size(snapshot.transferred),
            format_size(snapshot.total),
            format_size(snapshot.speed as u64),
            format_size(snapshot.speed_avg as u64),
            eta,
        );
        if line.len() > clear.len() {
            clear = " ".repeat(line.len());
        }
        print!("{clear}\r{line}\r");
        let _ = std::io::stdout().flush();
        last = Some(snapshot);
    }

    if let Some(snapshot) = last {
        println!(
            "{clear}\r[done] {} in {} ({}/s avg)",
            format_size(snapshot.transferred),
            format_eta(snapshot.started.elapsed().as_secs_f64()),
            format_size(snapshot.speed_avg as u64),
        );
    }
}
