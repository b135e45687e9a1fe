//! `chunkup`: resumable chunked uploads from the command line.
//!
//! Ctrl-C during an upload pauses it and saves a checkpoint; running the
//! same `upload` command again continues from there.

mod config;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chunkup_client::{HttpClient, Session};
use chunkup_engine::{
    CredentialStore, EngineConfig, EngineError, JsonFileStore, Selection, StatusReconciler,
    TransferEngine, TransferStore, UploadOutcome,
};
use chunkup_protocol::{FileMetadata, FileStatus};
use chunkup_transfer::{FileSource, format_size};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "chunkup", version, about = "Resumable chunked file uploads")]
struct Cli {
    /// Service address, overriding the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the credential.
    Login {
        username: String,
        #[arg(long, env = "CHUNKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored credential.
    Logout,
    /// Upload a file, resuming a previous attempt if one was checkpointed.
    Upload {
        path: PathBuf,
        /// Ignore any checkpoint and start over.
        #[arg(long)]
        fresh: bool,
    },
    /// Show the service's record for a file or an upload id.
    Status {
        #[arg(required_unless_present = "file_id")]
        path: Option<PathBuf>,
        #[arg(long, conflicts_with = "path")]
        file_id: Option<String>,
    },
    /// List checkpointed uploads that can be resumed.
    Pending,
    /// Download a completed upload.
    Download { file_id: String, dest: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkup=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => CliConfig::load_from(path)?,
        None => CliConfig::load()?,
    };
    if let Some(server) = cli.server {
        cfg.client.base_url = server;
    }

    let state_dir = cfg.state_dir()?;
    let client = Arc::new(HttpClient::new(&cfg.client)?);
    let credentials = CredentialStore::new(state_dir.join("credentials.json"));
    let store = Arc::new(JsonFileStore::open(state_dir.join("transfers.json"))?);
    info!(server = %client.base_url(), state_dir = %state_dir.display(), "chunkup starting");

    match cli.command {
        Command::Login { username, password } => {
            let credential = client.login(&username, &password).await?;
            credentials.save(&credential)?;
            println!("logged in as {username}");
        }
        Command::Logout => {
            credentials.clear()?;
            println!("logged out");
        }
        Command::Upload { path, fresh } => {
            upload(client, store, cfg.engine, &credentials, &path, fresh).await?;
        }
        Command::Status { path, file_id } => {
            let session = credentials.load();
            let result = match (path, file_id) {
                (_, Some(file_id)) => StatusReconciler::new(client)
                    .query(&session, &file_id, None)
                    .await
                    .map_err(anyhow::Error::from),
                (Some(path), None) => {
                    let engine = TransferEngine::new(client, store, cfg.engine);
                    engine.select_file(Arc::new(FileSource::open(&path)?))?;
                    engine
                        .refresh_status(&session)
                        .await
                        .map_err(anyhow::Error::from)
                }
                (None, None) => bail!("give a file path or --file-id"),
            };
            let metadata = forget_rejected(result, session, &credentials)?;
            print_metadata(&metadata);
        }
        Command::Pending => {
            let pending = store.incomplete();
            if pending.is_empty() {
                println!("no incomplete uploads");
            }
            for (key, state) in pending {
                println!(
                    "{key}: {} {} / {} ({:.1}%)",
                    state.file_id,
                    format_size(state.metadata.received_bytes),
                    format_size(state.metadata.total_bytes),
                    state.metadata.percentage(),
                );
            }
        }
        Command::Download { file_id, dest } => {
            let session = credentials.load();
            let result = StatusReconciler::new(client.clone())
                .query(&session, &file_id, None)
                .await
                .map_err(anyhow::Error::from);
            let metadata = forget_rejected(result, session, &credentials)?;
            if metadata.status != FileStatus::Complete {
                bail!("{file_id} is not complete (status {})", metadata.status);
            }
            let bytes = client.download(&file_id, &dest).await?;
            println!("saved {} to {}", format_size(bytes), dest.display());
        }
    }

    Ok(())
}

async fn upload(
    client: Arc<HttpClient>,
    store: Arc<JsonFileStore>,
    engine_config: EngineConfig,
    credentials: &CredentialStore,
    path: &Path,
    fresh: bool,
) -> anyhow::Result<()> {
    let session = credentials.load();
    let Some(username) = session.username() else {
        bail!("not logged in; run `chunkup login <username>` first");
    };
    info!(user = username, path = %path.display(), "uploading");

    let source = FileSource::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let engine = Arc::new(TransferEngine::new(client, store, engine_config));
    let events = engine
        .take_events()
        .context("engine event stream already taken")?;
    let printer = tokio::spawn(render::print_events(events));

    match engine.select_file(Arc::new(source))? {
        Selection::ResumeAvailable(meta) if fresh => {
            info!(file_id = %meta.file_id, "discarding checkpoint");
            engine.start_new()?;
        }
        Selection::ResumeAvailable(meta) => {
            println!(
                "resuming {} at {} of {}",
                meta.file_id,
                format_size(meta.received_bytes),
                format_size(meta.total_bytes)
            );
        }
        Selection::Fresh(_) => {}
    }

    let mut run = {
        let engine = Arc::clone(&engine);
        let session = session.clone();
        tokio::spawn(async move { engine.start(&session).await })
    };

    let mut interrupted = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result?,
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    run.abort();
                    bail!("upload abandoned");
                }
                interrupted = true;
                interrupt(&engine);
            }
        }
    };

    // Closing the event stream lets the printer finish.
    drop(engine);
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer failed");
    }

    match result {
        Ok(UploadOutcome::Completed(meta)) => {
            println!(
                "upload complete: {} ({})",
                meta.file_id,
                format_size(meta.total_bytes)
            );
        }
        Ok(UploadOutcome::Paused(meta)) => {
            println!(
                "paused at {} of {}; run the same command to resume",
                format_size(meta.next_expected_byte),
                format_size(meta.total_bytes)
            );
        }
        Ok(UploadOutcome::Cancelled) => println!("upload cancelled"),
        Err(e) => {
            if !session.after_error(&e).is_authenticated() {
                credentials.clear()?;
            }
            return Err(e.into());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Paused,
    Cancelled,
    Ignored,
}

/// Handles Ctrl-C: pauses a transfer that is sending chunks, and cancels one
/// that is still registering (there is nothing to checkpoint yet).
fn interrupt(engine: &TransferEngine) -> Interrupt {
    match engine.pause() {
        Ok(meta) => {
            info!(next_expected_byte = meta.next_expected_byte, "pausing");
            Interrupt::Paused
        }
        Err(EngineError::InvalidState { state, .. }) => match engine.cancel() {
            Ok(meta) => {
                info!(state = %state, file_id = %meta.file_id, "cancelled before upload began");
                Interrupt::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "could not cancel");
                Interrupt::Ignored
            }
        },
        Err(e) => {
            warn!(error = %e, "could not pause");
            Interrupt::Ignored
        }
    }
}

/// Passes `result` through, dropping the stored credential if the service
/// rejected it.
fn forget_rejected(
    result: anyhow::Result<FileMetadata>,
    session: Session,
    credentials: &CredentialStore,
) -> anyhow::Result<FileMetadata> {
    if let Err(e) = &result {
        let rejected = e
            .downcast_ref::<chunkup_client::ClientError>()
            .is_some_and(|e| e.is_unauthorized())
            || e.downcast_ref::<chunkup_engine::EngineError>()
                .is_some_and(|e| e.invalidates_session());
        if rejected && session.is_authenticated() {
            credentials.clear()?;
            warn!("stored credential was rejected and has been removed");
        }
    }
    result
}

fn print_metadata(meta: &FileMetadata) {
    println!("file_id:            {}", meta.file_id);
    println!("status:             {}", meta.status);
    println!(
        "received:           {} / {} ({:.1}%)",
        format_size(meta.received_bytes),
        format_size(meta.total_bytes),
        meta.percentage()
    );
    println!("next_expected_byte: {}", meta.next_expected_byte);
    if let Some(checksum) = meta.checksum() {
        println!("checksum:           {checksum}");
    }
    println!("last_updated:       {}", meta.last_updated.to_rfc3339());
}
