//! Binary entry point for lumen.
//!
//! Each invocation starts a coordinator over the configured git repository,
//! waits for the startup sync, runs one command and flushes before exiting.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// The binary prints command output and errors.
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use lumen::observability;
use lumen::{
    CoordinatorConfig, CoordinatorHandle, GitGateway, JsonFileCache, LumenConfig, NoteId,
    SyncCoordinator, SyncStatus, WithTimeout,
};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Lumen - notes synced to a git repository.
#[derive(Parser)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the note repository if it does not exist.
    Init,

    /// Show sync status.
    Status,

    /// List note ids.
    List,

    /// Print a note.
    Show {
        /// Note id, e.g. `journal/2024-05-01`.
        id: String,
    },

    /// Create or replace a note.
    Put {
        /// Note id.
        id: String,

        /// Note body; read from stdin when neither this nor --file is given.
        body: Option<String>,

        /// Read the body from a file.
        #[arg(short, long, conflicts_with = "body")]
        file: Option<PathBuf>,
    },

    /// Delete a note.
    Rm {
        /// Note id.
        id: String,
    },

    /// Fetch remote changes.
    Pull,

    /// Push pending changes.
    Push,

    /// Print the GitHub URL of a note.
    Url {
        /// Note id.
        id: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match LumenConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_settings(Some(&config.logging), cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: &LumenConfig) -> CliResult {
    match command {
        Commands::Init => cmd_init(config),
        Commands::Url { id } => cmd_url(config, &id),
        command => {
            let handle = start(config);
            handle.idle().await?;
            let result = run_synced(command, &handle).await;
            handle.shutdown().await?;
            result
        },
    }
}

async fn run_synced(command: Commands, handle: &CoordinatorHandle) -> CliResult {
    match command {
        Commands::Status => {
            print_status(&handle.status().await?);
            Ok(())
        },
        Commands::List => {
            for id in handle.notes().await?.ids() {
                println!("{id}");
            }
            Ok(())
        },
        Commands::Show { id } => {
            let id = NoteId::parse(&id)?;
            match handle.note(&id).await? {
                Some(note) => {
                    print!("{}", note.body);
                    Ok(())
                },
                None => Err(format!("no note '{id}'").into()),
            }
        },
        Commands::Put { id, body, file } => {
            let body = match (body, file) {
                (Some(body), _) => body,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("{}: {e}", path.display()))?,
                (None, None) => {
                    let mut body = String::new();
                    std::io::stdin().read_to_string(&mut body)?;
                    body
                },
            };
            handle.upsert_note(NoteId::parse(&id)?, body)?;
            flush(handle).await
        },
        Commands::Rm { id } => {
            let id = NoteId::parse(&id)?;
            if handle.note(&id).await?.is_none() {
                return Err(format!("no note '{id}'").into());
            }
            handle.delete_note(id)?;
            flush(handle).await
        },
        Commands::Pull => {
            handle.request_pull()?;
            report(&handle.idle().await?)
        },
        Commands::Push => flush(handle).await,
        Commands::Init | Commands::Url { .. } => Ok(()),
    }
}

fn start(config: &LumenConfig) -> CoordinatorHandle {
    let mut git = GitGateway::new(&config.remote_path);
    if let Some(repository) = &config.repository {
        git = git.with_branch(repository.branch.clone());
    }
    SyncCoordinator::new(Arc::new(WithTimeout::new(git, config.remote_timeout)))
        .with_cache(Arc::new(JsonFileCache::new(&config.cache_path)))
        .with_repository(config.repository.clone())
        .with_config(CoordinatorConfig {
            push_debounce: config.push_debounce,
            pull_on_start: config.pull_on_start,
            ..CoordinatorConfig::default()
        })
        .spawn()
}

/// Pushes without waiting for the debounce and reports the outcome.
async fn flush(handle: &CoordinatorHandle) -> CliResult {
    handle.save()?;
    report(&handle.idle().await?)
}

fn report(status: &SyncStatus) -> CliResult {
    print_status(status);
    match &status.error {
        Some(error) => Err(error.to_string().into()),
        None => Ok(()),
    }
}

fn print_status(status: &SyncStatus) {
    println!("state: {}", status.state);
    if let Some(version) = &status.last_version {
        println!("version: {}", version.short());
    }
    if let Some(summary) = status.pending_summary() {
        println!("pending: {summary}");
    }
    if let Some(error) = &status.error {
        println!("error: {error}");
    }
}

fn cmd_init(config: &LumenConfig) -> CliResult {
    let branch = config
        .repository
        .as_ref()
        .map_or(lumen::models::DEFAULT_BRANCH, |r| r.branch.as_str());
    let git = GitGateway::new(&config.remote_path)
        .with_branch(branch)
        .init()?;
    println!("{}", git.repo_path().display());
    Ok(())
}

fn cmd_url(config: &LumenConfig, id: &str) -> CliResult {
    let repository = config
        .repository
        .as_ref()
        .ok_or("no repository configured")?;
    println!("{}", repository.blob_url(&NoteId::parse(id)?));
    Ok(())
}
