//! Control-plane CLI for the shared-memory IPC fabric: lists segments
//! under `/dev/shm` and removes a named one.
//!
//! This is an external collaborator, not part of the core contract —
//! it's a thin wrapper around `shmcomm-segment`'s lifecycle operations.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shmcomm_segment::{OpenMode, Permissions, SegmentHandle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHM_DIR: &str = "/dev/shm";
const SEGMENT_PREFIX: &str = "shm_";

#[derive(Parser, Debug)]
#[command(name = "shmcomm-cli")]
#[command(about = "Inspect and remove shmcomm shared-memory segments")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate segments under /dev/shm that belong to shmcomm
    List,
    /// Disconnect and unlink a named segment
    Remove {
        /// Logical name, as passed to Publisher/Server/etc. construction
        name: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::List => {
            for name in list_segments() {
                println!("{name}");
            }
            ExitCode::SUCCESS
        }
        Command::Remove { name } => {
            if remove_segment(&name) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Enumerates logical names of every `shm_*` entry under `/dev/shm`.
fn list_segments() -> Vec<String> {
    let entries = match std::fs::read_dir(Path::new(SHM_DIR)) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, dir = SHM_DIR, "could not read shared-memory directory");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(SEGMENT_PREFIX))
        .collect();
    names.sort();
    names
}

/// Attaches to `name` and invokes `disconnect_and_unlink`. Returns `false`
/// (and logs a warning) if the segment could not be opened at all — there
/// is nothing to remove.
fn remove_segment(name: &str) -> bool {
    match SegmentHandle::open(name, OpenMode::OpenReadWrite, Permissions::default()) {
        Ok(mut handle) => {
            info!(name, "removing segment");
            handle.disconnect_and_unlink();
            true
        }
        Err(err) => {
            warn!(name, error = %err, "segment not found");
            false
        }
    }
}
