//! gpod-cp - copy media onto a device catalog and keep it reconciled.
//!
//! Ingests files onto the device (transcoding when the target can't play
//! the source format natively), deduplicates against what's already
//! there, maintains a recent-listening playlist, and can later verify
//! the catalog against the device filesystem.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod device_path;
pub mod duplicate_index;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod lock;
pub mod probe;
pub mod recent_playlist;
pub mod track_key_index;
pub mod transcode;
pub mod verify;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("gpod_cp=info".parse().unwrap()))
        .init();

    let args = cli::Cli::parse();
    let config = config::Config::load();

    match cli::run(&args, &config) {
        Ok(()) => Ok(()),
        Err(err @ error::Error::LockContention(_)) => {
            tracing::error!(%err, "exiting");
            std::process::exit(lock::EXIT_LOCK_CONTENTION);
        }
        Err(err) => Err(err.into()),
    }
}
