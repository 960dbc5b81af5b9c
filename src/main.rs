use std::path::PathBuf;

use ::tracing::error;
use anyhow::Result;
use clap::{Parser, Subcommand};
use obj_store::ObjectStore;

mod commands;
mod config;
mod tracing;
use tracing::setup_tracing;

#[derive(Parser)]
#[command(version, about = "Multi-backend object store CLI", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List objects under a prefix
    #[command(visible_alias = "ls")]
    List {
        prefix: String,
        #[arg(long, help = "Only return objects ordered strictly after this key")]
        start_after: Option<String>,
    },
    /// Print an object to stdout
    #[command(visible_alias = "cat")]
    Read { url: String },
    /// Copy one object
    #[command(visible_alias = "cp")]
    Copy { src: String, dst: String },
    /// Move one object
    #[command(visible_alias = "mv")]
    Move { src: String, dst: String },
    /// Delete one object
    #[command(visible_alias = "rm")]
    Remove { url: String },
    /// Copy every object under a prefix
    CopyPrefix {
        src_prefix: String,
        dst_prefix: String,
        #[arg(long, default_value_t = 100)]
        max_concurrent_requests: usize,
    },
    /// Delete every object under a prefix
    RemovePrefix {
        prefix: String,
        #[arg(long, default_value_t = 100)]
        max_concurrent_requests: usize,
    },
    /// Compare two prefixes by relative path and size
    Diff { left: String, right: String },
    /// Make a destination prefix match a source prefix
    Sync {
        src_prefix: String,
        dst_prefix: String,
        #[arg(long, default_value_t = 100)]
        max_concurrent_requests: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = setup_tracing() {
        eprintln!("Error setting up tracing: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;
    let store = ObjectStore::new(config)?;

    let result = match &cli.command {
        Command::List { prefix, start_after } => {
            commands::list::run(&store, prefix, start_after.clone()).await
        }
        Command::Read { url } => commands::read::run(&store, url).await,
        Command::Copy { src, dst } => commands::copy::run(&store, src, dst).await,
        Command::Move { src, dst } => commands::mv::run(&store, src, dst).await,
        Command::Remove { url } => commands::remove::run(&store, url).await,
        Command::CopyPrefix {
            src_prefix,
            dst_prefix,
            max_concurrent_requests,
        } => {
            commands::copy_prefix::run(&store, src_prefix, dst_prefix, *max_concurrent_requests)
                .await
        }
        Command::RemovePrefix {
            prefix,
            max_concurrent_requests,
        } => commands::remove_prefix::run(&store, prefix, *max_concurrent_requests).await,
        Command::Diff { left, right } => commands::diff::run(&store, left, right).await,
        Command::Sync {
            src_prefix,
            dst_prefix,
            max_concurrent_requests,
        } => commands::sync::run(&store, src_prefix, dst_prefix, *max_concurrent_requests).await,
    };

    let close_result = store.close().await;
    result?;
    close_result?;
    Ok(())
}
