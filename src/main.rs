mod acquirer;
mod api;
mod archive;
mod batch;
mod cli;
mod commands;
mod config;
mod error;
mod history;
mod links;
mod logging;
mod models;
mod resolver;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::Parser;

use crate::cli::Args;

async fn run(args: Args) -> Result<()> {
    let cfg = config::load_or_init(args.config.as_deref())?.with_overrides(
        std::env::var(config::API_KEY_ENV).ok(),
        args.api_key,
        args.output,
    );
    tracing::debug!(
        "download dir {}, api base {}",
        cfg.download_dir().display(),
        cfg.api_base
    );

    commands::dispatch(&cfg, args.command).await
}

#[tokio::main]
async fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    let args = Args::parse();
    if let Err(err) = run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("debrid-dl error: {:#}", err);
        std::process::exit(1);
    }
}
