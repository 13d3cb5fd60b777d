pub mod download;
pub mod history;
pub mod magnets;
pub mod saved_links;
pub mod upload;

use anyhow::Result;

use crate::api::DebridClient;
use crate::cli::{Command, LinkAction, MagnetAction};
use crate::config::Config;

pub async fn dispatch(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Download {
            links,
            from_file,
            skip_duplicates,
        } => download::run_download(config, links, from_file, skip_duplicates).await,
        Command::History { query } => history::run_history(config, query).await,
        Command::Magnets { action } => {
            let client = remote_client(config)?;
            magnets::run_magnets(&client, action.unwrap_or(MagnetAction::List)).await
        }
        Command::Upload { files } => {
            let client = remote_client(config)?;
            upload::run_upload(&client, files).await
        }
        Command::Links { action } => {
            let client = remote_client(config)?;
            saved_links::run_links(&client, action.unwrap_or(LinkAction::List)).await
        }
    }
}

fn remote_client(config: &Config) -> Result<DebridClient> {
    config.require_api_key()?;
    Ok(DebridClient::new(config)?)
}
