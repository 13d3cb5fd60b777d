//! `debrid-dl links` – saved links on the account.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use indicatif::HumanBytes;

use crate::api::DebridClient;
use crate::cli::LinkAction;

pub async fn run_links(client: &DebridClient, action: LinkAction) -> Result<()> {
    match action {
        LinkAction::List => {
            let links = client
                .saved_links()
                .await
                .context("Unable to load saved links")?;
            if links.is_empty() {
                println!("No saved links.");
            }
            for link in links {
                let saved = Local
                    .timestamp_opt(link.date, 0)
                    .single()
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!("{}  ({}, {}, {})", link.filename, link.host, HumanBytes(link.size), saved);
                println!("    {}", link.link);
            }
        }
        LinkAction::Delete { link } => {
            client
                .delete_saved_link(&link)
                .await
                .context("Unable to delete link")?;
            println!("Link deleted!");
        }
    }
    Ok(())
}
