//! `debrid-dl magnets` – browse, save, unlock and delete account magnets.

use anyhow::{Context, Result, anyhow};
use indicatif::HumanBytes;

use crate::api::DebridClient;
use crate::cli::MagnetAction;
use crate::models::MagnetRecord;

async fn first_link(client: &DebridClient, id: u64) -> Result<String> {
    let magnet = client
        .magnet_status(id)
        .await
        .with_context(|| format!("Unable to load magnet {}", id))?;
    magnet
        .links
        .first()
        .map(|l| l.link.clone())
        .ok_or_else(|| anyhow!("Magnet {} ({}) has no links yet", id, magnet.status))
}

fn print_magnet(magnet: &MagnetRecord) {
    println!("{:<10} {}", magnet.id, magnet.filename);
    println!(
        "{:<10} {} · {} · {} link(s)",
        "",
        HumanBytes(magnet.size),
        magnet.status,
        magnet.links.len()
    );
}

pub async fn run_magnets(client: &DebridClient, action: MagnetAction) -> Result<()> {
    match action {
        MagnetAction::List => {
            let magnets = client
                .list_magnets()
                .await
                .context("An error occurred while loading magnets")?;
            if magnets.is_empty() {
                println!("No magnets on this account.");
            }
            for magnet in &magnets {
                print_magnet(magnet);
            }
        }
        MagnetAction::Delete { id } => {
            client
                .delete_magnet(id)
                .await
                .context("Unable to delete magnet")?;
            println!("Magnet deleted!");
        }
        MagnetAction::Save { id } => {
            let link = first_link(client, id).await?;
            client.save_link(&link).await.context("Unable to save magnet")?;
            println!("Magnet saved!");
        }
        MagnetAction::Unlock { id } => {
            let link = first_link(client, id).await?;
            let direct = client
                .unlock(&link)
                .await
                .context("Unable to download magnet")?;
            println!("{}", direct);
        }
    }
    Ok(())
}
