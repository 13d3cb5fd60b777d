//! `debrid-dl upload` – send .torrent files to the account.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use tracing::warn;

use crate::api::DebridClient;

pub async fn run_upload(client: &DebridClient, files: Vec<PathBuf>) -> Result<()> {
    let existing: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            let ok = path.is_file();
            if !ok {
                warn!("skipping {}: not a file", path.display());
                println!("Skipping {} (not a file)", path.display());
            }
            ok
        })
        .collect();
    if existing.is_empty() {
        bail!("No files to upload");
    }

    let paths: Vec<&std::path::Path> = existing.iter().map(PathBuf::as_path).collect();
    let results = client
        .upload_torrent_files(&paths)
        .await
        .context("Unable to grab magnet")?;

    let mut failed = 0;
    for file in &results {
        let label = file.file.as_deref().or(file.name.as_deref()).unwrap_or("?");
        match &file.error {
            Some(err) => {
                failed += 1;
                println!(
                    "{}: {}",
                    label,
                    err.message.as_deref().or(err.code.as_deref()).unwrap_or("rejected")
                );
            }
            None => println!("{}: grabbed (id {})", label, file.id.map(|i| i.to_string()).unwrap_or_default()),
        }
    }

    if failed == results.len() {
        bail!("Unable to grab magnet");
    }
    println!("Magnet grabbed!");
    Ok(())
}
