//! `debrid-dl history` – list past batches, newest first.

use anyhow::Result;
use chrono::Local;
use indicatif::HumanBytes;
use std::path::Path;

use crate::config::Config;
use crate::history::HistoryStore;
use crate::models::HistoryEntry;

fn matches_query(entry: &HistoryEntry, query: &str) -> bool {
    let query = query.to_lowercase();
    entry.title.to_lowercase().contains(&query)
        || entry.output.to_string_lossy().to_lowercase().contains(&query)
        || entry.links.iter().any(|l| l.to_lowercase().contains(&query))
}

/// Title without its extension, as shown in the listing.
fn display_title(entry: &HistoryEntry) -> String {
    let title = if entry.title.is_empty() {
        entry
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        entry.title.clone()
    };
    Path::new(&title)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(title)
}

/// Output size, checked now; the file may have been moved since.
fn current_size(entry: &HistoryEntry) -> String {
    match std::fs::metadata(&entry.output) {
        Ok(meta) => HumanBytes(meta.len()).to_string(),
        Err(_) => "missing".to_string(),
    }
}

pub async fn run_history(config: &Config, query: Option<String>) -> Result<()> {
    let store = HistoryStore::new(config.history_file()?).with_legacy_file(config.legacy_history_file());
    let entries: Vec<HistoryEntry> = store
        .list()
        .await?
        .into_iter()
        .filter(|e| query.as_deref().is_none_or(|q| matches_query(e, q)))
        .collect();

    if entries.is_empty() {
        println!("No downloads in history.");
        return Ok(());
    }

    for entry in entries {
        let date = entry.date.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        println!("{}  ·  {}  ·  {}", display_title(&entry), date, current_size(&entry));
        println!("    {}", entry.output.display());
        if let Some(files) = &entry.contained_files {
            for file in files {
                println!("      - {}", file);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(title: &str, output: &str) -> HistoryEntry {
        HistoryEntry::new(title.into(), vec!["https://Host.example/A".into()], PathBuf::from(output))
    }

    #[test]
    fn title_drops_extension_and_falls_back_to_output() {
        assert_eq!(display_title(&entry("movie.part1.mkv", "/d/x")), "movie.part1");
        assert_eq!(display_title(&entry("", "/d/archive.zip")), "archive");
    }

    #[test]
    fn query_is_case_insensitive_across_fields() {
        let e = entry("Report.pdf", "/downloads/Report.pdf");
        assert!(matches_query(&e, "report"));
        assert!(matches_query(&e, "host.example/a"));
        assert!(!matches_query(&e, "nothing"));
    }

    #[test]
    fn missing_output_is_tolerated() {
        assert_eq!(current_size(&entry("gone", "/definitely/not/here.bin")), "missing");
    }
}
