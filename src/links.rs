use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)(https?://[^\s"'<>]+|magnet:\?[^\s"'<>]+)"#).expect("valid link regex")
    })
}

pub fn is_magnet(link: &str) -> bool {
    link.get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("magnet:?"))
}

fn is_valid(candidate: &str) -> bool {
    match url::Url::parse(candidate) {
        Ok(url) if is_magnet(candidate) => url.query_pairs().any(|(k, v)| k == "xt" && !v.is_empty()),
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

/// Every http(s) URL and magnet URI in `text`, in order of appearance.
/// Duplicates are kept; see [`dedupe_links`].
pub fn extract_links(text: &str) -> Vec<String> {
    link_pattern()
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|candidate| is_valid(candidate))
        .collect()
}

/// First occurrence of each link, plus how many repeats were dropped.
pub fn dedupe_links(links: Vec<String>) -> (Vec<String>, usize) {
    let total = links.len();
    let mut seen = HashSet::new();
    let unique: Vec<String> = links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}
