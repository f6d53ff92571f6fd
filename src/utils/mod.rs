use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file extension for {kind}: {path} (expected .txt or .json)")]
    UnsupportedFormat { kind: &'static str, path: String },

    #[error("failed to read {kind}: {path}: {source}")]
    Read {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {kind} as a JSON array of strings: {path}: {source}")]
    Json {
        kind: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListFormat {
    Lines,
    Json,
}

impl ListFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("txt") | Some("lst") => Some(Self::Lines),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parses list contents. Line lists are trimmed and blank lines dropped;
/// JSON lists must be a flat array of strings and are kept verbatim.
pub fn parse_list(
    contents: &str,
    format: ListFormat,
) -> Result<Vec<String>, serde_json::Error> {
    match format {
        ListFormat::Lines => Ok(contents
            .lines()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()),
        ListFormat::Json => serde_json::from_str::<Vec<String>>(contents),
    }
}

/// Loads a wordlist, user-agent or proxy list from a `.txt` or `.json` file.
pub fn load_list(kind: &'static str, path: &str) -> Result<Vec<String>, LoadError> {
    let expanded = crate::config::expand_tilde(path);
    let display = expanded.display().to_string();
    let format = ListFormat::from_path(&expanded).ok_or_else(|| LoadError::UnsupportedFormat {
        kind,
        path: display.clone(),
    })?;
    let contents = std::fs::read_to_string(&expanded).map_err(|e| LoadError::Read {
        kind,
        path: display.clone(),
        source: e,
    })?;
    parse_list(&contents, format).map_err(|e| LoadError::Json {
        kind,
        path: display,
        source: e,
    })
}

pub fn parse_u16_set_csv(value: &str) -> Result<HashSet<u16>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("list is empty".to_string());
    }
    let mut out = HashSet::new();
    for part in raw.split(',') {
        let item = part.trim();
        if item.is_empty() {
            continue;
        }
        let code: u16 = item
            .parse()
            .map_err(|_| format!("invalid status code '{item}'"))?;
        if !(100..=599).contains(&code) {
            return Err(format!("status code out of range '{item}'"));
        }
        out.insert(code);
    }
    if out.is_empty() {
        return Err("list is empty".to_string());
    }
    Ok(out)
}

/// Splits a `Key: Value` header line.
pub fn parse_header_line(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once(':')
        .ok_or_else(|| format!("expected 'Key: Value', got '{value}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty header name in '{value}'"));
    }
    Ok((key.to_string(), val.trim().to_string()))
}

pub fn sorted_codes(codes: &HashSet<u16>) -> Vec<u16> {
    let mut out: Vec<u16> = codes.iter().copied().collect();
    out.sort_unstable();
    out
}

pub fn format_codes(codes: &HashSet<u16>) -> String {
    sorted_codes(codes)
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
