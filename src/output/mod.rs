use serde::Serialize;

use crate::bruteforcer::ProbeResult;
use crate::client::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Clone, Debug, Serialize)]
pub struct OutputRecord {
    pub url: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub error: Option<ErrorKind>,
    pub elapsed_ms: Option<u64>,
}

impl From<&ProbeResult> for OutputRecord {
    fn from(r: &ProbeResult) -> Self {
        Self {
            url: r.url.clone(),
            status: r.status,
            ok: r.ok,
            error: r.error,
            elapsed_ms: r.elapsed.map(|d| d.as_millis() as u64),
        }
    }
}

pub fn build_records(results: &[ProbeResult]) -> Vec<OutputRecord> {
    results.iter().map(OutputRecord::from).collect()
}

/// One found URL per line.
pub fn render_text(records: &[OutputRecord]) -> Vec<u8> {
    let mut out = String::new();
    for r in records.iter().filter(|r| r.ok) {
        out.push_str(&r.url);
        out.push('\n');
    }
    out.into_bytes()
}

pub fn render_json(records: &[OutputRecord]) -> Vec<u8> {
    serde_json::to_vec_pretty(records).unwrap_or_else(|_| b"[]\n".to_vec())
}

pub fn render(format: OutputFormat, records: &[OutputRecord]) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(records),
        OutputFormat::Json => render_json(records),
    }
}
