//! Turns wordlist entries into absolute candidate URLs.
//!
//! Every entry may contain the [`PLACEHOLDER`] marker, which is replaced by the
//! normalized base URL without its scheme. The scheme is then put back in front,
//! so `[url]/admin` against `https://Example.com/` becomes
//! `https://example.com/admin`.

use thiserror::Error;

pub const PLACEHOLDER: &str = "[url]";

const SCHEMES: [&str; 2] = ["http://", "https://"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CandidateError {
    #[error("URL must start with a scheme, http:// or https://: {url}")]
    MissingScheme { url: String },
}

/// A base URL split into its scheme and the lower-cased remainder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseUrl {
    scheme: &'static str,
    rest: String,
}

impl BaseUrl {
    pub fn parse(url: &str) -> Result<Self, CandidateError> {
        let mut lowered = url.trim().to_lowercase();
        if lowered.ends_with('/') {
            lowered.pop();
        }
        for scheme in SCHEMES {
            if let Some(rest) = lowered.strip_prefix(scheme) {
                return Ok(Self {
                    scheme,
                    rest: rest.to_string(),
                });
            }
        }
        Err(CandidateError::MissingScheme {
            url: url.to_string(),
        })
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn expand(&self, entry: &str) -> String {
        format!("{}{}", self.scheme, entry.replace(PLACEHOLDER, &self.rest))
    }
}

/// Builds one candidate per wordlist entry, preserving order and duplicates.
pub fn compile<S: AsRef<str>>(base_url: &str, wordlist: &[S]) -> Result<Vec<String>, CandidateError> {
    let base = BaseUrl::parse(base_url)?;
    Ok(wordlist.iter().map(|w| base.expand(w.as_ref())).collect())
}
