use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub wordlist: Option<String>,
    #[serde(alias = "user_agent_file")]
    pub user_agents: Option<String>,
    #[serde(alias = "proxy_file")]
    pub proxies: Option<String>,
    #[serde(alias = "interesting")]
    pub status_codes: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub concurrency: Option<u32>,
    pub rate: Option<u32>,
    pub workers: Option<usize>,
    pub max_candidates: Option<usize>,
    pub headers: Option<Vec<String>>,
    pub random_user_agent: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub strict_status: Option<bool>,
    pub calibrate: Option<bool>,
    pub output: Option<String>,
    pub output_format: Option<String>,
    pub no_color: Option<bool>,
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
        .or_else(|| {
            let drive = env::var_os("HOMEDRIVE")?;
            let path = env::var_os("HOMEPATH")?;
            Some(PathBuf::from(drive).join(path))
        })
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(home_dir()?.join(".shadowgate").join("config.yml"))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn load_config(path: &PathBuf, allow_missing: bool) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && allow_missing => {
            Ok(ConfigFile::default())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(format!("config file not found '{}'", path.display()))
        }
        Err(e) => Err(format!("failed to read config '{}': {e}", path.display())),
    }
}

pub fn parse_config(contents: &str) -> Result<ConfigFile, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str::<ConfigFile>(contents)
}

pub fn default_config_yaml() -> String {
    r#"# shadowgate config
#
# Location (default):
#   ~/.shadowgate/config.yml
#
# Command line flags override every value set here.

# Target (optional, usually passed with -u)
# url: https://example.com/

# Input
# wordlist: ./wordlists/common.txt
# user_agents: ./lists/user-agents.json
# proxies: ./lists/proxies.txt

# Matching
status_codes: "200,301,302,401,403,405"
calibrate: true
# max_candidates: 100

# HTTP
timeout: 3
retries: 1
random_user_agent: true
follow_redirects: false
strict_status: false
# headers:
#   - "Authorization: Bearer token"

# Performance
concurrency: 2
# rate: 50
workers: 4

# Output (optional)
# output: ./found.txt
# output_format: text
no_color: false
"#
    .to_string()
}

pub fn ensure_default_config_file(path: &PathBuf) -> Result<(), String> {
    if path.exists() {
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| format!("invalid config path '{}'", path.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        format!(
            "failed to create config directory '{}': {e}",
            parent.display()
        )
    })?;
    std::fs::write(path, default_config_yaml())
        .map_err(|e| format!("failed to write config file '{}': {e}", path.display()))?;
    Ok(())
}
