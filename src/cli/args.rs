use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "shadowgate",
    version,
    about = "concurrent HTTP content discovery",
    long_about = "shadowgate expands a wordlist against a base URL and probes every candidate concurrently, reporting the paths that answer with an interesting status code.\n\nWordlist entries use [url] as a placeholder for the base URL without its scheme, e.g. [url]/admin or api.[url]/v1.\n\nExamples:\n  shadowgate -u https://target.tld/ -W words.txt\n  shadowgate -u https://target.tld/ -W words.json -t 20 -s 200,401 -o found.txt\n  shadowgate -u https://target.tld/ -W words.txt -x proxies.txt -U agents.json\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'v',
        long = "vb",
        visible_alias = "verbose",
        action = ArgAction::Count,
        help_heading = "Output",
        help = "Increase verbosity (-v, -vv)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'c',
        long = "clr",
        visible_alias = "color",
        help_heading = "Output",
        help = "Enable colored output (overrides --no-color)."
    )]
    pub color: bool,

    #[arg(
        short = 'n',
        long = "nc",
        visible_alias = "no-color",
        help_heading = "Output",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'u',
        long = "u",
        visible_alias = "url",
        value_name = "URL",
        help_heading = "Input",
        help = "Base URL to scan, with http:// or https:// scheme."
    )]
    pub url: Option<String>,

    #[arg(
        short = 'W',
        long = "wl",
        visible_alias = "wordlist",
        value_name = "FILE",
        help_heading = "Input",
        help = "Wordlist file (.txt one entry per line, or .json array)."
    )]
    pub wordlist: Option<String>,

    #[arg(
        short = 'U',
        long = "ua",
        visible_alias = "user-agents",
        value_name = "FILE",
        help_heading = "Input",
        help = "User agent pool file (.txt or .json). Defaults to a built-in browser pool."
    )]
    pub user_agents: Option<String>,

    #[arg(
        short = 'x',
        long = "pxf",
        visible_alias = "proxies",
        value_name = "FILE",
        help_heading = "Input",
        help = "Proxy pool file (.txt or .json); invalid entries are skipped."
    )]
    pub proxies: Option<String>,

    #[arg(
        short = 'C',
        long = "cfg",
        visible_alias = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.shadowgate/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "init-config",
        help_heading = "Input",
        help = "Write a default config file if none exists, then exit."
    )]
    pub init_config: bool,

    #[arg(
        short = 's',
        long = "sc",
        visible_alias = "status-codes",
        value_name = "CODES",
        help_heading = "Scan",
        help = "Interesting status codes (comma-separated)."
    )]
    pub status_codes: Option<String>,

    #[arg(
        long = "ncal",
        visible_alias = "no-calibrate",
        help_heading = "Scan",
        help = "Skip soft-404 baseline calibration."
    )]
    pub no_calibrate: bool,

    #[arg(
        short = 'M',
        long = "mc",
        visible_alias = "max-candidates",
        value_name = "N",
        help_heading = "Scan",
        help = "Only probe the first N candidates."
    )]
    pub max_candidates: Option<usize>,

    #[arg(
        short = 'T',
        long = "to",
        visible_alias = "timeout",
        value_name = "SECONDS",
        help_heading = "HTTP",
        help = "Per-request timeout in seconds."
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 'R',
        long = "rtr",
        visible_alias = "retries",
        value_name = "N",
        help_heading = "HTTP",
        help = "Retries after a connection failure."
    )]
    pub retries: Option<u32>,

    #[arg(
        short = 'H',
        long = "hdr",
        visible_alias = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "HTTP",
        help = "Add a header to all requests (format: 'Key: Value', repeatable)."
    )]
    pub header: Vec<String>,

    #[arg(
        short = 'F',
        long = "frd",
        visible_alias = "follow-redirects",
        help_heading = "HTTP",
        help = "Follow HTTP redirects."
    )]
    pub follow_redirects: bool,

    #[arg(
        long = "rua",
        visible_alias = "random-user-agent",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        help_heading = "HTTP",
        help = "Pick a random user agent per request (default true)."
    )]
    pub random_user_agent: Option<bool>,

    #[arg(
        short = 'S',
        long = "strict",
        visible_alias = "strict-status",
        help_heading = "HTTP",
        help = "Treat 4xx/5xx responses as HTTPStatusError failures."
    )]
    pub strict_status: bool,

    #[arg(
        short = 't',
        long = "cnc",
        visible_alias = "concurrency",
        value_name = "N",
        help_heading = "Performance",
        help = "Max in-flight requests during scanning."
    )]
    pub concurrency: Option<u32>,

    #[arg(
        short = 'r',
        long = "rt",
        visible_alias = "rate",
        value_name = "RPS",
        help_heading = "Performance",
        help = "Request rate limit (requests per second)."
    )]
    pub rate: Option<u32>,

    #[arg(
        short = 'w',
        long = "wrk",
        visible_alias = "workers",
        value_name = "N",
        help_heading = "Performance",
        help = "Number of runtime worker threads."
    )]
    pub workers: Option<usize>,

    #[arg(
        short = 'o',
        long = "out",
        visible_alias = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write results to a file."
    )]
    pub output: Option<String>,

    #[arg(
        short = 'A',
        long = "of",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Output format (text or json)."
    )]
    pub output_format: Option<String>,
}
