use std::sync::Arc;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::EnvFilter;

use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::client;
use crate::config::{self, ConfigFile};
use crate::output::{self, OutputFormat};
use crate::runner::{ListSource, Options, Runner, ScanReport, DEFAULT_STATUS_CODES};
use crate::utils;

fn print_banner() {
    const BANNER: &str = r#"
       __              __                        __
  ___ / /  ___ ____  / /__ _    _____ ____ _/ /____
 (_-</ _ \/ _ `/ _ \/ / _ \ |/|/ / _ `/ _ `/ __/ -_)
/___/_//_/\_,_/\_,_/_/\___/__,__/\_, /\_,_/\__/\__/
                                /___/
       v0.2.0 - concurrent HTTP content discovery
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[derive(Clone, Debug)]
struct RunConfig {
    options: Options,
    wordlist_path: String,
    user_agents_path: Option<String>,
    proxies_path: Option<String>,
    workers: usize,
    output: Option<String>,
    output_format: OutputFormat,
    no_color: bool,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = if args.color {
        false
    } else {
        args.no_color || cfg.no_color.unwrap_or(false)
    };

    let url = args
        .url
        .or(cfg.url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| "a base URL is required (--url)".to_string())?;
    let wordlist_path = args
        .wordlist
        .or(cfg.wordlist)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| "a wordlist is required (--wordlist)".to_string())?;
    let user_agents_path = args.user_agents.or(cfg.user_agents);
    let proxies_path = args.proxies.or(cfg.proxies);

    let status_raw = args.status_codes.or(cfg.status_codes);
    let status_codes = match status_raw.as_deref() {
        Some(raw) => utils::parse_u16_set_csv(raw)
            .map_err(|e| format!("invalid status codes '{raw}': {e}"))?,
        None => DEFAULT_STATUS_CODES.into_iter().collect(),
    };

    let header_lines = if args.header.is_empty() {
        cfg.headers.unwrap_or_default()
    } else {
        args.header
    };
    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines.iter() {
        headers.push(
            utils::parse_header_line(line).map_err(|e| format!("invalid header '{line}': {e}"))?,
        );
    }

    let concurrency = args.concurrency.or(cfg.concurrency).unwrap_or(2);
    let rate = args.rate.or(cfg.rate);
    let timeout = args.timeout.or(cfg.timeout).unwrap_or(3);
    let retries = args.retries.or(cfg.retries).unwrap_or(1);
    let workers = args.workers.or(cfg.workers).unwrap_or(4);
    let max_candidates = args.max_candidates.or(cfg.max_candidates);
    validation::validate_limits(concurrency, rate, timeout, workers)?;

    let random_user_agent = args
        .random_user_agent
        .or(cfg.random_user_agent)
        .unwrap_or(true);
    let follow_redirects = args.follow_redirects || cfg.follow_redirects.unwrap_or(false);
    let error_for_status = args.strict_status || cfg.strict_status.unwrap_or(false);
    let calibrate = !args.no_calibrate && cfg.calibrate.unwrap_or(true);

    let output_path = args.output.or(cfg.output).filter(|p| !p.trim().is_empty());
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => OutputFormat::parse(&raw)
            .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        None => output_path
            .as_deref()
            .and_then(output::infer_format_from_path)
            .unwrap_or(OutputFormat::Text),
    };

    let options = Options {
        url,
        wordlist: ListSource::FilePath(wordlist_path.clone()),
        user_agents: match user_agents_path.as_ref() {
            Some(path) => ListSource::FilePath(path.clone()),
            None => Options::default().user_agents,
        },
        proxies: proxies_path.clone().map(ListSource::FilePath),
        status_codes,
        timeout_seconds: timeout,
        retries,
        concurrency,
        rate,
        random_user_agent,
        follow_redirects,
        error_for_status,
        headers,
        max_candidates,
        calibrate,
    };

    Ok(RunConfig {
        options,
        wordlist_path,
        user_agents_path,
        proxies_path,
        workers,
        output: output_path,
        output_format,
        no_color,
    })
}

// RUST_LOG wins; otherwise -v / -vv raise the crate's level from warn.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shadowgate={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_settings(run: &RunConfig, wordlist_len: usize) {
    let o = &run.options;
    format_kv_line("Target", &o.url);
    format_kv_line(
        "Wordlist",
        &format!("{} ({} entries)", run.wordlist_path, wordlist_len),
    );
    format_kv_line(
        "Agents",
        run.user_agents_path.as_deref().unwrap_or("built-in"),
    );
    format_kv_line("Proxies", run.proxies_path.as_deref().unwrap_or("none"));
    format_kv_line("Status", &utils::format_codes(&o.status_codes));
    format_kv_line("Threads", &o.concurrency.to_string());
    format_kv_line(
        "Rate",
        &o.rate
            .map(|r| format!("{r}/s"))
            .unwrap_or_else(|| "unlimited".to_string()),
    );
    format_kv_line("Timeout", &format!("{}s", o.timeout_seconds));
    format_kv_line("Retries", &o.retries.to_string());
    format_kv_line("Redirects", format_bool(o.follow_redirects));
    format_kv_line("Random UA", format_bool(o.random_user_agent));
    format_kv_line("Calibrate", format_bool(o.calibrate));
    if let Some(max) = o.max_candidates {
        format_kv_line("Max", &max.to_string());
    }
    if let Some(path) = run.output.as_deref() {
        format_kv_line("Output", path);
    }
    println!();
}

fn print_summary(report: &ScanReport) {
    println!();
    if let Some(baseline) = report.baseline {
        let note = if baseline.removed {
            "removed from interesting codes"
        } else {
            "not an interesting code"
        };
        format_kv_line(
            "Baseline",
            &format!("{} ({}, {} samples)", baseline.status, note, baseline.samples),
        );
    }
    format_kv_line("State", report.state.as_str());
    format_kv_line(
        "Probed",
        &format!("{}/{}", report.results.len(), report.candidates),
    );
    format_kv_line("Found", &report.found.len().to_string());
    format_kv_line("Errors", &report.total_errors().to_string());
    for kind in client::ErrorKind::ALL {
        let n = report.error_count(kind);
        if n > 0 {
            format_kv_line(kind.as_str(), &n.to_string());
        }
    }
    println!(
        ":: Completed :: scan took {}s ::",
        report.elapsed.as_secs()
    );
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    print_banner();

    let runner = Arc::new(Runner::new(run.options.clone()).map_err(|e| e.to_string())?);
    print_settings(&run, runner.wordlist_len());

    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb.set_style(
        ProgressStyle::with_template(":: {spinner} :: Duration: [{elapsed_precise}] :: {msg}")
            .map_err(|e| format!("failed to build progress bar style: {e}"))?,
    );
    pb.set_message("scanning");

    let stop = runner.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let ticker = tokio::spawn({
        let runner = runner.clone();
        let pb = pb.clone();
        async move {
            let mut printed = 0usize;
            let mut interval = tokio::time::interval(Duration::from_millis(200));
            loop {
                interval.tick().await;
                let finished = runner.state().is_finished();
                let found = runner.found_urls().await;
                for url in found.iter().skip(printed) {
                    pb.println(format!("{} {}", "found ::".bold().green(), url.bold().blue()));
                }
                printed = found.len();
                pb.set_message(format!("scanning :: {printed} found"));
                if finished {
                    break;
                }
            }
        }
    });

    let outcome = runner.run().await;
    let _ = ticker.await;
    ctrl_c.abort();
    pb.finish_and_clear();

    let report = outcome.map_err(|e| e.to_string())?;
    print_summary(&report);

    if let Some(path) = run.output.as_deref() {
        let records = output::build_records(&report.results);
        let bytes = output::render(run.output_format, &records);
        tokio::fs::write(config::expand_tilde(path), bytes)
            .await
            .map_err(|e| format!("failed to write output file '{path}': {e}"))?;
    }

    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                let mut cmd = CliArgs::command();
                print!("{}", cmd.render_long_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    if args.init_config {
        let path = match args.config.as_deref() {
            Some(p) => config::expand_tilde(p),
            None => config::default_config_path()
                .ok_or_else(|| "cannot determine home directory".to_string())?,
        };
        config::ensure_default_config_file(&path)?;
        println!("config file: {}", path.display());
        return Ok(());
    }

    let cfg = match args.config.as_deref() {
        Some(p) => config::load_config(&config::expand_tilde(p), false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    init_tracing(args.verbose);
    let run = build_run_config(args, cfg)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(run.workers)
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    rt.block_on(run_async(run))?;
    Ok(())
}
