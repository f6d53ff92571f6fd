use crate::cli::args::CliArgs;

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(raw) = args.status_codes.as_deref() {
        crate::utils::parse_u16_set_csv(raw)
            .map_err(|e| format!("invalid --status-codes '{raw}': {e}"))?;
    }
    for raw in args.header.iter() {
        crate::utils::parse_header_line(raw)
            .map_err(|e| format!("invalid --header '{raw}': {e}"))?;
    }
    require_positive("concurrency", args.concurrency.map(u64::from))?;
    require_positive("rate", args.rate.map(u64::from))?;
    require_positive("timeout", args.timeout)?;
    require_positive("workers", args.workers.map(|w| w as u64))?;
    if let Some(raw) = args.output_format.as_deref() {
        if crate::output::OutputFormat::parse(raw).is_none() {
            return Err(format!("invalid --output-format '{raw}', expected text or json"));
        }
    }
    Ok(())
}

/// Checks the numeric settings after CLI flags and the config file are merged.
pub fn validate_limits(
    concurrency: u32,
    rate: Option<u32>,
    timeout: u64,
    workers: usize,
) -> Result<(), String> {
    require_positive("concurrency", Some(u64::from(concurrency)))?;
    require_positive("rate", rate.map(u64::from))?;
    require_positive("timeout", Some(timeout))?;
    require_positive("workers", Some(workers as u64))
}

fn require_positive(name: &str, value: Option<u64>) -> Result<(), String> {
    if value == Some(0) {
        return Err(format!("invalid {name}, expected positive integer"));
    }
    Ok(())
}
