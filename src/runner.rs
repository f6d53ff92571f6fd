use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bruteforcer::{self, BruteJob, BruteResult, GateStats, ProbeContext, ProbeResult};
use crate::client::{Client, ClientError, ClientOptions, ErrorKind};
use crate::detector::{self, BaselineAdjustment};
use crate::identity::{self, IdentityError, IdentityProvider};
use crate::transform::{self, CandidateError};
use crate::utils::{self, LoadError};

pub const DEFAULT_STATUS_CODES: [u16; 6] = [200, 301, 302, 401, 403, 405];

#[derive(Clone, Debug)]
pub enum ListSource {
    FilePath(String),
    Inline(Vec<String>),
}

impl ListSource {
    fn load(&self, kind: &'static str) -> Result<Vec<String>, LoadError> {
        match self {
            ListSource::Inline(values) => Ok(values
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()),
            ListSource::FilePath(path) => utils::load_list(kind, path),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    pub url: String,
    pub wordlist: ListSource,
    pub user_agents: ListSource,
    pub proxies: Option<ListSource>,
    pub status_codes: HashSet<u16>,
    pub timeout_seconds: u64,
    pub retries: u32,
    pub concurrency: u32,
    pub rate: Option<u32>,
    pub random_user_agent: bool,
    pub follow_redirects: bool,
    pub error_for_status: bool,
    pub headers: Vec<(String, String)>,
    pub max_candidates: Option<usize>,
    pub calibrate: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: String::new(),
            wordlist: ListSource::Inline(Vec::new()),
            user_agents: ListSource::Inline(identity::default_user_agents()),
            proxies: None,
            status_codes: DEFAULT_STATUS_CODES.into_iter().collect(),
            timeout_seconds: 3,
            retries: 1,
            concurrency: 2,
            rate: None,
            random_user_agent: true,
            follow_redirects: false,
            error_for_status: false,
            headers: Vec::new(),
            max_candidates: None,
            calibrate: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid base URL: {source}")]
    InvalidUrl {
        #[source]
        source: CandidateError,
    },

    #[error("user agent pool is empty")]
    NoUserAgents,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid concurrency {value}, expected a positive integer")]
    InvalidConcurrency { value: u32 },

    #[error("invalid rate 0, expected a positive integer or no limit")]
    InvalidRate,

    #[error("wordlist is empty")]
    EmptyWordlist,

    #[error("scan already started (state: {state})")]
    AlreadyStarted { state: ScanState },
}

impl From<IdentityError> for RunnerError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::NoUserAgents => RunnerError::NoUserAgents,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::Completed => "completed",
            ScanState::Cancelled => "cancelled",
            ScanState::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Cancelled | ScanState::Failed
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancels a running scan from another task.
#[derive(Clone, Debug)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Clone, Debug)]
pub struct ScanReport {
    pub state: ScanState,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub candidates: usize,
    pub baseline: Option<BaselineAdjustment>,
    /// Interesting codes as used by the probes, after calibration.
    pub interesting: HashSet<u16>,
    /// One entry per finished probe, in candidate order.
    pub results: Vec<ProbeResult>,
    pub found: Vec<String>,
    pub error_counts: HashMap<ErrorKind, usize>,
    pub peak_in_flight: usize,
}

impl ScanReport {
    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.error_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_errors(&self) -> usize {
        self.error_counts.values().sum()
    }
}

struct Dispatch {
    results: Vec<ProbeResult>,
    error_counts: HashMap<ErrorKind, usize>,
    peak_in_flight: usize,
}

/// A single-shot scan of one base URL.
///
/// Everything that can be wrong with the configuration is caught by
/// [`Runner::new`]; [`Runner::run`] only fails when called twice.
pub struct Runner {
    base_url: String,
    wordlist: Vec<String>,
    interesting: HashSet<u16>,
    concurrency: usize,
    rate: Option<NonZeroU32>,
    max_candidates: Option<usize>,
    calibrate: bool,
    client: Mutex<Option<Client>>,
    cancel: CancellationToken,
    state: watch::Sender<ScanState>,
    found: Arc<Mutex<Vec<String>>>,
}

impl Runner {
    pub fn new(options: Options) -> Result<Self, RunnerError> {
        transform::BaseUrl::parse(&options.url)
            .map_err(|e| RunnerError::InvalidUrl { source: e })?;

        if options.concurrency == 0 {
            return Err(RunnerError::InvalidConcurrency {
                value: options.concurrency,
            });
        }
        let rate = match options.rate {
            Some(0) => return Err(RunnerError::InvalidRate),
            Some(r) => NonZeroU32::new(r),
            None => None,
        };

        let wordlist = options.wordlist.load("wordlist")?;
        if wordlist.is_empty() {
            return Err(RunnerError::EmptyWordlist);
        }
        let user_agents = options.user_agents.load("user agents")?;
        let proxies = match &options.proxies {
            Some(source) => source.load("proxies")?,
            None => Vec::new(),
        };

        let identity = IdentityProvider::new(user_agents, &proxies)?;
        let client = Client::new(
            ClientOptions {
                timeout: Duration::from_secs(options.timeout_seconds),
                retries: options.retries,
                follow_redirects: options.follow_redirects,
                random_user_agent: options.random_user_agent,
                error_for_status: options.error_for_status,
                headers: options.headers,
            },
            identity,
        )?;

        let (state, _) = watch::channel(ScanState::Idle);
        Ok(Self {
            base_url: options.url,
            wordlist,
            interesting: options.status_codes,
            concurrency: options.concurrency as usize,
            rate,
            max_candidates: options.max_candidates,
            calibrate: options.calibrate,
            client: Mutex::new(Some(client)),
            cancel: CancellationToken::new(),
            state,
            found: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Requests cancellation. Results finished so far are kept.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(base_url = %self.base_url, "stop requested");
        }
        self.cancel.cancel();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// URLs found so far, in completion order.
    pub async fn found_urls(&self) -> Vec<String> {
        self.found.lock().await.clone()
    }

    pub fn wordlist_len(&self) -> usize {
        self.wordlist.len()
    }

    pub async fn run(&self) -> Result<ScanReport, RunnerError> {
        let started = self.state.send_if_modified(|state| {
            if *state == ScanState::Idle {
                *state = ScanState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(RunnerError::AlreadyStarted {
                state: self.state(),
            });
        }
        let started_at = Instant::now();

        let mut candidates = match transform::compile(&self.base_url, &self.wordlist) {
            Ok(candidates) => candidates,
            Err(e) => return Err(self.fail(RunnerError::InvalidUrl { source: e })),
        };
        if let Some(max) = self.max_candidates {
            candidates.truncate(max);
        }

        let client = match self.client.lock().await.take() {
            Some(client) => Arc::new(client),
            None => {
                return Err(self.fail(RunnerError::AlreadyStarted {
                    state: ScanState::Running,
                }))
            }
        };

        info!(
            base_url = %self.base_url,
            candidates = candidates.len(),
            concurrency = self.concurrency,
            interesting = %utils::format_codes(&self.interesting),
            "scan started"
        );

        let mut interesting = self.interesting.clone();
        let baseline = if self.calibrate {
            match detector::calibrate(&client, &self.base_url, &mut interesting, &self.cancel).await
            {
                Ok(baseline) => baseline,
                Err(e) => return Err(self.fail(RunnerError::InvalidUrl { source: e })),
            }
        } else {
            debug!(base_url = %self.base_url, "calibration disabled");
            None
        };

        let dispatch = self
            .dispatch(client.clone(), &candidates, interesting.clone())
            .await;

        match Arc::try_unwrap(client) {
            Ok(client) => client.close(),
            Err(shared) => {
                warn!(
                    refs = Arc::strong_count(&shared),
                    "transport still shared after all probes joined"
                );
                drop(shared);
            }
        }

        let state = final_state(
            self.cancel.is_cancelled(),
            dispatch.results.len(),
            candidates.len(),
        );
        self.state.send_replace(state);

        let found: Vec<String> = dispatch
            .results
            .iter()
            .filter(|r| r.ok)
            .map(|r| r.url.clone())
            .collect();
        let elapsed = started_at.elapsed();
        info!(
            state = %state,
            found = found.len(),
            results = dispatch.results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "scan stopped"
        );

        Ok(ScanReport {
            state,
            started_at,
            elapsed,
            candidates: candidates.len(),
            baseline,
            interesting,
            results: dispatch.results,
            found,
            error_counts: dispatch.error_counts,
            peak_in_flight: dispatch.peak_in_flight,
        })
    }

    fn fail(&self, e: RunnerError) -> RunnerError {
        self.state.send_replace(ScanState::Failed);
        error!(base_url = %self.base_url, error = %e, "scan failed");
        e
    }

    // one task per candidate behind a shared gate, drained by a single collector
    async fn dispatch(
        &self,
        client: Arc<Client>,
        candidates: &[String],
        interesting: HashSet<u16>,
    ) -> Dispatch {
        let (result_tx, mut result_rx) = mpsc::channel::<BruteResult>(self.concurrency.max(1) * 2);

        let found = self.found.clone();
        let collect_handle = task::spawn(async move {
            let mut out: Vec<BruteResult> = Vec::new();
            let mut counts: HashMap<ErrorKind, usize> = HashMap::new();
            while let Some(msg) = result_rx.recv().await {
                let r = &msg.result;
                match (r.error, r.detail.as_deref()) {
                    (Some(ErrorKind::Unexpected), detail) => error!(
                        url = %r.url,
                        kind = %ErrorKind::Unexpected,
                        detail = detail.unwrap_or_default(),
                        "unexpected probe failure"
                    ),
                    (Some(kind), _) => debug!(url = %r.url, kind = %kind, "probe failed"),
                    (None, _) => {}
                }
                if let Some(kind) = r.error {
                    *counts.entry(kind).or_insert(0) += 1;
                }
                if r.ok {
                    info!(url = %r.url, status = r.status.unwrap_or_default(), "found");
                    found.lock().await.push(r.url.clone());
                }
                out.push(msg);
            }
            (out, counts)
        });

        let ctx = Arc::new(ProbeContext {
            client,
            gate: Semaphore::new(self.concurrency),
            limiter: self.rate.map(|r| RateLimiter::direct(Quota::per_second(r))),
            interesting,
            cancel: self.cancel.clone(),
            stats: GateStats::default(),
        });

        let mut set = JoinSet::new();
        for (index, url) in candidates.iter().enumerate() {
            let job = BruteJob {
                index,
                url: url.clone(),
            };
            set.spawn(bruteforcer::run_probe_task(job, ctx.clone(), result_tx.clone()));
        }
        drop(result_tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    error!(error = %e, "probe task failed to join");
                }
            }
        }

        let peak_in_flight = ctx.stats.peak();
        drop(ctx);

        let (mut out, error_counts) = collect_handle.await.unwrap_or_default();
        out.sort_by_key(|m| m.index);
        Dispatch {
            results: out.into_iter().map(|m| m.result).collect(),
            error_counts,
            peak_in_flight,
        }
    }
}

// a stop that lands after the last probe finished leaves nothing unprobed
fn final_state(cancelled: bool, finished: usize, candidates: usize) -> ScanState {
    if cancelled && finished < candidates {
        ScanState::Cancelled
    } else {
        ScanState::Completed
    }
}
