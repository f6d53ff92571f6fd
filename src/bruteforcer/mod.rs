use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ErrorKind};

/// Process-wide pacing shared by every probe task of one scan.
pub type ScanLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outcome of probing a single candidate URL.
///
/// Built once by the probe task and never changed afterwards. A response sets
/// `status` (and `ok` when the code is interesting); a failure sets `error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub url: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub error: Option<ErrorKind>,
    pub detail: Option<String>,
    pub elapsed: Option<Duration>,
}

impl ProbeResult {
    pub fn response(url: &str, status: u16, interesting: bool, elapsed: Duration) -> Self {
        Self {
            url: url.to_string(),
            status: Some(status),
            ok: interesting,
            error: None,
            detail: None,
            elapsed: Some(elapsed),
        }
    }

    pub fn failure(url: &str, kind: ErrorKind, detail: String, elapsed: Duration) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            ok: false,
            error: Some(kind),
            detail: Some(detail),
            elapsed: Some(elapsed),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// the BruteJob struct is one candidate handed to a probe task
#[derive(Clone, Debug)]
pub struct BruteJob {
    pub index: usize,
    pub url: String,
}

// the BruteResult struct carries a finished probe back to the collector
#[derive(Clone, Debug)]
pub struct BruteResult {
    pub index: usize,
    pub result: ProbeResult,
}

/// Counts probes currently holding the concurrency gate.
#[derive(Debug, Default)]
pub struct GateStats {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl GateStats {
    pub fn enter(&self) -> InFlight<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight { stats: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlight<'a> {
    stats: &'a GateStats,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a probe task shares with its siblings.
pub struct ProbeContext {
    pub client: Arc<Client>,
    pub gate: Semaphore,
    pub limiter: Option<ScanLimiter>,
    pub interesting: HashSet<u16>,
    pub cancel: CancellationToken,
    pub stats: GateStats,
}

/// Probes one URL. Returns `None` only when the scan was cancelled before the
/// request finished; every other outcome, panics included, becomes a result.
pub async fn probe(
    client: &Client,
    url: &str,
    interesting: &HashSet<u16>,
    cancel: &CancellationToken,
) -> Option<ProbeResult> {
    let started = Instant::now();
    let request = AssertUnwindSafe(client.get(url)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        outcome = request => outcome,
    };
    let elapsed = started.elapsed();

    Some(match outcome {
        Ok(Ok(resp)) => {
            ProbeResult::response(url, resp.status, interesting.contains(&resp.status), elapsed)
        }
        Ok(Err(e)) => ProbeResult::failure(url, e.kind(), e.to_string(), elapsed),
        Err(panic) => ProbeResult::failure(url, ErrorKind::Unexpected, panic_message(&*panic), elapsed),
    })
}

// runs one candidate through the gate, the optional pacer and the request,
// then hands the result to the collector.
pub async fn run_probe_task(
    job: BruteJob,
    ctx: Arc<ProbeContext>,
    tx: mpsc::Sender<BruteResult>,
) {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return,
        permit = ctx.gate.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    if let Some(limiter) = ctx.limiter.as_ref() {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = limiter.until_ready() => {}
        }
    }

    let in_flight = ctx.stats.enter();
    let outcome = probe(&ctx.client, &job.url, &ctx.interesting, &ctx.cancel).await;
    drop(in_flight);
    drop(permit);

    if let Some(result) = outcome {
        let _ = tx
            .send(BruteResult {
                index: job.index,
                result,
            })
            .await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("probe panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("probe panicked: {s}")
    } else {
        "probe panicked".to_string()
    }
}
