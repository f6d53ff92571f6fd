//! Soft-404 calibration.
//!
//! Some servers answer every path with the same status, so a plain status match
//! would report the whole wordlist. Before a scan we request a handful of paths
//! that cannot exist and drop the status they agree on from the interesting set.

use std::collections::HashSet;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::Client;
use crate::transform::{self, CandidateError, PLACEHOLDER};
use crate::utils;

/// How many random paths are requested per calibration.
pub const BASELINE_SAMPLES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaselineAdjustment {
    /// Most common status among the answered samples.
    pub status: u16,
    /// Whether `status` was in the interesting set and got removed from it.
    pub removed: bool,
    /// Samples that produced a response.
    pub samples: usize,
}

/// Wordlist-style entries for paths that should not exist on any server.
pub fn not_found_entries(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            format!(
                "{PLACEHOLDER}/{}/{}",
                Uuid::new_v4().simple(),
                Uuid::new_v4().simple()
            )
        })
        .collect()
}

/// Most frequent status; ties go to the one seen first.
pub fn most_common_status(statuses: &[u16]) -> Option<u16> {
    let mut counts: Vec<(u16, usize)> = Vec::new();
    for status in statuses {
        match counts.iter_mut().find(|(s, _)| s == status) {
            Some((_, n)) => *n += 1,
            None => counts.push((*status, 1)),
        }
    }

    let mut best: Option<(u16, usize)> = None;
    for (status, n) in counts {
        match best {
            Some((_, top)) if n <= top => {}
            _ => best = Some((status, n)),
        }
    }
    best.map(|(status, _)| status)
}

pub fn apply_baseline(
    statuses: &[u16],
    interesting: &mut HashSet<u16>,
) -> Option<BaselineAdjustment> {
    let status = most_common_status(statuses)?;
    let removed = interesting.remove(&status);
    Some(BaselineAdjustment {
        status,
        removed,
        samples: statuses.len(),
    })
}

/// Requests [`BASELINE_SAMPLES`] random paths under `base_url` at once and
/// removes their most common status from `interesting`.
///
/// Failed samples do not vote. Returns `Ok(None)` when nothing answered or the
/// scan was cancelled first.
pub async fn calibrate(
    client: &Client,
    base_url: &str,
    interesting: &mut HashSet<u16>,
    cancel: &CancellationToken,
) -> Result<Option<BaselineAdjustment>, CandidateError> {
    let urls = transform::compile(base_url, &not_found_entries(BASELINE_SAMPLES))?;
    let probes = join_all(urls.iter().map(|url| client.get(url)));

    let responses = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(base_url, "calibration cancelled");
            return Ok(None);
        }
        responses = probes => responses,
    };

    let statuses: Vec<u16> = responses
        .into_iter()
        .filter_map(|r| r.ok())
        .map(|r| r.status)
        .collect();

    let adjustment = apply_baseline(&statuses, interesting);
    match &adjustment {
        Some(adj) if adj.removed => info!(
            base_url,
            status = adj.status,
            samples = adj.samples,
            interesting = %utils::format_codes(interesting),
            "baseline status removed from interesting codes"
        ),
        Some(adj) => debug!(
            base_url,
            status = adj.status,
            samples = adj.samples,
            "baseline status not in interesting codes"
        ),
        None => debug!(base_url, "no baseline samples answered"),
    }
    Ok(adjustment)
}
