use log::trace;
use serde::Serialize;
use smallvec::SmallVec;

use crate::missq::{Cycle, IssueGrant};

#[derive(Debug, Clone, Copy)]
struct InflightFetch {
    slot: usize,
    line_addr: u64,
    ready_at: Cycle,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FetchStats {
    pub fetches_started: u64,
    pub duplicate_grants_dropped: u64,
    pub completions: u64,
}

/// Fixed-latency stand-in for the interconnect and the next memory level.
/// Accepts grant outputs from the miss queue and reports each completed fetch
/// exactly once, `latency` cycles after it started.
#[derive(Debug)]
pub struct FetchPipeline {
    latency: u64,
    inflight: SmallVec<[InflightFetch; 8]>,
    stats: FetchStats,
}

impl FetchPipeline {
    pub fn new(latency: u64) -> Self {
        Self {
            latency: latency.max(1),
            inflight: SmallVec::new(),
            stats: FetchStats::default(),
        }
    }

    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    pub fn is_idle(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Start a fetch for a granted slot. A line already being fetched means
    /// the grant was superseded by a same-step join and later re-issued; the
    /// duplicate is dropped so the line is fetched once.
    pub fn issue(&mut self, grant: IssueGrant, now: Cycle) {
        if self
            .inflight
            .iter()
            .any(|fetch| fetch.line_addr == grant.line_addr)
        {
            self.stats.duplicate_grants_dropped += 1;
            trace!(
                "cycle {}: dropping duplicate fetch for {:#x} (slot {})",
                now,
                grant.line_addr,
                grant.slot
            );
            return;
        }
        self.inflight.push(InflightFetch {
            slot: grant.slot,
            line_addr: grant.line_addr,
            ready_at: now + self.latency,
        });
        self.stats.fetches_started += 1;
        trace!(
            "cycle {}: fetch of {:#x} for slot {} completes at {}",
            now,
            grant.line_addr,
            grant.slot,
            now + self.latency
        );
    }

    /// Fetches whose latency has elapsed at `now`, as (slot, line) pairs.
    pub fn completions(&mut self, now: Cycle) -> SmallVec<[(usize, u64); 4]> {
        let mut done = SmallVec::new();
        self.inflight.retain(|fetch| {
            if fetch.ready_at <= now {
                done.push((fetch.slot, fetch.line_addr));
                false
            } else {
                true
            }
        });
        self.stats.completions += done.len() as u64;
        done
    }
}
