use std::collections::{HashMap, HashSet};
use std::fs;

use anyhow::{ensure, Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::missq::{
    Cycle, IssueArbiter, MissQueue, MissQueueConfig, MissQueueStats, RoundRobinArbiter, ThreadMask,
};
use crate::sim::config::{SimConfig, TrafficConfig};
use crate::sim::fetch::{FetchPipeline, FetchStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    Running,
    Blocked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub steps: u64,
    pub accesses_issued: u64,
    pub loads: u64,
    pub stores: u64,
    pub stores_downgraded: u64,
    pub near_miss_snoops: u64,
    pub wakes_delivered: u64,
    pub accesses_deferred: u64,
}

#[derive(Debug, Serialize)]
struct SimSummary {
    driver: DriverStats,
    queue: MissQueueStats,
    fetch: FetchStats,
}

/// Traffic-driven top level: random per-thread misses feed the queue, a
/// round-robin arbiter drives the issue path, and a fixed-latency fetch model
/// delivers completions. Threads block from enqueue until their wake bit comes
/// back and resume issuing the following step.
pub struct Sim {
    sim_config: SimConfig,
    traffic: TrafficConfig,
    line_bytes: u64,
    queue: MissQueue,
    arbiter: RoundRobinArbiter,
    fetch: FetchPipeline,
    rng: StdRng,
    threads: Vec<ThreadState>,
    // line -> is_store for every miss in flight, maintained by the driver so
    // it can suppress the accesses the upstream pipeline would never send
    inflight_lines: HashMap<u64, bool>,
    stats: DriverStats,
    now: Cycle,
}

impl Sim {
    pub fn new(sim_config: SimConfig, queue_config: MissQueueConfig, traffic: TrafficConfig) -> Self {
        assert!(
            (0.0..=1.0).contains(&traffic.issue_prob),
            "issue_prob must be in [0, 1]"
        );
        assert!(
            (0.0..=1.0).contains(&traffic.store_fraction),
            "store_fraction must be in [0, 1]"
        );
        assert!(traffic.num_lines > 0, "num_lines must be nonzero");
        let mut traffic = traffic;
        traffic.base_addr &= !(queue_config.line_bytes - 1);
        let num_threads = queue_config.num_threads;
        Self {
            fetch: FetchPipeline::new(sim_config.fetch_latency),
            rng: StdRng::seed_from_u64(traffic.seed),
            sim_config,
            line_bytes: queue_config.line_bytes,
            queue: MissQueue::new(&queue_config),
            arbiter: RoundRobinArbiter::new(num_threads),
            threads: vec![ThreadState::Running; num_threads],
            inflight_lines: HashMap::new(),
            traffic,
            stats: DriverStats::default(),
            now: 0,
        }
    }

    pub fn queue(&self) -> &MissQueue {
        &self.queue
    }

    pub fn fetch_stats(&self) -> &FetchStats {
        self.fetch.stats()
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn all_threads_running(&self) -> bool {
        self.threads.iter().all(|t| *t == ThreadState::Running)
    }

    fn gen_access(&mut self) -> (u64, bool) {
        let line = self.rng.gen_range(0..self.traffic.num_lines);
        let addr = self.traffic.base_addr + line * self.line_bytes;
        let is_store = self.rng.gen_bool(self.traffic.store_fraction);
        (addr, is_store)
    }

    fn tick_one(&mut self, drain: bool) -> Result<()> {
        // Completed fetches wake their waiters first. Slots and lines touched
        // by a wake are off limits for every other operation this step.
        let mut woken_slots = ThreadMask::empty();
        let mut resumed = ThreadMask::empty();
        let mut woken_lines: HashSet<u64> = HashSet::new();
        for (slot, line_addr) in self.fetch.completions(self.now) {
            let woken = self.queue.wake(slot);
            woken_slots.insert(slot);
            resumed |= woken;
            let _ = woken_lines.insert(line_addr);
            let removed = self.inflight_lines.remove(&line_addr);
            debug_assert!(removed.is_some());
            for thread in woken.indices() {
                assert_eq!(
                    self.threads[thread],
                    ThreadState::Blocked,
                    "wake for thread {} which is not blocked",
                    thread
                );
                self.threads[thread] = ThreadState::Running;
                self.stats.wakes_delivered += 1;
            }
            debug!(
                "cycle {}: slot {} completed, resumed {}",
                self.now, slot, woken
            );
        }
        // Running threads may issue a new miss. Threads resumed this step
        // issue from the next step on, and nobody touches a line whose slot is
        // being freed this step.
        if !drain {
            for thread in 0..self.threads.len() {
                if self.threads[thread] != ThreadState::Running {
                    continue;
                }
                if resumed.contains(thread) {
                    continue;
                }
                if !self.rng.gen_bool(self.traffic.issue_prob) {
                    continue;
                }
                let (addr, mut is_store) = self.gen_access();
                if woken_lines.contains(&addr) {
                    self.stats.accesses_deferred += 1;
                    continue;
                }
                if self.queue.snoop(addr).is_some() {
                    self.stats.near_miss_snoops += 1;
                }
                if is_store {
                    if let Some(&inflight_store) = self.inflight_lines.get(&addr) {
                        if !inflight_store {
                            // a store colliding with an in-flight read has no
                            // defined promotion semantics; the upstream
                            // pipeline replays such stores, modeled here as a
                            // load join
                            is_store = false;
                            self.stats.stores_downgraded += 1;
                        }
                    }
                }
                self.queue.enqueue(addr, is_store, thread)?;
                let _ = self.inflight_lines.entry(addr).or_insert(is_store);
                self.threads[thread] = ThreadState::Blocked;
                self.stats.accesses_issued += 1;
                if is_store {
                    self.stats.stores += 1;
                } else {
                    self.stats.loads += 1;
                }
            }
        }

        // Arbitrate among pending slots, excluding any slot woken this step,
        // and hand the single grant to the fetch pipeline.
        let requests = self.queue.request_mask().without(woken_slots);
        let grant = self.arbiter.select(requests);
        if !grant.is_empty() {
            let issue = self.queue.dequeue(grant);
            self.fetch.issue(issue, self.now);
        }

        self.queue.tick();
        self.now += 1;
        self.stats.steps += 1;
        Ok(())
    }

    /// Run the configured number of steps, then drain until every fetch has
    /// completed and every thread is running again.
    pub fn run(&mut self) -> Result<()> {
        for _ in 0..self.sim_config.steps {
            self.tick_one(false)?;
        }
        let deadline = self.now + self.sim_config.drain_timeout;
        while !(self.queue.is_idle() && self.fetch.is_idle()) {
            ensure!(
                self.now < deadline,
                "drain did not converge within {} cycles",
                self.sim_config.drain_timeout
            );
            self.tick_one(true)?;
        }
        ensure!(
            self.all_threads_running(),
            "threads still blocked after drain"
        );
        ensure!(
            self.stats.wakes_delivered == self.stats.accesses_issued,
            "waiter conservation violated: {} accesses but {} wakes",
            self.stats.accesses_issued,
            self.stats.wakes_delivered
        );
        self.report()
    }

    fn report(&self) -> Result<()> {
        let summary = SimSummary {
            driver: self.stats,
            queue: *self.queue.stats(),
            fetch: *self.fetch.stats(),
        };
        info!(
            "ran {} cycles: {} misses ({} allocated, {} joined), {} fetches, {} wakes",
            self.now,
            self.stats.accesses_issued,
            summary.queue.allocated,
            summary.queue.joined,
            summary.fetch.fetches_started,
            summary.queue.woken
        );
        if let Some(path) = &self.sim_config.results_json {
            let json = serde_json::to_string_pretty(&summary)?;
            fs::write(path, json).with_context(|| format!("cannot write results to {}", path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Sim;
    use crate::missq::MissQueueConfig;
    use crate::sim::config::{SimConfig, TrafficConfig};

    fn sim(seed: u64, steps: u64, store_fraction: f64) -> Sim {
        let sim_config = SimConfig {
            steps,
            fetch_latency: 5,
            drain_timeout: 1000,
            results_json: None,
        };
        let queue_config = MissQueueConfig {
            num_threads: 8,
            line_bytes: 64,
        };
        let traffic = TrafficConfig {
            seed,
            num_lines: 8,
            base_addr: 0x8000_0000,
            issue_prob: 0.5,
            store_fraction,
        };
        Sim::new(sim_config, queue_config, traffic)
    }

    #[test]
    fn run_drains_and_conserves_waiters() {
        let mut s = sim(3, 500, 0.25);
        s.run().unwrap();
        assert!(s.queue().is_idle());
        assert!(s.all_threads_running());
        let stats = *s.stats();
        assert!(stats.accesses_issued > 0);
        assert_eq!(stats.wakes_delivered, stats.accesses_issued);
        let queue = s.queue().stats();
        assert_eq!(queue.allocated + queue.joined, stats.accesses_issued);
        // every fetch that started completed, and every completion woke a slot
        assert_eq!(s.fetch_stats().completions, queue.woken);
        assert_eq!(queue.promotion_faults, 0);
    }

    #[test]
    fn store_heavy_traffic_never_faults() {
        let mut s = sim(11, 500, 0.9);
        s.run().unwrap();
        assert_eq!(s.queue().stats().promotion_faults, 0);
    }

    #[test]
    fn same_seed_reproduces_stats() {
        let mut a = sim(42, 300, 0.3);
        let mut b = sim(42, 300, 0.3);
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.stats(), b.stats());
    }
}
