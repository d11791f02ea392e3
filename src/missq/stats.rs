use serde::Serialize;

/// Event counters for one miss queue instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissQueueStats {
    pub allocated: u64,
    pub joined: u64,
    pub issued: u64,
    pub woken: u64,
    pub threads_woken: u64,
    pub grants_superseded: u64,
    pub promotion_faults: u64,
}
