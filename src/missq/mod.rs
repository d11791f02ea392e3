pub mod arbiter;
pub mod config;
pub mod mask;
pub mod queue;
pub mod slot;
pub mod stats;

#[cfg(test)]
mod tests;

pub use arbiter::{IssueArbiter, RoundRobinArbiter};
pub use config::MissQueueConfig;
pub use mask::{ThreadMask, MAX_THREADS};
pub use queue::{IssueGrant, MissFault, MissQueue, SnoopHit};
pub use slot::{MissSlot, MissState};
pub use stats::MissQueueStats;

pub type Cycle = u64;
