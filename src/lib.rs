/*
Cycle-level model of the miss status holding register (MSHR) of a multithreaded
core's L1 data cache.

The `missq` module is the structure itself: a per-thread slot table that
consolidates duplicate misses, feeds a pluggable fairness arbiter, answers
registered snoop lookups, and wakes every waiting thread when a fetch
completes. All mutation follows a lock-step discipline: operations read the
state committed at the previous step and queue their effects, and `tick`
commits them atomically.

The `sim` module is a traffic-driven harness standing in for the external
collaborators (threads, arbiter clocking, fetch pipeline).
*/

pub mod missq;
pub mod sim;
