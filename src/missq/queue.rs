use log::{debug, trace};
use thiserror::Error;

use crate::missq::config::MissQueueConfig;
use crate::missq::mask::{ThreadMask, MAX_THREADS};
use crate::missq::slot::{MissSlot, MissState};
use crate::missq::stats::MissQueueStats;
use crate::missq::Cycle;

/// Fatal miss-queue faults. Precondition violations (waking an invalid slot,
/// conflicting same-step updates) are caller bugs and assert instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MissFault {
    /// A store collided with an entry still tracking a read miss. Promoting an
    /// in-flight read to a write has no defined semantics, so this is fatal
    /// rather than silently merged.
    #[error("store to {line_addr:#x} collides with in-flight read miss in slot {slot}; read-to-write promotion is not supported")]
    ReadPromotion { line_addr: u64, slot: usize },
}

/// Output of a granted dequeue, consumed by the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueGrant {
    pub slot: usize,
    pub line_addr: u64,
    pub is_store: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnoopHit {
    pub slot: usize,
    pub state: MissState,
}

#[derive(Debug, Clone, Copy)]
struct QueuedAlloc {
    line_addr: u64,
    is_store: bool,
    waiting: ThreadMask,
}

/// Updates recorded against one slot during the current step. At most one of
/// them takes effect at commit, resolved by `resolve`.
#[derive(Debug, Clone, Copy, Default)]
struct SlotTriggers {
    join: ThreadMask,
    alloc: Option<QueuedAlloc>,
    granted: bool,
    wake: bool,
}

enum SlotAction {
    Join(ThreadMask),
    Allocate(QueuedAlloc),
    IssueGrant,
    Wake,
}

impl SlotTriggers {
    fn any(&self) -> bool {
        !self.join.is_empty() || self.alloc.is_some() || self.granted || self.wake
    }

    // Fixed priority chain. Reordering it changes observable behavior when
    // multiple triggers land on a slot in the same step.
    fn resolve(&self) -> Option<SlotAction> {
        debug_assert!(self.join.is_empty() || self.alloc.is_none());
        if !self.join.is_empty() {
            Some(SlotAction::Join(self.join))
        } else if let Some(alloc) = self.alloc {
            Some(SlotAction::Allocate(alloc))
        } else if self.granted {
            Some(SlotAction::IssueGrant)
        } else if self.wake {
            Some(SlotAction::Wake)
        } else {
            None
        }
    }
}

/// Miss status holding register for one L1D cache: one slot per hardware
/// thread, keyed by line address.
///
/// All operations called between two `tick`s read the committed table (the
/// state as of the previous step) and queue their effects as per-slot
/// triggers; `tick` commits every queued trigger at once. No operation
/// observes another operation's same-step update.
#[derive(Debug)]
pub struct MissQueue {
    cycle: Cycle,
    line_mask: u64,
    slots: Vec<MissSlot>,
    triggers: Vec<SlotTriggers>,
    enqueued: ThreadMask,
    granted: bool,
    stats: MissQueueStats,
}

impl MissQueue {
    pub fn new(config: &MissQueueConfig) -> Self {
        let num_threads = config.num_threads;
        assert!(
            (1..=MAX_THREADS).contains(&num_threads),
            "num_threads must be in 1..={}, got {}",
            MAX_THREADS,
            num_threads
        );
        assert!(
            config.line_bytes.is_power_of_two(),
            "line_bytes must be a power of two, got {}",
            config.line_bytes
        );
        Self {
            cycle: 0,
            line_mask: !(config.line_bytes - 1),
            slots: vec![MissSlot::default(); num_threads],
            triggers: vec![SlotTriggers::default(); num_threads],
            enqueued: ThreadMask::empty(),
            granted: false,
            stats: MissQueueStats::default(),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.slots.len()
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn stats(&self) -> &MissQueueStats {
        &self.stats
    }

    /// Committed state of one slot, as of the previous step.
    pub fn slot(&self, slot: usize) -> &MissSlot {
        &self.slots[slot]
    }

    /// True when no fetch is in flight in any slot.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| !slot.valid)
    }

    fn line_addr(&self, addr: u64) -> u64 {
        addr & self.line_mask
    }

    fn find_valid(&self, line_addr: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.valid && slot.line_addr == line_addr)
    }

    /// Record a miss by `thread`. Joins the entry already tracking the line if
    /// one exists (committed or allocated earlier this step), otherwise
    /// allocates the thread's own slot. At most one enqueue per thread per
    /// step.
    pub fn enqueue(&mut self, addr: u64, is_store: bool, thread: usize) -> Result<(), MissFault> {
        assert!(
            thread < self.slots.len(),
            "thread index {} out of range",
            thread
        );
        assert!(
            !self.enqueued.contains(thread),
            "thread {} enqueued twice in one step",
            thread
        );
        self.enqueued.insert(thread);
        let line_addr = self.line_addr(addr);

        // Duplicate detection over the committed table.
        if let Some(slot) = self.find_valid(line_addr) {
            if is_store && self.slots[slot].state.is_read() {
                self.stats.promotion_faults += 1;
                return Err(MissFault::ReadPromotion { line_addr, slot });
            }
            assert!(
                !self.triggers[slot].wake,
                "enqueue and wake on slot {} in the same step",
                slot
            );
            self.triggers[slot].join.insert(thread);
            self.stats.joined += 1;
            trace!(
                "cycle {}: thread {} joins slot {} for {:#x}",
                self.cycle,
                thread,
                slot,
                line_addr
            );
            return Ok(());
        }

        // A first miss earlier this step may already have queued an allocation
        // for this line; merge into it so the address stays unique.
        for (slot, trig) in self.triggers.iter_mut().enumerate() {
            let Some(alloc) = trig.alloc.as_mut() else {
                continue;
            };
            if alloc.line_addr != line_addr {
                continue;
            }
            if is_store && !alloc.is_store {
                self.stats.promotion_faults += 1;
                return Err(MissFault::ReadPromotion { line_addr, slot });
            }
            alloc.waiting.insert(thread);
            self.stats.joined += 1;
            trace!(
                "cycle {}: thread {} joins slot {} allocated this step for {:#x}",
                self.cycle,
                thread,
                slot,
                line_addr
            );
            return Ok(());
        }

        // First miss for this line: allocate the thread's own slot.
        let slot = thread;
        assert!(
            !self.slots[slot].valid,
            "thread {} enqueued while slot {} is still in flight",
            thread,
            slot
        );
        assert!(
            !self.triggers[slot].wake,
            "enqueue and wake on slot {} in the same step",
            slot
        );
        self.triggers[slot].alloc = Some(QueuedAlloc {
            line_addr,
            is_store,
            waiting: ThreadMask::single(thread),
        });
        self.stats.allocated += 1;
        debug!(
            "cycle {}: thread {} allocates slot {} for {:#x} ({})",
            self.cycle,
            thread,
            slot,
            line_addr,
            if is_store { "store" } else { "load" }
        );
        Ok(())
    }

    /// One bit per committed slot ready to issue, fed to the arbiter.
    pub fn request_mask(&self) -> ThreadMask {
        let mut mask = ThreadMask::empty();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.valid && slot.state.is_pending() {
                mask.insert(idx);
            }
        }
        mask
    }

    pub fn dequeue_ready(&self) -> bool {
        !self.request_mask().is_empty()
    }

    /// Consume the arbiter's one-hot grant: queue the Pending -> Sent
    /// transition and hand the fetch pipeline the line to fetch. At most one
    /// grant per step.
    pub fn dequeue(&mut self, grant: ThreadMask) -> IssueGrant {
        assert!(
            grant.is_one_hot(),
            "grant must select exactly one slot, got {}",
            grant
        );
        assert!(!self.granted, "multiple dequeues in one step");
        let slot = grant.index();
        let entry = self.slots[slot];
        assert!(
            entry.valid && entry.state.is_pending(),
            "grant selects non-pending slot {}",
            slot
        );
        assert!(
            !self.triggers[slot].wake,
            "dequeue and wake on slot {} in the same step",
            slot
        );
        self.granted = true;
        self.triggers[slot].granted = true;
        self.stats.issued += 1;
        debug!(
            "cycle {}: slot {} issued for {:#x} ({})",
            self.cycle,
            slot,
            entry.line_addr,
            if entry.state.is_store() { "store" } else { "load" }
        );
        IssueGrant {
            slot,
            line_addr: entry.line_addr,
            is_store: entry.state.is_store(),
        }
    }

    /// Registered lookup for the interconnect: is a fetch for this line
    /// already in flight? The answer reflects the committed table, i.e. the
    /// contents as of the previous step; updates queued in the current step
    /// are never visible.
    pub fn snoop(&self, addr: u64) -> Option<SnoopHit> {
        let line_addr = self.line_addr(addr);
        self.find_valid(line_addr).map(|slot| SnoopHit {
            slot,
            state: self.slots[slot].state,
        })
    }

    /// Fetch completion for `slot`: returns every thread waiting on the line
    /// and queues the slot free. The slot must be valid and untouched by any
    /// other update this step.
    pub fn wake(&mut self, slot: usize) -> ThreadMask {
        assert!(slot < self.slots.len(), "slot index {} out of range", slot);
        let entry = self.slots[slot];
        assert!(entry.valid, "wake on invalid slot {}", slot);
        assert!(
            !self.triggers[slot].any(),
            "wake conflicts with another update to slot {} this step",
            slot
        );
        self.triggers[slot].wake = true;
        self.stats.woken += 1;
        self.stats.threads_woken += entry.waiting.count() as u64;
        debug!(
            "cycle {}: wake slot {} resumes {}",
            self.cycle, slot, entry.waiting
        );
        entry.waiting
    }

    /// Commit the step: resolve each slot's queued triggers by priority and
    /// apply the winning transition, then advance the cycle.
    pub fn tick(&mut self) {
        for slot in 0..self.slots.len() {
            let trig = self.triggers[slot];
            let Some(action) = trig.resolve() else {
                continue;
            };
            match action {
                SlotAction::Join(waiters) => {
                    debug_assert!(self.slots[slot].valid);
                    self.slots[slot].waiting |= waiters;
                    if trig.granted {
                        // The join outranks the grant: the slot stays pending
                        // and is re-requested later. The fetch side already
                        // received the grant output and drops the duplicate.
                        self.stats.grants_superseded += 1;
                        debug!(
                            "cycle {}: grant to slot {} superseded by join",
                            self.cycle, slot
                        );
                    }
                }
                SlotAction::Allocate(alloc) => {
                    self.slots[slot] =
                        MissSlot::allocate(alloc.line_addr, alloc.is_store, alloc.waiting);
                }
                SlotAction::IssueGrant => {
                    self.slots[slot].state = self.slots[slot].state.sent();
                }
                SlotAction::Wake => {
                    self.slots[slot] = MissSlot::default();
                }
            }
        }
        for trig in &mut self.triggers {
            *trig = SlotTriggers::default();
        }
        self.enqueued = ThreadMask::empty();
        self.granted = false;
        self.cycle += 1;
    }
}
