use crate::missq::arbiter::{IssueArbiter, RoundRobinArbiter};
use crate::missq::config::MissQueueConfig;
use crate::missq::mask::ThreadMask;
use crate::missq::queue::{MissFault, MissQueue};
use crate::missq::slot::MissState;

fn queue(num_threads: usize) -> MissQueue {
    MissQueue::new(&MissQueueConfig {
        num_threads,
        line_bytes: 64,
    })
}

#[test]
fn read_miss_join_issue_wake() {
    let mut q = queue(8);

    // step k: thread 2 misses 0x1000
    q.enqueue(0x1000, false, 2).unwrap();
    q.tick();
    let slot = q.slot(2);
    assert!(slot.valid);
    assert_eq!(slot.line_addr, 0x1000);
    assert_eq!(slot.state, MissState::ReadPending);
    assert_eq!(slot.waiting, ThreadMask::single(2));

    // step k+1: thread 5 misses the same line and joins
    q.enqueue(0x1000, false, 5).unwrap();
    q.tick();
    let slot = q.slot(2);
    assert_eq!(slot.state, MissState::ReadPending);
    assert_eq!(slot.waiting, ThreadMask::single(2) | ThreadMask::single(5));
    assert!(!q.slot(5).valid);

    // step k+2: arbiter grants slot 2
    assert!(q.dequeue_ready());
    assert_eq!(q.request_mask(), ThreadMask::single(2));
    let grant = q.dequeue(ThreadMask::single(2));
    assert_eq!(grant.slot, 2);
    assert_eq!(grant.line_addr, 0x1000);
    assert!(!grant.is_store);
    q.tick();
    assert_eq!(q.slot(2).state, MissState::ReadSent);
    assert!(!q.dequeue_ready());

    // step k+3: fetch completes
    let woken = q.wake(2);
    assert_eq!(woken, ThreadMask::single(2) | ThreadMask::single(5));
    q.tick();
    assert!(!q.slot(2).valid);
    assert!(q.is_idle());
}

#[test]
fn store_miss_issue_wake() {
    let mut q = queue(4);
    q.enqueue(0x2000, true, 3).unwrap();
    q.tick();
    assert_eq!(q.slot(3).state, MissState::WritePending);

    let grant = q.dequeue(q.request_mask());
    assert_eq!(grant.slot, 3);
    assert!(grant.is_store);
    q.tick();
    assert_eq!(q.slot(3).state, MissState::WriteSent);

    assert_eq!(q.wake(3), ThreadMask::single(3));
    q.tick();
    assert!(q.is_idle());
}

#[test]
fn store_colliding_with_read_entry_faults() {
    let mut q = queue(8);
    q.enqueue(0x3000, false, 1).unwrap();
    q.tick();
    assert_eq!(q.slot(1).state, MissState::ReadPending);

    let err = q.enqueue(0x3000, true, 4).unwrap_err();
    assert_eq!(
        err,
        MissFault::ReadPromotion {
            line_addr: 0x3000,
            slot: 1
        }
    );
    // the table is untouched
    q.tick();
    assert_eq!(q.slot(1).waiting, ThreadMask::single(1));
    assert!(!q.slot(4).valid);
    assert_eq!(q.stats().promotion_faults, 1);
}

#[test]
fn store_colliding_with_sent_read_faults() {
    let mut q = queue(4);
    q.enqueue(0x3000, false, 1).unwrap();
    q.tick();
    let _ = q.dequeue(ThreadMask::single(1));
    q.tick();
    assert_eq!(q.slot(1).state, MissState::ReadSent);
    assert!(q.enqueue(0x3000, true, 2).is_err());
}

#[test]
fn load_joining_store_entry_is_allowed() {
    let mut q = queue(4);
    q.enqueue(0x4000, true, 0).unwrap();
    q.tick();
    q.enqueue(0x4000, false, 1).unwrap();
    q.enqueue(0x4000, true, 2).unwrap();
    q.tick();
    let slot = q.slot(0);
    assert_eq!(slot.state, MissState::WritePending);
    assert_eq!(slot.waiting.indices().as_slice(), &[0, 1, 2]);
}

#[test]
fn distinct_lines_allocate_independent_slots() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 0).unwrap();
    q.enqueue(0x2000, true, 1).unwrap();
    q.tick();
    assert_eq!(q.slot(0).line_addr, 0x1000);
    assert_eq!(q.slot(0).state, MissState::ReadPending);
    assert_eq!(q.slot(0).waiting, ThreadMask::single(0));
    assert_eq!(q.slot(1).line_addr, 0x2000);
    assert_eq!(q.slot(1).state, MissState::WritePending);
    assert_eq!(q.slot(1).waiting, ThreadMask::single(1));
}

#[test]
fn same_step_misses_to_one_line_allocate_once() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 2).unwrap();
    q.enqueue(0x1000, false, 0).unwrap();
    q.enqueue(0x1000, false, 3).unwrap();
    q.tick();
    // only the first requester's slot fills; the others merged into it
    assert!(q.slot(2).valid);
    assert!(!q.slot(0).valid);
    assert!(!q.slot(3).valid);
    assert_eq!(q.slot(2).waiting.indices().as_slice(), &[0, 2, 3]);
    assert_eq!(q.stats().allocated, 1);
    assert_eq!(q.stats().joined, 2);
}

#[test]
fn same_step_store_on_queued_read_alloc_faults() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 2).unwrap();
    let err = q.enqueue(0x1000, true, 3).unwrap_err();
    assert_eq!(
        err,
        MissFault::ReadPromotion {
            line_addr: 0x1000,
            slot: 2
        }
    );
}

#[test]
fn sub_line_addresses_share_an_entry() {
    let mut q = queue(4);
    q.enqueue(0x1008, false, 0).unwrap();
    q.tick();
    assert_eq!(q.slot(0).line_addr, 0x1000);
    q.enqueue(0x103f, false, 1).unwrap();
    q.tick();
    assert_eq!(q.slot(0).waiting.indices().as_slice(), &[0, 1]);
}

#[test]
fn snoop_reflects_previous_step_only() {
    let mut q = queue(4);
    q.enqueue(0x5000, false, 1).unwrap();
    // queued this step, not visible yet
    assert!(q.snoop(0x5000).is_none());
    q.tick();
    let hit = q.snoop(0x5000).unwrap();
    assert_eq!(hit.slot, 1);
    assert_eq!(hit.state, MissState::ReadPending);
    // sub-line address snoops the same entry
    assert_eq!(q.snoop(0x5010).unwrap().slot, 1);

    // a wake queued this step is likewise not visible until commit
    let _ = q.wake(1);
    assert!(q.snoop(0x5000).is_some());
    q.tick();
    assert!(q.snoop(0x5000).is_none());
}

#[test]
fn slot_allocated_this_step_is_not_grantable() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 0).unwrap();
    assert!(!q.dequeue_ready());
    q.tick();
    assert!(q.dequeue_ready());
}

#[test]
fn join_supersedes_grant_in_the_same_step() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 0).unwrap();
    q.tick();

    let grant = q.dequeue(q.request_mask());
    assert_eq!(grant.slot, 0);
    q.enqueue(0x1000, false, 2).unwrap();
    q.tick();

    // the join won: the slot stays pending and is re-requested
    let slot = q.slot(0);
    assert_eq!(slot.state, MissState::ReadPending);
    assert_eq!(slot.waiting.indices().as_slice(), &[0, 2]);
    assert_eq!(q.request_mask(), ThreadMask::single(0));
    assert_eq!(q.stats().grants_superseded, 1);

    // the re-issued grant goes through this time
    let grant = q.dequeue(q.request_mask());
    assert_eq!(grant.slot, 0);
    q.tick();
    assert_eq!(q.slot(0).state, MissState::ReadSent);
    assert_eq!(q.wake(0), ThreadMask::single(0) | ThreadMask::single(2));
}

#[test]
fn round_robin_drains_all_pending_slots() {
    let mut q = queue(4);
    let mut arb = RoundRobinArbiter::new(4);
    for thread in 0..4 {
        q.enqueue(0x1000 + 0x40 * thread as u64, false, thread).unwrap();
    }
    q.tick();

    let mut issued = ThreadMask::empty();
    for _ in 0..4 {
        let grant = arb.select(q.request_mask());
        assert!(grant.is_one_hot());
        let out = q.dequeue(grant);
        issued |= ThreadMask::single(out.slot);
        q.tick();
    }
    assert_eq!(issued.count(), 4);
    assert!(!q.dequeue_ready());
}

#[test]
fn waiters_are_returned_exactly_once() {
    let mut q = queue(8);
    q.enqueue(0x1000, false, 0).unwrap();
    q.tick();
    for thread in 1..8 {
        q.enqueue(0x1000, false, thread).unwrap();
        q.tick();
    }
    let _ = q.dequeue(ThreadMask::single(0));
    q.tick();
    let woken = q.wake(0);
    assert_eq!(woken.count(), 8);
    q.tick();
    assert!(q.is_idle());
    assert_eq!(q.stats().threads_woken, 8);
    assert_eq!(q.stats().woken, 1);
}

#[test]
#[should_panic(expected = "wake on invalid slot")]
fn wake_on_invalid_slot_panics() {
    let mut q = queue(4);
    let _ = q.wake(2);
}

#[test]
#[should_panic(expected = "in the same step")]
fn wake_then_enqueue_same_slot_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 1).unwrap();
    q.tick();
    let _ = q.wake(1);
    let _ = q.enqueue(0x1000, false, 2);
}

#[test]
#[should_panic(expected = "wake conflicts")]
fn enqueue_then_wake_same_slot_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 1).unwrap();
    q.tick();
    q.enqueue(0x1000, false, 2).unwrap();
    let _ = q.wake(1);
}

#[test]
#[should_panic(expected = "wake conflicts")]
fn dequeue_then_wake_same_slot_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 1).unwrap();
    q.tick();
    let _ = q.dequeue(ThreadMask::single(1));
    let _ = q.wake(1);
}

#[test]
#[should_panic(expected = "enqueued twice")]
fn double_enqueue_by_one_thread_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 1).unwrap();
    let _ = q.enqueue(0x2000, false, 1);
}

#[test]
#[should_panic(expected = "still in flight")]
fn enqueue_on_own_valid_slot_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 1).unwrap();
    q.tick();
    let _ = q.enqueue(0x2000, false, 1);
}

#[test]
#[should_panic(expected = "non-pending slot")]
fn grant_of_idle_slot_panics() {
    let mut q = queue(4);
    let _ = q.dequeue(ThreadMask::single(0));
}

#[test]
#[should_panic(expected = "multiple dequeues")]
fn double_dequeue_in_one_step_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 0).unwrap();
    q.enqueue(0x2000, false, 1).unwrap();
    q.tick();
    let _ = q.dequeue(ThreadMask::single(0));
    let _ = q.dequeue(ThreadMask::single(1));
}

#[test]
#[should_panic(expected = "exactly one slot")]
fn non_one_hot_grant_panics() {
    let mut q = queue(4);
    q.enqueue(0x1000, false, 0).unwrap();
    q.enqueue(0x2000, false, 1).unwrap();
    q.tick();
    let _ = q.dequeue(ThreadMask::single(0) | ThreadMask::single(1));
}

#[test]
fn at_most_one_entry_per_line() {
    let mut q = queue(8);
    // misses arriving over several steps, all to two lines
    for step in 0..8 {
        let thread = step % 8;
        let addr = if step % 2 == 0 { 0x1000 } else { 0x8000 };
        q.enqueue(addr, false, thread).unwrap();
        q.tick();
        for line in [0x1000u64, 0x8000] {
            let holders = (0..8)
                .filter(|&s| q.slot(s).valid && q.slot(s).line_addr == line)
                .count();
            assert!(holders <= 1, "line {:#x} held by {} slots", line, holders);
        }
    }
}
