use crate::missq::mask::ThreadMask;

/// Selection policy between ready-to-issue slots. The queue only relies on the
/// functional contract: an empty request mask yields an empty grant, a
/// non-empty mask yields exactly one of its set bits, and a persistent
/// requester is eventually granted.
pub trait IssueArbiter {
    fn select(&mut self, requests: ThreadMask) -> ThreadMask;
}

/// Rotating-cursor round robin over the slot indices. The cursor advances past
/// each winner, so a persistent requester waits at most one full rotation.
#[derive(Debug, Clone)]
pub struct RoundRobinArbiter {
    num_slots: usize,
    cursor: usize,
}

impl RoundRobinArbiter {
    pub fn new(num_slots: usize) -> Self {
        Self {
            num_slots: num_slots.max(1),
            cursor: 0,
        }
    }
}

impl IssueArbiter for RoundRobinArbiter {
    fn select(&mut self, requests: ThreadMask) -> ThreadMask {
        if requests.is_empty() {
            return ThreadMask::empty();
        }
        let n = self.num_slots;
        let start = self.cursor % n;
        for offset in 0..n {
            let slot = (start + offset) % n;
            if requests.contains(slot) {
                self.cursor = (slot + 1) % n;
                return ThreadMask::single(slot);
            }
        }
        ThreadMask::empty()
    }
}
