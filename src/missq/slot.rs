use crate::missq::mask::ThreadMask;

/// Lifecycle of one miss entry. A slot leaves `Invalid` when its owning thread
/// allocates it, moves to the sent state when the arbiter grants it, and only
/// returns to `Invalid` through a wake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissState {
    #[default]
    Invalid,
    ReadPending,
    ReadSent,
    WritePending,
    WriteSent,
}

impl MissState {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::ReadPending | Self::WritePending)
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::ReadPending | Self::ReadSent)
    }

    pub fn is_store(self) -> bool {
        matches!(self, Self::WritePending | Self::WriteSent)
    }

    /// Pending -> Sent transition taken on an arbiter grant.
    pub fn sent(self) -> Self {
        match self {
            Self::ReadPending => Self::ReadSent,
            Self::WritePending => Self::WriteSent,
            other => other,
        }
    }
}

/// One per-thread miss entry. The table holds exactly one slot per hardware
/// thread; slot index and owning thread index are the same number.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissSlot {
    pub valid: bool,
    pub waiting: ThreadMask,
    pub line_addr: u64,
    pub state: MissState,
}

impl MissSlot {
    pub fn allocate(line_addr: u64, is_store: bool, waiting: ThreadMask) -> Self {
        Self {
            valid: true,
            waiting,
            line_addr,
            state: if is_store {
                MissState::WritePending
            } else {
                MissState::ReadPending
            },
        }
    }
}
