//! Operation ids: only the newest operation may report back.

use std::fmt;

/// Tag carried by every message an operation task sends to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Issues operation ids and remembers which one is current.
///
/// Issuing a new id makes every earlier one stale, so a superseded
/// operation's frames and outcome are dropped on arrival.
#[derive(Debug, Default)]
pub struct LatestOnly {
    issued: u64,
    current: Option<RequestId>,
}

impl LatestOnly {
    /// Issues the id for a new operation, which becomes the current one.
    pub fn begin(&mut self) -> RequestId {
        let id = RequestId(self.issued);
        self.issued += 1;
        self.current = Some(id);
        id
    }

    /// Leaves no operation current; anything still in flight goes stale.
    pub fn supersede(&mut self) {
        self.current = None;
    }

    /// True if messages tagged `id` should still be applied.
    pub fn is_current(&self, id: RequestId) -> bool {
        self.current == Some(id)
    }

    /// True while an operation has not yet reported its outcome.
    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<RequestId> {
        self.current
    }

    /// Marks the operation done once its outcome arrives. Stale ids are ignored.
    pub fn finish(&mut self, id: RequestId) -> bool {
        let current = self.is_current(id);
        if current {
            self.current = None;
        }
        current
    }
}
