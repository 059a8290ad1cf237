//! Leadership gate driven by raft metrics.

use std::sync::Arc;

use dozegrid_queue::LeadershipGate;

use crate::typ::DozeRaft;

#[derive(Clone)]
pub struct RaftLeadership {
    id: u64,
    raft: Arc<DozeRaft>,
}

impl RaftLeadership {
    pub fn new(id: u64, raft: Arc<DozeRaft>) -> Self {
        Self { id, raft }
    }

    /// Leader this node currently believes in, if any.
    pub fn current_leader(&self) -> Option<u64> {
        self.raft.metrics().borrow().current_leader
    }
}

impl LeadershipGate for RaftLeadership {
    fn is_leader(&self) -> bool {
        self.current_leader() == Some(self.id)
    }
}
