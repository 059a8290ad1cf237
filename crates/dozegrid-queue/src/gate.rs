//! Leadership gate.
//!
//! Every replica applies every committed command, but only the replica
//! the election layer currently names as leader may pop items for
//! delivery. Pop-for-delivery on a follower is a caller bug; the gate is
//! how callers find out which side they are on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait LeadershipGate: Send + Sync {
    /// Whether this process may trigger externally visible side effects.
    fn is_leader(&self) -> bool;
}

/// Fixed answer. Standalone daemons are always the leader.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

impl LeadershipGate for StaticGate {
    fn is_leader(&self) -> bool {
        self.0
    }
}

/// A flag flipped by an external election mechanism.
#[derive(Debug, Clone, Default)]
pub struct FlagGate {
    flag: Arc<AtomicBool>,
}

impl FlagGate {
    pub fn new(initial: bool) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn set(&self, leader: bool) {
        self.flag.store(leader, Ordering::SeqCst);
    }
}

impl LeadershipGate for FlagGate {
    fn is_leader(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
