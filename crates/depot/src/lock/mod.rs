//! # Download Locks
//!
//! This module provides filesystem-based mutual exclusion between
//! independent OS processes racing for the same download destination. A
//! plain file created with exclusive-create semantics is the only atomic
//! primitive; staleness and orphan detection are advisory recovery layers
//! for crashed holders, since the filesystem gives no automatic cleanup on
//! process death.

mod manager;
mod probe;
mod record;

pub use manager::{LockGuard, LockManager, LockOptions};
pub use probe::{Clock, ProcessProbe, SystemClock, SystemProcessProbe};
pub use record::{LockRecord, lock_path_for};
