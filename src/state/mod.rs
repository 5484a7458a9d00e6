//! State management module for edgeweave.
//!
//! This module provides persistent state storage for tracking applied
//! resources (provider ids, outputs, recorded dependencies) and run history,
//! plus the lock that keeps runs against one stack exclusive.

mod store;
mod local;
mod s3;
mod lock;
mod session;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use session::StateSession;
pub use types::{
    HistoryEntry, MAX_HISTORY, Operation, ResourceState, ResourceStatus, STATE_VERSION, StackState,
};
