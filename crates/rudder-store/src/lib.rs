//! Rudder Store - persistence, queue and locking capabilities
//!
//! The orchestration core reaches its datastore, task queue and keyed mutex
//! only through the traits defined here. In-memory implementations back
//! development, single-process deployments and tests.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod mutex;
pub mod queue;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use mutex::{
    release_target_lock_key, system_lock_key, DistributedMutex, InMemoryMutex, LockGuard,
};
pub use queue::{DeadLetter, Delivery, InMemoryTaskQueue, NackOutcome, TaskQueue};
pub use traits::{
    EventLog, GraphStore, JobStore, PolicyStore, ReleaseInsert, ReleaseRecord, ReleaseStore,
    ReleaseTargetDiff, Store, VariableStore,
};
