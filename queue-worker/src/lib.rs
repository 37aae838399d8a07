//! GameDB queue core - asynchronous work-queue layer for Steam metadata.
//!
//! Ingests Steam metadata change events and player-update requests, fans
//! them out to per-entity processing queues, and implements bounded
//! retry/delay semantics via a dedicated delay queue.
//!
//! ## Architecture
//!
//! ```text
//! Producers → submit() → per-entity queues → Consumers → Processors
//!                              ↑                  │ Retry
//!                              └──── delay queue ←┘
//! ```

pub mod config;
pub mod consumer;
pub mod delay;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod queue;
pub mod steam;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, QueueError};
pub use jobs::{Outcome, WorkerContext};
pub use notify::{LogSink, NotificationSink};
pub use queue::{
    build_registry, submit, AppPayload, BundlePayload, ChangeItem, ChangesPayload, Envelope,
    JobKind, JobPayload, PackagePayload, PlayerPayload, ProfilePayload, Publisher,
    QueueDescriptor, Registry,
};
pub use steam::{SteamApi, WebApiClient};
pub use storage::{EntityKind, MemoryStore, Storage};
