//! Envelope and payload types — the wire contract of every queue.
//!
//! Each message on the wire is an [`Envelope`] wrapping a job-kind-specific
//! payload plus retry bookkeeping. Field names are stable: they must
//! round-trip byte-for-byte against an existing deployment.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueueError;

/// Wrapper carrying a job payload plus retry bookkeeping.
///
/// `P` is the job-kind-specific payload. Consumers first decode an
/// `Envelope<Value>` (so routing metadata is available even when the
/// payload shape is unknown), then narrow the payload with [`Envelope::payload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    /// The job payload.
    pub message: P,
    /// The queue the message returns to after a successful delay wait.
    pub original_queue: String,
    /// Delivery attempts so far. Starts at 1, incremented on each Retry.
    pub attempt: u32,
    /// Set once at first publish, never mutated afterward.
    pub first_seen: DateTime<Utc>,
    /// Attempt ceiling. 0 means unlimited.
    #[serde(default)]
    pub max_attempts: u32,
    /// Ceiling on total time in flight, in milliseconds. 0 means unlimited.
    #[serde(default)]
    pub max_time_ms: u64,
}

impl<P: Serialize> Envelope<P> {
    /// Build a fresh envelope for first publish.
    pub fn new(message: P, original_queue: &str, max_attempts: u32, max_time_ms: u64) -> Self {
        Envelope {
            message,
            original_queue: original_queue.to_string(),
            attempt: 1,
            first_seen: Utc::now(),
            max_attempts,
            max_time_ms,
        }
    }

    /// Serialize the envelope for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Envelope<Value> {
    /// Decode an envelope with the payload left opaque.
    pub fn from_bytes(data: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Narrow the opaque payload to a concrete job payload shape.
    pub fn payload<P: DeserializeOwned>(&self) -> Result<P, QueueError> {
        Ok(serde_json::from_value(self.message.clone())?)
    }
}

// =============================================================================
// Job payload shapes
// =============================================================================

/// One (id, change number) entry inside a change batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub id: u32,
    pub change_number: u64,
}

/// App metadata update, driven by a PICS change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppPayload {
    pub id: u32,
    pub change_number: u64,
    /// Raw key-value metadata blob as delivered by the change feed.
    #[serde(default)]
    pub vdf: Value,
    /// Hint: also fetch the store page for this product. Carried for wire
    /// compatibility with producers that set it; the store-page scrape is
    /// outside this worker and the field is not read here.
    #[serde(default)]
    pub fetch_store_page: bool,
}

/// Package metadata update. Same shape as apps, distinct queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagePayload {
    pub id: u32,
    pub change_number: u64,
    #[serde(default)]
    pub vdf: Value,
    /// Carried for wire compatibility, see [`AppPayload::fetch_store_page`].
    #[serde(default)]
    pub fetch_store_page: bool,
}

/// A batch of metadata changes to fan out into grouped change records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPayload {
    #[serde(default)]
    pub apps: Vec<ChangeItem>,
    #[serde(default)]
    pub packages: Vec<ChangeItem>,
}

/// Full player refresh request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPayload {
    pub player_id: u64,
    /// Browser identity used by the community-page scrape path. Carried
    /// for wire compatibility; the Web API fetches here do not use it.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Skip the (slow) group membership fetch.
    #[serde(default)]
    pub skip_groups: bool,
}

/// Lightweight profile-only refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePayload {
    pub player_id: u64,
}

/// Bundle refresh. The processor loads current state from storage,
/// refreshes it from upstream and persists it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    pub bundle_id: u32,
}

/// The exhaustive set of job payloads a producer can submit.
///
/// Serialized untagged: the wire body is the bare payload object, with the
/// queue name carrying the kind.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobPayload {
    App(AppPayload),
    Package(PackagePayload),
    Changes(ChangesPayload),
    Player(PlayerPayload),
    Profile(ProfilePayload),
    Bundle(BundlePayload),
}
