//! Notification sink collaborator.
//!
//! Best-effort, fire-and-forget update fan-out to subscribers (the website
//! pushes these over websockets). Failures are logged and never escalate
//! into the job outcome.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// Receives "entity updated" events after a processor persists a change.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish_update(&self, topic: &str, payload: Value) -> Result<()>;
}

/// Fire an update and swallow any failure.
pub async fn notify_best_effort(sink: &dyn NotificationSink, topic: &str, payload: Value) {
    if let Err(e) = sink.publish_update(topic, payload).await {
        warn!(topic = topic, error = %e, "notification_publish_failed");
    }
}

/// Sink that only logs, used as the default wiring when no websocket
/// backend is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish_update(&self, topic: &str, payload: Value) -> Result<()> {
        info!(topic = topic, payload = %payload, "notification_update");
        Ok(())
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Records published updates for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub updates: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn publish_update(&self, topic: &str, payload: Value) -> Result<()> {
            self.updates.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }
}
