//! Static queue registry.
//!
//! Populated exactly once by the composition root before any consumer task
//! starts, read-only afterwards. Duplicate registration is a configuration
//! bug, not an operational error, so it panics at startup.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::error::QueueError;

/// The exhaustive set of job kinds, matched at the decode boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Apps,
    Packages,
    Bundles,
    Changes,
    Players,
    Profiles,
    /// The delay queue parks envelopes awaiting their next retry window.
    Delay,
}

impl JobKind {
    /// Short queue name, before environment namespacing.
    pub fn base_name(self) -> &'static str {
        match self {
            JobKind::Apps => "apps",
            JobKind::Packages => "packages",
            JobKind::Bundles => "bundles",
            JobKind::Changes => "changes",
            JobKind::Players => "players",
            JobKind::Profiles => "profiles",
            JobKind::Delay => "delay",
        }
    }
}

/// Static registration entry for one queue.
#[derive(Debug, Clone)]
pub struct QueueDescriptor {
    /// Short name producers use for routing (`apps`, `players`, ...).
    pub name: String,
    /// Full broker queue name the consumer reads from.
    pub consume_queue: String,
    /// Full broker queue name follow-up work is produced to.
    pub produce_queue: String,
    /// Selects the processor at the decode boundary.
    pub kind: JobKind,
    /// Attempt ceiling stamped onto fresh envelopes. 0 = unlimited.
    pub max_attempts: u32,
    /// Total-time ceiling stamped onto fresh envelopes. Zero = unlimited.
    pub max_time: Duration,
}

impl QueueDescriptor {
    fn new(config: &Config, kind: JobKind, max_attempts: u32, max_time: Duration) -> Self {
        let base = kind.base_name();
        let full = format!("{}-{}", config.environment, base);
        QueueDescriptor {
            name: base.to_string(),
            consume_queue: full.clone(),
            produce_queue: full,
            kind,
            max_attempts,
            max_time,
        }
    }
}

/// Process-wide mapping from queue name to its descriptor.
#[derive(Debug, Default)]
pub struct Registry {
    queues: HashMap<String, QueueDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Add an entry. Panics on duplicate names: the registry is built from
    /// a static table at startup, so a collision is a wiring bug.
    pub fn register(&mut self, descriptor: QueueDescriptor) {
        let name = descriptor.name.clone();
        if self.queues.insert(name.clone(), descriptor).is_some() {
            panic!("queue registered twice: {name}");
        }
    }

    /// Look up a descriptor by short name.
    pub fn resolve(&self, name: &str) -> Result<&QueueDescriptor, QueueError> {
        self.queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    /// All registered descriptors, for the composition root to spawn
    /// one consumer per queue.
    pub fn descriptors(&self) -> impl Iterator<Item = &QueueDescriptor> {
        self.queues.values()
    }
}

/// Build the full production queue table.
pub fn build_registry(config: &Config) -> Registry {
    const HOUR: Duration = Duration::from_secs(60 * 60);

    let mut registry = Registry::new();
    registry.register(QueueDescriptor::new(config, JobKind::Apps, 0, 24 * HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Packages, 0, 24 * HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Bundles, 10, 24 * HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Changes, 10, HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Players, 5, HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Profiles, 5, HOUR));
    registry.register(QueueDescriptor::new(config, JobKind::Delay, 0, Duration::ZERO));
    registry
}
