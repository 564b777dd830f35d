//! CRDT model descriptors (§4.8, §9 Design Notes).
//!
//! The original source declared each synced model (Friend, Story, Settings,
//! Comment, PixRegistry, ...) with its own duck-typed sync/TTL logic scattered
//! across the model definition. Per §9 ("Duck-typed CRDT model declarations"),
//! that is replaced here with a single static descriptor table consumed by one
//! generic sync engine (`tessera_client::crdt_sync`).

use std::time::Duration;

/// How a model's records reconcile across devices/peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Grow-only set: union semantics, add-wins, deletes only via TTL.
    GSet,
    /// Last-writer-wins by `(timestamp desc, authorDeviceId desc)`.
    Lww,
    /// Synced only among own devices, never to friends.
    Private,
}

/// Which timestamp a record's TTL is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTrigger {
    Creation,
    LastUpdate,
}

/// Static description of one CRDT-synced model: its sync strategy, TTL
/// eligibility, and the relation edges TTL cascade must walk.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub name: &'static str,
    pub sync: SyncStrategy,
    pub collectable: bool,
    pub ttl: Option<Duration>,
    pub ttl_trigger: TtlTrigger,
    pub private: bool,
    pub belongs_to: &'static [&'static str],
    pub has_many: &'static [&'static str],
}

const DAY: u64 = 24 * 60 * 60;

/// The full set of models this client's CRDT layer understands.
///
/// Adding a new synced model means adding one entry here; `crdt_sync`
/// consumes this table generically and needs no per-model code.
pub const MODEL_REGISTRY: &[ModelDescriptor] = &[
    ModelDescriptor {
        name: "Friend",
        sync: SyncStrategy::GSet,
        collectable: false,
        ttl: None,
        ttl_trigger: TtlTrigger::Creation,
        private: false,
        belongs_to: &[],
        has_many: &["Story", "Comment"],
    },
    ModelDescriptor {
        name: "Story",
        sync: SyncStrategy::Lww,
        collectable: true,
        ttl: Some(Duration::from_secs(DAY)),
        ttl_trigger: TtlTrigger::Creation,
        private: false,
        belongs_to: &["Friend"],
        has_many: &["Comment"],
    },
    ModelDescriptor {
        name: "Comment",
        sync: SyncStrategy::Lww,
        collectable: true,
        ttl: Some(Duration::from_secs(DAY)),
        ttl_trigger: TtlTrigger::LastUpdate,
        private: false,
        belongs_to: &["Story", "Comment"],
        has_many: &["Comment"],
    },
    ModelDescriptor {
        name: "Settings",
        sync: SyncStrategy::Private,
        collectable: false,
        ttl: None,
        ttl_trigger: TtlTrigger::LastUpdate,
        private: true,
        belongs_to: &[],
        has_many: &[],
    },
    ModelDescriptor {
        name: "PixRegistry",
        sync: SyncStrategy::Private,
        collectable: false,
        ttl: None,
        ttl_trigger: TtlTrigger::LastUpdate,
        private: true,
        belongs_to: &[],
        has_many: &[],
    },
];

/// Look up a model's descriptor by name.
pub fn find_model(name: &str) -> Option<&'static ModelDescriptor> {
    MODEL_REGISTRY.iter().find(|m| m.name == name)
}
