//! Shared item and wire types for tideline.
//!
//! This crate is the leaf foundation: the materialized timeline item model
//! and the JSON wire shapes (envelope, event frame, snapshot) spoken between
//! the client engine and the timeline server. It has **no internal tideline
//! dependencies** — other crates build on it.
//!
//! # Model Overview
//!
//! ```text
//! Timeline (one per target conversation)
//!     └── Item (id, kind, version, props)
//!             ├── kind = message      ← streaming text from a participant
//!             ├── kind = tool_call    ← a tool invocation and its status
//!             ├── kind = tool_result  ← the output of a tool invocation
//!             ├── kind = log          ← one log line
//!             └── kind = mode_change  ← marker: the session switched modes
//!
//! Wire (server → client, one envelope per push)
//!     └── Envelope { tideline: 1, event: EventFrame }
//!             └── EventFrame { type, id, seq, data }
//! ```
//!
//! `Item.version` is the producer-supplied merge fence: a nonzero version
//! never decreases across accepted merges. `EventFrame.seq` is the
//! per-connection delivery order used for replay gating. The two feed the
//! same high-water mark on the client.

pub mod item;
pub mod wire;

// Re-export primary types at crate root for convenience.
pub use item::{Item, ItemKind, ItemStatus, Role, now_ms, provisional_id};
pub use wire::{
    ControlFrame, Envelope, EventFrame, SnapshotResponse, SubscribeFrame, PROTO_VERSION,
};
