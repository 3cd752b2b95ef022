//! Wire shapes for the live event channel and the snapshot endpoint.
//!
//! Every server push is one JSON [`Envelope`]. The `tideline` field carries
//! the protocol version and doubles as the envelope marker: anything without
//! it (or with a version we do not speak) is not ours and is dropped
//! per-message, never escalated. Parsing is total — malformed input yields
//! `None`, not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::item::Item;

/// Protocol version spoken by this client.
pub const PROTO_VERSION: u32 = 1;

/// Well-known event type names.
///
/// The catalog is extensible: consumers may register handlers for names not
/// listed here without touching this crate.
pub mod event_type {
    /// A message began streaming. May carry a provisional-id reconciliation.
    pub const MESSAGE_STARTED: &str = "message.started";
    /// One chunk of streamed message text.
    pub const MESSAGE_DELTA: &str = "message.delta";
    /// A message finished streaming. An empty body only ends the stream.
    pub const MESSAGE_COMPLETED: &str = "message.completed";
    /// A tool invocation began.
    pub const TOOL_STARTED: &str = "tool.started";
    /// A tool produced output.
    pub const TOOL_RESULT: &str = "tool.result";
    /// A tool invocation reached a terminal status.
    pub const TOOL_COMPLETED: &str = "tool.completed";
    /// One log line was appended.
    pub const LOG_APPENDED: &str = "log.appended";
    /// The session switched modes.
    pub const MODE_CHANGED: &str = "mode.changed";
    /// An item was removed from the timeline.
    pub const ITEM_REMOVED: &str = "item.removed";
}

/// The wire wrapper around one live event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version — the envelope marker.
    #[serde(rename = "tideline")]
    pub proto: u32,
    pub event: EventFrame,
}

/// One typed event as delivered on the live channel.
///
/// `id` addresses the timeline item the event concerns; `seq` is the
/// per-connection delivery sequence used for replay ordering and the
/// high-water mark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    pub seq: u64,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    /// Parse an inbound message into a frame.
    ///
    /// Returns `None` for anything that is not a well-formed envelope with
    /// a recognized marker. Never fails loudly — a bad frame is the
    /// producer's problem, not a reason to drop the connection.
    pub fn from_envelope(raw: &Value) -> Option<Self> {
        let envelope: Envelope = serde_json::from_value(raw.clone()).ok()?;
        (envelope.proto == PROTO_VERSION).then_some(envelope.event)
    }
}

/// Client → server subscribe message, sent once when the channel opens.
/// The channel is read-only follow after this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscribeFrame {
    #[serde(rename = "tideline")]
    pub proto: u32,
    pub subscribe: String,
}

impl SubscribeFrame {
    /// Build the subscribe message for a target timeline.
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            proto: PROTO_VERSION,
            subscribe: target_id.into(),
        }
    }
}

/// Server → client control message (e.g. the readiness notification that
/// follows a subscribe).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "tideline")]
    pub proto: u32,
    pub control: String,
}

impl ControlFrame {
    /// True when `raw` is the readiness notification for this protocol.
    pub fn is_ready(raw: &Value) -> bool {
        serde_json::from_value::<ControlFrame>(raw.clone())
            .map(|c| c.proto == PROTO_VERSION && c.control == "ready")
            .unwrap_or(false)
    }
}

/// The snapshot endpoint's response body: a point-in-time materialization
/// of one timeline plus its version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub version: u64,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl SnapshotResponse {
    /// The frontier below which incoming live events are redundant: the
    /// maximum of the snapshot's own version and its items' versions.
    pub fn high_water_mark(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.version)
            .fold(self.version, u64::max)
    }
}
