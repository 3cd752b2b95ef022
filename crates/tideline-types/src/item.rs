//! Timeline items: the unit of the materialized conversation view.
//!
//! An [`Item`] is a plain value record — no behavior varies by subtype;
//! everything downstream (normalization, rendering) dispatches on
//! [`ItemKind`]. Identity is the string `id`; `kind` is immutable once an
//! item exists. `props` is an open property bag that accumulates by shallow
//! merge, so a late partial patch can never erase a field it does not name.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::EnumString;

/// What an item *is* (content type).
///
/// Deliberately small — the renderer and the props normalizer key off this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ItemKind {
    /// A chat message (user or model). Streaming text.
    #[default]
    Message,
    /// A tool invocation and its lifecycle status.
    #[serde(rename = "tool_call")]
    #[strum(serialize = "tool_call", serialize = "toolcall")]
    ToolCall,
    /// The output of a tool invocation.
    #[serde(rename = "tool_result")]
    #[strum(serialize = "tool_result", serialize = "toolresult")]
    ToolResult,
    /// One log line from the session producer.
    Log,
    /// Marker: the session switched modes (e.g. plan → execute).
    #[serde(rename = "mode_change")]
    #[strum(serialize = "mode_change", serialize = "modechange")]
    ModeChange,
}

impl ItemKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Message => "message",
            ItemKind::ToolCall => "tool_call",
            ItemKind::ToolResult => "tool_result",
            ItemKind::Log => "log",
            ItemKind::ModeChange => "mode_change",
        }
    }

    /// Streaming-text kinds are subject to empty-content suppression:
    /// they must not materialize in the timeline until they have shown
    /// non-empty content at least once.
    pub fn is_streaming_text(&self) -> bool {
        matches!(self, ItemKind::Message)
    }

    /// Check if this is a tool-related item (call or result).
    pub fn is_tool(&self) -> bool {
        matches!(self, ItemKind::ToolCall | ItemKind::ToolResult)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical execution status for tool items.
///
/// The wire carries ad-hoc status strings from more than one producer
/// generation; the alias table folds them into four canonical values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ItemStatus {
    /// Queued, not started.
    #[default]
    Pending,
    /// In progress (streaming, executing).
    #[strum(serialize = "running", serialize = "active")]
    Running,
    /// Completed successfully.
    #[strum(serialize = "done", serialize = "complete", serialize = "completed", serialize = "success")]
    Done,
    /// Failed.
    #[strum(serialize = "error", serialize = "failed")]
    Error,
}

impl ItemStatus {
    /// Parse from string (case-insensitive, aliases folded).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Done => "done",
            ItemStatus::Error => "error",
        }
    }

    /// Check if this status indicates completion (Done or Error).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Error)
    }

    /// Check if this status indicates success.
    pub fn is_ok(&self) -> bool {
        matches!(self, ItemStatus::Done)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who authored a message item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Role {
    /// Person at the keyboard.
    #[strum(serialize = "user", serialize = "human")]
    User,
    /// The model side of the conversation.
    #[default]
    #[strum(serialize = "model", serialize = "assistant", serialize = "agent")]
    Model,
    /// Producer-generated notices.
    System,
}

impl Role {
    /// Parse from string (case-insensitive, aliases folded).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One addressable item in the timeline.
///
/// `version` is a producer-supplied monotone fence; `0` means "unversioned"
/// — updates written by incremental-patch events that merge unconditionally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Item {
    /// Create an item with an empty property bag.
    pub fn new(id: impl Into<String>, kind: ItemKind, created_at: u64) -> Self {
        Self {
            id: id.into(),
            kind,
            created_at,
            updated_at: None,
            version: 0,
            props: Map::new(),
        }
    }

    /// Set the producer version (chaining).
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set one property (chaining).
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// The `content` property as text, if present.
    pub fn content(&self) -> Option<&str> {
        self.prop_str("content")
    }

    /// A string-valued property, if present and a string.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Saturates to 0 on a pre-epoch clock rather than panicking.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Mint a provisional item id for an optimistic local echo.
///
/// The `local-` prefix keeps provisional ids out of the server's id space;
/// the v7 UUID keeps them time-ordered for debugging. The server's
/// `message.started` event reconciles the provisional id to the confirmed
/// one via a timeline rekey.
pub fn provisional_id() -> String {
    format!("local-{}", uuid::Uuid::now_v7().as_simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_with_aliases() {
        assert_eq!(ItemKind::from_str("tool_call"), Some(ItemKind::ToolCall));
        assert_eq!(ItemKind::from_str("ToolCall"), Some(ItemKind::ToolCall));
        assert_eq!(ItemKind::from_str("mode_change"), Some(ItemKind::ModeChange));
        assert_eq!(ItemKind::from_str("bogus"), None);
        assert_eq!(ItemKind::ToolResult.as_str(), "tool_result");
    }

    #[test]
    fn status_folds_producer_aliases() {
        assert_eq!(ItemStatus::from_str("completed"), Some(ItemStatus::Done));
        assert_eq!(ItemStatus::from_str("success"), Some(ItemStatus::Done));
        assert_eq!(ItemStatus::from_str("failed"), Some(ItemStatus::Error));
        assert_eq!(ItemStatus::from_str("active"), Some(ItemStatus::Running));
        assert!(ItemStatus::Error.is_terminal());
        assert!(!ItemStatus::Error.is_ok());
    }

    #[test]
    fn role_folds_producer_aliases() {
        assert_eq!(Role::from_str("assistant"), Some(Role::Model));
        assert_eq!(Role::from_str("human"), Some(Role::User));
    }

    #[test]
    fn item_props_chain() {
        let item = Item::new("msg-1", ItemKind::Message, 1_000)
            .with_version(3)
            .with_prop("content", "hello");
        assert_eq!(item.version, 3);
        assert_eq!(item.content(), Some("hello"));
        assert_eq!(item.prop_str("missing"), None);
    }

    #[test]
    fn provisional_ids_are_prefixed_and_unique() {
        let a = provisional_id();
        let b = provisional_id();
        assert!(a.starts_with("local-"));
        assert_ne!(a, b);
    }
}
