//! Typed-event dispatch: one decode+merge routine per wire event type.
//!
//! The dispatcher owns two registries — event type → handler, item kind →
//! props normalizer — plus the private emitted-state bookkeeping behind the
//! empty-content suppression policy for streaming text. Handlers decode an
//! [`EventFrame`]'s payload into a typed shape and turn it into store
//! deltas; a payload that does not decode is a per-message no-op, never an
//! error that escapes the dispatcher.
//!
//! Registration is single-slot: registering a second handler for the same
//! event type replaces the first.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tideline_types::wire::event_type;
use tideline_types::{now_ms, EventFrame, Item, ItemKind, Role};
use tracing::trace;

use crate::normalize::NormalizerRegistry;
use crate::store::{Merge, TimelineStore};

// ============================================================================
// Outcomes
// ============================================================================

/// Result of dispatching one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame changed (or validly re-asserted) store state.
    Applied,
    /// The frame was dropped (see reason). Skips are policy, not failure.
    Skipped { reason: SkipReason },
}

impl DispatchOutcome {
    /// Shorthand constructor for a skip.
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// True when the frame was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Reason a frame was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The raw message was not a well-formed, marked envelope.
    MissingMarker,
    /// No handler is registered for the event type.
    UnknownType { event_type: String },
    /// The payload did not decode into the handler's shape.
    BadPayload,
    /// Empty-content suppression: a streaming item with nothing to show.
    SuppressedEmpty,
    /// The store discarded the update as version-stale.
    StaleVersion,
    /// An add-only item already exists (duplicate delivery).
    AlreadyPresent,
}

// ============================================================================
// Handler context
// ============================================================================

/// What a handler may touch while applying one frame.
///
/// All writes funnel through [`DispatchContext::write`] /
/// [`DispatchContext::insert`] so the kind's normalizer always runs.
pub struct DispatchContext<'a> {
    store: &'a mut TimelineStore,
    normalizers: &'a NormalizerRegistry,
    emitted: &'a mut HashSet<String>,
}

impl DispatchContext<'_> {
    /// Read-only view of the timeline.
    pub fn store(&self) -> &TimelineStore {
        self.store
    }

    /// Normalize and merge an item (version-gated upsert).
    pub fn write(&mut self, mut item: Item) -> DispatchOutcome {
        self.normalizers.apply(item.kind, &mut item.props);
        match self.store.upsert(item) {
            Merge::Stale => DispatchOutcome::skipped(SkipReason::StaleVersion),
            Merge::Inserted | Merge::Updated => DispatchOutcome::Applied,
        }
    }

    /// Normalize and append an item; duplicate ids are a no-op.
    pub fn insert(&mut self, mut item: Item) -> DispatchOutcome {
        self.normalizers.apply(item.kind, &mut item.props);
        if self.store.add(item) {
            DispatchOutcome::Applied
        } else {
            DispatchOutcome::skipped(SkipReason::AlreadyPresent)
        }
    }

    /// Remove an item. Unknown ids are a no-op, not an error.
    pub fn remove(&mut self, id: &str) -> DispatchOutcome {
        self.store.remove(id);
        DispatchOutcome::Applied
    }

    /// Reconcile a provisional id with a confirmed one, carrying the
    /// emitted flag along with the item.
    pub fn rekey(&mut self, from: &str, to: &str) -> bool {
        if self.emitted.remove(from) {
            self.emitted.insert(to.to_string());
        }
        self.store.rekey(from, to)
    }

    /// Has this item ever shown non-empty rendered content?
    pub fn has_emitted(&self, id: &str) -> bool {
        self.emitted.contains(id)
    }

    /// Mark the item as having shown content.
    pub fn mark_emitted(&mut self, id: &str) {
        self.emitted.insert(id.to_string());
    }

    /// Drop the emitted entry (terminal state reached with nothing shown).
    pub fn retract_emitted(&mut self, id: &str) {
        self.emitted.remove(id);
    }
}

/// One decode+merge routine for a wire event type.
pub trait EventHandler: Send + Sync {
    /// Apply `frame` to the store. Must be total: bad input is a skip.
    fn apply(&self, frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome;
}

impl<F> EventHandler for F
where
    F: Fn(&EventFrame, &mut DispatchContext<'_>) -> DispatchOutcome + Send + Sync,
{
    fn apply(&self, frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
        self(frame, cx)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Decodes envelopes and routes frames to the registered handler.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Box<dyn EventHandler>>,
    normalizers: NormalizerRegistry,
    /// Streaming items that have shown non-empty content at least once.
    emitted: HashSet<String>,
}

impl EventDispatcher {
    /// An empty dispatcher: every frame is an unknown type.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with the built-in event catalog and normalizers.
    pub fn with_defaults() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
            normalizers: NormalizerRegistry::with_defaults(),
            emitted: HashSet::new(),
        };
        dispatcher.register(event_type::MESSAGE_STARTED, on_message_started);
        dispatcher.register(event_type::MESSAGE_DELTA, on_message_delta);
        dispatcher.register(event_type::MESSAGE_COMPLETED, on_message_completed);
        dispatcher.register(event_type::TOOL_STARTED, on_tool_started);
        dispatcher.register(event_type::TOOL_RESULT, on_tool_result);
        dispatcher.register(event_type::TOOL_COMPLETED, on_tool_completed);
        dispatcher.register(event_type::LOG_APPENDED, on_log_appended);
        dispatcher.register(event_type::MODE_CHANGED, on_mode_changed);
        dispatcher.register(event_type::ITEM_REMOVED, on_item_removed);
        dispatcher
    }

    /// Register a handler for an event type, replacing any existing one.
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) {
        self.handlers.insert(event_type.into(), Box::new(handler));
    }

    /// Drop all handler registrations (test isolation). Normalizers and
    /// emitted-state are untouched; see [`EventDispatcher::normalizers_mut`].
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// The props normalizer registry, for consumer registrations.
    pub fn normalizers_mut(&mut self) -> &mut NormalizerRegistry {
        &mut self.normalizers
    }

    /// Validate a raw inbound message and dispatch it.
    pub fn handle_raw(&mut self, raw: &Value, store: &mut TimelineStore) -> DispatchOutcome {
        match EventFrame::from_envelope(raw) {
            Some(frame) => self.dispatch(&frame, store),
            None => {
                trace!("dropping message without a recognized envelope marker");
                DispatchOutcome::skipped(SkipReason::MissingMarker)
            }
        }
    }

    /// Dispatch a parsed frame to its handler.
    pub fn dispatch(&mut self, frame: &EventFrame, store: &mut TimelineStore) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(frame.event_type.as_str()) else {
            trace!(event_type = %frame.event_type, "no handler registered, dropping event");
            return DispatchOutcome::skipped(SkipReason::UnknownType {
                event_type: frame.event_type.clone(),
            });
        };
        let mut cx = DispatchContext {
            store,
            normalizers: &self.normalizers,
            emitted: &mut self.emitted,
        };
        handler.apply(frame, &mut cx)
    }

    /// Seed the store from a snapshot: clear, normalize each item's props,
    /// insert in snapshot order. Snapshot items with visible content count
    /// as emitted so a later empty terminal update cannot erase them.
    pub fn seed(&mut self, items: Vec<Item>, store: &mut TimelineStore) {
        store.clear();
        self.emitted.clear();
        for mut item in items {
            self.normalizers.apply(item.kind, &mut item.props);
            if item.kind.is_streaming_text()
                && item.content().is_some_and(|content| !content.is_empty())
            {
                self.emitted.insert(item.id.clone());
            }
            store.add(item);
        }
    }
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// Decode a frame's payload. `null` data reads as an empty object so
/// all-optional payloads decode; anything else malformed is `None`.
fn decode<T: DeserializeOwned>(frame: &EventFrame) -> Option<T> {
    let data = if frame.data.is_null() {
        Value::Object(Map::new())
    } else {
        frame.data.clone()
    };
    serde_json::from_value(data).ok()
}

#[derive(Deserialize)]
struct MessageStartedData {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    local_id: Option<String>,
    #[serde(default)]
    created_at: Option<u64>,
}

#[derive(Deserialize)]
struct MessageDeltaData {
    content: String,
}

#[derive(Deserialize)]
struct MessageCompletedData {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    version: u64,
}

#[derive(Deserialize)]
struct ToolStartedData {
    name: String,
    #[serde(default)]
    input: Option<Value>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    created_at: Option<u64>,
}

#[derive(Deserialize)]
struct ToolResultData {
    status: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    created_at: Option<u64>,
}

#[derive(Deserialize)]
struct ToolCompletedData {
    status: String,
    #[serde(default)]
    version: u64,
}

#[derive(Deserialize)]
struct LogAppendedData {
    text: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    created_at: Option<u64>,
}

#[derive(Deserialize)]
struct ModeChangedData {
    mode: String,
    #[serde(default)]
    created_at: Option<u64>,
}

fn on_message_started(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<MessageStartedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };

    if let Some(local_id) = data.local_id.as_deref() {
        cx.rekey(local_id, &frame.id);
    }

    // A started message has no text of its own. Until something in the
    // store shows content, keep it out of the timeline — no placeholders.
    let stored_content_empty = cx
        .store()
        .get(&frame.id)
        .and_then(Item::content)
        .is_none_or(str::is_empty);
    if stored_content_empty && !cx.has_emitted(&frame.id) {
        return DispatchOutcome::skipped(SkipReason::SuppressedEmpty);
    }
    cx.mark_emitted(&frame.id);

    let role = data.role.as_deref().and_then(Role::from_str).unwrap_or_default();
    let item = Item::new(&frame.id, ItemKind::Message, data.created_at.unwrap_or_else(now_ms))
        .with_prop("role", role.as_str())
        .with_prop("streaming", true);
    cx.write(item)
}

fn on_message_delta(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<MessageDeltaData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };

    let mut accumulated = cx
        .store()
        .get(&frame.id)
        .and_then(Item::content)
        .unwrap_or_default()
        .to_string();
    accumulated.push_str(&data.content);

    if accumulated.is_empty() && !cx.has_emitted(&frame.id) {
        return DispatchOutcome::skipped(SkipReason::SuppressedEmpty);
    }
    cx.mark_emitted(&frame.id);

    let item = Item::new(&frame.id, ItemKind::Message, now_ms())
        .with_prop("content", accumulated)
        .with_prop("streaming", true);
    cx.write(item)
}

fn on_message_completed(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<MessageCompletedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };

    let content = data.content.unwrap_or_default();
    if content.is_empty() {
        if !cx.has_emitted(&frame.id) {
            // Terminal with nothing ever shown: the item never existed.
            cx.retract_emitted(&frame.id);
            return DispatchOutcome::skipped(SkipReason::SuppressedEmpty);
        }
        // The final event with an empty body only signals "streaming has
        // ended" — omitting `content` keeps the stored text intact.
        let item = Item::new(&frame.id, ItemKind::Message, now_ms())
            .with_version(data.version)
            .with_prop("streaming", false);
        return cx.write(item);
    }

    cx.mark_emitted(&frame.id);
    let item = Item::new(&frame.id, ItemKind::Message, now_ms())
        .with_version(data.version)
        .with_prop("content", content)
        .with_prop("streaming", false);
    cx.write(item)
}

fn on_tool_started(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<ToolStartedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };
    let mut item = Item::new(&frame.id, ItemKind::ToolCall, data.created_at.unwrap_or_else(now_ms))
        .with_version(data.version)
        .with_prop("name", data.name)
        .with_prop("status", "running");
    if let Some(input) = data.input {
        item = item.with_prop("input", input);
    }
    cx.write(item)
}

fn on_tool_result(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<ToolResultData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };
    let mut item = Item::new(&frame.id, ItemKind::ToolResult, data.created_at.unwrap_or_else(now_ms))
        .with_version(data.version)
        .with_prop("status", data.status);
    if let Some(call_id) = data.call_id {
        item = item.with_prop("call_id", call_id);
    }
    if let Some(output) = data.output {
        item = item.with_prop("output", output);
    }
    cx.write(item)
}

fn on_tool_completed(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<ToolCompletedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };
    let item = Item::new(&frame.id, ItemKind::ToolCall, now_ms())
        .with_version(data.version)
        .with_prop("status", data.status);
    cx.write(item)
}

fn on_log_appended(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<LogAppendedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };
    let item = Item::new(&frame.id, ItemKind::Log, data.created_at.unwrap_or_else(now_ms))
        .with_prop("level", data.level.unwrap_or_else(|| "info".into()))
        .with_prop("text", data.text);
    cx.insert(item)
}

fn on_mode_changed(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    let Some(data) = decode::<ModeChangedData>(frame) else {
        return DispatchOutcome::skipped(SkipReason::BadPayload);
    };
    let item = Item::new(&frame.id, ItemKind::ModeChange, data.created_at.unwrap_or_else(now_ms))
        .with_prop("mode", data.mode);
    cx.insert(item)
}

fn on_item_removed(frame: &EventFrame, cx: &mut DispatchContext<'_>) -> DispatchOutcome {
    cx.remove(&frame.id)
}

// ============================================================================
// TESTS
// ============================================================================
