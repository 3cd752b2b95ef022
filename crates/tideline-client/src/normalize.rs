//! Per-kind props normalization.
//!
//! A normalizer is a pure repair function over an item's property bag,
//! invoked every time the dispatcher is about to write that kind's props —
//! live events and snapshot seeding alike. The merge logic stays ignorant
//! of specific kinds; anything shape-shaped (coalescing a raw status string,
//! deriving an outcome flag, defaulting a missing field) lives here.
//!
//! The registry is an owned object, not a process-wide singleton, so two
//! sessions can run with different registrations and tests get isolation
//! via [`NormalizerRegistry::clear`].

use std::collections::HashMap;

use serde_json::{Map, Value};
use tideline_types::{ItemKind, ItemStatus};

/// A pure `props -> props` repair function.
pub type Normalizer = Box<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Kind-keyed normalizer registry. Last registration per kind wins.
#[derive(Default)]
pub struct NormalizerRegistry {
    by_kind: HashMap<ItemKind, Normalizer>,
}

impl NormalizerRegistry {
    /// An empty registry: every kind passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in repairs for tool kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ItemKind::ToolCall, normalize_tool_call);
        registry.register(ItemKind::ToolResult, normalize_tool_result);
        registry
    }

    /// Register a normalizer for a kind, replacing any existing one.
    pub fn register(
        &mut self,
        kind: ItemKind,
        normalizer: impl Fn(&mut Map<String, Value>) + Send + Sync + 'static,
    ) {
        self.by_kind.insert(kind, Box::new(normalizer));
    }

    /// Drop all registrations (test isolation).
    pub fn clear(&mut self) {
        self.by_kind.clear();
    }

    /// Run the kind's normalizer over `props`, if one is registered.
    pub fn apply(&self, kind: ItemKind, props: &mut Map<String, Value>) {
        if let Some(normalizer) = self.by_kind.get(&kind) {
            normalizer(props);
        }
    }
}

/// Fold a raw `status` string into its canonical form, in place.
///
/// Unparseable statuses are left alone — the renderer shows what it got.
fn canonicalize_status(props: &mut Map<String, Value>) -> Option<ItemStatus> {
    let status = ItemStatus::from_str(props.get("status")?.as_str()?)?;
    props.insert("status".into(), Value::String(status.as_str().into()));
    Some(status)
}

/// Built-in repair for `tool_call` props: canonical status.
fn normalize_tool_call(props: &mut Map<String, Value>) {
    canonicalize_status(props);
}

/// Built-in repair for `tool_result` props: canonical status, derived `ok`
/// outcome flag, and a defaulted raw `output`.
fn normalize_tool_result(props: &mut Map<String, Value>) {
    if let Some(status) = canonicalize_status(props) {
        props.insert("ok".into(), Value::Bool(status.is_ok()));
    }
    if !props.contains_key("output") {
        props.insert("output".into(), Value::String(String::new()));
    }
}
