//! Core telemetry types
//!
//! Field names are snake_case on the wire, matching the collector's
//! `{"events": [...]}` contract.

use serde::{Deserialize, Serialize};

/// A sub-entity describing one subject of an event (a post, a login provider, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    /// Kind of subject (e.g., "post", "product", "provider")
    pub item_type: String,

    /// Identifier or value of the subject
    pub item_value: String,

    /// Optional free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_meta: Option<serde_json::Value>,
}

impl EventItem {
    /// Create an item without metadata
    pub fn new(item_type: impl Into<String>, item_value: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            item_value: item_value.into(),
            item_meta: None,
        }
    }

    /// Attach metadata to the item
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.item_meta = Some(meta);
        self
    }
}

/// Caller-supplied, partial event
///
/// No defaults are applied here; see [`crate::enrich::enrich`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// Free-form action verb (e.g., "click", "view", "purchase")
    pub event_name: String,

    /// UI surface identifier (e.g., "feed_card", "checkout_button")
    pub ap_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,

    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<EventItem>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl EventInput {
    /// Start an event for the given action and surface
    pub fn new(event_name: impl Into<String>, ap_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            ap_name: ap_name.into(),
            ..Default::default()
        }
    }

    /// Override the refer category instead of using the current location
    pub fn refer(mut self, refer: impl Into<String>) -> Self {
        self.refer = Some(refer.into());
        self
    }

    pub fn action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    /// Set an explicit event time in epoch milliseconds
    pub fn time(mut self, time_ms: u64) -> Self {
        self.time = Some(time_ms);
        self
    }

    /// Append one item
    pub fn item(mut self, item: EventItem) -> Self {
        self.items.get_or_insert_with(Vec::new).push(item);
        self
    }

    /// Replace the item list
    pub fn items(mut self, items: Vec<EventItem>) -> Self {
        self.items = Some(items);
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Fully enriched, immutable event ready for transmission
///
/// Only the enricher builds payloads (plus deserialization of a persisted
/// snapshot). There are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    event_name: String,
    ap_name: String,
    refer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action_type: Option<String>,
    time: u64,
    #[serde(default)]
    items: Vec<EventItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra: Option<serde_json::Value>,
    user_id: String,
    device_id: String,
    platform: String,
    version: String,
}

impl EventPayload {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        event_name: String,
        ap_name: String,
        refer: String,
        action_type: Option<String>,
        time: u64,
        items: Vec<EventItem>,
        extra: Option<serde_json::Value>,
        user_id: String,
        device_id: String,
        platform: String,
        version: String,
    ) -> Self {
        Self {
            event_name,
            ap_name,
            refer,
            action_type,
            time,
            items,
            extra,
            user_id,
            device_id,
            platform,
            version,
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn ap_name(&self) -> &str {
        &self.ap_name
    }

    pub fn refer(&self) -> &str {
        &self.refer
    }

    pub fn action_type(&self) -> Option<&str> {
        self.action_type.as_deref()
    }

    /// Event time in epoch milliseconds
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn items(&self) -> &[EventItem] {
        &self.items
    }

    pub fn extra(&self) -> Option<&serde_json::Value> {
        self.extra.as_ref()
    }

    /// Authenticated user, or `"0"` when anonymous
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Request body accepted by the collection endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<EventPayload>,
}

/// Borrowed form of [`EventBatch`] used when sending without cloning
#[derive(Serialize)]
pub(crate) struct EventBatchRef<'a> {
    pub events: &'a [EventPayload],
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
