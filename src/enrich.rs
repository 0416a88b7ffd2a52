//! Event enrichment — turns a partial `EventInput` into an immutable `EventPayload`

use crate::types::{EventInput, EventPayload};

/// `user_id` value for anonymous sessions
pub const ANONYMOUS_USER_ID: &str = "0";

/// Ambient values injected into every payload
#[derive(Debug, Clone)]
pub struct EnrichContext {
    /// Category of the current location
    pub refer: String,
    /// Authenticated user, if any
    pub user_id: Option<String>,
    pub device_id: String,
    pub platform: String,
    pub version: String,
    /// Epoch milliseconds used when the input carries no time
    pub now_ms: u64,
}

/// Apply defaults and inject identity fields
///
/// `user_id`, `device_id`, `platform` and `version` always come from the
/// context; callers cannot supply them.
pub fn enrich(input: EventInput, ctx: &EnrichContext) -> EventPayload {
    let EventInput {
        event_name,
        ap_name,
        refer,
        action_type,
        time,
        items,
        extra,
    } = input;

    EventPayload::new(
        event_name,
        ap_name,
        refer.unwrap_or_else(|| ctx.refer.clone()),
        action_type,
        time.unwrap_or(ctx.now_ms),
        items.unwrap_or_default(),
        extra,
        ctx.user_id
            .clone()
            .unwrap_or_else(|| ANONYMOUS_USER_ID.to_string()),
        ctx.device_id.clone(),
        ctx.platform.clone(),
        ctx.version.clone(),
    )
}
