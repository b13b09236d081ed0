//! Closed enumerations over hook event kinds and span kinds.
//!
//! Everything that dispatches on the kind of an event (parent rules,
//! session-state updates, span classification) matches exhaustively on
//! [`HookEventType`], so a new kind is a compile error until every rule
//! handles it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Hook event types
// ---------------------------------------------------------------------------

/// The fixed whitelist of hook event types a producer may emit.
///
/// Serialized with the producer-side names (`SessionStart`,
/// `PreToolUse`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum HookEventType {
    /// A session began. Root of the session's hierarchy.
    SessionStart,
    /// A session ended.
    SessionEnd,
    /// A tool is about to be invoked.
    PreToolUse,
    /// A tool invocation finished.
    PostToolUse,
    /// The user submitted a prompt, opening a new turn.
    UserPromptSubmit,
    /// The assistant finished responding to a turn.
    Stop,
    /// A subagent launched by a task tool finished.
    SubagentStop,
    /// A notification was shown to the user.
    Notification,
    /// The conversation is about to be compacted.
    PreCompact,
}

impl HookEventType {
    /// Every recognized event type, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::PreToolUse,
        Self::PostToolUse,
        Self::UserPromptSubmit,
        Self::Stop,
        Self::SubagentStop,
        Self::Notification,
        Self::PreCompact,
    ];

    /// The wire name of this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::Notification => "Notification",
            Self::PreCompact => "PreCompact",
        }
    }

    /// Look up an event type by its wire name.
    ///
    /// Returns `None` for anything outside the whitelist.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// The span kind this event type maps to.
    pub const fn span_kind(self) -> SpanKind {
        match self {
            Self::SessionStart => SpanKind::Root,
            Self::PreToolUse | Self::PostToolUse => SpanKind::Client,
            Self::SessionEnd
            | Self::UserPromptSubmit
            | Self::Stop
            | Self::SubagentStop
            | Self::Notification
            | Self::PreCompact => SpanKind::Internal,
        }
    }
}

impl core::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Span kinds
// ---------------------------------------------------------------------------

/// Coarse trace-style classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum SpanKind {
    /// Start of a session tree.
    Root,
    /// Work done inside the session itself.
    Internal,
    /// A call out to a tool.
    Client,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_lookup() {
        for kind in HookEventType::ALL {
            assert_eq!(HookEventType::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(HookEventType::from_wire("PostCompact"), None);
        assert_eq!(HookEventType::from_wire("sessionstart"), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&HookEventType::UserPromptSubmit).unwrap_or_default();
        assert_eq!(json, "\"UserPromptSubmit\"");
        let kind = serde_json::to_string(&SpanKind::Client).unwrap_or_default();
        assert_eq!(kind, "\"client\"");
    }

    #[test]
    fn span_kinds() {
        assert_eq!(HookEventType::SessionStart.span_kind(), SpanKind::Root);
        assert_eq!(HookEventType::PreToolUse.span_kind(), SpanKind::Client);
        assert_eq!(HookEventType::PostToolUse.span_kind(), SpanKind::Client);
        assert_eq!(HookEventType::Stop.span_kind(), SpanKind::Internal);
        assert_eq!(HookEventType::SessionEnd.span_kind(), SpanKind::Internal);
    }
}
