use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::QueueError;

/// Durable surrogate key of a pending action.
///
/// `ActionId::UNSAVED` marks an action that has not been persisted yet; the
/// store hands out a positive id on insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(pub i64);

impl ActionId {
    pub const UNSAVED: ActionId = ActionId(0);

    pub fn is_saved(self) -> bool {
        self.0 != Self::UNSAVED.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
    Clear,
}

impl VoteDirection {
    /// Numeric form expected by vote endpoints.
    pub fn as_i8(self) -> i8 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
            VoteDirection::Clear => 0,
        }
    }
}

/// Kind of mutation, without its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Vote,
    Comment,
    Edit,
    DeleteComment,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Vote,
        ActionKind::Comment,
        ActionKind::Edit,
        ActionKind::DeleteComment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Vote => "vote",
            ActionKind::Comment => "comment",
            ActionKind::Edit => "edit",
            ActionKind::DeleteComment => "delete_comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vote" => Some(ActionKind::Vote),
            "comment" => Some(ActionKind::Comment),
            "edit" => Some(ActionKind::Edit),
            "delete_comment" => Some(ActionKind::DeleteComment),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutation a pending action will perform against the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionPayload {
    Vote {
        target_id: String,
        direction: VoteDirection,
    },
    Comment {
        parent_id: String,
        text: String,
    },
    Edit {
        target_id: String,
        text: String,
    },
    DeleteComment {
        target_id: String,
    },
}

impl ActionPayload {
    const MAX_ID_LENGTH: usize = 128;
    const MAX_TEXT_LENGTH: usize = 10_000;

    pub fn vote(target_id: impl Into<String>, direction: VoteDirection) -> Self {
        ActionPayload::Vote {
            target_id: target_id.into(),
            direction,
        }
    }

    pub fn comment(parent_id: impl Into<String>, text: impl Into<String>) -> Self {
        ActionPayload::Comment {
            parent_id: parent_id.into(),
            text: text.into(),
        }
    }

    pub fn edit(target_id: impl Into<String>, text: impl Into<String>) -> Self {
        ActionPayload::Edit {
            target_id: target_id.into(),
            text: text.into(),
        }
    }

    pub fn delete_comment(target_id: impl Into<String>) -> Self {
        ActionPayload::DeleteComment {
            target_id: target_id.into(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::Vote { .. } => ActionKind::Vote,
            ActionPayload::Comment { .. } => ActionKind::Comment,
            ActionPayload::Edit { .. } => ActionKind::Edit,
            ActionPayload::DeleteComment { .. } => ActionKind::DeleteComment,
        }
    }

    /// The thing being mutated: the voted/edited/deleted item, or the parent
    /// a comment replies to.
    pub fn target_id(&self) -> &str {
        match self {
            ActionPayload::Vote { target_id, .. }
            | ActionPayload::Edit { target_id, .. }
            | ActionPayload::DeleteComment { target_id } => target_id,
            ActionPayload::Comment { parent_id, .. } => parent_id,
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        Self::validate_id(self.target_id())?;
        match self {
            ActionPayload::Comment { text, .. } | ActionPayload::Edit { text, .. } => {
                Self::validate_text(text)
            }
            ActionPayload::Vote { .. } | ActionPayload::DeleteComment { .. } => Ok(()),
        }
    }

    fn validate_id(id: &str) -> Result<(), QueueError> {
        if id.trim().is_empty() {
            return Err(QueueError::Validation("target id cannot be empty".into()));
        }
        if id.len() > Self::MAX_ID_LENGTH {
            return Err(QueueError::Validation(format!(
                "target id exceeds {} characters",
                Self::MAX_ID_LENGTH
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(QueueError::Validation(
                "target id contains control characters".into(),
            ));
        }
        Ok(())
    }

    fn validate_text(text: &str) -> Result<(), QueueError> {
        if text.trim().is_empty() {
            return Err(QueueError::Validation("text cannot be empty".into()));
        }
        if text.len() > Self::MAX_TEXT_LENGTH {
            return Err(QueueError::Validation(format!(
                "text exceeds {} bytes",
                Self::MAX_TEXT_LENGTH
            )));
        }
        Ok(())
    }
}

/// A queued client-side mutation not yet confirmed by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub created_at: UnixTimeMs,
    pub scheduled_at: UnixTimeMs,
    pub retry_count: u32,
    pub payload: ActionPayload,
}

impl PendingAction {
    pub fn new(payload: ActionPayload, now: UnixTimeMs) -> Self {
        Self {
            id: ActionId::UNSAVED,
            created_at: now,
            scheduled_at: now,
            retry_count: 0,
            payload,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// Two actions conflict when a newer one makes the older pointless.
    /// Only votes do: the server keeps the last direction anyway.
    pub fn conflicts_with(&self, payload: &ActionPayload) -> bool {
        match (&self.payload, payload) {
            (
                ActionPayload::Vote { target_id: a, .. },
                ActionPayload::Vote { target_id: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}
