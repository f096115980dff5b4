//! Effective role resolution.

use crate::error::{EngineError, EngineResult};
use crate::scrapbook::{CollaboratorRole, Scrapbook, Visibility};
use serde::{Deserialize, Serialize};

/// User id used for unauthenticated visitors.
pub const GUEST_USER_ID: &str = "guest";

/// The acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    /// Moderators may view private scrapbooks.
    #[serde(default)]
    pub is_admin: bool,
}

impl Identity {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub fn guest() -> Self {
        Self::user(GUEST_USER_ID)
    }
}

/// Effective role of a user on one scrapbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
    #[serde(rename = "none")]
    NoAccess,
}

impl Role {
    /// Owners and editors may mutate the document.
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Owner | Role::Editor)
    }

    pub fn can_view(self) -> bool {
        self != Role::NoAccess
    }
}

/// Resolve the role of `identity` on `scrapbook`.
///
/// Public scrapbooks never resolve to [`Role::NoAccess`].
pub fn resolve_role(identity: &Identity, scrapbook: &Scrapbook) -> Role {
    if identity.user_id == scrapbook.owner_id {
        return Role::Owner;
    }

    let granted = scrapbook.collaborator(&identity.user_id).map(|c| c.role);
    match (scrapbook.visibility, granted) {
        (_, Some(CollaboratorRole::Editor)) => Role::Editor,
        (Visibility::Public, _) => Role::Viewer,
        (Visibility::Private, Some(CollaboratorRole::Viewer)) => Role::Viewer,
        (Visibility::Private, None) if identity.is_admin => Role::Viewer,
        (Visibility::Private, None) => Role::NoAccess,
    }
}

/// Refuse `action` unless `role` may edit.
pub fn ensure_can_edit(role: Role, action: &'static str) -> EngineResult<()> {
    if role.can_edit() {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied { action })
    }
}
