//! Role-based access control for the core operations.
//!
//! Authentication happens upstream; the core only receives an already
//! authenticated [`Actor`] and performs role checks against the org
//! membership table.

mod roles;

pub use roles::MemberRole;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StaffError};

/// An authenticated caller identity, resolved by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user id
    pub user_id: Uuid,
    /// Display handle (recorded on actions and runs)
    pub handle: String,
    /// Organization the call is scoped to
    pub org_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid, handle: impl Into<String>, org_id: Uuid) -> Self {
        Self {
            user_id,
            handle: handle.into(),
            org_id,
        }
    }
}

/// Require any membership (Viewer or better).
pub fn require_member(role: Option<MemberRole>) -> Result<MemberRole> {
    role.ok_or_else(|| StaffError::forbidden("Caller is not a member of this organization"))
}

/// Require a role allowed to mutate (Editor or Owner).
pub fn require_editor(role: Option<MemberRole>) -> Result<MemberRole> {
    let role = require_member(role)?;
    if role.can_edit() {
        Ok(role)
    } else {
        Err(StaffError::forbidden(
            "Editor or Owner role required for this operation",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_member_rejects_non_members() {
        assert!(require_member(None).is_err());
        assert!(require_member(Some(MemberRole::Viewer)).is_ok());
    }

    #[test]
    fn test_require_editor_rejects_viewers() {
        assert!(require_editor(Some(MemberRole::Viewer)).is_err());
        assert!(require_editor(Some(MemberRole::Editor)).is_ok());
        assert!(require_editor(Some(MemberRole::Owner)).is_ok());
    }
}
