//! Organization member roles.
//!
//! StaffX ships with three built-in roles:
//!
//! | Role   | Description                                              |
//! |--------|----------------------------------------------------------|
//! | Owner  | Full access, including project and membership management |
//! | Editor | Create and mutate threads, documents, and runs           |
//! | Viewer | Read-only access to projects, threads, and events        |

use serde::{Deserialize, Serialize};

/// Role of a user inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Viewer,
    Editor,
    Owner,
}

impl MemberRole {
    /// Get the role identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Owner => "owner",
        }
    }

    /// Parse a stored role string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Whether this role may mutate threads, graphs, and runs.
    pub fn can_edit(&self) -> bool {
        matches!(self, Self::Editor | Self::Owner)
    }

    /// Whether this role may manage projects and members.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner)
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(MemberRole::Owner.can_edit());
        assert!(MemberRole::Owner.can_manage());
        assert!(MemberRole::Editor.can_edit());
        assert!(!MemberRole::Editor.can_manage());
        assert!(!MemberRole::Viewer.can_edit());
    }

    #[test]
    fn test_role_ordering() {
        assert!(MemberRole::Owner > MemberRole::Editor);
        assert!(MemberRole::Editor > MemberRole::Viewer);
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [MemberRole::Viewer, MemberRole::Editor, MemberRole::Owner] {
            assert_eq!(MemberRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MemberRole::parse("admin"), None);
    }
}
