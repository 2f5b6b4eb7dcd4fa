// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::store::MemberRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a member within a folder tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderRole {
    Viewer,
    Editor,
    Owner,
}

impl FolderRole {
    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, FolderRole::Editor | FolderRole::Owner)
    }
}

/// What the store allows a user to do to other members. Derived from the
/// store's permission model; opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub invite: bool,
    pub remove: bool,
    pub manage_roles: bool,
}

/// Read-only view of one user's standing in one folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    user_id: String,
    role: FolderRole,
    since: Option<DateTime<Utc>>,
    capabilities: Capabilities,
}

impl Membership {
    pub(crate) fn new(record: MemberRecord, capabilities: Capabilities) -> Self {
        Self {
            user_id: record.user_id,
            role: record.role,
            since: record.since,
            capabilities,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn role(&self) -> FolderRole {
        self.role
    }

    /// When the member joined, if the store tracks it.
    #[must_use]
    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    #[must_use]
    pub fn can_invite(&self) -> bool {
        self.capabilities.invite
    }

    #[must_use]
    pub fn can_remove(&self) -> bool {
        self.capabilities.remove
    }

    #[must_use]
    pub fn can_manage_roles(&self) -> bool {
        self.capabilities.manage_roles
    }

    #[must_use]
    pub fn can_write(&self) -> bool {
        self.role.can_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_follows_role() {
        assert!(!FolderRole::Viewer.can_write());
        assert!(FolderRole::Editor.can_write());
        assert!(FolderRole::Owner.can_write());
    }

    #[test]
    fn test_projection_keeps_capabilities() {
        let m = Membership::new(
            MemberRecord {
                user_id: "@bob:example.org".into(),
                role: FolderRole::Viewer,
                since: None,
            },
            Capabilities {
                invite: true,
                remove: false,
                manage_roles: false,
            },
        );
        assert_eq!(m.user_id(), "@bob:example.org");
        assert!(m.can_invite());
        assert!(!m.can_remove());
        assert!(!m.can_manage_roles());
        assert!(!m.can_write());
    }
}
