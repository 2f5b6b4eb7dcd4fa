// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the event-sourced store that holds the authoritative tree.
//!
//! Folders are rooms, file versions are timeline events. Writes return the
//! id the store assigned, but listings only reflect a write once the store
//! has delivered it back through its feed.

use crate::blob::Blob;
use crate::error::Result;
use crate::id::EntryId;
use crate::membership::{Capabilities, FolderRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Authoritative state of a folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderRecord {
    pub id: EntryId,
    pub name: String,
    pub parent: Option<EntryId>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Authoritative state of one file version.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: EntryId,
    pub folder: EntryId,
    pub name: String,
    pub version: u64,
    /// Back-reference to the version this one replaced.
    pub replaces: Option<EntryId>,
    pub locked: bool,
    pub size: usize,
    pub mimetype: String,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    pub encryption: EncryptionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EncryptionStatus {
    EncryptionNotEnabled,
    Encrypted,
    DecryptionPending,
    Decrypted,
    DecryptionFailed,
}

/// A folder member as the store knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub user_id: String,
    pub role: FolderRole,
    pub since: Option<DateTime<Utc>>,
}

/// A folder this user has been invited to but not joined.
#[derive(Debug, Clone, PartialEq)]
pub struct Invite {
    pub folder: EntryId,
    pub name: String,
    pub inviter: String,
}

/// Structural change delivered by the store's live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    FolderCreated {
        folder: EntryId,
        parent: Option<EntryId>,
    },
    ChildAdded {
        parent: EntryId,
        child: EntryId,
    },
    FolderRenamed {
        folder: EntryId,
        parent: Option<EntryId>,
    },
    /// A file event landed in a folder's timeline.
    FileTimeline {
        folder: EntryId,
        file: EntryId,
        replaces: Option<EntryId>,
    },
    FileStateChanged {
        folder: EntryId,
        file: EntryId,
    },
    Invited {
        folder: EntryId,
    },
    Left {
        folder: EntryId,
    },
}

pub type FeedListener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by [`BackingStore::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u64);

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// The user this store acts as.
    fn user_id(&self) -> String;

    // Authoritative listings
    async fn top_level_folders(&self) -> Result<Vec<FolderRecord>>;
    async fn child_folders(&self, folder: &EntryId) -> Result<Vec<FolderRecord>>;
    /// Current (not replaced, not deleted) file versions in a folder.
    async fn current_files(&self, folder: &EntryId) -> Result<Vec<FileRecord>>;
    async fn folder_record(&self, folder: &EntryId) -> Result<Option<FolderRecord>>;
    /// Any version within the locally loaded window, current or replaced.
    async fn file_record(&self, folder: &EntryId, file: &EntryId) -> Result<Option<FileRecord>>;

    // Structure writes
    async fn create_folder(&self, parent: Option<&EntryId>, name: &str) -> Result<EntryId>;
    async fn create_file(&self, folder: &EntryId, name: &str, blob: &Blob) -> Result<EntryId>;
    async fn create_version(
        &self,
        folder: &EntryId,
        replaces: &EntryId,
        name: &str,
        blob: &Blob,
        version: u64,
    ) -> Result<EntryId>;
    async fn rename_folder(&self, folder: &EntryId, name: &str) -> Result<()>;
    async fn rename_file(&self, folder: &EntryId, file: &EntryId, name: &str) -> Result<()>;
    async fn delete_folder(&self, folder: &EntryId) -> Result<()>;
    async fn delete_file(&self, folder: &EntryId, file: &EntryId) -> Result<()>;
    async fn set_locked(&self, folder: &EntryId, file: &EntryId, locked: bool) -> Result<()>;

    // Blob transport
    async fn download(&self, folder: &EntryId, file: &EntryId) -> Result<Blob>;
    async fn is_encrypted(&self, folder: &EntryId) -> Result<bool>;

    // Membership
    async fn members(&self, folder: &EntryId) -> Result<Vec<MemberRecord>>;
    /// `None` if `user_id` is not a member.
    async fn role(&self, folder: &EntryId, user_id: &str) -> Result<Option<FolderRole>>;
    async fn capabilities(&self, folder: &EntryId, user_id: &str) -> Result<Capabilities>;
    async fn invite(&self, folder: &EntryId, user_id: &str) -> Result<()>;
    async fn kick(&self, folder: &EntryId, user_id: &str) -> Result<()>;
    async fn set_role(&self, folder: &EntryId, user_id: &str, role: FolderRole) -> Result<()>;

    // Feed
    fn bind(&self, listener: FeedListener) -> BindingId;
    fn unbind(&self, binding: BindingId);

    // Lifecycle
    async fn start(&self) -> Result<()>;
    async fn wait_ready(&self) -> Result<()>;
    async fn stop(&self);
    async fn logout(&self) -> Result<()>;
    async fn deactivate(&self, erase: bool) -> Result<()>;
    async fn pending_invites(&self) -> Result<Vec<Invite>>;
    async fn join(&self, folder: &EntryId) -> Result<()>;
}
