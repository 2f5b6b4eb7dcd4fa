// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The polymorphic view over everything that can appear in the tree.
//!
//! Entries are cheap projections. They are rebuilt on every traversal and
//! hold no child references, only an upward [`ParentLink`].

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::events::{Change, ChangeKind, SubscriptionId, Subscriptions};
use crate::file::{self, FileEntry, VersionBase};
use crate::folder::{self, FolderEntry};
use crate::id::EntryId;
use crate::pending::PendingEntry;
use crate::resolve;
use crate::root::Namespace;
use crate::store::{FeedListener, StoreEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// What an entry knows about its container.
#[derive(Clone, Debug)]
pub(crate) struct ParentLink {
    pub(crate) id: EntryId,
    /// Path of the container itself; empty for the root.
    pub(crate) path: Vec<String>,
    pub(crate) is_root: bool,
    /// The container's subscriptions, which receive bubbled changes.
    pub(crate) events: Subscriptions,
}

impl ParentLink {
    pub(crate) fn child_path(&self, name: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(name.to_string());
        path
    }
}

#[derive(Clone, Debug)]
pub enum Entry {
    Root(Namespace),
    Folder(FolderEntry),
    File(FileEntry),
    Pending(PendingEntry),
}

impl Entry {
    #[must_use]
    pub fn id(&self) -> EntryId {
        match self {
            Entry::Root(ns) => ns.id(),
            Entry::Folder(f) => f.id().clone(),
            Entry::File(f) => f.id().clone(),
            Entry::Pending(p) => p.id(),
        }
    }

    /// The entry's name; empty for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Entry::Root(_) => "",
            Entry::Folder(f) => f.name(),
            Entry::File(f) => f.name(),
            Entry::Pending(p) => p.name(),
        }
    }

    #[must_use]
    pub fn path(&self) -> Vec<String> {
        match self {
            Entry::Root(_) => Vec::new(),
            Entry::Folder(f) => f.path(),
            Entry::File(f) => f.path(),
            Entry::Pending(p) => p.path(),
        }
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<EntryId> {
        self.parent_link().map(|p| p.id.clone())
    }

    pub(crate) fn parent_link(&self) -> Option<&ParentLink> {
        match self {
            Entry::Root(_) => None,
            Entry::Folder(f) => Some(f.parent()),
            Entry::File(f) => Some(f.parent()),
            Entry::Pending(p) => Some(p.parent()),
        }
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        match self {
            Entry::Root(_) | Entry::Folder(_) => true,
            Entry::File(_) => false,
            Entry::Pending(p) => p.is_folder(),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        match self {
            Entry::Root(ns) => ns,
            Entry::Folder(f) => f.namespace(),
            Entry::File(f) => f.namespace(),
            Entry::Pending(p) => p.namespace(),
        }
    }

    #[must_use]
    pub fn events(&self) -> &Subscriptions {
        match self {
            Entry::Root(ns) => ns.events(),
            Entry::Folder(f) => &f.events,
            Entry::File(f) => &f.events,
            Entry::Pending(p) => &p.events,
        }
    }

    fn describe(&self) -> String {
        match self {
            Entry::Root(_) => "the root".to_string(),
            Entry::Pending(p) => p.describe(),
            _ => crate::error::display_path(&self.path()),
        }
    }

    #[must_use]
    pub fn as_folder(&self) -> Option<&FolderEntry> {
        match self {
            Entry::Folder(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pending(&self) -> Option<&PendingEntry> {
        match self {
            Entry::Pending(p) => Some(p),
            _ => None,
        }
    }

    /// Whether the current user may write here. Files answer for their
    /// folder; the root is always writable.
    pub async fn writable(&self) -> Result<bool> {
        match self {
            Entry::Root(_) => Ok(true),
            Entry::Folder(f) => f.writable().await,
            Entry::File(_) | Entry::Pending(_) => match self.parent_link() {
                Some(parent) if !parent.is_root => {
                    folder::writable(self.namespace(), &parent.id).await
                }
                _ => Ok(true),
            },
        }
    }

    #[must_use]
    pub fn created_by(&self) -> Option<&str> {
        match self {
            Entry::Root(_) => None,
            Entry::Folder(f) => Some(f.created_by()),
            Entry::File(f) => Some(f.sender()),
            Entry::Pending(p) => Some(p.created_by()),
        }
    }

    /// When the entry was first created. For files this is the date of the
    /// oldest version still reachable in history.
    pub async fn creation_date(&self) -> Result<Option<DateTime<Utc>>> {
        match self {
            Entry::Root(_) => Ok(None),
            Entry::Folder(f) => Ok(Some(f.created_at())),
            Entry::File(f) => f.creation_date().await.map(Some),
            Entry::Pending(p) => Ok(Some(p.created_at())),
        }
    }

    #[must_use]
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self {
            Entry::Root(_) => None,
            Entry::Folder(f) => Some(f.last_active()),
            Entry::File(f) => Some(f.created_at()),
            Entry::Pending(p) => Some(p.created_at()),
        }
    }

    /// This entry as a container for writes, waiting for a pending folder to
    /// be acknowledged first.
    pub(crate) async fn container(&self) -> Result<ParentLink> {
        match self {
            Entry::Root(ns) => Ok(ns.root_link()),
            Entry::Folder(f) => Ok(f.link()),
            Entry::File(_) => Err(Error::unsupported("list children of", self.describe())),
            Entry::Pending(p) => p.sent_link().await,
        }
    }

    /// This entry as a container for reads. A pending folder the store has
    /// not acknowledged yet has no children, so reads never wait on writes.
    fn listing_link(&self) -> Result<Option<ParentLink>> {
        match self {
            Entry::Pending(p) => p.acknowledged_link(),
            Entry::Root(ns) => Ok(Some(ns.root_link())),
            Entry::Folder(f) => Ok(Some(f.link())),
            Entry::File(_) => Err(Error::unsupported("list children of", self.describe())),
        }
    }

    /// Authoritative children merged with pending writes.
    pub async fn children(&self) -> Result<Vec<Entry>> {
        match self.listing_link()? {
            Some(link) => folder::list_children(self.namespace(), &link).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn child_by_name(&self, name: &str) -> Result<Option<Entry>> {
        match self.listing_link()? {
            Some(link) => resolve::child_by_name(self.namespace(), &link, name).await,
            None => Ok(None),
        }
    }

    pub async fn child_by_id(&self, id: &EntryId) -> Result<Option<Entry>> {
        match self.listing_link()? {
            Some(link) => resolve::child_by_id(self.namespace(), &link, id).await,
            None => Ok(None),
        }
    }

    /// Search below this entry. Immediate children are checked before any
    /// folder is descended into; `max_depth` of `Some(0)` checks only the
    /// immediate children and `None` searches the whole subtree.
    pub async fn descendant_by_id(
        &self,
        id: &EntryId,
        max_depth: Option<usize>,
    ) -> Result<Option<Entry>> {
        resolve::descendant_by_id(self, id, max_depth).await
    }

    /// Create a file, or add a version if a file with this name exists.
    /// Returns the id of the version written.
    pub async fn add_file(&self, name: &str, blob: Blob) -> Result<EntryId> {
        if let Entry::Root(_) | Entry::File(_) = self {
            return Err(Error::unsupported("add a file to", self.describe()));
        }
        let link = self.container().await?;
        folder::add_file(self.namespace(), &link, name, blob).await
    }

    /// Create the folders along `path` that do not exist yet and return the
    /// id of the deepest one. An empty path returns this entry's id.
    pub async fn add_folder<S: AsRef<str>>(&self, path: &[S]) -> Result<EntryId> {
        let link = self.container().await?;
        folder::add_folder(self.namespace(), &link, path).await
    }

    /// Write a new version of this file. `new_name` renames the file as part
    /// of the same write.
    pub async fn add_version(&self, blob: Blob, new_name: Option<&str>) -> Result<EntryId> {
        let base = match self {
            Entry::File(f) => f.version_base(),
            Entry::Pending(p) if !p.is_folder() => VersionBase::Pending(p.inner.clone()),
            _ => return Err(Error::unsupported("add a version to", self.describe())),
        };
        file::add_version(self.namespace(), base, blob, new_name).await
    }

    /// Versions oldest first, ending with this entry.
    pub async fn version_history(&self) -> Result<Vec<Entry>> {
        match self {
            Entry::File(f) => Ok(f
                .version_history()
                .await?
                .into_iter()
                .map(Entry::File)
                .collect()),
            Entry::Pending(p) if !p.is_folder() => Ok(vec![self.clone()]),
            _ => Err(Error::unsupported("list versions of", self.describe())),
        }
    }

    pub async fn blob(&self) -> Result<Blob> {
        match self {
            Entry::File(f) => f.blob().await,
            Entry::Pending(p) => p.blob(),
            _ => Err(Error::unsupported("read a blob from", self.describe())),
        }
    }

    pub async fn rename(&self, name: &str) -> Result<()> {
        match self {
            Entry::Folder(f) => f.rename(name).await,
            Entry::File(f) => f.rename(name).await,
            _ => Err(Error::unsupported("rename", self.describe())),
        }
    }

    pub async fn delete(&self) -> Result<()> {
        match self {
            Entry::Folder(f) => f.delete().await,
            Entry::File(f) => f.delete().await,
            _ => Err(Error::unsupported("delete", self.describe())),
        }
    }

    pub async fn set_locked(&self, locked: bool) -> Result<()> {
        match self {
            Entry::File(f) => f.set_locked(locked).await,
            _ => Err(Error::unsupported("lock", self.describe())),
        }
    }

    /// Copy into `dest` under `name`. Files are copied with their whole
    /// version history, folders with their whole subtree. Returns the id of
    /// the copy (the newest version for files).
    pub async fn copy_to(&self, dest: &Entry, name: &str) -> Result<EntryId> {
        if let Entry::Root(_) | Entry::Pending(_) = self {
            return Err(Error::unsupported("copy", self.describe()));
        }
        let target = dest.container().await?;
        if self.is_folder() {
            let inside = target.id == self.id()
                || self.descendant_by_id(&target.id, None).await?.is_some();
            if inside {
                return Err(Error::unsupported(
                    "copy into its own subtree",
                    self.describe(),
                ));
            }
        }
        folder::copy_into(self, &target, name).await
    }

    /// Move into `dest` under `name`. Within the same folder this is a
    /// rename and the id is kept; otherwise the entry is copied and the
    /// source deleted. The two steps are not atomic.
    pub async fn move_to(&self, dest: &Entry, name: &str) -> Result<EntryId> {
        let Some(parent) = self.parent_link().filter(|_| !self.is_pending()) else {
            return Err(Error::unsupported("move", self.describe()));
        };
        if dest.id() == parent.id {
            self.rename(name).await?;
            return Ok(self.id());
        }
        let id = self.copy_to(dest, name).await?;
        self.delete().await?;
        Ok(id)
    }

    /// Register a change handler. The entry starts relaying store events on
    /// the first subscription.
    pub fn subscribe<F>(&self, kind: ChangeKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let entry = self.clone();
        self.events()
            .subscribe(kind, Arc::new(handler), move || relay(entry))
    }

    /// Returns false if `id` was not subscribed here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events().unsubscribe(id)
    }

    fn observe(&self, event: &StoreEvent) {
        match self {
            Entry::Root(ns) => {
                let kind = match event {
                    StoreEvent::Invited { .. } => ChangeKind::Invite,
                    StoreEvent::FileTimeline { .. } => return,
                    _ => ChangeKind::Modified,
                };
                ns.events().emit(&Change {
                    kind,
                    entry: self.clone(),
                    record: event.clone(),
                });
            }
            _ if self.is_folder() => {
                if folder_concerned(&self.id(), event) {
                    self.notify(event);
                }
            }
            _ => {
                let Some(parent) = self.parent_link() else {
                    return;
                };
                if file_concerned(&parent.id, &self.id(), event) {
                    self.notify(event);
                }
            }
        }
    }

    /// Deliver to own handlers, then bubble to the parent's.
    fn notify(&self, event: &StoreEvent) {
        let change = Change {
            kind: ChangeKind::Modified,
            entry: self.clone(),
            record: event.clone(),
        };
        self.events().emit(&change);
        if let Some(parent) = self.parent_link() {
            parent.events.emit(&change);
        }
    }
}

fn relay(entry: Entry) -> FeedListener {
    Arc::new(move |event: &StoreEvent| entry.observe(event))
}

fn folder_concerned(id: &EntryId, event: &StoreEvent) -> bool {
    match event {
        StoreEvent::FolderRenamed { folder, parent } => {
            folder == id || parent.as_ref() == Some(id)
        }
        StoreEvent::FileTimeline { folder, .. } | StoreEvent::FileStateChanged { folder, .. } => {
            folder == id
        }
        StoreEvent::ChildAdded { parent, .. } => parent == id,
        _ => false,
    }
}

fn file_concerned(parent: &EntryId, id: &EntryId, event: &StoreEvent) -> bool {
    match event {
        StoreEvent::FileTimeline {
            folder,
            replaces: Some(replaced),
            ..
        } => folder == parent && replaced == id,
        StoreEvent::FileStateChanged { file, .. } => file == id,
        _ => false,
    }
}
