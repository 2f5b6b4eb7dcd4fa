// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Placeholders for writes that were issued but not yet observed.

use crate::blob::Blob;
use crate::entry::ParentLink;
use crate::error::{Error, Result};
use crate::events::Subscriptions;
use crate::id::EntryId;
use crate::root::Namespace;
use crate::signal::Completion;
use crate::store::EncryptionStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// What a pending write supersedes.
#[derive(Clone, Debug)]
pub(crate) enum Replaced {
    /// A version the store already holds.
    Stored(EntryId),
    /// An earlier write that may itself still be in flight.
    Pending(Arc<PendingInner>),
}

impl Replaced {
    pub(crate) fn id(&self) -> EntryId {
        match self {
            Replaced::Stored(id) => id.clone(),
            Replaced::Pending(p) => p.id(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Shape {
    File {
        version: u64,
        blob: Blob,
        encryption: EncryptionStatus,
    },
    Folder,
}

/// Shared state of one placeholder. The overlay and every view of the
/// placeholder point at the same instance.
#[derive(Debug)]
pub(crate) struct PendingInner {
    synthetic: EntryId,
    pub(crate) name: String,
    pub(crate) parent: ParentLink,
    pub(crate) shape: Shape,
    pub(crate) replaces: Option<Replaced>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) created_by: String,
    pub(crate) completion: Completion,
}

impl PendingInner {
    fn new(
        name: String,
        parent: ParentLink,
        shape: Shape,
        replaces: Option<Replaced>,
        created_by: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            synthetic: EntryId::pending(),
            name,
            parent,
            shape,
            replaces,
            created_at: Utc::now(),
            created_by,
            completion: Completion::new(),
        })
    }

    pub(crate) fn new_file(
        name: &str,
        parent: ParentLink,
        blob: Blob,
        encryption: EncryptionStatus,
        created_by: String,
    ) -> Arc<Self> {
        let shape = Shape::File {
            version: 1,
            blob,
            encryption,
        };
        Self::new(name.to_string(), parent, shape, None, created_by)
    }

    pub(crate) fn new_version(
        name: String,
        parent: ParentLink,
        replaces: Replaced,
        version: u64,
        blob: Blob,
        encryption: EncryptionStatus,
        created_by: String,
    ) -> Arc<Self> {
        let shape = Shape::File {
            version,
            blob,
            encryption,
        };
        Self::new(name, parent, shape, Some(replaces), created_by)
    }

    pub(crate) fn new_folder(name: &str, parent: ParentLink, created_by: String) -> Arc<Self> {
        Self::new(name.to_string(), parent, Shape::Folder, None, created_by)
    }

    /// The real id once acknowledged, the synthetic one until then.
    pub(crate) fn id(&self) -> EntryId {
        self.completion
            .sent_id()
            .unwrap_or_else(|| self.synthetic.clone())
    }

    pub(crate) fn synthetic_id(&self) -> &EntryId {
        &self.synthetic
    }

    pub(crate) fn is_folder(&self) -> bool {
        matches!(self.shape, Shape::Folder)
    }

    pub(crate) fn version(&self) -> u64 {
        match &self.shape {
            Shape::File { version, .. } => *version,
            Shape::Folder => 0,
        }
    }

    pub(crate) fn replaced_id(&self) -> Option<EntryId> {
        self.replaces.as_ref().map(Replaced::id)
    }

    /// Every id this write hides: the entry it replaces, and whatever that
    /// entry replaced while it was itself pending.
    pub(crate) fn replaced_chain(&self) -> Vec<EntryId> {
        let mut ids = Vec::new();
        let mut cursor = self.replaces.clone();
        while let Some(replaced) = cursor {
            ids.push(replaced.id());
            cursor = match replaced {
                Replaced::Stored(_) => None,
                Replaced::Pending(p) => p.replaces.clone(),
            };
        }
        ids
    }

    /// Placeholders this one supersedes, nearest first.
    pub(crate) fn pending_ancestors(&self) -> Vec<Arc<PendingInner>> {
        let mut out = Vec::new();
        let mut cursor = self.replaces.clone();
        while let Some(Replaced::Pending(p)) = cursor {
            cursor = p.replaces.clone();
            out.push(p);
        }
        out
    }
}

/// A file- or folder-shaped placeholder as seen in a listing.
#[derive(Clone)]
pub struct PendingEntry {
    ns: Namespace,
    pub(crate) inner: Arc<PendingInner>,
    pub(crate) events: Subscriptions,
}

impl PendingEntry {
    pub(crate) fn new(ns: Namespace, inner: Arc<PendingInner>) -> Self {
        let events = Subscriptions::new(ns.store().clone());
        Self { ns, inner, events }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.ns
    }

    #[must_use]
    pub fn id(&self) -> EntryId {
        self.inner.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.inner.is_folder()
    }

    /// True once the store acknowledged the write.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.inner.completion.sent_id().is_some()
    }

    /// Version this write will have; 0 for folders.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// Id of the entry this write supersedes.
    #[must_use]
    pub fn replaces_id(&self) -> Option<EntryId> {
        self.inner.replaced_id()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn created_by(&self) -> &str {
        &self.inner.created_by
    }

    pub(crate) fn parent(&self) -> &ParentLink {
        &self.inner.parent
    }

    #[must_use]
    pub fn encryption_status(&self) -> Option<EncryptionStatus> {
        match &self.inner.shape {
            Shape::File { encryption, .. } => Some(*encryption),
            Shape::Folder => None,
        }
    }

    /// The content being written; only file-shaped placeholders have one.
    pub fn blob(&self) -> Result<Blob> {
        match &self.inner.shape {
            Shape::File { blob, .. } => Ok(blob.clone()),
            Shape::Folder => Err(Error::unsupported("read a blob from", self.describe())),
        }
    }

    /// Wait for the store to acknowledge this write.
    pub async fn sent(&self) -> Result<EntryId> {
        self.inner.completion.wait().await
    }

    pub(crate) fn describe(&self) -> String {
        format!("pending entry {}", crate::error::display_path(&self.path()))
    }

    #[must_use]
    pub fn path(&self) -> Vec<String> {
        let mut path = self.inner.parent.path.clone();
        path.push(self.inner.name.clone());
        path
    }

    /// The folder this placeholder stands for, as a container of children,
    /// waiting for the store to assign its id.
    pub(crate) async fn sent_link(&self) -> Result<ParentLink> {
        if !self.is_folder() {
            return Err(Error::unsupported("list children of", self.describe()));
        }
        let id = self.sent().await?;
        Ok(self.link_for(id))
    }

    /// Like [`Self::sent_link`] but without waiting. `None` while the folder
    /// has no real id, when it cannot have children yet.
    pub(crate) fn acknowledged_link(&self) -> Result<Option<ParentLink>> {
        if !self.is_folder() {
            return Err(Error::unsupported("list children of", self.describe()));
        }
        Ok(self.inner.completion.sent_id().map(|id| self.link_for(id)))
    }

    fn link_for(&self, id: EntryId) -> ParentLink {
        ParentLink {
            id,
            path: self.path(),
            is_root: false,
            events: self.events.clone(),
        }
    }
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("id", &self.id())
            .field("path", &self.path())
            .field("version", &self.version())
            .finish()
    }
}
