// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Files and their versions.
//!
//! Every version is a separate store entry that points back at the one it
//! replaced. Version writes on one file are chained through the overlay so
//! that concurrent writers get consecutive version numbers and each write
//! names its true predecessor.

use crate::blob::Blob;
use crate::entry::{Entry, ParentLink};
use crate::error::{Error, Result, display_path};
use crate::events::Subscriptions;
use crate::folder;
use crate::history;
use crate::id::EntryId;
use crate::pending::{PendingInner, Replaced};
use crate::root::Namespace;
use crate::store::{EncryptionStatus, FileRecord};
use chrono::{DateTime, Utc};
use diagnostics::*;
use std::sync::Arc;

/// One confirmed file version.
#[derive(Clone)]
pub struct FileEntry {
    ns: Namespace,
    record: FileRecord,
    parent: ParentLink,
    pub(crate) events: Subscriptions,
}

/// The version a new write builds on.
pub(crate) enum VersionBase {
    Stored {
        id: EntryId,
        version: u64,
        name: String,
        parent: ParentLink,
    },
    Pending(Arc<PendingInner>),
}

impl VersionBase {
    fn id(&self) -> EntryId {
        match self {
            VersionBase::Stored { id, .. } => id.clone(),
            VersionBase::Pending(p) => p.id(),
        }
    }

    fn parent(&self) -> &ParentLink {
        match self {
            VersionBase::Stored { parent, .. } => parent,
            VersionBase::Pending(p) => &p.parent,
        }
    }
}

impl FileEntry {
    pub(crate) fn new(ns: Namespace, record: FileRecord, parent: ParentLink) -> Self {
        let events = Subscriptions::new(ns.store().clone());
        Self {
            ns,
            record,
            parent,
            events,
        }
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub(crate) fn parent(&self) -> &ParentLink {
        &self.parent
    }

    pub(crate) fn version_base(&self) -> VersionBase {
        VersionBase::Stored {
            id: self.record.id.clone(),
            version: self.record.version,
            name: self.record.name.clone(),
            parent: self.parent.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &EntryId {
        &self.record.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    #[must_use]
    pub fn path(&self) -> Vec<String> {
        self.parent.child_path(&self.record.name)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.record.version
    }

    #[must_use]
    pub fn replaces(&self) -> Option<&EntryId> {
        self.record.replaces.as_ref()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.record.locked
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.record.size
    }

    #[must_use]
    pub fn mimetype(&self) -> &str {
        &self.record.mimetype
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.record.sender
    }

    /// When this version was written.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    #[must_use]
    pub fn encryption_status(&self) -> EncryptionStatus {
        self.record.encryption
    }

    /// When the oldest reachable version was written.
    pub async fn creation_date(&self) -> Result<DateTime<Utc>> {
        let history = history::version_history(self.ns.store().as_ref(), &self.record).await?;
        Ok(history
            .first()
            .map_or(self.record.created_at, |oldest| oldest.created_at))
    }

    /// Every version reachable through back-references, oldest first and
    /// ending with this one.
    pub async fn version_history(&self) -> Result<Vec<FileEntry>> {
        let records = history::version_history(self.ns.store().as_ref(), &self.record).await?;
        Ok(records
            .into_iter()
            .map(|record| FileEntry::new(self.ns.clone(), record, self.parent.clone()))
            .collect())
    }

    pub async fn blob(&self) -> Result<Blob> {
        self.ns
            .store()
            .download(&self.record.folder, &self.record.id)
            .await
    }

    /// Write this version's content as a new version of `target`.
    pub async fn copy_as_version(&self, target: &Entry) -> Result<EntryId> {
        let blob = self.blob().await?;
        target.add_version(blob, None).await
    }

    pub(crate) async fn set_locked(&self, locked: bool) -> Result<()> {
        self.ns
            .store()
            .set_locked(&self.record.folder, &self.record.id, locked)
            .await
    }

    pub(crate) async fn rename(&self, name: &str) -> Result<()> {
        self.ns
            .store()
            .rename_file(&self.record.folder, &self.record.id, name)
            .await
    }

    pub(crate) async fn delete(&self) -> Result<()> {
        self.ns
            .store()
            .delete_file(&self.record.folder, &self.record.id)
            .await
    }
}

impl std::fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEntry")
            .field("id", &self.record.id)
            .field("path", &self.path())
            .field("version", &self.record.version)
            .finish()
    }
}

/// Write a new version on top of `base`, or on top of the newest pending
/// version already chained onto it.
pub(crate) async fn add_version(
    ns: &Namespace,
    base: VersionBase,
    blob: Blob,
    new_name: Option<&str>,
) -> Result<EntryId> {
    let encryption = folder::encryption_for(ns, &base.parent().id).await?;
    let created_by = ns.store().user_id();
    let entry = ns.overlay().chain_version(&base.id(), |head| {
        next_version(head, &base, &blob, new_name, encryption, created_by)
    });
    write_version(ns, entry, &blob).await
}

/// [`add_version`] for a `base` found in a listing taken at overlay
/// generation `since`. `None` if `base` may have been superseded since.
pub(crate) async fn add_listed_version(
    ns: &Namespace,
    base: VersionBase,
    blob: &Blob,
    encryption: EncryptionStatus,
    since: u64,
) -> Option<Result<EntryId>> {
    let created_by = ns.store().user_id();
    let entry = ns.overlay().chain_listed_version(&base.id(), since, |head| {
        next_version(head, &base, blob, None, encryption, created_by)
    })?;
    Some(write_version(ns, entry, blob).await)
}

fn next_version(
    head: Option<&Arc<PendingInner>>,
    base: &VersionBase,
    blob: &Blob,
    new_name: Option<&str>,
    encryption: EncryptionStatus,
    created_by: String,
) -> Arc<PendingInner> {
    let (replaces, version, name) = match (head, base) {
        (Some(head), _) => (
            Replaced::Pending(head.clone()),
            head.version() + 1,
            head.name.clone(),
        ),
        (None, VersionBase::Stored { id, version, name, .. }) => {
            (Replaced::Stored(id.clone()), version + 1, name.clone())
        }
        (None, VersionBase::Pending(p)) => {
            (Replaced::Pending(p.clone()), p.version() + 1, p.name.clone())
        }
    };
    let name = new_name.map_or(name, str::to_string);
    PendingInner::new_version(
        name,
        base.parent().clone(),
        replaces,
        version,
        blob.clone(),
        encryption,
        created_by,
    )
}

/// Wait for the predecessor of `entry`, then write it.
async fn write_version(ns: &Namespace, entry: Arc<PendingInner>, blob: &Blob) -> Result<EntryId> {
    let parent = &entry.parent;
    let path = display_path(&parent.child_path(&entry.name));
    let version = entry.version();
    debug!("chained version {version} of {path}", version: version, path: path);

    let predecessor = match &entry.replaces {
        Some(Replaced::Pending(previous)) => match previous.completion.wait().await {
            Ok(id) => id,
            Err(e) => {
                let err = Error::transient(format!("previous version of {path} failed: {e}"));
                entry.completion.fail(err.clone());
                ns.overlay().abandon(&entry);
                return Err(err);
            }
        },
        Some(Replaced::Stored(id)) => id.clone(),
        None => {
            return Err(Error::unsupported("write a version without a base", path));
        }
    };

    match ns
        .store()
        .create_version(&parent.id, &predecessor, &entry.name, blob, version)
        .await
    {
        Ok(id) => {
            entry.completion.resolve(id.clone())?;
            let id_str = id.to_string();
            info!(
                "wrote version {version} of {path} as {id_str}",
                version: version,
                path: path,
                id_str: id_str
            );
            Ok(id)
        }
        Err(e) => {
            entry.completion.fail(e.clone());
            ns.overlay().abandon(&entry);
            Err(e)
        }
    }
}

/// Replay the history of `source` into `dest` as `name`, oldest version
/// first. Returns the id of the newest copied version.
pub(crate) async fn copy_file(source: &FileEntry, dest: &ParentLink, name: &str) -> Result<EntryId> {
    let ns = source.namespace();
    let mut latest: Option<EntryId> = None;
    for version in source.version_history().await? {
        let blob = version.blob().await?;
        let id = match &latest {
            None => folder::add_file(ns, dest, name, blob).await?,
            Some(previous) => {
                let target = crate::resolve::child_by_id(ns, dest, previous)
                    .await?
                    .ok_or_else(|| {
                        Error::not_found(format!(
                            "copied version {previous} in {}",
                            display_path(&dest.path)
                        ))
                    })?;
                target.add_version(blob, None).await?
            }
        };
        latest = Some(id);
    }
    latest.ok_or_else(|| Error::not_found(format!("versions of {}", display_path(&source.path()))))
}
