// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Folders: merged child listings, creation of children, and membership.

use crate::blob::Blob;
use crate::entry::{Entry, ParentLink};
use crate::error::{Error, Result, display_path};
use crate::events::Subscriptions;
use crate::file::{self, FileEntry, VersionBase};
use crate::id::EntryId;
use crate::membership::{FolderRole, Membership};
use crate::overlay::Claim;
use crate::pending::{PendingEntry, PendingInner};
use crate::resolve;
use crate::root::Namespace;
use crate::store::{EncryptionStatus, FolderRecord};
use chrono::{DateTime, Utc};
use diagnostics::*;
use std::future::Future;
use std::pin::Pin;

/// A folder the store has confirmed.
#[derive(Clone)]
pub struct FolderEntry {
    ns: Namespace,
    record: FolderRecord,
    parent: ParentLink,
    pub(crate) events: Subscriptions,
}

impl FolderEntry {
    pub(crate) fn new(ns: Namespace, record: FolderRecord, parent: ParentLink) -> Self {
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

    /// This folder as the parent of its children.
    pub(crate) fn link(&self) -> ParentLink {
        ParentLink {
            id: self.record.id.clone(),
            path: self.path(),
            is_root: false,
            events: self.events.clone(),
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
    pub fn created_by(&self) -> &str {
        &self.record.created_by
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    #[must_use]
    pub fn last_active(&self) -> DateTime<Utc> {
        self.record.last_active
    }

    pub async fn writable(&self) -> Result<bool> {
        writable(&self.ns, &self.record.id).await
    }

    pub async fn members(&self) -> Result<Vec<Membership>> {
        let store = self.ns.store();
        let mut members = Vec::new();
        for record in store.members(&self.record.id).await? {
            let caps = store.capabilities(&self.record.id, &record.user_id).await?;
            members.push(Membership::new(record, caps));
        }
        Ok(members)
    }

    /// `NotFound` if `user_id` is not a member.
    pub async fn membership(&self, user_id: &str) -> Result<Membership> {
        membership(&self.ns, &self.record.id, user_id).await
    }

    pub async fn own_membership(&self) -> Result<Membership> {
        membership(&self.ns, &self.record.id, &self.ns.store().user_id()).await
    }

    /// Invite a user and give them `role`.
    pub async fn invite_member(&self, user_id: &str, role: FolderRole) -> Result<Membership> {
        let store = self.ns.store();
        store.invite(&self.record.id, user_id).await?;
        store.set_role(&self.record.id, user_id, role).await?;
        let folder = display_path(&self.path());
        info!("invited {user_id} to {folder}", user_id: user_id, folder: folder);
        self.membership(user_id).await
    }

    pub async fn set_member_role(&self, user_id: &str, role: FolderRole) -> Result<Membership> {
        self.ns
            .store()
            .set_role(&self.record.id, user_id, role)
            .await?;
        self.membership(user_id).await
    }

    pub async fn remove_member(&self, user_id: &str) -> Result<()> {
        self.ns.store().kick(&self.record.id, user_id).await
    }

    pub(crate) async fn rename(&self, name: &str) -> Result<()> {
        self.ns.store().rename_folder(&self.record.id, name).await
    }

    pub(crate) async fn delete(&self) -> Result<()> {
        self.ns.store().delete_folder(&self.record.id).await
    }
}

impl std::fmt::Debug for FolderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderEntry")
            .field("id", &self.record.id)
            .field("path", &self.path())
            .finish()
    }
}

pub(crate) async fn membership(ns: &Namespace, folder: &EntryId, user_id: &str) -> Result<Membership> {
    let store = ns.store();
    let record = store
        .members(folder)
        .await?
        .into_iter()
        .find(|m| m.user_id == user_id)
        .ok_or_else(|| Error::not_found(format!("member {user_id} of folder {folder}")))?;
    let caps = store.capabilities(folder, user_id).await?;
    Ok(Membership::new(record, caps))
}

/// Whether the current user can write in `folder`. Not being a member means
/// no.
pub(crate) async fn writable(ns: &Namespace, folder: &EntryId) -> Result<bool> {
    let store = ns.store();
    Ok(store
        .role(folder, &store.user_id())
        .await?
        .is_some_and(FolderRole::can_write))
}

/// Children of `link`: authoritative folders, then current files, then
/// pending writes that the store has not reflected yet.
///
/// A pending entry whose id shows up authoritatively has been observed and
/// is retired from the overlay, whether or not it is still visible. Every
/// other pending entry hides the entries its write supersedes.
pub(crate) async fn list_children(ns: &Namespace, link: &ParentLink) -> Result<Vec<Entry>> {
    let mut children = stored_children(ns, link).await?;
    let listed: Vec<EntryId> = children.iter().map(Entry::id).collect();
    ns.overlay().retire_observed(&link.id, &listed);

    for pending in ns.overlay().list_for(&link.id) {
        let id = pending.id();
        if listed.contains(&id) {
            ns.overlay().clear(&id);
            continue;
        }
        let hidden = pending.replaced_chain();
        children.retain(|c| !hidden.contains(&c.id()));
        children.push(Entry::Pending(PendingEntry::new(ns.clone(), pending)));
    }

    Ok(children)
}

/// Children of `link` as the store reports them, without pending writes.
async fn stored_children(ns: &Namespace, link: &ParentLink) -> Result<Vec<Entry>> {
    let store = ns.store();
    let mut children: Vec<Entry> = Vec::new();

    if link.is_root {
        for record in store.top_level_folders().await? {
            children.push(Entry::Folder(FolderEntry::new(ns.clone(), record, link.clone())));
        }
    } else {
        for record in store.child_folders(&link.id).await? {
            children.push(Entry::Folder(FolderEntry::new(ns.clone(), record, link.clone())));
        }
        for record in store.current_files(&link.id).await? {
            children.push(Entry::File(FileEntry::new(ns.clone(), record, link.clone())));
        }
    }
    Ok(children)
}

pub(crate) async fn encryption_for(ns: &Namespace, folder: &EntryId) -> Result<EncryptionStatus> {
    Ok(if ns.store().is_encrypted(folder).await? {
        EncryptionStatus::Decrypted
    } else {
        EncryptionStatus::EncryptionNotEnabled
    })
}

pub(crate) async fn add_file(
    ns: &Namespace,
    link: &ParentLink,
    name: &str,
    blob: Blob,
) -> Result<EntryId> {
    let encryption = encryption_for(ns, &link.id).await?;
    let created_by = ns.store().user_id();
    // A listing can miss writes observed while it ran; when the overlay
    // reports that, look again.
    let entry = loop {
        let since = ns.overlay().generation();
        let base = match resolve::child_by_name(ns, link, name).await? {
            Some(Entry::File(f)) => f.version_base(),
            Some(Entry::Pending(p)) if !p.is_folder() => VersionBase::Pending(p.inner.clone()),
            Some(_) => return Err(Error::name_conflict(link.child_path(name))),
            None => {
                let claim = ns.overlay().claim_name(&link.id, name, since, || {
                    let created_by = created_by.clone();
                    PendingInner::new_file(name, link.clone(), blob.clone(), encryption, created_by)
                });
                match claim {
                    Claim::Existing(p) if p.is_folder() => {
                        return Err(Error::name_conflict(link.child_path(name)));
                    }
                    Claim::Existing(p) => VersionBase::Pending(p),
                    Claim::Registered(entry) => break entry,
                    Claim::Stale => continue,
                }
            }
        };
        if let Some(written) = file::add_listed_version(ns, base, &blob, encryption, since).await {
            return written;
        }
    };

    match ns.store().create_file(&link.id, name, &blob).await {
        Ok(id) => {
            entry.completion.resolve(id.clone())?;
            let path = display_path(&link.child_path(name));
            let id_str = id.to_string();
            info!("created file {path} as {id_str}", path: path, id_str: id_str);
            Ok(id)
        }
        Err(e) => {
            entry.completion.fail(e.clone());
            ns.overlay().abandon(&entry);
            Err(e)
        }
    }
}

/// Create the child folder `name` unless one exists; returns its id either
/// way.
pub(crate) async fn create_child_folder(
    ns: &Namespace,
    link: &ParentLink,
    name: &str,
) -> Result<EntryId> {
    let created_by = ns.store().user_id();
    let entry = loop {
        let since = ns.overlay().generation();
        match resolve::child_by_name(ns, link, name).await? {
            Some(Entry::Folder(f)) => return Ok(f.id().clone()),
            Some(Entry::Pending(p)) if p.is_folder() => return p.sent().await,
            Some(_) => return Err(Error::name_conflict(link.child_path(name))),
            None => {}
        }

        let claim = ns.overlay().claim_name(&link.id, name, since, || {
            PendingInner::new_folder(name, link.clone(), created_by.clone())
        });
        match claim {
            Claim::Existing(p) if p.is_folder() => return p.completion.wait().await,
            Claim::Existing(_) => return Err(Error::name_conflict(link.child_path(name))),
            Claim::Registered(entry) => break entry,
            Claim::Stale => {}
        }
    };

    let parent = (!link.is_root).then_some(&link.id);
    match ns.store().create_folder(parent, name).await {
        Ok(id) => {
            entry.completion.resolve(id.clone())?;
            let path = display_path(&link.child_path(name));
            let id_str = id.to_string();
            info!("created folder {path} as {id_str}", path: path, id_str: id_str);
            Ok(id)
        }
        Err(e) => {
            entry.completion.fail(e.clone());
            ns.overlay().abandon(&entry);
            Err(e)
        }
    }
}

pub(crate) async fn add_folder<S: AsRef<str>>(
    ns: &Namespace,
    start: &ParentLink,
    path: &[S],
) -> Result<EntryId> {
    let mut link = start.clone();
    for segment in path {
        let name = segment.as_ref();
        let id = create_child_folder(ns, &link, name).await?;
        link = folder_link(ns, &link, &id, name).await?;
    }
    Ok(link.id)
}

/// Link to the child folder `id` of `link`, which was just created or found.
async fn folder_link(
    ns: &Namespace,
    link: &ParentLink,
    id: &EntryId,
    name: &str,
) -> Result<ParentLink> {
    match resolve::child_by_id(ns, link, id).await? {
        Some(Entry::Folder(f)) => Ok(f.link()),
        Some(Entry::Pending(p)) if p.is_folder() => p.sent_link().await,
        _ => Err(Error::not_found(format!(
            "folder {}",
            display_path(&link.child_path(name))
        ))),
    }
}

/// Copy `source` into `dest` as `name`, recursing into folders.
pub(crate) fn copy_into<'a>(
    source: &'a Entry,
    dest: &'a ParentLink,
    name: &'a str,
) -> Pin<Box<dyn Future<Output = Result<EntryId>> + Send + 'a>> {
    Box::pin(async move {
        let ns = source.namespace();
        match source {
            Entry::File(f) => file::copy_file(f, dest, name).await,
            Entry::Pending(p) if !p.is_folder() => add_file(ns, dest, name, p.blob()?).await,
            Entry::Root(_) => Err(Error::unsupported("copy", "the root")),
            _ => {
                let id = create_child_folder(ns, dest, name).await?;
                let target = folder_link(ns, dest, &id, name).await?;
                let from = source.container().await?;
                for child in list_children(ns, &from).await? {
                    copy_into(&child, &target, child.name()).await?;
                }
                Ok(id)
            }
        }
    })
}
