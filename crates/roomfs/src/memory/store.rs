// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::tree::{FolderNode, Op, Tree};
use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::id::EntryId;
use crate::membership::{Capabilities, FolderRole};
use crate::store::{
    BackingStore, BindingId, EncryptionStatus, FeedListener, FileRecord, FolderRecord, Invite,
    MemberRecord, StoreEvent,
};
use async_trait::async_trait;
use chrono::Utc;
use diagnostics::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, watch};

/// In-process event-sourced store.
///
/// Writes are accepted at once and return their id, but the listings only
/// show them once they are delivered. Delivery is immediate unless
/// [`MemoryStore::defer_visibility`] holds it back, which reproduces the
/// window in which a remote store has acknowledged a write that the local
/// view has not seen yet.
#[derive(Clone)]
pub struct MemoryStore {
    user: String,
    state: Arc<Mutex<State>>,
    feed: Arc<std::sync::Mutex<Feed>>,
    gate: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct State {
    next: u64,
    /// What the store has accepted.
    accepted: Tree,
    /// What the local view has observed.
    observed: Tree,
    blobs: HashMap<EntryId, Blob>,
    queue: VecDeque<Op>,
    defer: bool,
    invites: Vec<Invite>,
    join_failures: usize,
    forbid_joins: bool,
    write_failures: usize,
    op_failures: HashMap<&'static str, usize>,
    forgotten: HashSet<EntryId>,
    calls: HashMap<&'static str, usize>,
}

#[derive(Default)]
struct Feed {
    next: u64,
    listeners: BTreeMap<u64, FeedListener>,
}

impl State {
    fn next_id(&mut self, sigil: char) -> EntryId {
        self.next += 1;
        EntryId::new(format!("{sigil}{:08}:memory", self.next))
    }

    fn count(&mut self, op: &'static str) {
        *self.calls.entry(op).or_default() += 1;
    }

    /// Apply everything queued to the observed tree.
    fn flush(&mut self) -> Vec<StoreEvent> {
        let now = Utc::now();
        let mut events = Vec::new();
        while let Some(op) = self.queue.pop_front() {
            events.extend(self.observed.apply(&op, now));
        }
        events
    }

    fn require_role(
        &self,
        user: &str,
        folder: &EntryId,
        allowed: fn(FolderRole) -> bool,
    ) -> Result<()> {
        if self.accepted.folder(folder).is_none() {
            return Err(Error::not_found(format!("folder {folder}")));
        }
        match self.accepted.role(folder, user) {
            Some(role) if allowed(role) => Ok(()),
            _ => Err(Error::permission_denied(format!("{user} in folder {folder}"))),
        }
    }

    fn require_writer(&self, user: &str, folder: &EntryId) -> Result<()> {
        self.require_role(user, folder, FolderRole::can_write)
    }

    fn require_file(&self, folder: &EntryId, file: &EntryId) -> Result<&FileRecord> {
        self.accepted
            .file(file)
            .filter(|r| &r.folder == folder)
            .ok_or_else(|| Error::not_found(format!("file {file} in folder {folder}")))
    }

    /// Membership changes are visible on both sides at once.
    fn update_members<F>(&mut self, folder: &EntryId, f: F)
    where
        F: Fn(&mut BTreeMap<String, MemberRecord>),
    {
        for tree in [&mut self.accepted, &mut self.observed] {
            if let Some(node) = tree.folder_mut(folder) {
                f(&mut node.members);
            }
        }
    }

    fn encryption(&self, folder: &EntryId) -> EncryptionStatus {
        match self.accepted.folder(folder) {
            Some(node) if node.encrypted => EncryptionStatus::Decrypted,
            _ => EncryptionStatus::EncryptionNotEnabled,
        }
    }
}

fn capabilities_of(role: Option<FolderRole>) -> Capabilities {
    match role {
        Some(FolderRole::Owner) => Capabilities {
            invite: true,
            remove: true,
            manage_roles: true,
        },
        Some(FolderRole::Editor) => Capabilities {
            invite: true,
            ..Capabilities::default()
        },
        _ => Capabilities::default(),
    }
}

impl MemoryStore {
    pub fn new<S: Into<String>>(user: S) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            user: user.into(),
            state: Arc::default(),
            feed: Arc::default(),
            gate: Arc::new(gate),
        }
    }

    /// Hold accepted writes back from the listings until [`Self::deliver`].
    /// Turning deferral off delivers everything queued.
    pub async fn defer_visibility(&self, defer: bool) {
        let events = {
            let mut state = self.state.lock().await;
            state.defer = defer;
            if defer { Vec::new() } else { state.flush() }
        };
        self.publish(events);
    }

    /// Deliver every queued write. Returns the number of feed events.
    pub async fn deliver(&self) -> usize {
        let events = self.state.lock().await.flush();
        let count = events.len();
        self.publish(events);
        count
    }

    /// Block writes until [`Self::resume_writes`].
    pub fn pause_writes(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Make the next `n` structural writes fail with a transient error.
    pub async fn fail_next_writes(&self, n: usize) {
        self.state.lock().await.write_failures = n;
    }

    /// Make the next `n` writes of kind `op`, such as `"delete_file"`, fail
    /// with a transient error. Other writes go through.
    pub async fn fail_next_calls(&self, op: &'static str, n: usize) {
        self.state.lock().await.op_failures.insert(op, n);
    }

    /// Make the next `n` joins fail with a transient error.
    pub async fn fail_next_joins(&self, n: usize) {
        self.state.lock().await.join_failures = n;
    }

    /// Refuse every join.
    pub async fn forbid_joins(&self, forbid: bool) {
        self.state.lock().await.forbid_joins = forbid;
    }

    /// Drop a version from the loaded history window.
    pub async fn forget(&self, id: &EntryId) {
        self.state.lock().await.forgotten.insert(id.clone());
    }

    pub async fn set_encrypted(&self, folder: &EntryId, encrypted: bool) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        for tree in [&mut state.accepted, &mut state.observed] {
            if let Some(node) = tree.folder_mut(folder) {
                node.encrypted = encrypted;
            }
        }
    }

    /// Add another user to a folder directly, bypassing permission checks.
    pub async fn add_member(&self, folder: &EntryId, user_id: &str, role: FolderRole) {
        let record = MemberRecord {
            user_id: user_id.to_string(),
            role,
            since: Some(Utc::now()),
        };
        self.state.lock().await.update_members(folder, |members| {
            members.insert(record.user_id.clone(), record.clone());
        });
    }

    /// A folder created by someone else, with an invite for this user.
    pub async fn inject_invite(&self, name: &str, inviter: &str) -> EntryId {
        let folder = {
            let mut state = self.state.lock().await;
            let id = state.next_id('!');
            let now = Utc::now();
            let owner = MemberRecord {
                user_id: inviter.to_string(),
                role: FolderRole::Owner,
                since: Some(now),
            };
            let node = FolderNode {
                record: FolderRecord {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: None,
                    created_by: inviter.to_string(),
                    created_at: now,
                    last_active: now,
                },
                members: BTreeMap::from([(inviter.to_string(), owner)]),
                encrypted: false,
                deleted: false,
            };
            state.accepted.insert_folder(node.clone());
            state.observed.insert_folder(node);
            state.invites.push(Invite {
                folder: id.clone(),
                name: name.to_string(),
                inviter: inviter.to_string(),
            });
            id
        };
        self.publish(vec![StoreEvent::Invited {
            folder: folder.clone(),
        }]);
        folder
    }

    /// How many times `op` was called.
    pub async fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(op)
            .copied()
            .unwrap_or_default()
    }

    /// Writes accepted but not yet delivered.
    pub async fn queued(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Feed listeners currently bound.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }

    fn publish(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<FeedListener> = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .values()
            .cloned()
            .collect();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }

    async fn writes_open(&self) {
        let mut rx = self.gate.subscribe();
        // The sender lives as long as the store.
        _ = rx.wait_for(|open| *open).await;
    }

    /// Accept a structural write and deliver it unless deferred.
    async fn write<R, F>(&self, name: &'static str, build: F) -> Result<R>
    where
        F: FnOnce(&mut State) -> Result<(Op, R)> + Send,
        R: Send,
    {
        self.writes_open().await;
        let (events, result) = {
            let mut state = self.state.lock().await;
            state.count(name);
            if state.write_failures > 0 {
                state.write_failures -= 1;
                return Err(Error::transient(format!("{name} failed")));
            }
            if let Some(left) = state.op_failures.get_mut(name).filter(|n| **n > 0) {
                *left -= 1;
                return Err(Error::transient(format!("{name} failed")));
            }
            let (op, result) = build(&mut *state)?;
            debug!("memory store accepted {name}", name: name);
            state.accepted.apply(&op, Utc::now());
            state.queue.push_back(op);
            let events = if state.defer { Vec::new() } else { state.flush() };
            (events, result)
        };
        self.publish(events);
        Ok(result)
    }

    fn new_file(&self, state: &mut State, folder: &EntryId, name: &str, blob: &Blob) -> FileRecord {
        let id = state.next_id('$');
        state.blobs.insert(id.clone(), blob.clone());
        FileRecord {
            id,
            folder: folder.clone(),
            name: name.to_string(),
            version: 1,
            replaces: None,
            locked: false,
            size: blob.size(),
            mimetype: blob.mimetype().to_string(),
            sender: self.user.clone(),
            created_at: Utc::now(),
            encryption: state.encryption(folder),
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn user_id(&self) -> String {
        self.user.clone()
    }

    async fn top_level_folders(&self) -> Result<Vec<FolderRecord>> {
        Ok(self.state.lock().await.observed.top_level(&self.user))
    }

    async fn child_folders(&self, folder: &EntryId) -> Result<Vec<FolderRecord>> {
        Ok(self.state.lock().await.observed.child_folders(folder))
    }

    async fn current_files(&self, folder: &EntryId) -> Result<Vec<FileRecord>> {
        Ok(self.state.lock().await.observed.current_files(folder))
    }

    async fn folder_record(&self, folder: &EntryId) -> Result<Option<FolderRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .observed
            .folder(folder)
            .map(|n| n.record.clone()))
    }

    async fn file_record(&self, folder: &EntryId, file: &EntryId) -> Result<Option<FileRecord>> {
        let state = self.state.lock().await;
        if state.forgotten.contains(file) {
            return Ok(None);
        }
        Ok(state
            .observed
            .file(file)
            .filter(|r| &r.folder == folder)
            .cloned())
    }

    async fn create_folder(&self, parent: Option<&EntryId>, name: &str) -> Result<EntryId> {
        let user = self.user.clone();
        self.write("create_folder", |state| {
            let (members, encrypted) = match parent {
                Some(parent) => {
                    state.require_writer(&user, parent)?;
                    let node = state
                        .accepted
                        .folder(parent)
                        .ok_or_else(|| Error::not_found(format!("folder {parent}")))?;
                    (node.members.clone(), node.encrypted)
                }
                None => {
                    let owner = MemberRecord {
                        user_id: user.clone(),
                        role: FolderRole::Owner,
                        since: Some(Utc::now()),
                    };
                    (BTreeMap::from([(user.clone(), owner)]), false)
                }
            };
            let id = state.next_id('!');
            let now = Utc::now();
            let node = FolderNode {
                record: FolderRecord {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: parent.cloned(),
                    created_by: user.clone(),
                    created_at: now,
                    last_active: now,
                },
                members,
                encrypted,
                deleted: false,
            };
            Ok((Op::CreateFolder(node), id))
        })
        .await
    }

    async fn create_file(&self, folder: &EntryId, name: &str, blob: &Blob) -> Result<EntryId> {
        self.write("create_file", |state| {
            state.require_writer(&self.user, folder)?;
            let record = self.new_file(state, folder, name, blob);
            let id = record.id.clone();
            Ok((Op::CreateFile(record), id))
        })
        .await
    }

    async fn create_version(
        &self,
        folder: &EntryId,
        replaces: &EntryId,
        name: &str,
        blob: &Blob,
        version: u64,
    ) -> Result<EntryId> {
        self.write("create_version", |state| {
            state.require_writer(&self.user, folder)?;
            state.require_file(folder, replaces)?;
            let mut record = self.new_file(state, folder, name, blob);
            record.version = version;
            record.replaces = Some(replaces.clone());
            let id = record.id.clone();
            Ok((Op::CreateFile(record), id))
        })
        .await
    }

    async fn rename_folder(&self, folder: &EntryId, name: &str) -> Result<()> {
        self.write("rename_folder", |state| {
            state.require_writer(&self.user, folder)?;
            let op = Op::RenameFolder {
                folder: folder.clone(),
                name: name.to_string(),
            };
            Ok((op, ()))
        })
        .await
    }

    async fn rename_file(&self, folder: &EntryId, file: &EntryId, name: &str) -> Result<()> {
        self.write("rename_file", |state| {
            state.require_writer(&self.user, folder)?;
            state.require_file(folder, file)?;
            let op = Op::RenameFile {
                file: file.clone(),
                name: name.to_string(),
            };
            Ok((op, ()))
        })
        .await
    }

    async fn delete_folder(&self, folder: &EntryId) -> Result<()> {
        self.write("delete_folder", |state| {
            state.require_writer(&self.user, folder)?;
            Ok((Op::DeleteFolder(folder.clone()), ()))
        })
        .await
    }

    async fn delete_file(&self, folder: &EntryId, file: &EntryId) -> Result<()> {
        self.write("delete_file", |state| {
            state.require_writer(&self.user, folder)?;
            state.require_file(folder, file)?;
            Ok((Op::DeleteFile(file.clone()), ()))
        })
        .await
    }

    async fn set_locked(&self, folder: &EntryId, file: &EntryId, locked: bool) -> Result<()> {
        self.write("set_locked", |state| {
            state.require_writer(&self.user, folder)?;
            state.require_file(folder, file)?;
            let op = Op::SetLocked {
                file: file.clone(),
                locked,
            };
            Ok((op, ()))
        })
        .await
    }

    async fn download(&self, folder: &EntryId, file: &EntryId) -> Result<Blob> {
        let state = self.state.lock().await;
        state.require_file(folder, file)?;
        state
            .blobs
            .get(file)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("blob of {file}")))
    }

    async fn is_encrypted(&self, folder: &EntryId) -> Result<bool> {
        self.state
            .lock()
            .await
            .accepted
            .folder(folder)
            .map(|n| n.encrypted)
            .ok_or_else(|| Error::not_found(format!("folder {folder}")))
    }

    async fn members(&self, folder: &EntryId) -> Result<Vec<MemberRecord>> {
        self.state
            .lock()
            .await
            .accepted
            .folder(folder)
            .map(|n| n.members.values().cloned().collect())
            .ok_or_else(|| Error::not_found(format!("folder {folder}")))
    }

    async fn role(&self, folder: &EntryId, user_id: &str) -> Result<Option<FolderRole>> {
        let state = self.state.lock().await;
        if state.accepted.folder(folder).is_none() {
            return Err(Error::not_found(format!("folder {folder}")));
        }
        Ok(state.accepted.role(folder, user_id))
    }

    async fn capabilities(&self, folder: &EntryId, user_id: &str) -> Result<Capabilities> {
        Ok(capabilities_of(
            self.state.lock().await.accepted.role(folder, user_id),
        ))
    }

    async fn invite(&self, folder: &EntryId, user_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("invite");
        state.require_role(&self.user, folder, |role| capabilities_of(Some(role)).invite)?;
        let record = MemberRecord {
            user_id: user_id.to_string(),
            role: FolderRole::Viewer,
            since: None,
        };
        state.update_members(folder, |members| {
            members
                .entry(record.user_id.clone())
                .or_insert_with(|| record.clone());
        });
        Ok(())
    }

    async fn kick(&self, folder: &EntryId, user_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.count("kick");
            state.require_role(&self.user, folder, |role| capabilities_of(Some(role)).remove)?;
            state.update_members(folder, |members| {
                members.remove(user_id);
            });
        }
        self.publish(vec![StoreEvent::Left {
            folder: folder.clone(),
        }]);
        Ok(())
    }

    async fn set_role(&self, folder: &EntryId, user_id: &str, role: FolderRole) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("set_role");
        state.require_role(&self.user, folder, |r| capabilities_of(Some(r)).manage_roles)?;
        if state.accepted.role(folder, user_id).is_none() {
            return Err(Error::not_found(format!("member {user_id} of folder {folder}")));
        }
        state.update_members(folder, |members| {
            if let Some(member) = members.get_mut(user_id) {
                member.role = role;
            }
        });
        Ok(())
    }

    fn bind(&self, listener: FeedListener) -> BindingId {
        let mut feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner);
        feed.next += 1;
        let id = feed.next;
        feed.listeners.insert(id, listener);
        BindingId(id)
    }

    fn unbind(&self, binding: BindingId) {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .remove(&binding.0);
    }

    async fn start(&self) -> Result<()> {
        self.state.lock().await.count("start");
        Ok(())
    }

    async fn wait_ready(&self) -> Result<()> {
        self.deliver().await;
        Ok(())
    }

    async fn stop(&self) {
        self.state.lock().await.count("stop");
    }

    async fn logout(&self) -> Result<()> {
        self.state.lock().await.count("logout");
        Ok(())
    }

    async fn deactivate(&self, erase: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("deactivate");
        if erase {
            *state = State {
                calls: std::mem::take(&mut state.calls),
                ..State::default()
            };
        }
        Ok(())
    }

    async fn pending_invites(&self) -> Result<Vec<Invite>> {
        Ok(self.state.lock().await.invites.clone())
    }

    async fn join(&self, folder: &EntryId) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.count("join");
            if state.forbid_joins {
                return Err(Error::permission_denied(format!("join {folder}")));
            }
            if state.join_failures > 0 {
                state.join_failures -= 1;
                return Err(Error::transient(format!("join {folder} timed out")));
            }
            let Some(index) = state.invites.iter().position(|i| &i.folder == folder) else {
                return Err(Error::not_found(format!("invite to {folder}")));
            };
            state.invites.remove(index);
            let record = MemberRecord {
                user_id: self.user.clone(),
                role: FolderRole::Editor,
                since: Some(Utc::now()),
            };
            state.update_members(folder, |members| {
                members.insert(record.user_id.clone(), record.clone());
            });
        }
        self.publish(vec![StoreEvent::FolderCreated {
            folder: folder.clone(),
            parent: None,
        }]);
        Ok(())
    }
}
