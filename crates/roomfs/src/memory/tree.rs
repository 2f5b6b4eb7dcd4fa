// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Projection of the event log into folders and file versions.

use crate::id::EntryId;
use crate::membership::FolderRole;
use crate::store::{FileRecord, FolderRecord, MemberRecord, StoreEvent};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub(super) struct FolderNode {
    pub(super) record: FolderRecord,
    pub(super) members: BTreeMap<String, MemberRecord>,
    pub(super) encrypted: bool,
    pub(super) deleted: bool,
}

/// A structural write, applied once when accepted and again when the
/// client observes it.
#[derive(Debug, Clone)]
pub(super) enum Op {
    CreateFolder(FolderNode),
    CreateFile(FileRecord),
    RenameFolder { folder: EntryId, name: String },
    RenameFile { file: EntryId, name: String },
    DeleteFolder(EntryId),
    DeleteFile(EntryId),
    SetLocked { file: EntryId, locked: bool },
}

#[derive(Debug, Clone, Default)]
pub(super) struct Tree {
    folders: BTreeMap<EntryId, FolderNode>,
    files: BTreeMap<EntryId, FileRecord>,
    deleted_files: BTreeSet<EntryId>,
}

impl Tree {
    pub(super) fn apply(&mut self, op: &Op, at: DateTime<Utc>) -> Vec<StoreEvent> {
        match op {
            Op::CreateFolder(node) => {
                let folder = node.record.id.clone();
                let parent = node.record.parent.clone();
                self.folders.insert(folder.clone(), node.clone());
                let mut events = vec![StoreEvent::FolderCreated {
                    folder: folder.clone(),
                    parent: parent.clone(),
                }];
                if let Some(parent) = parent {
                    self.touch(&parent, at);
                    events.push(StoreEvent::ChildAdded {
                        parent,
                        child: folder,
                    });
                }
                events
            }
            Op::CreateFile(record) => {
                self.files.insert(record.id.clone(), record.clone());
                self.touch(&record.folder, at);
                vec![StoreEvent::FileTimeline {
                    folder: record.folder.clone(),
                    file: record.id.clone(),
                    replaces: record.replaces.clone(),
                }]
            }
            Op::RenameFolder { folder, name } => match self.folders.get_mut(folder) {
                Some(node) => {
                    node.record.name = name.clone();
                    node.record.last_active = at;
                    vec![StoreEvent::FolderRenamed {
                        folder: folder.clone(),
                        parent: node.record.parent.clone(),
                    }]
                }
                None => Vec::new(),
            },
            Op::RenameFile { file, name } => self.update_file(file, |r| r.name = name.clone()),
            Op::DeleteFolder(folder) => match self.folders.get_mut(folder) {
                Some(node) => {
                    node.deleted = true;
                    vec![StoreEvent::Left {
                        folder: folder.clone(),
                    }]
                }
                None => Vec::new(),
            },
            Op::DeleteFile(file) => {
                self.deleted_files.insert(file.clone());
                self.update_file(file, |_| {})
            }
            Op::SetLocked { file, locked } => self.update_file(file, |r| r.locked = *locked),
        }
    }

    fn update_file<F: FnOnce(&mut FileRecord)>(&mut self, file: &EntryId, f: F) -> Vec<StoreEvent> {
        match self.files.get_mut(file) {
            Some(record) => {
                f(record);
                vec![StoreEvent::FileStateChanged {
                    folder: record.folder.clone(),
                    file: file.clone(),
                }]
            }
            None => Vec::new(),
        }
    }

    fn touch(&mut self, folder: &EntryId, at: DateTime<Utc>) {
        if let Some(node) = self.folders.get_mut(folder) {
            node.record.last_active = at;
        }
    }

    /// A live (not deleted) folder.
    pub(super) fn folder(&self, id: &EntryId) -> Option<&FolderNode> {
        self.folders.get(id).filter(|n| !n.deleted)
    }

    pub(super) fn folder_mut(&mut self, id: &EntryId) -> Option<&mut FolderNode> {
        self.folders.get_mut(id).filter(|n| !n.deleted)
    }

    pub(super) fn insert_folder(&mut self, node: FolderNode) {
        self.folders.insert(node.record.id.clone(), node);
    }

    pub(super) fn role(&self, folder: &EntryId, user: &str) -> Option<FolderRole> {
        self.folder(folder)
            .and_then(|n| n.members.get(user))
            .map(|m| m.role)
    }

    pub(super) fn top_level(&self, user: &str) -> Vec<FolderRecord> {
        self.folders
            .values()
            .filter(|n| !n.deleted && n.record.parent.is_none() && n.members.contains_key(user))
            .map(|n| n.record.clone())
            .collect()
    }

    pub(super) fn child_folders(&self, parent: &EntryId) -> Vec<FolderRecord> {
        self.folders
            .values()
            .filter(|n| !n.deleted && n.record.parent.as_ref() == Some(parent))
            .map(|n| n.record.clone())
            .collect()
    }

    pub(super) fn file(&self, id: &EntryId) -> Option<&FileRecord> {
        self.files.get(id)
    }

    /// Versions in `folder` that nothing replaced and nobody deleted.
    pub(super) fn current_files(&self, folder: &EntryId) -> Vec<FileRecord> {
        let replaced: BTreeSet<&EntryId> = self
            .files
            .values()
            .filter_map(|r| r.replaces.as_ref())
            .collect();
        self.files
            .values()
            .filter(|r| &r.folder == folder)
            .filter(|r| !replaced.contains(&r.id) && !self.deleted_files.contains(&r.id))
            .cloned()
            .collect()
    }
}
