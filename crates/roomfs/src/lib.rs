// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! A versioned, access-controlled folder tree over an event-sourced store.
//!
//! Folders live in the store as rooms and file versions as timeline events.
//! The store acknowledges writes long before it shows them in listings, so
//! every mutation first registers a pending entry in the namespace overlay;
//! listings merge the overlay with what the store returns until the store
//! catches up.

// Identifiers, values and errors
pub mod blob;
pub mod error;
pub mod id;

// Store boundary and the in-memory implementation
pub mod memory;
pub mod store;

// Configuration
pub mod config;

// Tree
pub mod entry;
pub mod events;
pub mod file;
pub mod folder;
pub mod membership;
pub mod pending;
pub mod root;

mod history;
mod overlay;
mod resolve;
mod signal;

pub use blob::Blob;
pub use config::{NamespaceConfig, RetryConfig};
pub use entry::Entry;
pub use error::{Error, Result};
pub use events::{Change, ChangeKind, SubscriptionId, Subscriptions};
pub use file::FileEntry;
pub use folder::FolderEntry;
pub use id::EntryId;
pub use membership::{Capabilities, FolderRole, Membership};
pub use memory::MemoryStore;
pub use pending::PendingEntry;
pub use root::Namespace;
pub use signal::Completion;
pub use store::{
    BackingStore, BindingId, EncryptionStatus, FeedListener, FileRecord, FolderRecord, Invite,
    MemberRecord, StoreEvent,
};

#[cfg(test)]
mod tests;
