// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The namespace root.
//!
//! A [`Namespace`] is the single top-level entry. It owns the overlay of
//! pending writes shared by every entry reached from it, and fronts the
//! store's lifecycle and invite handling.

use crate::config::NamespaceConfig;
use crate::entry::{Entry, ParentLink};
use crate::error::{Error, Result};
use crate::events::{Change, ChangeKind, SubscriptionId, Subscriptions};
use crate::folder;
use crate::id::EntryId;
use crate::overlay::Overlay;
use crate::resolve;
use crate::store::{BackingStore, Invite};
use backon::Retryable;
use diagnostics::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn BackingStore>,
    overlay: Overlay,
    config: NamespaceConfig,
    events: Subscriptions,
}

impl Namespace {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self::with_config(store, NamespaceConfig::default())
    }

    pub fn with_config(store: Arc<dyn BackingStore>, config: NamespaceConfig) -> Self {
        let events = Subscriptions::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                overlay: Overlay::new(config.pending_expiry),
                store,
                config,
                events,
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.inner.store
    }

    pub(crate) fn overlay(&self) -> &Overlay {
        &self.inner.overlay
    }

    #[must_use]
    pub fn config(&self) -> &NamespaceConfig {
        &self.inner.config
    }

    pub(crate) fn events(&self) -> &Subscriptions {
        &self.inner.events
    }

    /// The root's id is the id of the user the store acts as.
    #[must_use]
    pub fn id(&self) -> EntryId {
        EntryId::new(self.inner.store.user_id())
    }

    #[must_use]
    pub fn root_entry(&self) -> Entry {
        Entry::Root(self.clone())
    }

    pub(crate) fn root_link(&self) -> ParentLink {
        ParentLink {
            id: self.id(),
            path: Vec::new(),
            is_root: true,
            events: self.inner.events.clone(),
        }
    }

    /// Top-level folders, including ones still being created.
    pub async fn children(&self) -> Result<Vec<Entry>> {
        folder::list_children(self, &self.root_link()).await
    }

    /// Create the missing folders along `path` and return the id of the
    /// deepest. Existing folders are reused.
    pub async fn add_folder<S: AsRef<str>>(&self, path: &[S]) -> Result<EntryId> {
        folder::add_folder(self, &self.root_link(), path).await
    }

    /// The entry at `path`, or `None`. The empty path is the root.
    pub async fn resolve_path<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<Entry>> {
        resolve::resolve_path(self, path).await
    }

    /// Start the store's sync loop and wait for the first sync.
    pub async fn sync(&self) -> Result<()> {
        self.inner.store.start().await?;
        self.inner.store.wait_ready().await?;
        let user = self.inner.store.user_id();
        info!("namespace for {user} ready", user: user);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.inner.store.logout().await?;
        self.inner.store.stop().await;
        Ok(())
    }

    /// Close the account. With `erase`, the store also forgets its data.
    pub async fn deactivate(&self, erase: bool) -> Result<()> {
        self.inner.store.stop().await;
        self.inner.store.deactivate(erase).await
    }

    pub async fn pending_invites(&self) -> Result<Vec<Invite>> {
        self.inner.store.pending_invites().await
    }

    /// Join the folder an invite points at. Transient failures are retried
    /// with backoff; a refusal is returned immediately.
    pub async fn accept_invite(&self, invite: &Invite) -> Result<EntryId> {
        let store = self.inner.store.clone();
        let folder = invite.folder.clone();
        let name = invite.name.clone();

        let join = || {
            let store = store.clone();
            let folder = folder.clone();
            async move { store.join(&folder).await }
        };
        join.retry(self.inner.config.invite_retry.backoff())
            .sleep(tokio::time::sleep)
            .when(|e: &Error| !e.is_permission_denied())
            .notify(|e: &Error, delay: Duration| {
                let reason = e.to_string();
                let delay = format!("{delay:?}");
                warn!(
                    "joining {name} failed, retrying in {delay}: {reason}",
                    name: name,
                    delay: delay,
                    reason: reason
                );
            })
            .await?;

        let folder_str = folder.to_string();
        info!("joined {name} ({folder_str})", name: name, folder_str: folder_str);
        Ok(folder)
    }

    /// Accept every pending invite concurrently. Fails if any join fails.
    pub async fn accept_all_invites(&self) -> Result<Vec<EntryId>> {
        let invites = self.pending_invites().await?;
        futures::future::try_join_all(invites.iter().map(|invite| self.accept_invite(invite))).await
    }

    /// See [`Entry::subscribe`]. The root reports invites as
    /// [`ChangeKind::Invite`] and structural changes as
    /// [`ChangeKind::Modified`].
    pub fn subscribe<F>(&self, kind: ChangeKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.root_entry().subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("user", &self.inner.store.user_id())
            .field("events", &self.inner.events)
            .finish()
    }
}
