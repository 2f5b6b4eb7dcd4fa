// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Change notifications.
//!
//! Each entry owns a [`Subscriptions`] manager. The manager binds a relay to
//! the store's feed when its first handler arrives and unbinds it when the
//! last handler leaves, so idle entries cost nothing on the feed.

use crate::entry::Entry;
use crate::store::{BackingStore, BindingId, FeedListener, StoreEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Something in or about the entry changed.
    Modified,
    /// A folder invite arrived (root only).
    Invite,
}

/// One notification delivered to a handler.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    /// The entry that observed the change.
    pub entry: Entry,
    /// The raw feed event.
    pub record: StoreEvent,
}

pub type Handler = Arc<dyn Fn(&Change) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct State {
    next: u64,
    handlers: Vec<(SubscriptionId, ChangeKind, Handler)>,
    binding: Option<BindingId>,
}

#[derive(Clone)]
pub struct Subscriptions {
    store: Arc<dyn BackingStore>,
    state: Arc<Mutex<State>>,
}

impl Subscriptions {
    pub(crate) fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler. `relay` is only invoked when this is the first
    /// handler, to build the listener bound to the store's feed.
    pub(crate) fn subscribe<R>(&self, kind: ChangeKind, handler: Handler, relay: R) -> SubscriptionId
    where
        R: FnOnce() -> FeedListener,
    {
        let mut state = self.state();
        state.next += 1;
        let id = SubscriptionId(state.next);
        state.handlers.push((id, kind, handler));
        if state.binding.is_none() {
            state.binding = Some(self.store.bind(relay()));
        }
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.handlers.len();
        state.handlers.retain(|(h, _, _)| *h != id);
        let removed = state.handlers.len() != before;
        if state.handlers.is_empty() {
            if let Some(binding) = state.binding.take() {
                self.store.unbind(binding);
            }
        }
        removed
    }

    /// Deliver a change to every handler registered for its kind.
    pub(crate) fn emit(&self, change: &Change) {
        let handlers: Vec<Handler> = self
            .state()
            .handlers
            .iter()
            .filter(|(_, kind, _)| *kind == change.kind)
            .map(|(_, _, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(change);
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state().handlers.len()
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.state().binding.is_some()
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("listeners", &self.listener_count())
            .field("bound", &self.is_bound())
            .finish()
    }
}
