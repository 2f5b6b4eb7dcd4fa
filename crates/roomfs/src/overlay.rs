// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Registry of writes that the store has not yet reflected in listings.
//!
//! Two views are kept. `visible` holds the placeholders merged into child
//! listings; a placeholder leaves it when superseded, cleared, observed, or
//! expired. `lineage` holds every placeholder until it fails or the newest
//! one in its chain is observed, so that later writes can find the head of a
//! chain, or a name still being written, after it stopped being visible.
//!
//! All bookkeeping happens under a plain mutex that is never held across an
//! await, so a lookup followed by a registration is atomic with respect to
//! other operations.

use crate::id::EntryId;
use crate::pending::{PendingInner, Replaced};
use chrono::Utc;
use diagnostics::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct State {
    visible: Vec<Arc<PendingInner>>,
    lineage: Vec<Arc<PendingInner>>,
    /// Bumped whenever placeholders are retired.
    generation: u64,
}

/// Result of [`Overlay::claim_name`].
pub(crate) enum Claim {
    /// Another placeholder already stands for this (parent, name).
    Existing(Arc<PendingInner>),
    Registered(Arc<PendingInner>),
    /// Placeholders were retired since the caller looked the name up, so
    /// the store may now list it.
    Stale,
}

#[derive(Default)]
pub(crate) struct Overlay {
    state: Mutex<State>,
    expiry: Option<Duration>,
}

impl Overlay {
    pub(crate) fn new(expiry: Option<Duration>) -> Self {
        Self {
            state: Mutex::default(),
            expiry,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a placeholder. A placeholder that replaces another one takes its
    /// place; registering the same placeholder twice has no effect.
    pub(crate) fn register(&self, entry: Arc<PendingInner>) {
        let mut state = self.state();
        Self::insert(&mut state, entry);
    }

    fn insert(state: &mut State, entry: Arc<PendingInner>) {
        let id = entry.id();
        let id_str = id.to_string();
        let path_str = crate::error::display_path(&entry.parent.path);
        let name = entry.name.clone();

        if let Some(replaced) = entry.replaced_id() {
            let replaced_str = replaced.to_string();
            debug!(
                "overlay register {id_str} in {path_str} named {name} replaces {replaced_str}",
                id_str: id_str,
                path_str: path_str,
                name: name,
                replaced_str: replaced_str
            );
            state.visible.retain(|e| e.id() != replaced);
        } else {
            debug!(
                "overlay register {id_str} in {path_str} named {name}",
                id_str: id_str,
                path_str: path_str,
                name: name
            );
        }

        if state
            .visible
            .iter()
            .any(|e| Arc::ptr_eq(e, &entry) || e.id() == id)
        {
            return;
        }
        if !state.lineage.iter().any(|e| Arc::ptr_eq(e, &entry)) {
            state.lineage.push(entry.clone());
        }
        state.visible.push(entry);
    }

    /// Remove a placeholder by id, along with the placeholders it superseded.
    /// Clearing an unknown id is a no-op.
    pub(crate) fn clear(&self, id: &EntryId) {
        let mut state = self.state();
        Self::remove(&mut state, id);
    }

    fn remove(state: &mut State, id: &EntryId) {
        let id_str = id.to_string();
        debug!("overlay clear {id_str}", id_str: id_str);

        let mut retired: Vec<Arc<PendingInner>> = Vec::new();
        for e in state.visible.iter().chain(state.lineage.iter()) {
            if e.id() == *id || e.synthetic_id() == id {
                retired.push(e.clone());
                retired.extend(e.pending_ancestors());
            }
        }
        if retired.is_empty() {
            return;
        }
        state.generation += 1;
        state
            .visible
            .retain(|e| !retired.iter().any(|r| Arc::ptr_eq(r, e)));
        state
            .lineage
            .retain(|e| !retired.iter().any(|r| Arc::ptr_eq(r, e)));
    }

    /// Taken before looking a name up in the store, and handed back to
    /// [`Self::claim_name`].
    pub(crate) fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Drop a placeholder whose write failed. The write it superseded, if
    /// still live, becomes visible again.
    pub(crate) fn abandon(&self, entry: &Arc<PendingInner>) {
        let mut state = self.state();
        let id_str = entry.id().to_string();
        debug!("overlay abandon {id_str}", id_str: id_str);

        state.visible.retain(|e| !Arc::ptr_eq(e, entry));
        state.lineage.retain(|e| !Arc::ptr_eq(e, entry));

        if let Some(Replaced::Pending(previous)) = &entry.replaces {
            let failed = matches!(previous.completion.peek(), Some(Err(_)));
            let tracked = state.lineage.iter().any(|e| Arc::ptr_eq(e, previous));
            if !failed && tracked {
                Self::insert(&mut state, previous.clone());
            }
        }
    }

    /// Placeholders whose parent is `parent`, in registration order.
    pub(crate) fn list_for(&self, parent: &EntryId) -> Vec<Arc<PendingInner>> {
        let mut state = self.state();
        self.expire(&mut state);
        let entries: Vec<_> = state
            .visible
            .iter()
            .filter(|e| e.parent.id == *parent)
            .cloned()
            .collect();
        let parent_str = parent.to_string();
        let count = entries.len();
        let total = state.visible.len();
        debug!(
            "overlay entries for {parent_str} = {count} of {total}",
            parent_str: parent_str,
            count: count,
            total: total
        );
        entries
    }

    /// Hide unacknowledged placeholders older than the expiry limit. They
    /// stay in the lineage, since their writes may still land.
    fn expire(&self, state: &mut State) {
        let Some(limit) = self.expiry else {
            return;
        };
        let now = Utc::now();
        let expired = |e: &Arc<PendingInner>| {
            !e.completion.is_settled()
                && (now - e.created_at)
                    .to_std()
                    .is_ok_and(|age| age > limit)
        };
        for e in state.visible.iter().filter(|e| expired(*e)) {
            let id_str = e.id().to_string();
            warn!("overlay hiding expired pending entry {id_str}", id_str: id_str);
        }
        state.visible.retain(|e| !expired(e));
    }

    /// Retire placeholders under `parent` whose writes now appear among
    /// `listed`, including ones no longer visible.
    pub(crate) fn retire_observed(&self, parent: &EntryId, listed: &[EntryId]) {
        let mut state = self.state();
        let observed: Vec<EntryId> = state
            .lineage
            .iter()
            .filter(|e| e.parent.id == *parent && Self::is_head(&state, e))
            .map(|e| e.id())
            .filter(|id| listed.contains(id))
            .collect();
        for id in observed {
            Self::remove(&mut state, &id);
        }
    }

    /// No tracked placeholder supersedes `entry`.
    fn is_head(state: &State, entry: &Arc<PendingInner>) -> bool {
        let id = entry.id();
        !state
            .lineage
            .iter()
            .any(|e| e.replaced_id().as_ref() == Some(&id))
    }

    /// Return the placeholder standing for (parent, name) or register the
    /// one produced by `build`, atomically. Hidden placeholders whose writes
    /// have not failed still hold their name. `since` is the
    /// [`Self::generation`] seen before the caller found no stored entry
    /// with this name.
    pub(crate) fn claim_name<F>(&self, parent: &EntryId, name: &str, since: u64, build: F) -> Claim
    where
        F: FnOnce() -> Arc<PendingInner>,
    {
        let mut state = self.state();
        let holds = |e: &&Arc<PendingInner>| e.parent.id == *parent && e.name == name;
        let existing = state.visible.iter().rev().find(holds).cloned().or_else(|| {
            state
                .lineage
                .iter()
                .rev()
                .filter(holds)
                .filter(|e| !matches!(e.completion.peek(), Some(Err(_))))
                .find(|e| Self::is_head(&state, e))
                .cloned()
        });
        if let Some(existing) = existing {
            return Claim::Existing(existing);
        }
        if state.generation != since {
            return Claim::Stale;
        }
        let entry = build();
        Self::insert(&mut state, entry.clone());
        Claim::Registered(entry)
    }

    /// Find the newest placeholder in the version chain starting at `base`
    /// and register the placeholder `build` makes from it, atomically.
    pub(crate) fn chain_version<F>(&self, base: &EntryId, build: F) -> Arc<PendingInner>
    where
        F: FnOnce(Option<&Arc<PendingInner>>) -> Arc<PendingInner>,
    {
        let mut state = self.state();
        let head = Self::head_of(&state, base);
        Self::chain(&mut state, head, build)
    }

    /// Like [`Self::chain_version`] for a `base` taken from a listing made
    /// after [`Self::generation`] returned `since`. If nothing is chained
    /// onto `base` and placeholders were retired in the meantime, `base` may
    /// have been superseded and `None` is returned.
    pub(crate) fn chain_listed_version<F>(
        &self,
        base: &EntryId,
        since: u64,
        build: F,
    ) -> Option<Arc<PendingInner>>
    where
        F: FnOnce(Option<&Arc<PendingInner>>) -> Arc<PendingInner>,
    {
        let mut state = self.state();
        let head = Self::head_of(&state, base);
        if head.is_none() && state.generation != since {
            return None;
        }
        Some(Self::chain(&mut state, head, build))
    }

    fn chain<F>(state: &mut State, head: Option<Arc<PendingInner>>, build: F) -> Arc<PendingInner>
    where
        F: FnOnce(Option<&Arc<PendingInner>>) -> Arc<PendingInner>,
    {
        let entry = build(head.as_ref());
        Self::insert(state, entry.clone());
        entry
    }

    fn head_of(state: &State, base: &EntryId) -> Option<Arc<PendingInner>> {
        let mut cursor = base.clone();
        let mut head = None;
        // Each step moves one version forward; the chain cannot be longer
        // than the lineage itself.
        for _ in 0..=state.lineage.len() {
            let next = state
                .lineage
                .iter()
                .rev()
                .find(|e| e.replaced_id().as_ref() == Some(&cursor));
            match next {
                Some(e) => {
                    cursor = e.id();
                    head = Some(e.clone());
                }
                None => break,
            }
        }
        head
    }

    #[cfg(test)]
    pub(crate) fn visible_len(&self) -> usize {
        self.state().visible.len()
    }

    #[cfg(test)]
    pub(crate) fn lineage_len(&self) -> usize {
        self.state().lineage.len()
    }
}
