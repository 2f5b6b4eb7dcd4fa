// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::id::EntryId;
use std::sync::Arc;
use tokio::sync::watch;

/// Single-assignment completion of a remote write.
///
/// Settles once, either with the id the store assigned or with the error
/// that aborted the write. Any number of tasks may wait on it, before or
/// after it settles.
#[derive(Clone, Debug)]
pub struct Completion {
    tx: Arc<watch::Sender<Option<Result<EntryId>>>>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the real id. Fails if already settled.
    pub fn resolve(&self, id: EntryId) -> Result<()> {
        self.settle(Ok(id.clone()))
            .then_some(())
            .ok_or(Error::AlreadyResolved(id))
    }

    /// Record a failure. Returns false if already settled.
    pub fn fail(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<EntryId>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(outcome);
            true
        })
    }

    /// The outcome, if settled.
    #[must_use]
    pub fn peek(&self) -> Option<Result<EntryId>> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The id the store assigned, once acknowledged.
    #[must_use]
    pub fn sent_id(&self) -> Option<EntryId> {
        match &*self.tx.borrow() {
            Some(Ok(id)) => Some(id.clone()),
            _ => None,
        }
    }

    pub async fn wait(&self) -> Result<EntryId> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| Error::transient(e.to_string()))?;
        match &*settled {
            Some(outcome) => outcome.clone(),
            None => Err(Error::transient("completion closed without outcome")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_once() {
        let c = Completion::new();
        assert!(!c.is_settled());
        c.resolve(EntryId::from("$a")).expect("first resolve");
        assert_eq!(
            c.resolve(EntryId::from("$b")),
            Err(Error::AlreadyResolved(EntryId::from("$b")))
        );
        assert!(!c.fail(Error::transient("late")));
        assert_eq!(c.wait().await, Ok(EntryId::from("$a")));
        assert_eq!(c.sent_id(), Some(EntryId::from("$a")));
    }

    #[tokio::test]
    async fn test_waiters_wake_on_resolution() {
        let c = Completion::new();
        let waiter = {
            let c = c.clone();
            tokio::spawn(async move { c.wait().await })
        };
        tokio::task::yield_now().await;
        c.resolve(EntryId::from("$real")).expect("resolve");
        let got = waiter.await.expect("join");
        assert_eq!(got, Ok(EntryId::from("$real")));
    }

    #[tokio::test]
    async fn test_failure_propagates_to_waiters() {
        let c = Completion::new();
        assert!(c.fail(Error::permission_denied("nope")));
        assert_eq!(c.wait().await, Err(Error::permission_denied("nope")));
        assert_eq!(c.sent_id(), None);
    }
}
