// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

mod events;
mod overlay;

use crate::blob::Blob;
use crate::config::{NamespaceConfig, RetryConfig};
use crate::entry::Entry;
use crate::memory::MemoryStore;
use crate::root::Namespace;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const ALICE: &str = "@alice:example.org";
pub(crate) const BOB: &str = "@bob:example.org";

pub(crate) fn setup() -> (MemoryStore, Namespace) {
    setup_with(NamespaceConfig::default())
}

pub(crate) fn setup_with(config: NamespaceConfig) -> (MemoryStore, Namespace) {
    diagnostics::init_diagnostics();
    let store = MemoryStore::new(ALICE);
    let ns = Namespace::with_config(Arc::new(store.clone()), config);
    (store, ns)
}

/// Retries fast enough for tests.
pub(crate) fn quick_retry(max_times: usize) -> NamespaceConfig {
    NamespaceConfig {
        invite_retry: RetryConfig {
            max_times,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        },
        ..NamespaceConfig::default()
    }
}

pub(crate) fn text(content: &'static str) -> Blob {
    Blob::new(content, "text/plain")
}

pub(crate) async fn lookup(ns: &Namespace, path: &[&str]) -> Entry {
    ns.resolve_path(path)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no entry at {path:?}"))
}

/// Create `path` as folders and return the deepest one.
pub(crate) async fn make_folder(ns: &Namespace, path: &[&str]) -> Entry {
    ns.add_folder(path).await.unwrap();
    lookup(ns, path).await
}

/// Give spawned tasks a chance to run until `done` holds.
pub(crate) async fn settle<F: Fn() -> bool>(done: F) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("tasks did not settle");
}

pub(crate) async fn names(entry: &Entry) -> Vec<String> {
    let mut names: Vec<String> = entry
        .children()
        .await
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    names.sort();
    names
}
