// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::{lookup, make_folder, names, setup, setup_with, settle, text};
use crate::config::NamespaceConfig;
use crate::entry::{Entry, ParentLink};
use crate::error::Error;
use crate::events::Subscriptions;
use crate::id::EntryId;
use crate::memory::MemoryStore;
use crate::overlay::{Claim, Overlay};
use crate::pending::{PendingInner, Replaced};
use crate::store::EncryptionStatus;
use std::sync::Arc;
use std::time::Duration;

fn link(id: &str) -> ParentLink {
    ParentLink {
        id: EntryId::from(id),
        path: vec!["docs".to_string()],
        is_root: false,
        events: Subscriptions::new(Arc::new(MemoryStore::new(super::ALICE))),
    }
}

fn pending_file(name: &str, parent: &ParentLink) -> Arc<PendingInner> {
    PendingInner::new_file(
        name,
        parent.clone(),
        text("x"),
        EncryptionStatus::EncryptionNotEnabled,
        super::ALICE.to_string(),
    )
}

#[test]
fn test_register_twice_is_deduplicated() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let entry = pending_file("a.txt", &docs);

    overlay.register(entry.clone());
    overlay.register(entry.clone());

    assert_eq!(overlay.list_for(&docs.id).len(), 1);
    assert!(overlay.list_for(&EntryId::from("!other")).is_empty());
}

#[test]
fn test_replacement_supersedes_previous_pending() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let first = pending_file("a.txt", &docs);
    overlay.register(first.clone());

    let second = PendingInner::new_version(
        "a.txt".to_string(),
        docs.clone(),
        Replaced::Pending(first.clone()),
        2,
        text("y"),
        EncryptionStatus::EncryptionNotEnabled,
        super::ALICE.to_string(),
    );
    overlay.register(second.clone());

    let visible = overlay.list_for(&docs.id);
    assert_eq!(visible.len(), 1);
    assert!(Arc::ptr_eq(&visible[0], &second));
    assert_eq!(second.replaced_chain(), vec![first.id()]);
    assert_eq!(overlay.lineage_len(), 2);

    overlay.clear(&second.id());
    assert_eq!(overlay.visible_len(), 0);
    assert_eq!(overlay.lineage_len(), 0);
}

#[test]
fn test_clear_is_idempotent() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let entry = pending_file("a.txt", &docs);
    overlay.register(entry.clone());

    overlay.clear(&entry.id());
    overlay.clear(&entry.id());
    overlay.clear(&EntryId::from("$never"));

    assert_eq!(overlay.visible_len(), 0);
}

#[test]
fn test_claim_name_routes_second_writer_to_existing_entry() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let since = overlay.generation();

    let first = match overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)) {
        Claim::Registered(entry) => entry,
        _ => panic!("nothing was registered yet"),
    };
    match overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)) {
        Claim::Existing(entry) => assert!(Arc::ptr_eq(&entry, &first)),
        _ => panic!("second claim must reuse the first entry"),
    }
    assert_eq!(overlay.visible_len(), 1);
}

#[test]
fn test_claim_after_retirement_is_stale() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let other = pending_file("b.txt", &docs);
    overlay.register(other.clone());
    let since = overlay.generation();

    overlay.clear(&EntryId::from("$never"));
    assert_eq!(overlay.generation(), since);
    overlay.clear(&other.id());
    assert!(matches!(
        overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)),
        Claim::Stale
    ));
    assert_eq!(overlay.visible_len(), 0);

    let since = overlay.generation();
    assert!(matches!(
        overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)),
        Claim::Registered(_)
    ));
}

#[test]
fn test_expired_entry_still_holds_its_name() {
    let overlay = Overlay::new(Some(Duration::ZERO));
    let docs = link("!docs");
    let since = overlay.generation();
    let first = match overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)) {
        Claim::Registered(entry) => entry,
        _ => panic!("nothing was registered yet"),
    };
    std::thread::sleep(Duration::from_millis(2));

    assert!(overlay.list_for(&docs.id).is_empty());
    assert_eq!(overlay.lineage_len(), 1);
    match overlay.claim_name(&docs.id, "a.txt", since, || pending_file("a.txt", &docs)) {
        Claim::Existing(entry) => assert!(Arc::ptr_eq(&entry, &first)),
        _ => panic!("a hidden write still holds the name"),
    }

    // A failed write gives the name up.
    first.completion.fail(Error::transient("lost"));
    overlay.abandon(&first);
    assert_eq!(overlay.lineage_len(), 0);
}

#[test]
fn test_chain_version_finds_newest_head() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let base = EntryId::from("$v1");

    let build = |head: Option<&Arc<PendingInner>>| {
        let (replaces, version) = match head {
            Some(h) => (Replaced::Pending(h.clone()), h.version() + 1),
            None => (Replaced::Stored(EntryId::from("$v1")), 2),
        };
        PendingInner::new_version(
            "a.txt".to_string(),
            docs.clone(),
            replaces,
            version,
            text("v"),
            EncryptionStatus::EncryptionNotEnabled,
            super::ALICE.to_string(),
        )
    };

    let v2 = overlay.chain_version(&base, build);
    let v3 = overlay.chain_version(&base, build);
    let v4 = overlay.chain_version(&base, build);

    assert_eq!(v2.version(), 2);
    assert_eq!(v3.version(), 3);
    assert_eq!(v4.version(), 4);
    assert_eq!(v4.replaced_chain(), vec![v3.id(), v2.id(), base.clone()]);
    assert_eq!(overlay.list_for(&docs.id).len(), 1);
}

#[test]
fn test_listed_base_is_refused_after_retirement() {
    let overlay = Overlay::default();
    let docs = link("!docs");
    let stored = EntryId::from("$v1");
    let build = |_: Option<&Arc<PendingInner>>| {
        PendingInner::new_version(
            "a.txt".to_string(),
            docs.clone(),
            Replaced::Stored(EntryId::from("$v1")),
            2,
            text("v"),
            EncryptionStatus::EncryptionNotEnabled,
            super::ALICE.to_string(),
        )
    };
    let since = overlay.generation();
    let other = pending_file("b.txt", &docs);
    overlay.register(other.clone());
    overlay.clear(&other.id());

    assert!(overlay.chain_listed_version(&stored, since, build).is_none());
    assert_eq!(overlay.lineage_len(), 0);

    let v2 = overlay
        .chain_listed_version(&stored, overlay.generation(), build)
        .unwrap();
    // Once something is chained onto the base, the chain is authoritative.
    let v3 = overlay.chain_listed_version(&stored, since, |head| {
        let head = head.unwrap();
        PendingInner::new_version(
            head.name.clone(),
            docs.clone(),
            Replaced::Pending(head.clone()),
            head.version() + 1,
            text("w"),
            EncryptionStatus::EncryptionNotEnabled,
            super::ALICE.to_string(),
        )
    });
    assert_eq!(v3.unwrap().replaced_chain(), vec![v2.id(), stored]);
}

#[tokio::test]
async fn test_pending_entry_merges_until_observed() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    store.defer_visibility(true).await;

    let id = docs.add_file("a.txt", text("one")).await.unwrap();

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let Entry::Pending(pending) = &children[0] else {
        panic!("expected a pending entry, got {:?}", children[0]);
    };
    assert!(pending.is_sent());
    assert_eq!(pending.id(), id);
    assert_eq!(pending.version(), 1);
    assert_eq!(pending.blob().unwrap(), text("one"));

    store.deliver().await;

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(matches!(&children[0], Entry::File(f) if *f.id() == id));
    assert_eq!(ns.overlay().visible_len(), 0);
}

#[tokio::test]
async fn test_unsent_entry_is_listed_while_write_is_in_flight() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    store.pause_writes();

    let task = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("one")).await })
    };
    settle(|| ns.overlay().visible_len() == 1).await;

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let pending = children[0].as_pending().unwrap();
    assert!(!pending.is_sent());
    assert!(pending.id().is_pending());
    assert_eq!(pending.path(), vec!["docs".to_string(), "a.txt".to_string()]);

    store.resume_writes();
    let id = task.await.unwrap().unwrap();
    assert_eq!(pending.sent().await.unwrap(), id);
    assert_eq!(names(&docs).await, vec!["a.txt"]);
    assert!(docs.children().await.unwrap()[0].as_file().is_some());
}

#[tokio::test]
async fn test_concurrent_adds_of_distinct_names_never_duplicate() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    store.defer_visibility(true).await;

    let (a, b, c) = tokio::join!(
        docs.add_file("a.txt", text("a")),
        docs.add_file("b.txt", text("b")),
        docs.add_file("c.txt", text("c")),
    );
    let ids = [a.unwrap(), b.unwrap(), c.unwrap()];

    assert_eq!(names(&docs).await, vec!["a.txt", "b.txt", "c.txt"]);

    // Once delivered, no write may show up twice.
    store.defer_visibility(false).await;
    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| !c.is_pending()));
    let mut listed: Vec<EntryId> = children.iter().map(Entry::id).collect();
    listed.sort();
    let mut expected = ids.to_vec();
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn test_concurrent_adds_of_same_name_become_versions() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    store.pause_writes();

    let first = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("one")).await })
    };
    settle(|| ns.overlay().visible_len() == 1).await;
    let second = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("two")).await })
    };
    settle(|| ns.overlay().lineage_len() == 2).await;

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].as_pending().unwrap().version(), 2);

    store.resume_writes();
    let v1 = first.await.unwrap().unwrap();
    let v2 = second.await.unwrap().unwrap();
    assert_ne!(v1, v2);

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let file = children[0].as_file().unwrap();
    assert_eq!(file.id(), &v2);
    assert_eq!(file.version(), 2);
    assert_eq!(file.replaces(), Some(&v1));
}

#[tokio::test]
async fn test_failed_write_clears_its_pending_entry() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    store.fail_next_writes(1).await;

    let err = docs.add_file("a.txt", text("one")).await.unwrap_err();
    assert!(matches!(err, Error::Transient(_)));
    assert!(docs.children().await.unwrap().is_empty());
    assert_eq!(ns.overlay().visible_len(), 0);
    assert_eq!(ns.overlay().lineage_len(), 0);
}

#[tokio::test]
async fn test_expired_pending_entries_leave_listings() {
    let config = NamespaceConfig {
        pending_expiry: Some(Duration::from_millis(10)),
        ..NamespaceConfig::default()
    };
    let (store, ns) = setup_with(config);
    let docs = make_folder(&ns, &["docs"]).await;
    store.pause_writes();

    let task = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("one")).await })
    };
    settle(|| ns.overlay().visible_len() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(docs.children().await.unwrap().is_empty());

    // The write itself is unaffected and shows up once delivered.
    store.resume_writes();
    task.await.unwrap().unwrap();
    assert_eq!(names(&docs).await, vec!["a.txt"]);
}

fn expiring() -> NamespaceConfig {
    NamespaceConfig {
        pending_expiry: Some(Duration::from_millis(10)),
        ..NamespaceConfig::default()
    }
}

#[tokio::test]
async fn test_version_after_expiry_extends_hidden_chain() {
    let (store, ns) = setup_with(expiring());
    let docs = make_folder(&ns, &["docs"]).await;
    let v1 = docs.add_file("a.txt", text("one")).await.unwrap();
    store.pause_writes();

    let second = {
        let file = lookup(&ns, &["docs", "a.txt"]).await;
        tokio::spawn(async move { file.add_version(text("two"), None).await })
    };
    settle(|| ns.overlay().lineage_len() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The stalled version is hidden, so the stored one is listed again.
    let file = lookup(&ns, &["docs", "a.txt"]).await;
    assert_eq!(file.id(), v1);
    let third = {
        let file = file.clone();
        tokio::spawn(async move { file.add_version(text("three"), None).await })
    };
    settle(|| ns.overlay().lineage_len() == 2).await;

    store.resume_writes();
    let v2 = second.await.unwrap().unwrap();
    let v3 = third.await.unwrap().unwrap();

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let head = children[0].as_file().unwrap();
    assert_eq!(head.id(), &v3);
    assert_eq!(head.version(), 3);
    assert_eq!(head.replaces(), Some(&v2));
    assert_eq!(ns.overlay().lineage_len(), 0);
}

#[tokio::test]
async fn test_same_name_after_expiry_becomes_version() {
    let (store, ns) = setup_with(expiring());
    let docs = make_folder(&ns, &["docs"]).await;
    store.pause_writes();

    let first = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("one")).await })
    };
    settle(|| ns.overlay().visible_len() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(docs.children().await.unwrap().is_empty());

    let second = {
        let docs = docs.clone();
        tokio::spawn(async move { docs.add_file("a.txt", text("two")).await })
    };
    settle(|| ns.overlay().lineage_len() == 2).await;

    store.resume_writes();
    let v1 = first.await.unwrap().unwrap();
    let v2 = second.await.unwrap().unwrap();

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let head = children[0].as_file().unwrap();
    assert_eq!(head.id(), &v2);
    assert_eq!(head.version(), 2);
    assert_eq!(head.replaces(), Some(&v1));
    assert_eq!(store.calls("create_file").await, 1);
    assert_eq!(ns.overlay().lineage_len(), 0);
}

#[tokio::test]
async fn test_failed_version_restores_live_predecessor() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    let v1 = docs.add_file("a.txt", text("one")).await.unwrap();
    let file = lookup(&ns, &["docs", "a.txt"]).await;
    store.defer_visibility(true).await;

    let v2 = file.add_version(text("two"), None).await.unwrap();
    store.fail_next_calls("create_version", 1).await;
    let err = file.add_version(text("three"), None).await.unwrap_err();
    assert!(matches!(err, Error::Transient(_)), "{err}");

    // v2 succeeded, so it stands in for v1 again until observed.
    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let pending = children[0].as_pending().unwrap();
    assert_eq!(pending.id(), v2);
    assert_eq!(pending.version(), 2);
    assert_eq!(pending.replaces_id(), Some(v1));
    assert_eq!(pending.blob().unwrap(), text("two"));

    store.deliver().await;

    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    let head = children[0].as_file().unwrap();
    assert_eq!(head.id(), &v2);
    assert_eq!(head.version(), 2);
    assert_eq!(ns.overlay().visible_len(), 0);
    assert_eq!(ns.overlay().lineage_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_name_from_many_tasks_is_created_once() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let docs = docs.clone();
            tokio::spawn(async move { docs.add_file("a.txt", text("x")).await })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    assert_eq!(store.calls("create_file").await, 1);
    assert_eq!(store.calls("create_version").await, 15);
    let children = docs.children().await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].as_file().unwrap().version(), 16);
}
