// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use super::{BOB, make_folder, setup, text};
use crate::events::{Change, ChangeKind};
use crate::store::StoreEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Change) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    (count, move |_: &Change| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_feed_binding_follows_listener_count() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    assert_eq!(store.binding_count(), 0);

    let (_, first) = counter();
    let (_, second) = counter();
    let a = docs.subscribe(ChangeKind::Modified, first);
    let b = docs.subscribe(ChangeKind::Modified, second);
    assert_eq!(store.binding_count(), 1);
    assert_eq!(docs.events().listener_count(), 2);
    assert!(docs.events().is_bound());

    assert!(docs.unsubscribe(a));
    assert!(!docs.unsubscribe(a));
    assert_eq!(store.binding_count(), 1);

    assert!(docs.unsubscribe(b));
    assert_eq!(store.binding_count(), 0);
    assert!(!docs.events().is_bound());
}

#[tokio::test]
async fn test_folder_sees_its_own_writes() {
    let (store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    let (count, handler) = counter();
    let id = docs.subscribe(ChangeKind::Modified, handler);

    docs.add_file("a.txt", text("one")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Nothing is reported before the write is delivered.
    store.defer_visibility(true).await;
    docs.add_file("b.txt", text("two")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    store.deliver().await;
    assert_eq!(count.load(Ordering::SeqCst), 2);

    docs.unsubscribe(id);
    docs.add_file("c.txt", text("three")).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_file_changes_bubble_to_parent() {
    let (_store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    docs.add_file("a.txt", text("one")).await.unwrap();
    // Listed through `docs`, so the file's parent link shares its handlers.
    let file = docs.child_by_name("a.txt").await.unwrap().unwrap();

    let (file_count, file_handler) = counter();
    let (docs_count, docs_handler) = counter();
    file.subscribe(ChangeKind::Modified, file_handler);
    docs.subscribe(ChangeKind::Modified, docs_handler);

    file.add_version(text("two"), None).await.unwrap();

    // Once from the file bubbling up, once from the folder itself.
    assert_eq!(file_count.load(Ordering::SeqCst), 1);
    assert_eq!(docs_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_file_ignores_unrelated_events() {
    let (_store, ns) = setup();
    let docs = make_folder(&ns, &["docs"]).await;
    docs.add_file("a.txt", text("one")).await.unwrap();
    let file = docs.child_by_name("a.txt").await.unwrap().unwrap();
    let (count, handler) = counter();
    file.subscribe(ChangeKind::Modified, handler);

    docs.add_file("b.txt", text("two")).await.unwrap();
    make_folder(&ns, &["docs", "sub"]).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    file.set_locked(true).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_root_reports_invites_separately() {
    let (store, ns) = setup();
    let (invites, invite_handler) = counter();
    let received = Arc::new(Mutex::new(Vec::new()));
    let modified = {
        let received = received.clone();
        move |change: &Change| {
            received
                .lock()
                .expect("test mutex")
                .push(change.record.clone());
        }
    };
    let invite_id = ns.subscribe(ChangeKind::Invite, invite_handler);
    let modified_id = ns.subscribe(ChangeKind::Modified, modified);
    assert_eq!(store.binding_count(), 1);

    let shared = store.inject_invite("shared", BOB).await;
    assert_eq!(invites.load(Ordering::SeqCst), 1);
    assert!(received.lock().expect("test mutex").is_empty());

    ns.accept_all_invites().await.unwrap();
    assert_eq!(
        *received.lock().expect("test mutex"),
        vec![StoreEvent::FolderCreated {
            folder: shared,
            parent: None
        }]
    );

    assert!(ns.unsubscribe(invite_id));
    assert!(ns.unsubscribe(modified_id));
    assert_eq!(store.binding_count(), 0);
}
