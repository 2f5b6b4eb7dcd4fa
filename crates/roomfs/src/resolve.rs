// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Lookups over merged listings.

use crate::entry::{Entry, ParentLink};
use crate::error::{Result, display_path};
use crate::folder;
use crate::id::EntryId;
use crate::root::Namespace;
use diagnostics::*;
use std::future::Future;
use std::pin::Pin;

pub(crate) async fn child_by_name(
    ns: &Namespace,
    link: &ParentLink,
    name: &str,
) -> Result<Option<Entry>> {
    Ok(folder::list_children(ns, link)
        .await?
        .into_iter()
        .find(|c| c.name() == name))
}

pub(crate) async fn child_by_id(
    ns: &Namespace,
    link: &ParentLink,
    id: &EntryId,
) -> Result<Option<Entry>> {
    Ok(folder::list_children(ns, link)
        .await?
        .into_iter()
        .find(|c| c.id() == *id))
}

/// Walk `segments` from the root by exact name. A file in the middle of the
/// path ends the walk with `None`.
pub(crate) async fn resolve_path<S: AsRef<str>>(
    ns: &Namespace,
    segments: &[S],
) -> Result<Option<Entry>> {
    let mut current = Entry::Root(ns.clone());
    for (depth, segment) in segments.iter().enumerate() {
        let name = segment.as_ref();
        if !current.is_folder() {
            let path = display_path(&current.path());
            debug!("resolve stopped at file {path}", path: path);
            return Ok(None);
        }
        match current.child_by_name(name).await? {
            Some(child) => current = child,
            None => {
                let path: Vec<String> = segments[..=depth]
                    .iter()
                    .map(|s| s.as_ref().to_string())
                    .collect();
                let path = display_path(&path);
                debug!("resolve found nothing at {path}", path: path);
                return Ok(None);
            }
        }
    }
    Ok(Some(current))
}

/// Look for `id` among the children of `entry`, then within each child
/// folder in listing order.
pub(crate) fn descendant_by_id<'a>(
    entry: &'a Entry,
    id: &'a EntryId,
    max_depth: Option<usize>,
) -> Pin<Box<dyn Future<Output = Result<Option<Entry>>> + Send + 'a>> {
    Box::pin(async move {
        let children = entry.children().await?;
        if let Some(found) = children.iter().find(|c| c.id() == *id) {
            return Ok(Some(found.clone()));
        }
        let remaining = match max_depth {
            Some(0) => return Ok(None),
            Some(depth) => Some(depth - 1),
            None => None,
        };
        for child in children.iter().filter(|c| c.is_folder()) {
            if let Some(found) = descendant_by_id(child, id, remaining).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    })
}
