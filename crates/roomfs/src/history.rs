// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::store::{BackingStore, FileRecord};
use diagnostics::*;
use std::collections::HashSet;

/// Follow back-references from `record` to the oldest version the store can
/// still resolve. The result is oldest first and ends with `record`.
///
/// The walk stops at the first predecessor outside the store's loaded
/// window, so the history may start later than version 1.
pub(crate) async fn version_history(
    store: &dyn BackingStore,
    record: &FileRecord,
) -> Result<Vec<FileRecord>> {
    let mut chain = vec![record.clone()];
    let mut seen = HashSet::from([record.id.clone()]);
    let mut cursor = record.replaces.clone();

    while let Some(previous) = cursor {
        if !seen.insert(previous.clone()) {
            let id_str = previous.to_string();
            warn!("version history loops back to {id_str}", id_str: id_str);
            break;
        }
        match store.file_record(&record.folder, &previous).await? {
            Some(found) => {
                cursor = found.replaces.clone();
                chain.push(found);
            }
            None => {
                let id_str = previous.to_string();
                debug!("version history ends before {id_str}", id_str: id_str);
                break;
            }
        }
    }

    chain.reverse();
    Ok(chain)
}
