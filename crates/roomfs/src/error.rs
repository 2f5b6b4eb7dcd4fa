// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::id::EntryId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by namespace operations and backing stores.
///
/// Lookups that merely find nothing return `Option::None` instead of
/// `NotFound`; `NotFound` is for operations that need an existing target.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Name already in use: {path}")]
    NameConflict { path: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported: cannot {op} {target}")]
    Unsupported { op: &'static str, target: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Completion already settled for {0}")]
    AlreadyResolved(EntryId),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn name_conflict<P: AsRef<[String]>>(path: P) -> Self {
        Error::NameConflict {
            path: display_path(path.as_ref()),
        }
    }

    pub fn not_found<S: AsRef<str>>(what: S) -> Self {
        Error::NotFound(what.as_ref().into())
    }

    pub fn unsupported<S: AsRef<str>>(op: &'static str, target: S) -> Self {
        Error::Unsupported {
            op,
            target: target.as_ref().into(),
        }
    }

    pub fn permission_denied<S: AsRef<str>>(what: S) -> Self {
        Error::PermissionDenied(what.as_ref().into())
    }

    pub fn transient<S: AsRef<str>>(what: S) -> Self {
        Error::Transient(what.as_ref().into())
    }

    pub fn config<S: AsRef<str>>(what: S) -> Self {
        Error::Config(what.as_ref().into())
    }

    /// Authorization failures are never retried.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }
}

impl From<serde_yaml_ng::Error> for Error {
    fn from(err: serde_yaml_ng::Error) -> Error {
        Error::Config(err.to_string())
    }
}

/// Renders a segment path as `/a/b/c` (the root is `/`).
#[must_use]
pub fn display_path(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}
