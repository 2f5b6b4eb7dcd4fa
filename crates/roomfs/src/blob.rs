// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;

pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// The whole content of one file version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    mimetype: String,
}

impl Blob {
    pub fn new<D: Into<Bytes>, M: Into<String>>(data: D, mimetype: M) -> Self {
        Self {
            data: data.into(),
            mimetype: mimetype.into(),
        }
    }

    /// A blob with the generic binary MIME type.
    pub fn octets<D: Into<Bytes>>(data: D) -> Self {
        Self::new(data, DEFAULT_MIMETYPE)
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn mimetype(&self) -> &str {
        &self.mimetype
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
