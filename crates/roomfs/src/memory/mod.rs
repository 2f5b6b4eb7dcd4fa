// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory backing store for tests and embedding.

mod store;
mod tree;

pub use store::MemoryStore;
