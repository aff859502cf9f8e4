// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator interfaces and their backends.
//!
//! | Role           | Trait            | Backends                                  |
//! |----------------|------------------|-------------------------------------------|
//! | source system  | [`SourceSystem`] | [`http::HttpSourceSystem`], memory        |
//! | primary store  | [`PrimaryStore`] | [`sql::SqlPrimaryStore`], memory          |
//! | search index   | [`SearchIndex`]  | [`redis::RedisSearchIndex`], memory       |
//! | embeddings API | [`Embedder`]     | [`http::HttpEmbedder`], memory            |

pub mod http;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;

pub use traits::{Embedder, PrimaryStore, SearchIndex, SourceSystem, StorageError};
