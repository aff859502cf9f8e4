// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batching of homogeneous operations.
//!
//! - [`processor`]: the per-type queue, flush scheduling and settlement
//! - [`executor`]: the [`BatchExecutor`] trait a batch type plugs in
//! - [`executors`]: embedding and vector-index executors

pub mod executor;
pub mod executors;
pub mod processor;

pub use executor::{BatchError, BatchExecutor, BatchOutcome, BatchType};
pub use executors::{
    DeleteRequest, EmbedExecutor, EmbedRequest, UpsertRequest, VectorDeleteExecutor,
    VectorUpsertExecutor,
};
pub use processor::{BatchProcessor, BatchStats, BatchTicket, FlushReason};
