// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Compile-time registry of batch types.
//!
//! Each marker ties a [`BatchType`] to its executor, so
//! `manager.add_to_batch::<kind::VectorUpsert>(..)` only accepts an
//! [`UpsertRequest`](crate::batching::UpsertRequest).

use super::RateLimitedBatchManager;
use crate::batching::{
    BatchExecutor, BatchProcessor, BatchType, EmbedExecutor, VectorDeleteExecutor,
    VectorUpsertExecutor,
};

mod sealed {
    pub trait Sealed {}
}

/// A batch type the manager knows how to route.
pub trait BatchKind: sealed::Sealed {
    const TYPE: BatchType;
    type Executor: BatchExecutor;

    #[doc(hidden)]
    fn processor(manager: &RateLimitedBatchManager) -> &BatchProcessor<Self::Executor>;
}

pub type BatchInput<K> = <<K as BatchKind>::Executor as BatchExecutor>::Input;
pub type BatchOutput<K> = <<K as BatchKind>::Executor as BatchExecutor>::Output;

/// Texts to embedding vectors.
pub enum Embed {}

/// Vectors into a tenant namespace.
pub enum VectorUpsert {}

/// Vector ids out of a tenant namespace.
pub enum VectorDelete {}

impl sealed::Sealed for Embed {}
impl sealed::Sealed for VectorUpsert {}
impl sealed::Sealed for VectorDelete {}

impl BatchKind for Embed {
    const TYPE: BatchType = BatchType::Embed;
    type Executor = EmbedExecutor;

    fn processor(manager: &RateLimitedBatchManager) -> &BatchProcessor<EmbedExecutor> {
        manager.embed_processor()
    }
}

impl BatchKind for VectorUpsert {
    const TYPE: BatchType = BatchType::VectorUpsert;
    type Executor = VectorUpsertExecutor;

    fn processor(manager: &RateLimitedBatchManager) -> &BatchProcessor<VectorUpsertExecutor> {
        manager.upsert_processor()
    }
}

impl BatchKind for VectorDelete {
    const TYPE: BatchType = BatchType::VectorDelete;
    type Executor = VectorDeleteExecutor;

    fn processor(manager: &RateLimitedBatchManager) -> &BatchProcessor<VectorDeleteExecutor> {
        manager.delete_processor()
    }
}
