// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Priority-ordered batch processor.
//!
//! One [`BatchProcessor`] per batch type. Callers hand it single operations
//! and get back a [`BatchTicket`] that resolves once the batch containing
//! the operation has executed.
//!
//! ```text
//!   add(op) ──► queue (sorted by priority, then arrival)
//!                 │
//!                 ├─ len ≥ batch size or HIGH queued ──► flush now
//!                 └─ otherwise ──► timer: min(now + flush_interval,
//!                                            oldest + max_wait)
//!
//!   flush: take prefix ─► executor ─► settle each ticket exactly once
//! ```
//!
//! Flushes are coalesced: while one drain is running, further triggers
//! are folded into it. At most `concurrent_batches` batches execute at once.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use storefront_sync::batching::{BatchError, BatchExecutor, BatchProcessor, BatchType};
//! use storefront_sync::config::BatchTypeConfig;
//! use storefront_sync::BatchOptions;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl BatchExecutor for Echo {
//!     type Input = u32;
//!     type Output = u32;
//!
//!     fn batch_type(&self) -> BatchType { BatchType::VectorDelete }
//!
//!     async fn execute(&self, inputs: Vec<u32>) -> Result<Vec<Result<u32, BatchError>>, BatchError> {
//!         Ok(inputs.into_iter().map(Ok).collect())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let processor = BatchProcessor::new(BatchTypeConfig::default(), Echo);
//! let ticket = processor.add(7, BatchOptions::high());
//! assert_eq!(ticket.await, Ok(7));
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::executor::{BatchError, BatchExecutor, BatchOutcome, BatchType};
use crate::config::BatchTypeConfig;
use crate::options::{BatchOptions, Priority};

/// Batch flush trigger reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Flush interval or max wait elapsed
    Time,
    /// Queue reached the effective batch size
    Size,
    /// A high-priority operation is queued
    Priority,
    /// Manual flush requested
    Manual,
    /// Shutdown flush
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Size => "size",
            Self::Priority => "priority",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }

    fn is_forced(self) -> bool {
        matches!(self, Self::Manual | Self::Shutdown)
    }

    /// Combine two pending triggers, keeping the one that flushes more.
    fn merge(self, other: Self) -> Self {
        if self.is_forced() {
            self
        } else if other.is_forced() || self == Self::Time {
            other
        } else {
            self
        }
    }
}

/// Resolves to the result of one batched operation.
pub struct BatchTicket<O> {
    rx: oneshot::Receiver<Result<O, BatchError>>,
}

impl<O> BatchTicket<O> {
    /// A ticket that is already settled with `err`.
    pub(crate) fn rejected(err: BatchError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl<O> Future for BatchTicket<O> {
    type Output = Result<O, BatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or_else(|_| Err(BatchError::Dropped)))
    }
}

struct PendingOp<I, O> {
    input: I,
    priority: Priority,
    seq: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<Result<O, BatchError>>,
}

impl<I, O> PendingOp<I, O> {
    fn key(&self) -> (Priority, u64) {
        (self.priority, self.seq)
    }
}

struct QueueState<I, O> {
    /// Sorted by (priority, seq)
    queue: Vec<PendingOp<I, O>>,
    next_seq: u64,
    draining: bool,
    /// Triggers that arrived while a drain was running
    coalesced: Option<FlushReason>,
    timer_generation: u64,
}

impl<I, O> QueueState<I, O> {
    fn has_high(&self) -> bool {
        self.queue.first().is_some_and(|op| op.priority == Priority::High)
    }

    fn oldest(&self) -> Option<Instant> {
        self.queue.iter().map(|op| op.enqueued_at).min()
    }
}

type StateOf<E> = QueueState<<E as BatchExecutor>::Input, <E as BatchExecutor>::Output>;
type OpOf<E> = PendingOp<<E as BatchExecutor>::Input, <E as BatchExecutor>::Output>;

enum Step<T> {
    Dispatch(Vec<T>),
    Retry(FlushReason),
    Stop,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    exec_micros: AtomicU64,
    in_flight: AtomicUsize,
}

/// Point-in-time counters for one processor.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub batch_type: BatchType,
    pub queue_depth: usize,
    pub in_flight_batches: usize,
    pub batches_executed: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub avg_execution_ms: f64,
    pub effective_batch_size: usize,
}

struct Shared<E: BatchExecutor> {
    batch_type: BatchType,
    config: BatchTypeConfig,
    executor: Arc<E>,
    state: Mutex<StateOf<E>>,
    slots: Arc<Semaphore>,
    effective_size: AtomicUsize,
    counters: Counters,
}

/// Queue plus executor for one batch type.
pub struct BatchProcessor<E: BatchExecutor> {
    shared: Arc<Shared<E>>,
}

impl<E: BatchExecutor> Clone for BatchProcessor<E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<E: BatchExecutor> BatchProcessor<E> {
    #[must_use]
    pub fn new(config: BatchTypeConfig, executor: E) -> Self {
        Self::with_executor(config, Arc::new(executor))
    }

    #[must_use]
    pub fn with_executor(mut config: BatchTypeConfig, executor: Arc<E>) -> Self {
        config.max_batch_size = config.max_batch_size.max(1);
        config.min_batch_size = config.min_batch_size.clamp(1, config.max_batch_size);
        config.concurrent_batches = config.concurrent_batches.max(1);

        let batch_type = executor.batch_type();
        crate::metrics::set_effective_batch_size(batch_type.as_str(), config.max_batch_size);

        Self {
            shared: Arc::new(Shared {
                batch_type,
                slots: Arc::new(Semaphore::new(config.concurrent_batches)),
                effective_size: AtomicUsize::new(config.max_batch_size),
                config,
                executor,
                state: Mutex::new(QueueState {
                    queue: Vec::new(),
                    next_seq: 0,
                    draining: false,
                    coalesced: None,
                    timer_generation: 0,
                }),
                counters: Counters::default(),
            }),
        }
    }

    #[must_use]
    pub fn batch_type(&self) -> BatchType {
        self.shared.batch_type
    }

    #[must_use]
    pub fn config(&self) -> &BatchTypeConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.shared.effective_size()
    }

    /// Enqueue one operation.
    ///
    /// The operation is queued before this returns; the ticket resolves
    /// once its batch has executed. Dropping the ticket does not cancel the
    /// operation. Must be called from within a Tokio runtime.
    pub fn add(&self, input: E::Input, options: BatchOptions) -> BatchTicket<E::Output> {
        let (tx, rx) = oneshot::channel();
        let shared = &self.shared;

        let trigger = {
            let mut st = shared.state.lock();
            let seq = st.next_seq;
            st.next_seq += 1;

            let op = PendingOp {
                input,
                priority: options.priority,
                seq,
                enqueued_at: Instant::now(),
                tx,
            };
            let key = op.key();
            let pos = st.queue.partition_point(|queued| queued.key() < key);
            st.queue.insert(pos, op);
            crate::metrics::set_batch_queue_depth(shared.batch_type.as_str(), st.queue.len());

            if st.has_high() {
                Some(FlushReason::Priority)
            } else if st.queue.len() >= shared.effective_size() {
                Some(FlushReason::Size)
            } else {
                shared.arm_timer(&mut st);
                None
            }
        };

        if let Some(reason) = trigger {
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                // Let the caller finish enqueueing its current burst first
                tokio::task::yield_now().await;
                shared.drain(reason).await;
            });
        }

        BatchTicket { rx }
    }

    /// Execute everything queued, regardless of size or age, and wait until
    /// no batch of this type is queued or executing.
    pub async fn flush_all(&self) {
        self.flush_with(FlushReason::Manual).await;
    }

    pub(crate) async fn shutdown(&self) {
        self.flush_with(FlushReason::Shutdown).await;
    }

    async fn flush_with(&self, reason: FlushReason) {
        let permits = u32::try_from(self.shared.config.concurrent_batches).unwrap_or(u32::MAX);
        loop {
            Arc::clone(&self.shared).drain(reason).await;

            // Holding every slot means nothing is executing
            let Ok(idle) = self.shared.slots.acquire_many(permits).await else {
                return;
            };
            let settled = {
                let st = self.shared.state.lock();
                st.queue.is_empty() && !st.draining
            };
            drop(idle);
            if settled {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        let c = &self.shared.counters;
        let batches = c.batches.load(Ordering::Relaxed);
        let avg_execution_ms = if batches == 0 {
            0.0
        } else {
            c.exec_micros.load(Ordering::Relaxed) as f64 / batches as f64 / 1000.0
        };
        BatchStats {
            batch_type: self.shared.batch_type,
            queue_depth: self.queue_len(),
            in_flight_batches: c.in_flight.load(Ordering::Relaxed),
            batches_executed: batches,
            operations_succeeded: c.succeeded.load(Ordering::Relaxed),
            operations_failed: c.failed.load(Ordering::Relaxed),
            avg_execution_ms,
            effective_batch_size: self.shared.effective_size(),
        }
    }
}

impl<E: BatchExecutor> Shared<E> {
    fn effective_size(&self) -> usize {
        self.effective_size.load(Ordering::Acquire)
    }

    fn wants_flush(&self, st: &StateOf<E>, reason: FlushReason, now: Instant) -> bool {
        if st.queue.is_empty() {
            return false;
        }
        match reason {
            FlushReason::Manual | FlushReason::Shutdown => true,
            FlushReason::Size | FlushReason::Priority => {
                st.queue.len() >= self.effective_size() || st.has_high()
            }
            FlushReason::Time => {
                st.queue.len() >= self.config.min_batch_size
                    || st
                        .oldest()
                        .is_some_and(|t| now.saturating_duration_since(t) >= self.config.max_wait())
            }
        }
    }

    /// Replace any pending timer with one at
    /// `min(now + flush_interval, oldest + max_wait)`.
    fn arm_timer(self: &Arc<Self>, st: &mut StateOf<E>) {
        let Some(oldest) = st.oldest() else {
            return;
        };
        st.timer_generation += 1;
        let generation = st.timer_generation;
        let deadline =
            (Instant::now() + self.config.flush_interval()).min(oldest + self.config.max_wait());

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_timer(generation).await;
            }
        });
    }

    async fn on_timer(self: Arc<Self>, generation: u64) {
        {
            let mut st = self.state.lock();
            if st.timer_generation != generation || st.queue.is_empty() {
                return;
            }
            if !self.wants_flush(&st, FlushReason::Time, Instant::now()) {
                // Below min batch size and nothing has waited long enough
                self.arm_timer(&mut st);
                return;
            }
        }
        self.drain(FlushReason::Time).await;
    }

    /// Single-flight drain: dispatch batches while the trigger still holds,
    /// then fall back to the timer for whatever remains.
    async fn drain(self: Arc<Self>, reason: FlushReason) {
        {
            let mut st = self.state.lock();
            if st.draining {
                st.coalesced = Some(st.coalesced.map_or(reason, |r| r.merge(reason)));
                return;
            }
            st.draining = true;
        }

        let mut reason = reason;
        loop {
            let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
                self.state.lock().draining = false;
                return;
            };

            let step = {
                let mut st = self.state.lock();
                if self.wants_flush(&st, reason, Instant::now()) {
                    let take = self.effective_size().min(st.queue.len());
                    let batch: Vec<OpOf<E>> = st.queue.drain(..take).collect();
                    crate::metrics::set_batch_queue_depth(self.batch_type.as_str(), st.queue.len());
                    Step::Dispatch(batch)
                } else if let Some(next) = st.coalesced.take() {
                    Step::Retry(next)
                } else {
                    st.draining = false;
                    if !st.queue.is_empty() {
                        self.arm_timer(&mut st);
                    }
                    Step::Stop
                }
            };

            match step {
                Step::Dispatch(batch) => {
                    debug!(
                        batch_type = %self.batch_type,
                        size = batch.len(),
                        reason = reason.as_str(),
                        "Flushing batch"
                    );
                    crate::metrics::record_batch_flush(self.batch_type.as_str(), reason.as_str());
                    self.dispatch(batch, permit);
                }
                Step::Retry(next) => reason = next,
                Step::Stop => return,
            }
        }
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<OpOf<E>>, permit: OwnedSemaphorePermit) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            shared.run_batch(batch).await;
        });
    }

    async fn run_batch(&self, batch: Vec<OpOf<E>>) {
        let batch_size = batch.len();
        let mut inputs = Vec::with_capacity(batch_size);
        let mut settlers = Vec::with_capacity(batch_size);
        for op in batch {
            inputs.push(op.input);
            settlers.push(op.tx);
        }

        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let executor = Arc::clone(&self.executor);
        // Separate task so a panicking executor rejects its batch instead of
        // leaving tickets unsettled
        let executed = match tokio::spawn(async move { executor.execute(inputs).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(BatchError::Executor(format!("executor panicked: {join_err}"))),
        };
        let execution_time = started.elapsed();
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        let results = match executed {
            Ok(mut results) => {
                if results.len() != batch_size {
                    warn!(
                        batch_type = %self.batch_type,
                        expected = batch_size,
                        returned = results.len(),
                        "Executor result count mismatch"
                    );
                }
                results.truncate(batch_size);
                results.resize_with(batch_size, || Err(BatchError::Missing));
                results
            }
            Err(e) => {
                warn!(batch_type = %self.batch_type, size = batch_size, error = %e, "Batch failed");
                (0..batch_size).map(|_| Err(e.clone())).collect()
            }
        };
        let outcome = BatchOutcome { results, execution_time, batch_size };

        let failed = outcome.errors().len();
        let succeeded = batch_size - failed;
        let c = &self.counters;
        c.batches.fetch_add(1, Ordering::Relaxed);
        c.succeeded.fetch_add(succeeded as u64, Ordering::Relaxed);
        c.failed.fetch_add(failed as u64, Ordering::Relaxed);
        c.exec_micros.fetch_add(
            u64::try_from(execution_time.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        crate::metrics::record_batch_executed(
            self.batch_type.as_str(),
            batch_size,
            failed,
            execution_time,
        );
        self.adapt(failed > 0, execution_time, batch_size);

        for (tx, result) in settlers.into_iter().zip(outcome.results) {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(result);
        }
    }

    /// Shrink by a quarter after a slow or failing batch, grow by a tenth
    /// after a fast full one, within `[min_batch_size, max_batch_size]`.
    fn adapt(&self, failed: bool, elapsed: Duration, batch_size: usize) {
        if !self.config.adaptive_sizing {
            return;
        }
        let min = self.config.min_batch_size;
        let max = self.config.max_batch_size;
        let slow = elapsed > Duration::from_millis(self.config.target_latency_ms);

        let updated = self.effective_size.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let next = if failed || slow {
                (current * 3 / 4).max(min)
            } else if batch_size >= current {
                (current + (current / 10).max(1)).min(max)
            } else {
                current
            };
            (next != current).then_some(next)
        });

        if let Ok(previous) = updated {
            let now = self.effective_size();
            debug!(batch_type = %self.batch_type, previous, now, "Adjusted batch size");
            crate::metrics::set_effective_batch_size(self.batch_type.as_str(), now);
        }
    }
}
