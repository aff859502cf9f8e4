// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience primitives for calls to rate-limited target systems.
//!
//! - [`circuit_breaker`]: consecutive-failure breaker with a single probe
//! - [`retry`]: backoff schedule and a startup retry loop
//! - [`rate_limiter`]: pacing + concurrency gate + breaker + retries

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
