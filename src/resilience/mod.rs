// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup retry, circuit breakers and in-flight request deduplication.

pub mod retry;
pub mod circuit_breaker;
pub mod single_flight;
