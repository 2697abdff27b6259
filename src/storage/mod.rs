// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache and store tier backends.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  traits.rs   - CacheTier / LocationStore capabilities        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  memory.rs   - DashMap cache (with expiry) and store         │
//! │  redis.rs    - Redis cache: SET key json EX ttl              │
//! │  sql.rs      - sqlx Any store: SQLite / MySQL / PostgreSQL   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod traits;
pub mod memory;
pub mod redis;
pub mod sql;
