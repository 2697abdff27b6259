// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store-backed provider: a previously fused result becomes a fresh candidate.

use std::sync::Arc;

use crate::location::{Estimate, StoredLocation};
use crate::storage::traits::{LocationStore, StorageError};

pub struct StoreProvider {
    store: Arc<dyn LocationStore>,
    weight: f64,
}

impl StoreProvider {
    pub fn new(store: Arc<dyn LocationStore>, weight: f64) -> Self {
        Self { store, weight }
    }

    /// Fetch the raw row (the pipeline needs the full confidence to decide
    /// whether it is authoritative).
    pub async fn row(&self, address: &str) -> Result<Option<StoredLocation>, StorageError> {
        self.store.lookup(address).await
    }

    /// Turn a row into a fusion candidate carrying the stored source.
    #[must_use]
    pub fn candidate(&self, row: &StoredLocation) -> Estimate {
        Estimate::from_resolved(&row.location, self.weight)
    }
}
