// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded store of structured errors the kernel has observed.
//!
//! Modeled on `echo-app-core`'s toast queue: a fixed-capacity ring that
//! evicts the oldest entry on overflow rather than growing unbounded or
//! rejecting new entries. Recording is never fatal — see
//! [`crate::error::RelayError`]'s doc comment on best-effort paths.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

/// One recorded error observation.
#[derive(Debug, Clone)]
pub struct RecordedError {
    /// Stable identifier, monotonically increasing.
    pub id: u64,
    /// Stable error code (e.g. `"PermissionDenied"`, `"TimedOut"`).
    pub code: &'static str,
    /// Human-readable detail.
    pub detail: String,
    /// Path the error was observed on, if any.
    pub path: Option<String>,
}

/// Fixed-capacity ring of [`RecordedError`]s.
pub struct ErrorManager {
    capacity: usize,
    entries: Mutex<VecDeque<RecordedError>>,
    next_id: Mutex<u64>,
}

impl ErrorManager {
    /// Builds a store that holds at most `capacity` entries, evicting the
    /// oldest on overflow.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Records an observation, evicting the oldest entry if the store is full.
    pub fn record(&self, code: &'static str, detail: impl Into<String>, path: Option<String>) {
        let detail = detail.into();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next_id = self
            .next_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if entries.len() == self.capacity {
            entries.pop_front();
        }
        let id = *next_id;
        *next_id += 1;
        warn!(code, detail = %detail, path = ?path, "kernel recorded error");
        entries.push_back(RecordedError {
            id,
            code,
            detail,
            path,
        });
    }

    /// Returns every currently recorded error, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<RecordedError> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no errors have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
