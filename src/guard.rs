// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Detecting overlapping profiling sessions.

use std::sync::Mutex;

/// Tracks whether a profiling session is active.
///
/// Starts out inactive. The session that flips it to active owns it and is
/// the only one that resets it when it stops.
#[derive(Debug, Default)]
pub struct SessionGuard {
    active: Mutex<bool>,
}

static GLOBAL_GUARD: SessionGuard = SessionGuard::new();

impl SessionGuard {
    /// A new, inactive guard.
    pub const fn new() -> Self {
        SessionGuard {
            active: Mutex::new(false),
        }
    }

    /// The process-wide guard used by [`crate::start`].
    pub fn global() -> &'static SessionGuard {
        &GLOBAL_GUARD
    }

    /// Mark the guard active. Returns `true` if this call claimed it, `false`
    /// if a session was already active.
    pub fn try_claim(&self) -> bool {
        let mut active = self.lock();
        if *active {
            false
        } else {
            *active = true;
            true
        }
    }

    /// Mark the guard inactive.
    pub fn release(&self) {
        *self.lock() = false;
    }

    /// Whether a session currently holds the guard.
    pub fn is_active(&self) -> bool {
        *self.lock()
    }

    // a bool cannot be left half-written, so a poisoned lock is still usable
    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
