// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stopping sessions when the process is interrupted, so their artifacts are
//! flushed even on Ctrl-C.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::profiler::SessionInner;

/// The sessions to stop on interrupt.
#[derive(Default)]
pub(crate) struct ShutdownHook {
    sessions: Mutex<Vec<Weak<SessionInner>>>,
}

static GLOBAL_HOOK: ShutdownHook = ShutdownHook::new();
static SIGNAL_HANDLER: OnceLock<()> = OnceLock::new();

impl ShutdownHook {
    pub(crate) const fn new() -> Self {
        ShutdownHook {
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn global() -> &'static ShutdownHook {
        &GLOBAL_HOOK
    }

    pub(crate) fn register(&self, session: &Arc<SessionInner>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(session));
    }

    /// Stop every registered session that is still running. Returns the
    /// number of sessions stopped by this call.
    pub(crate) fn stop_sessions(&self) -> usize {
        // upgrade outside the stop calls, so a session dropping concurrently
        // cannot deadlock on the registry
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .filter_map(|s| s.upgrade())
            .collect();
        let mut stopped = 0;
        for session in sessions {
            if session.is_stopped() {
                continue;
            }
            session.report_interrupt();
            if session.stop() {
                stopped += 1;
            }
        }
        stopped
    }
}

/// Install the process-wide interrupt handler, once.
///
/// If another handler is already installed (for example by the application),
/// sessions run without a hook.
pub(crate) fn install_signal_handler() {
    SIGNAL_HANDLER.get_or_init(|| {
        let res = ctrlc::set_handler(|| {
            let stopped = ShutdownHook::global().stop_sessions();
            tracing::info!(stopped, "caught interrupt, stopped profiling sessions");
            std::process::exit(0);
        });
        match res {
            Ok(()) => tracing::debug!("installed profiling shutdown hook"),
            Err(err) => tracing::warn!(?err, "unable to install profiling shutdown hook"),
        }
    });
}
