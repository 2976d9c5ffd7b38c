// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Human-readable status lines, written to stderr unless the session is quiet.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// The prefix of every status line.
pub const STATUS_PREFIX: &str = "profile: ";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes `profile: ...` lines to a sink.
#[derive(Clone)]
pub struct StatusReporter {
    sink: Sink,
    quiet: bool,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

impl StatusReporter {
    /// A reporter writing to stderr.
    pub fn stderr(quiet: bool) -> Self {
        Self::new(io::stderr(), quiet)
    }

    /// A reporter writing to `sink`.
    pub fn new(sink: impl Write + Send + 'static, quiet: bool) -> Self {
        StatusReporter {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            quiet,
        }
    }

    /// Whether this reporter drops every line.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Write one status line, unless quiet.
    pub fn report(&self, message: fmt::Arguments<'_>) {
        if self.quiet {
            return;
        }
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let res = writeln!(sink, "{STATUS_PREFIX}{message}").and_then(|()| sink.flush());
        if let Err(err) = res {
            tracing::debug!(?err, "unable to write status line");
        }
    }
}
