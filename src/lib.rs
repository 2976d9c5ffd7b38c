// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## async-profiler sessions
//! Start a profiler at the beginning of your program (or of any scope), and
//! stop it at the end, with the profile written to a file. Profiling is done by
//! [async-profiler].
//!
//! [async-profiler]: https://github.com/async-profiler/async-profiler
//!
//! ### OS/CPU Support
//!
//! This crate currently only supports Linux, on either x86-64 or aarch64.
//!
//! ### Usage
//!
//! When starting, the session [dlopen(3)]'s `libasyncProfiler.so` and returns an [`Err`] if it is not found,
//! so make sure there is a `libasyncProfiler.so` in the search path[^1].
//!
//! [^1]: the dlopen search path includes RPATH and LD_LIBRARY_PATH, but *not* the current directory to avoid current directory attacks.
//!
//! [dlopen(3)]: https://linux.die.net/man/3/dlopen
//!
//! ```no_run
//! use async_profiler_session::options::ProfileOption;
//!
//! # fn main() -> Result<(), async_profiler_session::StartError> {
//! let profile = async_profiler_session::start([ProfileOption::MemProfile])?;
//! // ... your program goes here
//! profile.stop(); // or just drop it
//! # Ok(())
//! # }
//! ```
//!
//! This prints to stderr:
//!
//! ```text
//! profile: memory profiling enabled (rate 4096), /tmp/profile1A2b3C/mem.pprof
//! profile: memory profiling disabled, /tmp/profile1A2b3C/mem.pprof
//! ```
//!
//! One kind of profile is collected per session: [`ProfileKind`]. When several
//! kind options are passed, the last one wins.
//!
//! The profile is written into, in order of preference:
//! 1. the directory given by [`ProfileOption::ProfilePath`], which must exist,
//! 2. the directory named by the `PROFILE_PATH` environment variable, created if needed,
//! 3. a new temporary directory.
//!
//! Only one session should be active at a time. A second session still
//! starts, but [`start`] reports it with [`StartError::AlreadyStarted`].
//!
//! Unless [`ProfileOption::NoShutdownHook`] is passed, sessions are stopped,
//! and their profile flushed, when the process is interrupted with Ctrl-C.
//!
//! [`ProfileOption::ProfilePath`]: options::ProfileOption::ProfilePath
//! [`ProfileOption::NoShutdownHook`]: options::ProfileOption::NoShutdownHook
//! [`ProfileKind`]: options::ProfileKind
mod asprof;
mod shutdown;

pub mod guard;
pub mod options;
pub mod path;
pub mod profiler;
pub mod status;

pub use asprof::AsProfError;
pub use profiler::{start, start_with_guard, Profile, StartError};
