// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration of a profiling session.
//!
//! A session is configured by an ordered list of [`ProfileOption`]s, or by the
//! equivalent calls on [`ProfilerBuilder`]. Options are applied in order. The
//! options selecting a [`ProfileKind`] are mutually exclusive: when several
//! are given, the last one wins. All other options accumulate.
//!
//! ```
//! # use async_profiler_session::options::{ProfileKind, ProfileOption, ProfilerBuilder};
//! let config = ProfilerBuilder::default()
//!     .with_options([ProfileOption::BlockProfile, ProfileOption::Quiet])
//!     .with_mem_profile_rate(2048)
//!     .build();
//! assert_eq!(config.kind(), ProfileKind::Mem);
//! assert_eq!(config.mem_profile_rate(), 2048);
//! assert!(config.quiet());
//! ```

use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The sampling interval, in bytes, used for memory profiling when no
/// [`ProfileOption::MemProfileRate`] is given.
pub const DEFAULT_MEM_PROFILE_RATE: u32 = 4096;

/// The kind of data a session collects. Exactly one kind is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// CPU time samples.
    #[default]
    Cpu,
    /// Sampled native memory allocations.
    Mem,
    /// Time threads spend blocked (off-CPU, wall-clock samples).
    Block,
    /// Native lock contention.
    Mutex,
    /// An execution trace combining CPU and wall-clock samples.
    Trace,
    /// Per-thread wall-clock samples of every live thread.
    Goroutine,
}

impl ProfileKind {
    /// All profile kinds.
    pub const ALL: [ProfileKind; 6] = [
        ProfileKind::Cpu,
        ProfileKind::Mem,
        ProfileKind::Block,
        ProfileKind::Mutex,
        ProfileKind::Trace,
        ProfileKind::Goroutine,
    ];

    /// The name of the artifact file written for this kind.
    pub fn file_name(self) -> &'static str {
        match self {
            ProfileKind::Cpu => "cpu.pprof",
            ProfileKind::Mem => "mem.pprof",
            ProfileKind::Block => "block.pprof",
            ProfileKind::Mutex => "mutex.pprof",
            ProfileKind::Trace => "trace.out",
            ProfileKind::Goroutine => "goroutine.pprof",
        }
    }

    /// The human-readable label used in status lines, e.g. `cpu profiling`.
    pub fn label(self) -> &'static str {
        match self {
            ProfileKind::Cpu => "cpu profiling",
            ProfileKind::Mem => "memory profiling",
            ProfileKind::Block => "block profiling",
            ProfileKind::Mutex => "mutex profiling",
            ProfileKind::Trace => "trace",
            ProfileKind::Goroutine => "goroutine profiling",
        }
    }

    // async-profiler event selection for this kind
    fn event_args(self, mem_profile_rate: u32) -> String {
        match self {
            ProfileKind::Cpu => "event=cpu".into(),
            ProfileKind::Mem => format!("nativemem={mem_profile_rate}"),
            ProfileKind::Block => "event=wall".into(),
            ProfileKind::Mutex => "nativelock=0".into(),
            ProfileKind::Trace => "event=cpu,wall=10ms".into(),
            ProfileKind::Goroutine => "event=wall,threads".into(),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileKind::Cpu => "cpu",
            ProfileKind::Mem => "mem",
            ProfileKind::Block => "block",
            ProfileKind::Mutex => "mutex",
            ProfileKind::Trace => "trace",
            ProfileKind::Goroutine => "goroutine",
        })
    }
}

/// The error returned when parsing an unknown [`ProfileKind`] name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown profile kind {0:?}, expected one of cpu, mem, block, mutex, trace, goroutine")]
pub struct ParseProfileKindError(String);

impl FromStr for ProfileKind {
    type Err = ParseProfileKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProfileKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| ParseProfileKindError(s.to_owned()))
    }
}

impl From<ProfileKind> for ProfileOption {
    fn from(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Cpu => ProfileOption::CpuProfile,
            ProfileKind::Mem => ProfileOption::MemProfile,
            ProfileKind::Block => ProfileOption::BlockProfile,
            ProfileKind::Mutex => ProfileOption::MutexProfile,
            ProfileKind::Trace => ProfileOption::TraceProfile,
            ProfileKind::Goroutine => ProfileOption::GoroutineProfile,
        }
    }
}

/// A single configuration option.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProfileOption {
    /// Select CPU profiling. This is the default.
    CpuProfile,
    /// Select memory profiling at [`DEFAULT_MEM_PROFILE_RATE`].
    MemProfile,
    /// Select memory profiling, sampling an allocation about every `n` bytes.
    MemProfileRate(u32),
    /// Select block profiling.
    BlockProfile,
    /// Select mutex profiling.
    MutexProfile,
    /// Select execution tracing.
    TraceProfile,
    /// Select goroutine (per-thread) profiling.
    GoroutineProfile,
    /// Write the artifact into this directory instead of a temporary one.
    /// The directory is not created if missing.
    ProfilePath(PathBuf),
    /// Do not stop the session when the process is interrupted.
    NoShutdownHook,
    /// Do not write status lines to stderr.
    Quiet,
}

/// The resolved, immutable configuration of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    kind: ProfileKind,
    mem_profile_rate: u32,
    path: Option<PathBuf>,
    quiet: bool,
    no_shutdown_hook: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            kind: ProfileKind::Cpu,
            mem_profile_rate: DEFAULT_MEM_PROFILE_RATE,
            path: None,
            quiet: false,
            no_shutdown_hook: false,
        }
    }
}

impl ProfileConfig {
    /// Resolve a sequence of options, applied in order, into a configuration.
    pub fn from_options(options: impl IntoIterator<Item = ProfileOption>) -> Self {
        ProfilerBuilder::default().with_options(options).build()
    }

    /// The selected profile kind.
    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// The memory sampling interval. Only meaningful for [`ProfileKind::Mem`].
    pub fn mem_profile_rate(&self) -> u32 {
        self.mem_profile_rate
    }

    /// The explicit output directory, if one was configured.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether status lines are suppressed.
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Whether the interrupt handler is disabled.
    pub fn no_shutdown_hook(&self) -> bool {
        self.no_shutdown_hook
    }

    /// Convert the configuration to a string of arguments for the async-profiler.
    pub fn to_args_string(&self, artifact: &Path) -> String {
        format!(
            "start,{},jfr,file={}",
            self.kind.event_args(self.mem_profile_rate),
            artifact.display()
        )
    }

    fn apply(&mut self, option: ProfileOption) {
        match option {
            ProfileOption::CpuProfile => self.kind = ProfileKind::Cpu,
            ProfileOption::MemProfile => {
                self.kind = ProfileKind::Mem;
                self.mem_profile_rate = DEFAULT_MEM_PROFILE_RATE;
            }
            ProfileOption::MemProfileRate(rate) => {
                self.kind = ProfileKind::Mem;
                self.mem_profile_rate = rate;
            }
            ProfileOption::BlockProfile => self.kind = ProfileKind::Block,
            ProfileOption::MutexProfile => self.kind = ProfileKind::Mutex,
            ProfileOption::TraceProfile => self.kind = ProfileKind::Trace,
            ProfileOption::GoroutineProfile => self.kind = ProfileKind::Goroutine,
            ProfileOption::ProfilePath(path) => self.path = Some(path),
            ProfileOption::NoShutdownHook => self.no_shutdown_hook = true,
            ProfileOption::Quiet => self.quiet = true,
        }
    }
}

/// Builds a [`ProfileConfig`] by applying options in call order.
#[derive(Debug, Default, Clone)]
pub struct ProfilerBuilder {
    config: ProfileConfig,
}

impl ProfilerBuilder {
    /// Apply one option.
    pub fn with_option(mut self, option: ProfileOption) -> ProfilerBuilder {
        self.config.apply(option);
        self
    }

    /// Apply a sequence of options, in order.
    pub fn with_options(
        mut self,
        options: impl IntoIterator<Item = ProfileOption>,
    ) -> ProfilerBuilder {
        for option in options {
            self.config.apply(option);
        }
        self
    }

    /// Select CPU profiling.
    pub fn with_cpu_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::CpuProfile)
    }

    /// Select memory profiling at the default rate.
    pub fn with_mem_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::MemProfile)
    }

    /// Select memory profiling, sampling about every `rate` bytes allocated.
    pub fn with_mem_profile_rate(self, rate: u32) -> ProfilerBuilder {
        self.with_option(ProfileOption::MemProfileRate(rate))
    }

    /// Select block profiling.
    pub fn with_block_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::BlockProfile)
    }

    /// Select mutex profiling.
    pub fn with_mutex_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::MutexProfile)
    }

    /// Select execution tracing.
    pub fn with_trace_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::TraceProfile)
    }

    /// Select goroutine (per-thread) profiling.
    pub fn with_goroutine_profile(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::GoroutineProfile)
    }

    /// Write the artifact into `dir`.
    pub fn with_profile_path(self, dir: impl Into<PathBuf>) -> ProfilerBuilder {
        self.with_option(ProfileOption::ProfilePath(dir.into()))
    }

    /// Do not install the interrupt handler.
    pub fn with_no_shutdown_hook(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::NoShutdownHook)
    }

    /// Suppress status lines.
    pub fn with_quiet(self) -> ProfilerBuilder {
        self.with_option(ProfileOption::Quiet)
    }

    /// Finish building the configuration.
    pub fn build(self) -> ProfileConfig {
        self.config
    }

    /// Build the configuration and start a session with it.
    ///
    /// See [`crate::start`].
    pub fn start(self) -> Result<crate::profiler::Profile, crate::profiler::StartError> {
        self.build().start()
    }
}
