// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A profiling session: start a profiler, and stop it at the end of a scope.

use crate::{
    asprof::{self, AsProfError},
    guard::SessionGuard,
    options::{ProfileConfig, ProfileKind, ProfileOption},
    path::{self, OutputDir},
    shutdown::{self, ShutdownHook},
    status::StatusReporter,
};
use chrono::{DateTime, Utc};
use std::{
    ffi::OsString,
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;

pub(crate) trait ProfilerEngine: Send + Sync + 'static {
    fn init_profiler(&self) -> Result<(), AsProfError>;
    fn start_profiler(&self, artifact: &Path, config: &ProfileConfig) -> Result<(), AsProfError>;
    fn stop_profiler(&self) -> Result<(), AsProfError>;
}

/// An error starting a profiling session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartError {
    /// Another session was already active.
    ///
    /// If the new session managed to start anyway, it is carried here and can
    /// be recovered with [`StartError::into_profile`]. Dropping it stops it.
    #[error("Start() already called")]
    AlreadyStarted(Option<Box<Profile>>),
    /// The output directory could not be created.
    #[error("could not create initial output directory {}: {source}", .path.display())]
    CreateOutputDir {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The artifact file could not be created.
    #[error("could not create initial output file {}: {source}", .path.display())]
    CreateOutput {
        /// The artifact file.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The profiler could not be started.
    #[error("could not start {kind} profiler: {source}")]
    Engine {
        /// The kind that failed to start.
        kind: ProfileKind,
        /// The underlying error.
        source: AsProfError,
    },
}

impl StartError {
    /// The session that started despite the error, if any.
    pub fn into_profile(self) -> Option<Profile> {
        match self {
            StartError::AlreadyStarted(profile) => profile.map(|p| *p),
            _ => None,
        }
    }
}

/// The collaborators a session is started with.
pub(crate) struct SessionEnv {
    pub(crate) guard: &'static SessionGuard,
    pub(crate) hook: &'static ShutdownHook,
    pub(crate) install_signal_handler: bool,
    pub(crate) sink: Box<dyn Write + Send>,
    pub(crate) env_override: Option<OsString>,
}

impl SessionEnv {
    fn process() -> Self {
        SessionEnv {
            guard: SessionGuard::global(),
            hook: ShutdownHook::global(),
            install_signal_handler: true,
            sink: Box::new(io::stderr()),
            env_override: path::env_override(),
        }
    }
}

/// What a running session needs to stop.
struct Running {
    engine: Box<dyn ProfilerEngine>,
    artifact: File,
    // only set if this session claimed the guard
    guard: Option<&'static SessionGuard>,
}

pub(crate) struct SessionInner {
    kind: ProfileKind,
    artifact_path: PathBuf,
    started_at: DateTime<Utc>,
    status: StatusReporter,
    // None once stopped
    running: Mutex<Option<Running>>,
}

impl SessionInner {
    /// Stop the session. Returns `false` if it was already stopped.
    ///
    /// The lock is held for the whole stop, so a concurrent caller returns only
    /// once the artifact is flushed.
    pub(crate) fn stop(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let Some(Running {
            engine,
            artifact,
            guard,
        }) = running.take()
        else {
            return false;
        };

        let label = self.kind.label();
        if let Err(err) = engine.stop_profiler() {
            tracing::error!(?err, "unable to stop profiler");
            self.status.report(format_args!("could not stop {label}: {err}"));
        }
        if let Err(err) = artifact.sync_all() {
            tracing::warn!(?err, path = ?self.artifact_path, "unable to flush profile");
        }
        drop(artifact);
        if let Some(guard) = guard {
            guard.release();
        }

        let elapsed = Utc::now().signed_duration_since(self.started_at);
        tracing::debug!(kind = %self.kind, ?elapsed, "profiling session stopped");
        self.status.report(format_args!(
            "{label} disabled, {}",
            self.artifact_path.display()
        ));
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    pub(crate) fn report_interrupt(&self) {
        self.status.report(format_args!("caught interrupt, stopping profiles"));
    }
}

/// A running profiling session.
///
/// The session stops when [`Profile::stop`] is called, when it is dropped, or,
/// unless [`ProfileOption::NoShutdownHook`] was given, when the process is
/// interrupted. Stopping is idempotent.
pub struct Profile {
    config: ProfileConfig,
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("kind", &self.inner.kind)
            .field("artifact_path", &self.inner.artifact_path)
            .field("started_at", &self.inner.started_at)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Profile {
    /// Stop profiling and flush the artifact. Calls after the first do nothing.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the session has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// The file the profile is written to.
    pub fn artifact_path(&self) -> &Path {
        &self.inner.artifact_path
    }

    /// The profile kind being collected.
    pub fn kind(&self) -> ProfileKind {
        self.inner.kind
    }

    /// The configuration the session was started with.
    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// When profiling started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}

impl Drop for Profile {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl ProfileConfig {
    /// Start a profiling session with this configuration.
    ///
    /// See [`crate::start`].
    pub fn start(self) -> Result<Profile, StartError> {
        start_inner(self, Box::new(asprof::AsProf::builder().build()), SessionEnv::process())
    }
}

/// Start a profiling session, applying `options` in order.
///
/// Prints `profile: <kind> enabled, <path>` to stderr unless
/// [`ProfileOption::Quiet`] is given.
///
/// Only one session should be active at a time. Starting a second one still
/// starts it, but reports `profile: Start() already called` and returns
/// [`StartError::AlreadyStarted`], holding the new session if it could start.
///
/// ```no_run
/// # use async_profiler_session::options::ProfileOption;
/// # fn main() -> Result<(), async_profiler_session::StartError> {
/// let profile = async_profiler_session::start([ProfileOption::MemProfileRate(2048)])?;
/// // ... your program goes here
/// profile.stop();
/// # Ok(())
/// # }
/// ```
pub fn start(options: impl IntoIterator<Item = ProfileOption>) -> Result<Profile, StartError> {
    ProfileConfig::from_options(options).start()
}

/// Like [`start`], but checks for an already active session against `guard`
/// instead of [`SessionGuard::global`].
///
/// ```no_run
/// # use async_profiler_session::{guard::SessionGuard, options::ProfileOption};
/// static GUARD: SessionGuard = SessionGuard::new();
/// # fn main() -> Result<(), async_profiler_session::StartError> {
/// let profile = async_profiler_session::start_with_guard([ProfileOption::BlockProfile], &GUARD)?;
/// assert!(GUARD.is_active());
/// profile.stop();
/// # Ok(())
/// # }
/// ```
pub fn start_with_guard(
    options: impl IntoIterator<Item = ProfileOption>,
    guard: &'static SessionGuard,
) -> Result<Profile, StartError> {
    start_inner(
        ProfileConfig::from_options(options),
        Box::new(asprof::AsProf::builder().build()),
        SessionEnv {
            guard,
            ..SessionEnv::process()
        },
    )
}

pub(crate) fn start_inner(
    config: ProfileConfig,
    engine: Box<dyn ProfilerEngine>,
    env: SessionEnv,
) -> Result<Profile, StartError> {
    let status = StatusReporter::new(env.sink, config.quiet());

    let owns_guard = env.guard.try_claim();
    if !owns_guard {
        tracing::warn!("a profiling session is already active");
        status.report(format_args!("Start() already called"));
    }

    let (artifact_path, artifact) = match start_engine(&config, &*engine, env.env_override) {
        Ok(started) => started,
        Err(err) => {
            tracing::error!(?err, "unable to start profiling session");
            status.report(format_args!("{err}"));
            if owns_guard {
                env.guard.release();
                return Err(err);
            }
            // the failure is most likely the other session holding the profiler
            return Err(StartError::AlreadyStarted(None));
        }
    };

    let kind = config.kind();
    match kind {
        ProfileKind::Mem => status.report(format_args!(
            "{} enabled (rate {}), {}",
            kind.label(),
            config.mem_profile_rate(),
            artifact_path.display()
        )),
        _ => status.report(format_args!(
            "{} enabled, {}",
            kind.label(),
            artifact_path.display()
        )),
    }

    let inner = Arc::new(SessionInner {
        kind,
        artifact_path,
        started_at: Utc::now(),
        status,
        running: Mutex::new(Some(Running {
            engine,
            artifact,
            guard: owns_guard.then_some(env.guard),
        })),
    });

    if !config.no_shutdown_hook() {
        env.hook.register(&inner);
        if env.install_signal_handler {
            shutdown::install_signal_handler();
        }
    }

    let profile = Profile { config, inner };
    if owns_guard {
        Ok(profile)
    } else {
        Err(StartError::AlreadyStarted(Some(Box::new(profile))))
    }
}

fn start_engine(
    config: &ProfileConfig,
    engine: &dyn ProfilerEngine,
    env_override: Option<OsString>,
) -> Result<(PathBuf, File), StartError> {
    let dir = path::derive_output_dir(config.path(), env_override)?;
    let artifact_path = dir.path().join(config.kind().file_name());
    let (artifact, created) = match open_artifact(&artifact_path) {
        Ok(opened) => opened,
        Err(source) => {
            remove_output(&dir, None);
            return Err(StartError::CreateOutput {
                path: artifact_path,
                source,
            });
        }
    };

    let started = engine
        .init_profiler()
        .and_then(|()| engine.start_profiler(&artifact_path, config));
    if let Err(source) = started {
        drop(artifact);
        remove_output(&dir, created.then_some(artifact_path.as_path()));
        return Err(StartError::Engine {
            kind: config.kind(),
            source,
        });
    }
    Ok((artifact_path, artifact))
}

/// Open the artifact without truncating it: an existing file may belong to a
/// running session, and the engine truncates it when it starts writing.
/// Returns whether the file was created by this call.
fn open_artifact(path: &Path) -> io::Result<(File, bool)> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok((file, true)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Ok((OpenOptions::new().write(true).open(path)?, false))
        }
        Err(err) => Err(err),
    }
}

/// Remove what a failed start left behind: the artifact if this start created
/// it, and the directory if it was a fresh temporary one.
fn remove_output(dir: &OutputDir, created_artifact: Option<&Path>) {
    if let Some(artifact) = created_artifact {
        if let Err(err) = std::fs::remove_file(artifact) {
            tracing::warn!(?err, ?artifact, "unable to remove unused profile");
        }
    }
    if let OutputDir::Temp(dir) = dir {
        if let Err(err) = std::fs::remove_dir_all(dir) {
            tracing::warn!(?err, ?dir, "unable to remove unused output directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{self, AtomicU32};

    use test_case::test_case;

    use super::*;
    use crate::status::test::SharedBuf;

    #[derive(Default)]
    struct MockProfilerEngine {
        calls: Arc<Mutex<Vec<String>>>,
        artifact: Arc<Mutex<Option<PathBuf>>>,
        stops: Arc<AtomicU32>,
        start_error: bool,
        stop_error: bool,
    }

    impl ProfilerEngine for MockProfilerEngine {
        fn init_profiler(&self) -> Result<(), AsProfError> {
            Ok(())
        }

        fn start_profiler(
            &self,
            artifact: &Path,
            config: &ProfileConfig,
        ) -> Result<(), AsProfError> {
            self.calls
                .lock()
                .unwrap()
                .push(config.to_args_string(artifact));
            *self.artifact.lock().unwrap() = Some(artifact.to_owned());
            if self.start_error {
                return Err(AsProfError::AsyncProfilerError("boom".into()));
            }
            Ok(())
        }

        fn stop_profiler(&self) -> Result<(), AsProfError> {
            self.calls.lock().unwrap().push("stop".into());
            self.stops.fetch_add(1, atomic::Ordering::Relaxed);
            if self.stop_error {
                return Err(AsProfError::AsyncProfilerError("boom".into()));
            }
            let artifact = self.artifact.lock().unwrap().clone().unwrap();
            std::fs::write(artifact, b"PROFILE").unwrap();
            Ok(())
        }
    }

    struct TestEnv {
        buf: SharedBuf,
        guard: &'static SessionGuard,
        hook: &'static ShutdownHook,
        dir: tempfile::TempDir,
    }

    impl TestEnv {
        fn new() -> Self {
            TestEnv {
                buf: SharedBuf::default(),
                guard: Box::leak(Box::new(SessionGuard::new())),
                hook: Box::leak(Box::new(ShutdownHook::new())),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn session_env(&self) -> SessionEnv {
            SessionEnv {
                guard: self.guard,
                hook: self.hook,
                install_signal_handler: false,
                sink: Box::new(self.buf.clone()),
                env_override: Some(self.dir.path().into()),
            }
        }

        fn start(
            &self,
            options: impl IntoIterator<Item = ProfileOption>,
        ) -> Result<Profile, StartError> {
            self.start_with(options, MockProfilerEngine::default())
        }

        fn start_with(
            &self,
            options: impl IntoIterator<Item = ProfileOption>,
            engine: MockProfilerEngine,
        ) -> Result<Profile, StartError> {
            start_inner(
                ProfileConfig::from_options(options),
                Box::new(engine),
                self.session_env(),
            )
        }

        fn lines(&self) -> Vec<String> {
            self.buf.lines()
        }
    }

    #[test_case(ProfileOption::CpuProfile, "cpu profiling enabled", "cpu.pprof")]
    #[test_case(ProfileOption::MemProfile, "memory profiling enabled (rate 4096)", "mem.pprof")]
    #[test_case(ProfileOption::BlockProfile, "block profiling enabled", "block.pprof")]
    #[test_case(ProfileOption::MutexProfile, "mutex profiling enabled", "mutex.pprof")]
    #[test_case(ProfileOption::TraceProfile, "trace enabled", "trace.out")]
    #[test_case(ProfileOption::GoroutineProfile, "goroutine profiling enabled", "goroutine.pprof")]
    fn test_single_kind_status(option: ProfileOption, enabled: &str, file_name: &str) {
        let env = TestEnv::new();
        let profile = env.start([option]).unwrap();
        let artifact = env.dir.path().join(file_name);
        assert_eq!(profile.artifact_path(), artifact);
        assert_eq!(
            env.lines(),
            [format!("profile: {enabled}, {}", artifact.display())]
        );

        profile.stop();
        let lines = env.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("profile: "));
        assert!(lines[1].ends_with(&format!("disabled, {}", artifact.display())));
        assert_eq!(std::fs::read(&artifact).unwrap(), b"PROFILE");
        assert!(!env.guard.is_active());
    }

    #[test]
    fn test_default_is_cpu() {
        let env = TestEnv::new();
        let profile = env.start([]).unwrap();
        assert_eq!(profile.kind(), ProfileKind::Cpu);
        assert!(env.lines()[0].starts_with("profile: cpu profiling enabled, "));
    }

    #[test]
    fn test_mem_profile_rate() {
        let env = TestEnv::new();
        let engine = MockProfilerEngine::default();
        let calls = engine.calls.clone();
        let profile = env
            .start_with([ProfileOption::MemProfileRate(2048)], engine)
            .unwrap();
        let lines = env.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("memory profiling enabled"));
        assert!(lines[0].contains("2048"));
        assert_eq!(
            calls.lock().unwrap()[0],
            format!(
                "start,nativemem=2048,jfr,file={}",
                profile.artifact_path().display()
            )
        );
    }

    #[test]
    fn test_double_start() {
        let env = TestEnv::new();
        let first = env.start([]).unwrap();
        let err = env.start([]).unwrap_err();
        assert_eq!(err.to_string(), "Start() already called");
        let lines = env.lines();
        assert!(lines[0].contains("cpu profiling enabled"));
        assert_eq!(lines[1], "profile: Start() already called");
        assert!(lines[2].contains("cpu profiling enabled"));

        // the second session runs, but does not own the guard
        let second = err.into_profile().unwrap();
        assert!(!second.is_stopped());
        second.stop();
        assert!(env.guard.is_active());
        first.stop();
        assert!(!env.guard.is_active());
    }

    #[test]
    fn test_double_start_keeps_other_options() {
        let env = TestEnv::new();
        let explicit = tempfile::tempdir().unwrap();
        let _first = env.start([]).unwrap();
        let second = env
            .start([
                ProfileOption::ProfilePath(explicit.path().into()),
                ProfileOption::NoShutdownHook,
                ProfileOption::BlockProfile,
            ])
            .unwrap_err()
            .into_profile()
            .unwrap();
        assert_eq!(second.kind(), ProfileKind::Block);
        assert!(second.config().no_shutdown_hook());
        assert_eq!(second.artifact_path(), explicit.path().join("block.pprof"));
    }

    #[test]
    fn test_profile_path_is_a_file() {
        let env = TestEnv::new();
        let file = env.dir.path().join("README.md");
        std::fs::write(&file, b"# readme").unwrap();
        let err = env.start([ProfileOption::ProfilePath(file)]).unwrap_err();
        assert!(matches!(err, StartError::CreateOutput { .. }), "{err:?}");
        let lines = env.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("could not create initial output"));
        assert!(!env.guard.is_active());
    }

    #[test]
    fn test_env_override_under_a_file() {
        let env = TestEnv::new();
        let file = env.dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let err = start_inner(
            ProfileConfig::default(),
            Box::new(MockProfilerEngine::default()),
            SessionEnv {
                env_override: Some(file.join("profiles").into()),
                ..env.session_env()
            },
        )
        .unwrap_err();
        assert!(matches!(err, StartError::CreateOutputDir { .. }), "{err:?}");
        assert!(env.lines()[0].contains("could not create initial output"));
    }

    #[test]
    fn test_explicit_path_wins_over_env() {
        let env = TestEnv::new();
        let explicit = tempfile::tempdir().unwrap();
        let profile = env
            .start([ProfileOption::ProfilePath(explicit.path().into())])
            .unwrap();
        assert_eq!(profile.artifact_path(), explicit.path().join("cpu.pprof"));
        assert!(profile.artifact_path().exists());
    }

    #[test_case(ProfileKind::Cpu; "cpu")]
    #[test_case(ProfileKind::Mem; "mem")]
    #[test_case(ProfileKind::Block; "block")]
    #[test_case(ProfileKind::Mutex; "mutex")]
    #[test_case(ProfileKind::Trace; "trace")]
    #[test_case(ProfileKind::Goroutine; "goroutine")]
    fn test_quiet(kind: ProfileKind) {
        let env = TestEnv::new();
        let profile = env.start([kind.into(), ProfileOption::Quiet]).unwrap();
        assert_eq!(profile.kind(), kind);
        profile.stop();
        assert!(env.buf.contents().is_empty());
    }

    #[test]
    fn test_quiet_rate() {
        let env = TestEnv::new();
        let profile = env
            .start([ProfileOption::MemProfileRate(2048), ProfileOption::Quiet])
            .unwrap();
        profile.stop();
        assert!(env.buf.contents().is_empty());
    }

    #[test]
    fn test_quiet_double_start() {
        let env = TestEnv::new();
        let first = env.start([ProfileOption::Quiet]).unwrap();
        let err = env.start([ProfileOption::Quiet]).unwrap_err();
        assert!(matches!(err, StartError::AlreadyStarted(Some(_))), "{err:?}");
        drop(err);
        first.stop();
        assert!(env.buf.contents().is_empty());
    }

    #[test]
    fn test_quiet_error_is_silent() {
        let env = TestEnv::new();
        let file = env.dir.path().join("file");
        std::fs::write(&file, b"").unwrap();
        let err = env
            .start([ProfileOption::Quiet, ProfileOption::ProfilePath(file)])
            .unwrap_err();
        assert!(matches!(err, StartError::CreateOutput { .. }));
        assert!(env.buf.contents().is_empty());
    }

    #[test]
    fn test_double_stop() {
        let env = TestEnv::new();
        let engine = MockProfilerEngine::default();
        let stops = engine.stops.clone();
        let profile = env.start_with([], engine).unwrap();
        profile.stop();
        assert!(profile.is_stopped());
        let lines = env.lines();
        profile.stop();
        assert_eq!(env.lines(), lines);
        assert_eq!(stops.load(atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn test_guard_resets_after_stop() {
        let env = TestEnv::new();
        env.start([]).unwrap().stop();
        let again = env.start([ProfileOption::BlockProfile]).unwrap();
        assert!(!env.buf.contents().contains("already called"));
        assert!(env.guard.is_active());
        drop(again);
        assert!(!env.guard.is_active());
    }

    #[test]
    fn test_drop_stops() {
        let env = TestEnv::new();
        let engine = MockProfilerEngine::default();
        let stops = engine.stops.clone();
        {
            let _profile = env.start_with([], engine).unwrap();
        }
        assert_eq!(stops.load(atomic::Ordering::Relaxed), 1);
        assert!(env.lines()[1].starts_with("profile: cpu profiling disabled, "));
    }

    #[test]
    fn test_interrupt_races_explicit_stop() {
        let env = TestEnv::new();
        let engine = MockProfilerEngine::default();
        let stops = engine.stops.clone();
        let profile = env.start_with([], engine).unwrap();
        let stopped_by_hook = std::thread::scope(|s| {
            let hook = s.spawn(|| env.hook.stop_sessions());
            s.spawn(|| profile.stop());
            hook.join().unwrap()
        });
        assert!(stopped_by_hook <= 1);
        assert_eq!(stops.load(atomic::Ordering::Relaxed), 1);
        let disabled = env
            .lines()
            .iter()
            .filter(|l| l.contains("disabled"))
            .count();
        assert_eq!(disabled, 1);
        assert!(!env.guard.is_active());
    }

    #[test]
    fn test_interrupt_stops_hooked_sessions() {
        let env = TestEnv::new();
        let profile = env.start([]).unwrap();
        assert_eq!(env.hook.stop_sessions(), 1);
        assert!(profile.is_stopped());
        let lines = env.lines();
        assert_eq!(lines[1], "profile: caught interrupt, stopping profiles");
        assert!(lines[2].starts_with("profile: cpu profiling disabled, "));
    }

    #[test]
    fn test_no_shutdown_hook() {
        let env = TestEnv::new();
        let profile = env.start([ProfileOption::NoShutdownHook]).unwrap();
        assert_eq!(env.hook.stop_sessions(), 0);
        assert!(!profile.is_stopped());
    }

    #[test]
    fn test_engine_start_error_releases_guard() {
        let env = TestEnv::new();
        let err = env
            .start_with(
                [ProfileOption::MutexProfile],
                MockProfilerEngine {
                    start_error: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StartError::Engine { kind: ProfileKind::Mutex, .. }));
        assert_eq!(
            env.lines(),
            ["profile: could not start mutex profiler: async-profiler error: boom"]
        );
        assert!(!env.guard.is_active());
        assert_eq!(env.hook.stop_sessions(), 0);
        // the artifact created for the failed start is removed
        assert!(env.dir.path().is_dir());
        assert!(!env.dir.path().join("mutex.pprof").exists());
    }

    #[test]
    fn test_engine_start_error_removes_temp_dir() {
        let env = TestEnv::new();
        let engine = MockProfilerEngine {
            start_error: true,
            ..Default::default()
        };
        let artifact = engine.artifact.clone();
        let err = start_inner(
            ProfileConfig::default(),
            Box::new(engine),
            SessionEnv {
                env_override: None,
                ..env.session_env()
            },
        )
        .unwrap_err();
        assert!(matches!(err, StartError::Engine { .. }), "{err:?}");
        let artifact = artifact.lock().unwrap().clone().unwrap();
        assert!(!artifact.exists());
        assert!(!artifact.parent().unwrap().exists());
    }

    #[test]
    fn test_rejected_double_start_keeps_running_artifact() {
        let env = TestEnv::new();
        let first = env.start([]).unwrap();
        std::fs::write(first.artifact_path(), b"IN-PROGRESS JFR").unwrap();

        let err = env
            .start_with(
                [],
                MockProfilerEngine {
                    start_error: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StartError::AlreadyStarted(None)), "{err:?}");
        assert!(err.into_profile().is_none());
        assert_eq!(std::fs::read(first.artifact_path()).unwrap(), b"IN-PROGRESS JFR");
        let lines = env.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "profile: Start() already called");
        assert_eq!(
            lines[2],
            "profile: could not start cpu profiler: async-profiler error: boom"
        );
        assert!(env.guard.is_active());
        assert!(!first.is_stopped());
    }

    #[test]
    fn test_start_with_guard_uses_given_guard() {
        static GUARD: SessionGuard = SessionGuard::new();
        assert!(GUARD.try_claim());
        let dir = tempfile::tempdir().unwrap();
        let err = start_with_guard(
            [
                ProfileOption::Quiet,
                ProfileOption::NoShutdownHook,
                ProfileOption::ProfilePath(dir.path().into()),
            ],
            &GUARD,
        )
        .unwrap_err();
        assert!(matches!(err, StartError::AlreadyStarted(_)), "{err:?}");
        drop(err);
        assert!(GUARD.is_active());
    }

    #[test]
    fn test_engine_stop_error_still_completes() {
        let env = TestEnv::new();
        let profile = env
            .start_with(
                [],
                MockProfilerEngine {
                    stop_error: true,
                    ..Default::default()
                },
            )
            .unwrap();
        profile.stop();
        let lines = env.lines();
        assert_eq!(
            lines[1],
            "profile: could not stop cpu profiling: async-profiler error: boom"
        );
        assert!(lines[2].starts_with("profile: cpu profiling disabled, "));
        assert!(profile.is_stopped());
        assert!(!env.guard.is_active());
    }
}
