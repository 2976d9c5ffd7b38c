// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::options::ProfileConfig;
use std::{
    ffi::{c_char, CStr, CString},
    path::Path,
    sync::{Arc, OnceLock},
};

use thiserror::Error;

pub(crate) mod raw;

/// An error returned by async-profiler or by loading it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AsProfError {
    /// async-profiler rejected a command.
    #[error("async-profiler error: {0}")]
    AsyncProfilerError(String),
    /// An I/O error while talking to async-profiler.
    #[error("async-profiler i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// `libasyncProfiler.so` could not be loaded.
    #[error("error loading libasyncProfiler: {0}")]
    LibraryError(#[from] Arc<libloading::Error>),
}

#[derive(Debug, Default)]
pub struct AsProfBuilder {}

impl AsProfBuilder {
    pub fn build(self) -> AsProf {
        AsProf {}
    }
}

/// The async-profiler engine, driven through `asprof_execute`.
#[derive(Debug)]
pub struct AsProf {}

// asprof_init must run exactly once per process, whatever the number of sessions
static ASPROF_INIT: OnceLock<Result<(), Arc<libloading::Error>>> = OnceLock::new();

impl AsProf {
    pub fn builder() -> AsProfBuilder {
        AsProfBuilder::default()
    }
}

impl crate::profiler::ProfilerEngine for AsProf {
    fn init_profiler(&self) -> Result<(), AsProfError> {
        ASPROF_INIT
            .get_or_init(|| {
                let prof = raw::async_profiler()?;
                unsafe {
                    (prof.asprof_init)();
                }
                tracing::info!("successfully initialized async profiler.");
                Ok(())
            })
            .clone()
            .map_err(AsProfError::LibraryError)
    }

    fn start_profiler(&self, artifact: &Path, config: &ProfileConfig) -> Result<(), AsProfError> {
        tracing::debug!("starting the async-profiler and giving artifact path: {artifact:?}");

        let args = config.to_args_string(artifact);

        Self::asprof_execute(&args)?;
        tracing::debug!("async-profiler started successfully");
        Ok(())
    }

    fn stop_profiler(&self) -> Result<(), AsProfError> {
        Self::asprof_execute("stop")?;
        tracing::debug!("async-profiler stopped successfully");
        Ok(())
    }
}

impl AsProf {
    /// convert an asprof_error_t to a Result
    ///
    /// SAFETY: response must be a valid asprof_error_t
    unsafe fn asprof_error(response: raw::asprof_error_t) -> Result<(), AsProfError> {
        if !response.is_null() {
            let response = (raw::async_profiler()?.asprof_error_str)(response);
            if response.is_null() {
                return Ok(());
            }
            let response = unsafe { CStr::from_ptr(response) };
            let response_str = response.to_string_lossy();
            tracing::error!("received error from async-profiler: {}", response_str);
            Err(AsProfError::AsyncProfilerError(response_str.to_string()))
        } else {
            Ok(())
        }
    }

    fn asprof_execute(args: &str) -> Result<(), AsProfError> {
        unsafe extern "C" fn callback(buf: *const c_char, size: usize) {
            unsafe {
                if !buf.is_null() {
                    let parts = std::slice::from_raw_parts(buf as *const u8, size);
                    tracing::debug!(
                        "response from async-profiler: {}",
                        String::from_utf8_lossy(parts)
                    );
                } else {
                    tracing::debug!("invalid pointer or size");
                }
            }
        }

        let args_compatible = CString::new(args).map_err(|_| {
            AsProfError::AsyncProfilerError(format!("command contains a nul byte: {args:?}"))
        })?;
        unsafe {
            Self::asprof_error((raw::async_profiler()?.asprof_execute)(
                args_compatible.as_ptr(),
                Some(callback),
            ))
        }
    }
}
