// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Choosing the directory a session writes its artifact into.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::profiler::StartError;

/// Environment variable naming a directory to use instead of a temporary one.
pub const PROFILE_PATH_ENV: &str = "PROFILE_PATH";

/// Where the artifact directory came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDir {
    /// Configured with [`crate::options::ProfileOption::ProfilePath`].
    Explicit(PathBuf),
    /// Taken from the [`PROFILE_PATH_ENV`] environment variable.
    Env(PathBuf),
    /// A fresh temporary directory created for this session.
    Temp(PathBuf),
}

impl OutputDir {
    /// The directory itself.
    pub fn path(&self) -> &Path {
        match self {
            OutputDir::Explicit(p) | OutputDir::Env(p) | OutputDir::Temp(p) => p,
        }
    }
}

/// Read the [`PROFILE_PATH_ENV`] override from the environment.
pub fn env_override() -> Option<OsString> {
    std::env::var_os(PROFILE_PATH_ENV)
}

/// Derive the output directory.
///
/// An explicit path is used verbatim and never created. Otherwise a
/// non-empty `env_override` is used, creating it and its parents. Failing
/// both, a new temporary directory is created and kept after the session.
pub fn derive_output_dir(
    explicit: Option<&Path>,
    env_override: Option<OsString>,
) -> Result<OutputDir, StartError> {
    if let Some(explicit) = explicit {
        return Ok(OutputDir::Explicit(explicit.to_owned()));
    }
    if let Some(dir) = env_override.filter(|d| !d.is_empty()) {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir).map_err(|source| StartError::CreateOutputDir {
            path: dir.clone(),
            source,
        })?;
        tracing::debug!(?dir, "using output directory from {PROFILE_PATH_ENV}");
        return Ok(OutputDir::Env(dir));
    }
    let dir = tempfile::Builder::new()
        .prefix("profile")
        .tempdir()
        .map_err(|source| StartError::CreateOutputDir {
            path: std::env::temp_dir(),
            source,
        })?
        .keep();
    tracing::debug!(?dir, "created temporary output directory");
    Ok(OutputDir::Temp(dir))
}
