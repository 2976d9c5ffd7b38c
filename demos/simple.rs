// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use async_profiler_session::options::{ProfileKind, ProfilerBuilder};
use std::{path::PathBuf, time::Duration, time::Instant};

use clap::Parser;

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Simple program to test profiling sessions
#[derive(Parser, Debug)]
struct Args {
    /// One of cpu, mem, block, mutex, trace, goroutine
    #[arg(long, default_value = "cpu")]
    kind: ProfileKind,
    /// Memory sampling interval in bytes, implies `--kind mem`
    #[arg(long)]
    mem_rate: Option<u32>,
    /// Directory to write the profile into
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long, default_value = "10s")]
    #[clap(value_parser = humantime::parse_duration)]
    duration: Duration,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    no_shutdown_hook: bool,
}

#[inline(never)]
fn busy_work(round: u64) -> u64 {
    let buf: Vec<u64> = (0..10_000).map(|i| i * round).collect();
    std::hint::black_box(buf.iter().sum())
}

fn main() -> anyhow::Result<()> {
    set_up_tracing();
    let args = Args::parse();

    let mut builder = ProfilerBuilder::default().with_option(args.kind.into());
    if let Some(rate) = args.mem_rate {
        builder = builder.with_mem_profile_rate(rate);
    }
    if let Some(path) = args.path {
        builder = builder.with_profile_path(path);
    }
    if args.quiet {
        builder = builder.with_quiet();
    }
    if args.no_shutdown_hook {
        builder = builder.with_no_shutdown_hook();
    }

    let profile = builder.start()?;
    tracing::info!(path = ?profile.artifact_path(), "profiling started");

    let deadline = Instant::now() + args.duration;
    let mut round = 0;
    while Instant::now() < deadline {
        busy_work(round);
        round += 1;
        if round % 1000 == 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    profile.stop();
    tracing::info!(rounds = round, "profiling finished");
    Ok(())
}
