//! Runs the sample counter program under the memory tracer and writes the
//! trace to the default output file.

use anyhow::Result;
use guest_sim::programs;
use mem_tracer::{TraceConfig, TraceSession};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let platform = guest_sim::default_platform();
    let config = TraceConfig::default();

    let mut machine = programs::counter_machine(platform)?;
    let session = TraceSession::open_for(&mut machine, config, platform)?;
    let exit_code = session.run(&mut machine)?;

    let stats = session.stats();
    println!(
        "{}: {} reads, {} writes, {} syscalls",
        session.config().output_path.display(),
        stats.reads,
        stats.writes,
        stats.syscalls
    );

    session.into_output()?;
    std::process::exit(exit_code)
}
