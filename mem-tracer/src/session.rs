//! Trace session lifecycle
//!
//! Opens the output with its header, hands the tracer to the
//! instrumentation engine for the lifetime of the traced program, and
//! closes the output with the end marker exactly once.

use crate::config::{Platform, TraceConfig};
use crate::engine::Engine;
use crate::tracer::MemTracer;
use crate::trace::TraceStats;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};

/// One trace, from header to end marker
#[derive(Debug)]
pub struct TraceSession<W: Write> {
    tracer: MemTracer<W>,
    config: TraceConfig,
    platform: Platform,
}

impl TraceSession<BufWriter<File>> {
    /// Create the configured output file and write the header
    pub fn open(config: TraceConfig, platform: Platform) -> anyhow::Result<Self> {
        let file = File::create(&config.output_path).with_context(|| {
            format!("Failed to open trace file {}", config.output_path.display())
        })?;
        Self::with_writer(BufWriter::new(file), config, platform)
    }

    /// Let `engine` check its arguments, then open the configured output
    ///
    /// An engine that rejects its arguments leaves no trace file behind.
    pub fn open_for<E: Engine>(engine: &mut E, config: TraceConfig, platform: Platform) -> anyhow::Result<Self> {
        engine
            .init()
            .context("Instrumentation engine rejected its arguments")?;
        Self::open(config, platform)
    }
}

impl<W: Write> TraceSession<W> {
    /// Start a session writing to `out`
    pub fn with_writer(out: W, config: TraceConfig, platform: Platform) -> anyhow::Result<Self> {
        let tracer = MemTracer::new(out, &config, platform);
        tracer.begin().context("Failed to write trace header")?;

        tracing::info!(
            "Tracing to {} (values: {}, platform: {:?})",
            config.output_path.display(),
            config.emit_values,
            platform
        );

        Ok(Self {
            tracer,
            config,
            platform,
        })
    }

    pub fn tracer(&self) -> &MemTracer<W> {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut MemTracer<W> {
        &mut self.tracer
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Run the traced program under `engine` and close the trace
    ///
    /// Blocks until the program exits and returns its exit code. If the
    /// engine rejects its arguments nothing is traced and the error
    /// carries the usage text.
    pub fn run<E: Engine>(&self, engine: &mut E) -> anyhow::Result<i32> {
        let exit_code = engine
            .start_program(&self.tracer)
            .context("Instrumented program did not run to completion")?;

        // The engine normally finishes the trace from its fini callback.
        self.tracer.finish().context("Failed to close trace")?;

        let stats = self.stats();
        tracing::info!(
            "Trace complete: {} reads, {} writes, {} syscalls, exit code {}",
            stats.reads,
            stats.writes,
            stats.syscalls,
            exit_code
        );
        Ok(exit_code)
    }

    pub fn stats(&self) -> TraceStats {
        self.tracer.stats()
    }

    /// Close the trace if still open and return the output stream
    pub fn into_output(self) -> anyhow::Result<W> {
        self.tracer.finish().context("Failed to close trace")?;
        Ok(self.tracer.into_inner())
    }
}
