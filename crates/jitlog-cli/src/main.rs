//! jitlog-print: print the trace forest of a JIT compiler log
//!
//! ## Usage
//!
//! ```bash
//! jitlog-print log.jit                    # summary and assembled stage
//! jitlog-print log.jit --stage opt        # optimized stage
//! jitlog-print log.jit --format json      # machine-readable
//! jitlog-print log.jit --attach-source    # embed merge-point sources
//! ```

use clap::Parser;
use jitlog_cli::{build_config, run, Cli, CliConfig, CliResult};
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(&config);

    match execute(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &CliConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.verbosity.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn execute(cli: &Cli, config: &CliConfig) -> CliResult<()> {
    let rendered = run(config, &cli.jitlog)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
