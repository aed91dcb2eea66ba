//! Decode, optionally attach sources, render

use crate::commands::Cli;
use crate::config::{CliConfig, Verbosity};
use crate::error::{CliError, CliResult};
use crate::output::render;
use std::path::Path;
use tracing::info;

/// Build the configuration from parsed arguments
#[must_use]
pub fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
        .with_stage(cli.stage.into())
        .with_format(cli.format.into())
        .with_attach_source(cli.attach_source)
}

/// Read the log at `path` and return the rendered listing
pub fn run(config: &CliConfig, path: &Path) -> CliResult<String> {
    if !path.exists() {
        return Err(CliError::not_found(path.display().to_string()));
    }
    let mut forest = jitlog::read_jitlog(path)?;
    info!(path = %path.display(), traces = forest.len(), "jitlog loaded");

    if config.attach_source {
        let files = forest.extract_source_code_lines();
        forest.copy_and_add_source_code_tags()?;
        info!(files, "source trailer appended");
    }

    render(
        &forest,
        config.stage,
        config.format,
        config.color.should_color(),
    )
}
