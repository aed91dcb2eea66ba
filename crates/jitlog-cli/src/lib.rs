//! jitlog CLI library
//!
//! Command-line surface over the `jitlog` crate: decode a log, optionally
//! attach the sources its merge points name, and print the trace forest.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
mod output;
mod runner;

pub use commands::{Cli, ColorArg, FormatArg, StageArg};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{render, render_json, render_text, ForestReport, OutputFormat, TraceListing};
pub use runner::{build_config, run};
