//! CLI command definitions using clap

use clap::{Parser, ValueEnum};
use jitlog::StageKind;
use std::path::PathBuf;

/// jitlog-print: print the trace forest of a JIT compiler log
#[derive(Parser, Debug)]
#[command(name = "jitlog-print")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the jitlog file
    pub jitlog: PathBuf,

    /// Stage to list for every trace
    #[arg(short, long, value_enum, default_value = "asm")]
    pub stage: StageArg,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: FormatArg,

    /// Read the source files named by merge points and append them to the log
    #[arg(long)]
    pub attach_source: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, value_enum, default_value = "auto")]
    pub color: ColorArg,
}

/// Compilation stage argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageArg {
    /// Before optimization
    Noopt,
    /// After optimization
    Opt,
    /// Assembled
    #[default]
    Asm,
}

impl From<StageArg> for StageKind {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Noopt => Self::Noopt,
            StageArg::Opt => Self::Opt,
            StageArg::Asm => Self::Asm,
        }
    }
}

/// Output format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatArg {
    /// Human-readable listing
    #[default]
    Text,
    /// JSON document
    Json,
}

impl From<FormatArg> for crate::output::OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

/// Color choice argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
