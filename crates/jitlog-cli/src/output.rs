//! Output formatting of a decoded forest

use crate::error::CliResult;
use console::Style;
use jitlog::{AddrRange, ForestSummary, StageKind, Trace, TraceForest, TraceId, TraceKind};
use serde::{Deserialize, Serialize};

/// Output format for the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// One trace as printed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceListing {
    /// Unique id
    pub id: TraceId,
    /// Loop or bridge
    pub kind: TraceKind,
    /// Jit driver name
    pub jd_name: Option<String>,
    /// Assembled code range
    pub addrs: Option<AddrRange>,
    /// Trace this bridge hangs off
    pub parent: Option<TraceId>,
    /// Attached bridges
    pub bridges: Vec<TraceId>,
    /// Entry count
    pub counter: u64,
    /// Pretty-printed ops of the selected stage
    pub ops: Vec<String>,
}

impl TraceListing {
    /// Build the listing of `stage` for `trace`
    #[must_use]
    pub fn new(trace: &Trace, stage: StageKind) -> Self {
        let ops: Vec<String> = trace
            .get_stage(stage)
            .map(|s| s.ops().iter().map(jitlog::Op::pretty_print).collect())
            .unwrap_or_default();
        Self {
            id: trace.unique_id(),
            kind: trace.kind(),
            jd_name: trace.jd_name().map(str::to_string),
            addrs: trace.get_addrs(),
            parent: trace.get_parent(),
            bridges: trace.bridges().to_vec(),
            counter: trace.counter(),
            ops,
        }
    }
}

/// Whole document printed for a forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestReport {
    /// Forest counts
    pub summary: ForestSummary,
    /// Listed stage
    pub stage: StageKind,
    /// Traces in creation order
    pub traces: Vec<TraceListing>,
}

impl ForestReport {
    /// Collect the report of `forest` for `stage`
    #[must_use]
    pub fn new(forest: &TraceForest, stage: StageKind) -> Self {
        Self {
            summary: forest.summary(),
            stage,
            traces: forest
                .traces()
                .into_iter()
                .map(|t| TraceListing::new(t, stage))
                .collect(),
        }
    }
}

/// Render the summary line followed by one listing per trace, in creation
/// order. A trace without `stage` contributes an empty line.
#[must_use]
pub fn render_text(forest: &TraceForest, stage: StageKind, use_color: bool) -> String {
    let header = Style::new().bold().force_styling(use_color);

    let mut out = String::new();
    out.push_str(&header.apply_to(forest.summary()).to_string());
    out.push('\n');
    for trace in forest.traces() {
        out.push_str(&trace.pretty_print(stage));
        out.push('\n');
    }
    out
}

/// Render the report as pretty JSON
pub fn render_json(forest: &TraceForest, stage: StageKind) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(&ForestReport::new(forest, stage))?)
}

/// Render in the requested format
pub fn render(
    forest: &TraceForest,
    stage: StageKind,
    format: OutputFormat,
    use_color: bool,
) -> CliResult<String> {
    match format {
        OutputFormat::Text => Ok(render_text(forest, stage, use_color)),
        OutputFormat::Json => render_json(forest, stage),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitlog::{Instruction, Mark};

    fn sample() -> TraceForest {
        let mut forest = TraceForest::new(1, false, "x86_64");
        forest.add_trace(TraceKind::Loop, 4, None).unwrap();
        forest.start_mark(4, Mark::TraceOpt).unwrap();
        forest
            .add_instr(4, Instruction::new(1, "label", vec!["p0".into()]))
            .unwrap();
        forest
            .add_instr(
                4,
                Instruction::new(2, "int_add", vec!["i1".into(), "i2".into()]).with_result("i3"),
            )
            .unwrap();
        forest.add_trace(TraceKind::Bridge, 5, None).unwrap();
        forest
    }

    #[test]
    fn test_render_text() {
        let forest = sample();
        let text = render_text(&forest, StageKind::Opt, false);
        assert_eq!(
            text,
            format!("{}\nlabel(p0)\ni3 = int_add(i1, i2)\n\n", forest.summary())
        );
    }

    #[test]
    fn test_render_text_missing_stage_is_empty_line() {
        let forest = sample();
        let text = render_text(&forest, StageKind::Asm, false);
        assert_eq!(text, format!("{}\n\n\n", forest.summary()));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&sample(), StageKind::Opt).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stage"], "opt");
        assert_eq!(value["summary"]["traces"], 2);
        assert_eq!(value["traces"][0]["kind"], "loop");
        assert_eq!(value["traces"][0]["ops"][1], "i3 = int_add(i1, i2)");
        assert_eq!(value["traces"][1]["ops"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_missing_stage_lists_nothing() {
        let listing = TraceListing::new(sample().get_trace(4).unwrap(), StageKind::Asm);
        assert!(listing.ops.is_empty());
    }
}
