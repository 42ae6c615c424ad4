//! Filter-graph construction.
//!
//! The graph is assembled as an ordered list of stages with explicit input
//! and output pads, and only rendered to ffmpeg's `-filter_complex` syntax
//! at the end. Pads are checked as stages are added: every output label is
//! unique, and every labelled input must have been produced earlier and
//! not yet consumed.
//!
//! ```text
//! [0:v] ── scale ──────────────► [base]
//! [1:v] ── format=rgba ─► [wm0] ──┐
//!                          [base] ├─ overlay ─► [ov0]  ...  ─► [vout]
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;

use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::{PlacementPlan, PlacementTrajectory, Size};

/// Label of the final video stream.
pub const OUTPUT_LABEL: &str = "vout";

/// Source and target frame size for the scale stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleSpec {
    pub source: Size,
    pub target: Size,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Stage {
    inputs: Vec<String>,
    filter: String,
    outputs: Vec<String>,
}

/// Ordered list of filter stages.
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    stages: Vec<Stage>,
    produced: HashSet<String>,
    consumed: HashSet<String>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    ///
    /// Inputs containing `:` are stream specifiers (`0:v`); anything else is
    /// a label that an earlier stage must have produced.
    pub fn push(
        &mut self,
        inputs: &[&str],
        filter: impl Into<String>,
        outputs: &[&str],
    ) -> InkmarkResult<()> {
        for input in inputs {
            if is_stream_specifier(input) {
                continue;
            }
            if !self.produced.contains(*input) {
                return Err(InkmarkError::render(format!(
                    "filter input [{input}] was never produced"
                )));
            }
            if self.consumed.contains(*input) {
                return Err(InkmarkError::render(format!(
                    "filter input [{input}] consumed twice"
                )));
            }
        }
        let mut seen = HashSet::new();
        for output in outputs {
            if output.is_empty() || is_stream_specifier(output) {
                return Err(InkmarkError::render(format!("invalid output label [{output}]")));
            }
            if self.produced.contains(*output) || !seen.insert(*output) {
                return Err(InkmarkError::render(format!(
                    "output label [{output}] already in use"
                )));
            }
        }

        for input in inputs {
            if !is_stream_specifier(input) {
                self.consumed.insert(input.to_string());
            }
        }
        for output in outputs {
            self.produced.insert(output.to_string());
        }
        self.stages.push(Stage {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            filter: filter.into(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        Ok(())
    }

    /// Labels produced but never consumed.
    pub fn dangling(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .produced
            .difference(&self.consumed)
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Render to `-filter_complex` syntax.
    pub fn render(&self) -> String {
        let mut graph = String::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                graph.push(';');
            }
            for input in &stage.inputs {
                let _ = write!(graph, "[{input}]");
            }
            graph.push_str(&stage.filter);
            for output in &stage.outputs {
                let _ = write!(graph, "[{output}]");
            }
        }
        graph
    }
}

fn is_stream_specifier(label: &str) -> bool {
    label.contains(':')
}

/// Overlay position expressions for one overlay stage.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayExpr {
    pub x: String,
    pub y: String,
    /// Timeline predicate; `None` means always visible.
    pub enable: Option<String>,
    /// Whether `x`/`y` depend on `t`.
    pub dynamic: bool,
}

/// Translate a trajectory into one or more overlay expressions.
///
/// Hop yields one gated overlay per waypoint; every other variant yields one.
pub fn overlay_exprs(trajectory: &PlacementTrajectory) -> Vec<OverlayExpr> {
    match trajectory {
        PlacementTrajectory::Static { x, y } => vec![OverlayExpr {
            x: num(*x),
            y: num(*y),
            enable: None,
            dynamic: false,
        }],
        PlacementTrajectory::Slide {
            period_secs,
            span,
            y,
        } => vec![OverlayExpr {
            x: format!(
                "min({span}*mod(t,{p})/{p},{span})",
                span = num(*span),
                p = num(*period_secs)
            ),
            y: num(*y),
            enable: None,
            dynamic: true,
        }],
        PlacementTrajectory::Hop {
            waypoints,
            window_secs,
            repeat,
        } => {
            let clock = if *repeat {
                format!("mod(t,{})", num(window_secs * waypoints.len() as f64))
            } else {
                "t".to_string()
            };
            waypoints
                .iter()
                .enumerate()
                .map(|(idx, point)| {
                    let start = num(idx as f64 * window_secs);
                    let end = num((idx + 1) as f64 * window_secs);
                    OverlayExpr {
                        x: num(point.x),
                        y: num(point.y),
                        enable: Some(format!(
                            "between({clock},{start},{end})-between({clock},{end},{end})"
                        )),
                        dynamic: false,
                    }
                })
                .collect()
        }
        PlacementTrajectory::Lissajous {
            center,
            amplitude,
            speed,
            ratio,
        } => {
            let axis = |c: f64, a: f64, wave: String| {
                format!(
                    "min(max({c}+{a}*{wave},{lo}),{hi})",
                    c = num(c),
                    a = num(a),
                    lo = num(c - a),
                    hi = num(c + a)
                )
            };
            vec![OverlayExpr {
                x: axis(
                    center.x,
                    amplitude.x,
                    format!("sin(t*{})", num(*speed)),
                ),
                y: axis(
                    center.y,
                    amplitude.y,
                    format!("cos(t*{})", num(speed * ratio)),
                ),
                enable: None,
                dynamic: true,
            }]
        }
    }
}

/// Build the full graph: scale the source to `scale.target`, then overlay
/// each placement layer in order. Layer `i` reads input `i + 1`.
pub fn build_filter_graph(plan: &PlacementPlan, scale: ScaleSpec) -> InkmarkResult<FilterGraph> {
    let mut graph = FilterGraph::new();
    let target = scale.target;
    graph.push(
        &["0:v"],
        format!("scale={}:{}:flags=bicubic", target.width, target.height),
        &["base"],
    )?;

    let overlays: Vec<(usize, Vec<OverlayExpr>)> = plan
        .layers
        .iter()
        .enumerate()
        .map(|(idx, layer)| (idx, overlay_exprs(&layer.trajectory)))
        .collect();
    let total: usize = overlays.iter().map(|(_, exprs)| exprs.len()).sum();

    if total == 0 {
        graph.push(&["base"], "null", &[OUTPUT_LABEL])?;
        return Ok(graph);
    }

    let mut current = "base".to_string();
    let mut emitted = 0usize;
    for (layer_idx, exprs) in overlays {
        let stream = format!("{}:v", layer_idx + 1);
        let sprite_labels: Vec<String> = if exprs.len() == 1 {
            vec![format!("wm{layer_idx}")]
        } else {
            (0..exprs.len())
                .map(|k| format!("wm{layer_idx}_{k}"))
                .collect()
        };
        let sprite_refs: Vec<&str> = sprite_labels.iter().map(String::as_str).collect();
        let prep = if exprs.len() == 1 {
            "format=rgba".to_string()
        } else {
            format!("format=rgba,split={}", exprs.len())
        };
        graph.push(&[stream.as_str()], prep, &sprite_refs)?;

        for (expr, sprite) in exprs.iter().zip(&sprite_labels) {
            emitted += 1;
            let out = if emitted == total {
                OUTPUT_LABEL.to_string()
            } else {
                format!("ov{emitted}")
            };
            graph.push(&[current.as_str(), sprite.as_str()], overlay_filter(expr), &[out.as_str()])?;
            current = out;
        }
    }

    Ok(graph)
}

fn overlay_filter(expr: &OverlayExpr) -> String {
    let mut filter = format!("overlay=x='{}':y='{}'", expr.x, expr.y);
    if expr.dynamic {
        filter.push_str(":eval=frame");
    }
    if let Some(enable) = &expr.enable {
        let _ = write!(filter, ":enable='{enable}'");
    }
    filter.push_str(":shortest=1");
    filter
}

/// Format a number for an ffmpeg expression: integers plainly, otherwise
/// up to six decimals without trailing zeros.
pub fn num(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let rounded = value.round();
    if (value - rounded).abs() < 1e-9 {
        return format!("{}", rounded as i64);
    }
    let s = format!("{value:.6}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
