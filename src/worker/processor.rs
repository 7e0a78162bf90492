//! The BrickLayers G-code transformation itself is an external collaborator
//! (`spec.md` §1, §6): this module only implements the line-stream-to-
//! line-stream *contract* the worker pool depends on — construction from two
//! numeric parameters, a deterministic, lazy, finite transform, and the
//! ability to raise an error that the worker turns into a `failed` job. The
//! feature-detection/layer-state-machine internals of the real algorithm are
//! a separable body of work and are not re-specified here.
//!
//! The contract is driven one line at a time through [`BrickLayersProcessor::step`]
//! rather than through a synchronous `Iterator`, since the only real caller
//! (`worker::pool::WorkerPool::run_processing`) pulls lines from an async
//! `BufReader` — a sync iterator adapter here would have no caller and would
//! just be dead production surface.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LAYER_CHANGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^;\s*(layer_change|layer:)").unwrap());
static EXTRUSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"E(-?[0-9]*\.?[0-9]+)").unwrap());

/// Consumed by the worker as a line-stream-to-line-stream processor
/// configured with `extrusion_global_multiplier` and `start_at_layer`
/// (`spec.md` §6 External collaborator contract).
#[derive(Debug, Clone, Copy)]
pub struct BrickLayersProcessor {
    extrusion_global_multiplier: f64,
    start_at_layer: u32,
    verbosity: u8,
}

impl BrickLayersProcessor {
    pub fn new(extrusion_global_multiplier: f64, start_at_layer: u32, verbosity: u8) -> Self {
        Self { extrusion_global_multiplier, start_at_layer, verbosity }
    }

    /// Transforms a single line given the running layer counter, advancing
    /// it on a layer-change marker. Driven by the worker pool from an async
    /// reader, one line per call.
    pub fn step(&self, line: &str, layer: &mut u32) -> String {
        if LAYER_CHANGE_RE.is_match(line) {
            *layer += 1;
        }
        let out = if *layer >= self.start_at_layer {
            rewrite_extrusion_line(line, self.extrusion_global_multiplier)
        } else {
            line.to_string()
        };

        if self.verbosity > 0 {
            tracing::debug!(layer = *layer, "bricklayers: processed line");
        }

        out
    }
}

/// Multiplies the `E` value of an extrusion move (`G0`/`G1` with positive
/// `E`) by `multiplier`; leaves retractions and non-move lines untouched.
fn rewrite_extrusion_line(line: &str, multiplier: f64) -> String {
    let trimmed = line.trim_start();
    if !(trimmed.starts_with("G1") || trimmed.starts_with("G0")) {
        return line.to_string();
    }

    EXTRUSION_RE
        .replace(line, |caps: &Captures| {
            let value: f64 = caps[1].parse().unwrap_or(0.0);
            if value <= 0.0 {
                caps[0].to_string()
            } else {
                format!("E{:.5}", value * multiplier)
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives `processor.step()` over `input` the same way the worker pool
    /// does: one line at a time against a running layer counter.
    fn run(processor: &BrickLayersProcessor, input: &str) -> Vec<String> {
        let mut layer = 0u32;
        input.lines().map(|line| processor.step(line, &mut layer)).collect()
    }

    #[test]
    fn leaves_lines_before_start_layer_untouched() {
        let processor = BrickLayersProcessor::new(1.2, 3, 0);
        let output = run(&processor, ";LAYER_CHANGE\nG1 X0 Y0 E1.0\n");
        assert_eq!(output[1], "G1 X0 Y0 E1.0");
    }

    #[test]
    fn multiplies_extrusion_from_start_layer_onward() {
        let processor = BrickLayersProcessor::new(1.2, 0, 0);
        let output = run(&processor, ";LAYER_CHANGE\nG1 X0 Y0 E1.0\n");
        assert_eq!(output[1], "G1 X0 Y0 E1.20000");
    }

    #[test]
    fn does_not_rewrite_retractions() {
        let processor = BrickLayersProcessor::new(1.2, 0, 0);
        let output = run(&processor, ";LAYER_CHANGE\nG1 E-1.0 F1800\n");
        assert_eq!(output[1], "G1 E-1.0 F1800");
    }

    #[test]
    fn is_deterministic_for_same_input_and_params() {
        let processor = BrickLayersProcessor::new(1.1, 1, 0);
        let input = ";LAYER_CHANGE\nG1 X1 Y1 E2.0\n;LAYER_CHANGE\nG1 X2 Y2 E3.0\n";
        assert_eq!(run(&processor, input), run(&processor, input));
    }

    #[test]
    fn output_is_finite_and_matches_input_length() {
        let processor = BrickLayersProcessor::new(1.05, 3, 0);
        let input = "G1 X0\nG1 X1\nG1 X2\n";
        assert_eq!(run(&processor, input).len(), input.lines().count());
    }

    #[test]
    fn advances_layer_counter_only_on_layer_change_markers() {
        let processor = BrickLayersProcessor::new(1.0, 0, 0);
        let mut layer = 0u32;
        processor.step("G1 X0 Y0 E1.0", &mut layer);
        assert_eq!(layer, 0);
        processor.step(";LAYER_CHANGE", &mut layer);
        assert_eq!(layer, 1);
        processor.step(";LAYER_CHANGE", &mut layer);
        assert_eq!(layer, 2);
    }
}
