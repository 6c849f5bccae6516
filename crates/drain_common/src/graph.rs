//! Text graph renderer
//!
//! Turns a bounded numeric sequence into a fixed-height line plot with a
//! labelled y-axis. Pure and deterministic. Degenerate input (empty, all
//! zero, all equal) yields a one-line placeholder instead of a plot.

use thiserror::Error;
use tracing::warn;

/// Placeholder for empty or all-sentinel input
pub const NO_DATA: &str = "No data yet...";

/// Placeholder when a plot could not be built
pub const GRAPH_FAILED: &str = "Graph generation failed";

/// Most recent points plotted; keeps a line within 80 columns
pub const MAX_POINTS: usize = 60;

const MIN_HEIGHT: usize = 2;
const LABEL_WIDTH: usize = 8;

#[derive(Debug, Error, PartialEq)]
enum PlotError {
    #[error("non-finite value {0} at index {1}")]
    NonFinite(f64, usize),
}

/// Render `values` as a plot `height` rows tall
pub fn render(values: &[f64], height: usize) -> String {
    let start = values.len().saturating_sub(MAX_POINTS);
    let values = &values[start..];

    if values.is_empty() || values.iter().all(|v| *v == 0.0) {
        return NO_DATA.to_string();
    }

    if let Some(first) = values.first() {
        if first.is_finite() && values.iter().all(|v| v == first) {
            return format!("Steady at {:.1}", first);
        }
    }

    match plot(values, height.max(MIN_HEIGHT)) {
        Ok(graph) => graph,
        Err(e) => {
            warn!("Failed to render graph: {}", e);
            GRAPH_FAILED.to_string()
        }
    }
}

/// True when `text` is one of the placeholder forms rather than a plot
pub fn is_placeholder(text: &str) -> bool {
    text == NO_DATA || text == GRAPH_FAILED || text.starts_with("Steady at ")
}

fn plot(values: &[f64], rows: usize) -> Result<String, PlotError> {
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(PlotError::NonFinite(*v, i));
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    let top = rows - 1;

    // level 0 is the bottom row
    let level = |v: f64| -> usize { (((v - min) / span) * top as f64).round() as usize };

    let width = values.len() - 1;
    let mut grid = vec![vec![' '; width]; rows];

    for (x, pair) in values.windows(2).enumerate() {
        let (from, to) = (level(pair[0]), level(pair[1]));
        if from == to {
            grid[top - from][x] = '─';
            continue;
        }

        let (lo, hi) = (from.min(to), from.max(to));
        for y in lo + 1..hi {
            grid[top - y][x] = '│';
        }
        if to > from {
            grid[top - from][x] = '╯';
            grid[top - to][x] = '╭';
        } else {
            grid[top - from][x] = '╮';
            grid[top - to][x] = '╰';
        }
    }

    let first_row = top - level(values[0]);
    let mut out = String::new();
    for (row, cells) in grid.iter().enumerate() {
        let label = max - span * row as f64 / top as f64;
        let axis = if row == first_row { '┼' } else { '┤' };
        let line: String = cells.iter().collect();
        out.push_str(&format!(
            "{:>width$.1} {}{}",
            label,
            axis,
            line.trim_end(),
            width = LABEL_WIDTH
        ));
        if row + 1 < rows {
            out.push('\n');
        }
    }

    Ok(out)
}
