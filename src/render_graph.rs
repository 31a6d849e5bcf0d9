//! SVG export of the calibration graph: measured standards as points, the
//! known Beer-Lambert line through the origin, and the unknown sample read
//! off the line with dashed guides.

use crate::data_table::DataTable;
use crate::optics::{KNOWN_SLOPE, STOCK_CONCENTRATION, TARGET_WAVELENGTH};
use svg::node::element::{Circle, Line, Rectangle, Text};
use svg::Document;

const SVG_WIDTH: f32 = 640.0;
const SVG_HEIGHT: f32 = 420.0;
const PLOT_LEFT: f32 = 80.0;
const PLOT_RIGHT: f32 = SVG_WIDTH - 30.0;
const PLOT_TOP: f32 = 40.0;
const PLOT_BOTTOM: f32 = SVG_HEIGHT - 70.0;
const AXIS_TICKS: usize = 5;

fn x_px(concentration: f64, max_concentration: f64) -> f32 {
    let f = (concentration / max_concentration).clamp(0.0, 1.0) as f32;
    PLOT_LEFT + f * (PLOT_RIGHT - PLOT_LEFT)
}

fn y_px(absorbance: f64, max_absorbance: f64) -> f32 {
    let f = (absorbance / max_absorbance).clamp(0.0, 1.0) as f32;
    PLOT_BOTTOM - f * (PLOT_BOTTOM - PLOT_TOP)
}

/// Axis ranges grow with the data but always cover the full standard series,
/// so the plot does not rescale between measurements.
fn axis_ranges(points: &[(f64, f64)], unknown: Option<(f64, f64)>) -> (f64, f64) {
    let mut max_concentration: f64 = STOCK_CONCENTRATION;
    let mut max_absorbance: f64 = 0.5;
    for (concentration, absorbance) in points {
        max_concentration = max_concentration.max(*concentration);
        max_absorbance = max_absorbance.max(*absorbance);
    }
    if let Some((concentration, absorbance)) = unknown {
        max_concentration = max_concentration.max(concentration);
        max_absorbance = max_absorbance.max(absorbance);
    }
    (
        max_concentration.max(0.1) * 1.1,
        max_absorbance.max(0.1) * 1.1,
    )
}

pub fn export_calibration_svg(table: &DataTable) -> String {
    let points = table.measured_points();
    let unknown = table
        .unknown_absorbance()
        .map(|absorbance| (absorbance / KNOWN_SLOPE, absorbance));
    let (max_concentration, max_absorbance) = axis_ranges(&points, unknown);

    let mut doc = Document::new()
        .set("viewBox", (0, 0, SVG_WIDTH, SVG_HEIGHT))
        .set("width", SVG_WIDTH)
        .set("height", SVG_HEIGHT)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", SVG_WIDTH)
                .set("height", SVG_HEIGHT)
                .set("fill", "#f9fafb"),
        )
        .add(
            Text::new(format!(
                "Beer-Lambert Calibration at {} nm",
                TARGET_WAVELENGTH
            ))
            .set("x", PLOT_LEFT)
            .set("y", 24.0)
            .set("font-family", "monospace")
            .set("font-size", 15)
            .set("fill", "#0f172a"),
        );

    // Axes and tick labels.
    doc = doc
        .add(
            Line::new()
                .set("x1", PLOT_LEFT)
                .set("y1", PLOT_BOTTOM)
                .set("x2", PLOT_RIGHT)
                .set("y2", PLOT_BOTTOM)
                .set("stroke", "#0f172a")
                .set("stroke-width", 1.5),
        )
        .add(
            Line::new()
                .set("x1", PLOT_LEFT)
                .set("y1", PLOT_TOP)
                .set("x2", PLOT_LEFT)
                .set("y2", PLOT_BOTTOM)
                .set("stroke", "#0f172a")
                .set("stroke-width", 1.5),
        );
    for i in 0..=AXIS_TICKS {
        let fraction = i as f64 / AXIS_TICKS as f64;
        let concentration = fraction * max_concentration;
        let absorbance = fraction * max_absorbance;
        let x = x_px(concentration, max_concentration);
        let y = y_px(absorbance, max_absorbance);
        doc = doc
            .add(
                Line::new()
                    .set("x1", x)
                    .set("y1", PLOT_BOTTOM)
                    .set("x2", x)
                    .set("y2", PLOT_BOTTOM + 5.0)
                    .set("stroke", "#0f172a")
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(format!("{:.2}", concentration))
                    .set("x", x)
                    .set("y", PLOT_BOTTOM + 20.0)
                    .set("text-anchor", "middle")
                    .set("font-family", "monospace")
                    .set("font-size", 11)
                    .set("fill", "#374151"),
            )
            .add(
                Line::new()
                    .set("x1", PLOT_LEFT - 5.0)
                    .set("y1", y)
                    .set("x2", PLOT_LEFT)
                    .set("y2", y)
                    .set("stroke", "#0f172a")
                    .set("stroke-width", 1),
            )
            .add(
                Text::new(format!("{:.2}", absorbance))
                    .set("x", PLOT_LEFT - 9.0)
                    .set("y", y + 4.0)
                    .set("text-anchor", "end")
                    .set("font-family", "monospace")
                    .set("font-size", 11)
                    .set("fill", "#374151"),
            );
    }
    doc = doc
        .add(
            Text::new("Concentration (µM)")
                .set("x", (PLOT_LEFT + PLOT_RIGHT) / 2.0)
                .set("y", SVG_HEIGHT - 24.0)
                .set("text-anchor", "middle")
                .set("font-family", "monospace")
                .set("font-size", 13)
                .set("fill", "#0f172a"),
        )
        .add(
            Text::new("Absorbance (-log T)")
                .set("x", 22.0)
                .set("y", (PLOT_TOP + PLOT_BOTTOM) / 2.0)
                .set("text-anchor", "middle")
                .set(
                    "transform",
                    format!(
                        "rotate(-90 {} {})",
                        22.0,
                        (PLOT_TOP + PLOT_BOTTOM) / 2.0
                    ),
                )
                .set("font-family", "monospace")
                .set("font-size", 13)
                .set("fill", "#0f172a"),
        );

    // Known calibration line through the origin, clipped to the plot area.
    let mut line_end_concentration = max_concentration;
    let mut line_end_absorbance = KNOWN_SLOPE * max_concentration;
    if line_end_absorbance > max_absorbance {
        line_end_absorbance = max_absorbance;
        line_end_concentration = max_absorbance / KNOWN_SLOPE;
    }
    doc = doc.add(
        Line::new()
            .set("x1", x_px(0.0, max_concentration))
            .set("y1", y_px(0.0, max_absorbance))
            .set("x2", x_px(line_end_concentration, max_concentration))
            .set("y2", y_px(line_end_absorbance, max_absorbance))
            .set("stroke", "#dc2626")
            .set("stroke-width", 1.5),
    );

    if points.is_empty() && unknown.is_none() {
        doc = doc.add(
            Text::new("No measurements yet")
                .set("x", (PLOT_LEFT + PLOT_RIGHT) / 2.0)
                .set("y", (PLOT_TOP + PLOT_BOTTOM) / 2.0)
                .set("text-anchor", "middle")
                .set("font-family", "monospace")
                .set("font-size", 14)
                .set("fill", "#6b7280"),
        );
    }

    for (concentration, absorbance) in &points {
        doc = doc.add(
            Circle::new()
                .set("cx", x_px(*concentration, max_concentration))
                .set("cy", y_px(*absorbance, max_absorbance))
                .set("r", 3.5)
                .set("fill", "#2563eb"),
        );
    }

    if let Some((concentration, absorbance)) = unknown {
        let x = x_px(concentration, max_concentration);
        let y = y_px(absorbance, max_absorbance);
        doc = doc
            .add(
                Line::new()
                    .set("x1", PLOT_LEFT)
                    .set("y1", y)
                    .set("x2", x)
                    .set("y2", y)
                    .set("stroke", "#16a34a")
                    .set("stroke-width", 1)
                    .set("stroke-dasharray", "3,3"),
            )
            .add(
                Line::new()
                    .set("x1", x)
                    .set("y1", y)
                    .set("x2", x)
                    .set("y2", PLOT_BOTTOM)
                    .set("stroke", "#16a34a")
                    .set("stroke-width", 1)
                    .set("stroke-dasharray", "3,3"),
            )
            .add(
                Circle::new()
                    .set("cx", x)
                    .set("cy", y)
                    .set("r", 4.5)
                    .set("fill", "#16a34a"),
            )
            .add(
                Text::new(format!("Unknown ({:.3} µM)", concentration))
                    .set("x", x + 8.0)
                    .set("y", y - 8.0)
                    .set("font-family", "monospace")
                    .set("font-size", 11)
                    .set("fill", "#166534"),
            );
    }

    doc.to_string()
}

pub fn save_calibration_svg_to_path(table: &DataTable, path: &str) -> anyhow::Result<()> {
    std::fs::write(path, export_calibration_svg(table))?;
    Ok(())
}
