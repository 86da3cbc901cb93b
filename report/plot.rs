//! Comparison plots rendered as self-contained SVG strings.
//!
//! Two plot kinds cover the worked examples: overlaid smooth-term curves
//! (naive vs corrected partial effects) and a spatial prediction heatmap for
//! the point-process example. The SVG is assembled directly into a string;
//! no rendering backend is involved.

use std::fmt::Write as FmtWrite;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 420.0;
const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 52.0;

const CURVE_COLORS: [&str; 4] = ["#1f5fa8", "#c23b22", "#2a8a4a", "#8a5fb0"];

/// A labeled curve over a shared x grid.
pub struct Curve<'a> {
    pub label: &'a str,
    pub y: &'a [f64],
}

/// Overlaid curves (e.g. naive vs corrected smooth estimates) with axes,
/// tick labels, and a legend.
pub fn smooth_comparison_svg(title: &str, x: &[f64], curves: &[Curve<'_>]) -> String {
    let (x_lo, x_hi) = finite_range(x);
    let (y_lo, y_hi) = finite_range_2d(curves.iter().map(|c| c.y));
    let pad = 0.05 * (y_hi - y_lo).max(1e-12);
    let (y_lo, y_hi) = (y_lo - pad, y_hi + pad);

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let to_px = |xv: f64, yv: f64| -> (f64, f64) {
        (
            MARGIN_LEFT + (xv - x_lo) / (x_hi - x_lo).max(1e-12) * plot_w,
            MARGIN_TOP + (1.0 - (yv - y_lo) / (y_hi - y_lo).max(1e-12)) * plot_h,
        )
    };

    let mut out = svg_open();
    frame_and_title(&mut out, title);

    // Axis ticks: five per axis is plenty for a diagnostic plot.
    for k in 0..=4 {
        let fx = k as f64 / 4.0;
        let xv = x_lo + fx * (x_hi - x_lo);
        let (px, _) = to_px(xv, y_lo);
        writeln!(
            out,
            r##"<line x1="{px:.1}" y1="{y1:.1}" x2="{px:.1}" y2="{y2:.1}" stroke="#cccccc" stroke-width="0.5" />"##,
            y1 = MARGIN_TOP,
            y2 = MARGIN_TOP + plot_h,
        )
        .unwrap();
        writeln!(
            out,
            r#"<text x="{px:.1}" y="{ty:.1}" font-size="11" text-anchor="middle">{xv:.2}</text>"#,
            ty = MARGIN_TOP + plot_h + 16.0,
        )
        .unwrap();

        let yv = y_lo + fx * (y_hi - y_lo);
        let (_, py) = to_px(x_lo, yv);
        writeln!(
            out,
            r##"<line x1="{x1:.1}" y1="{py:.1}" x2="{x2:.1}" y2="{py:.1}" stroke="#cccccc" stroke-width="0.5" />"##,
            x1 = MARGIN_LEFT,
            x2 = MARGIN_LEFT + plot_w,
        )
        .unwrap();
        writeln!(
            out,
            r#"<text x="{tx:.1}" y="{py:.1}" font-size="11" text-anchor="end" dominant-baseline="middle">{yv:.2}</text>"#,
            tx = MARGIN_LEFT - 6.0,
        )
        .unwrap();
    }

    for (ci, curve) in curves.iter().enumerate() {
        let color = CURVE_COLORS[ci % CURVE_COLORS.len()];
        let mut points = String::new();
        for (&xv, &yv) in x.iter().zip(curve.y.iter()) {
            let (px, py) = to_px(xv, yv);
            write!(points, "{px:.1},{py:.1} ").unwrap();
        }
        writeln!(
            out,
            r#"<polyline points="{points}" fill="none" stroke="{color}" stroke-width="1.8" />"#
        )
        .unwrap();

        // Legend entry, top-right corner of the plot area.
        let ly = MARGIN_TOP + 14.0 + 16.0 * ci as f64;
        let lx = MARGIN_LEFT + plot_w - 130.0;
        writeln!(
            out,
            r#"<line x1="{lx:.1}" y1="{ly:.1}" x2="{x2:.1}" y2="{ly:.1}" stroke="{color}" stroke-width="1.8" />"#,
            x2 = lx + 22.0,
        )
        .unwrap();
        writeln!(
            out,
            r#"<text x="{tx:.1}" y="{ly:.1}" font-size="12" dominant-baseline="middle">{}</text>"#,
            escape(curve.label),
            tx = lx + 28.0,
        )
        .unwrap();
    }

    out.push_str("</svg>\n");
    out
}

/// Spatial prediction heatmap over a regular `nx`-by-`ny` grid. `values` is
/// row-major with x varying fastest; cells map onto a blue-to-red ramp.
pub fn intensity_heatmap_svg(title: &str, nx: usize, ny: usize, values: &[f64]) -> String {
    assert_eq!(values.len(), nx * ny, "grid dimensions do not match values");
    let (lo, hi) = finite_range(values);
    let span = (hi - lo).max(1e-12);

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let cell_w = plot_w / nx as f64;
    let cell_h = plot_h / ny as f64;

    let mut out = svg_open();
    frame_and_title(&mut out, title);

    for j in 0..ny {
        for i in 0..nx {
            let t = (values[j * nx + i] - lo) / span;
            let px = MARGIN_LEFT + i as f64 * cell_w;
            // SVG y grows downward; grid row 0 sits at the bottom.
            let py = MARGIN_TOP + (ny - 1 - j) as f64 * cell_h;
            writeln!(
                out,
                r#"<rect x="{px:.1}" y="{py:.1}" width="{w:.2}" height="{h:.2}" fill="{c}" />"#,
                w = cell_w + 0.5,
                h = cell_h + 0.5,
                c = ramp(t),
            )
            .unwrap();
        }
    }

    // Color-scale endpoints under the plot.
    writeln!(
        out,
        r#"<text x="{x:.1}" y="{y:.1}" font-size="11">low: {lo:.3}</text>"#,
        x = MARGIN_LEFT,
        y = HEIGHT - 16.0,
    )
    .unwrap();
    writeln!(
        out,
        r#"<text x="{x:.1}" y="{y:.1}" font-size="11" text-anchor="end">high: {hi:.3}</text>"#,
        x = WIDTH - MARGIN_RIGHT,
        y = HEIGHT - 16.0,
    )
    .unwrap();

    out.push_str("</svg>\n");
    out
}

fn svg_open() -> String {
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n<rect width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"white\" />\n"
    )
}

fn frame_and_title(out: &mut String, title: &str) {
    writeln!(
        out,
        r##"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="none" stroke="#333333" stroke-width="1" />"##,
        x = MARGIN_LEFT,
        y = MARGIN_TOP,
        w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
        h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM,
    )
    .unwrap();
    writeln!(
        out,
        r#"<text x="{x:.1}" y="24" font-size="15" font-weight="bold">{}</text>"#,
        escape(title),
        x = MARGIN_LEFT,
    )
    .unwrap();
}

/// Blue-to-red ramp through white, clamped to [0, 1].
fn ramp(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        let u = t / 0.5;
        (
            (40.0 + u * 215.0) as u8,
            (80.0 + u * 175.0) as u8,
            (180.0 + u * 75.0) as u8,
        )
    } else {
        let u = (t - 0.5) / 0.5;
        (
            255.0 as u8,
            (255.0 - u * 200.0) as u8,
            (255.0 - u * 220.0) as u8,
        )
    };
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn escape(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            _ => ch.to_string(),
        })
        .collect()
}

fn finite_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if lo.is_finite() && hi.is_finite() && lo < hi {
        (lo, hi)
    } else if lo.is_finite() {
        (lo - 0.5, lo + 0.5)
    } else {
        (0.0, 1.0)
    }
}

fn finite_range_2d<'a>(series: impl Iterator<Item = &'a [f64]>) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for s in series {
        let (a, b) = finite_range(s);
        lo = lo.min(a);
        hi = hi.max(b);
    }
    if lo < hi { (lo, hi) } else { (0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_plot_contains_each_series() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let a = [0.0, 1.0, 0.5, -0.5];
        let b = [0.2, 0.8, 0.4, -0.3];
        let svg = smooth_comparison_svg(
            "smooth comparison",
            &x,
            &[
                Curve { label: "naive", y: &a },
                Curve { label: "MCEM", y: &b },
            ],
        );
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>\n"));
        assert!(svg.contains("smooth comparison"));
        assert!(svg.contains("naive"));
        assert!(svg.contains("MCEM"));
        assert_eq!(svg.matches("<polyline").count(), 2);
    }

    #[test]
    fn heatmap_draws_every_cell() {
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let svg = intensity_heatmap_svg("intensity", 4, 3, &values);
        // 12 cells plus the frame and the background rect.
        assert_eq!(svg.matches("<rect").count(), 14);
        assert!(svg.contains("low: 0.000"));
        assert!(svg.contains("high: 11.000"));
    }

    #[test]
    #[should_panic(expected = "grid dimensions")]
    fn heatmap_rejects_bad_dimensions() {
        intensity_heatmap_svg("bad", 3, 3, &[1.0, 2.0]);
    }

    #[test]
    fn ramp_endpoints_are_blue_and_red() {
        assert_eq!(ramp(0.0), "#2850b4");
        assert!(ramp(1.0).starts_with("#ff"));
    }

    #[test]
    fn titles_are_xml_escaped() {
        let svg = smooth_comparison_svg("a < b & c", &[0.0, 1.0], &[Curve { label: "x", y: &[0.0, 1.0] }]);
        assert!(svg.contains("a &lt; b &amp; c"));
    }
}
