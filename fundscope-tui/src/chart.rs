//! Chart panel rendering: one terminal column per hourly bucket, with the
//! shared crosshair column highlighted across every panel.

use fundscope_data::{
    ChartRange, DisplayMode, EntitySummary, Metric, PointValue, TimelinePoint,
    nearest_present_index,
};
use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};

use crate::app::SeriesResult;

// Shared palette
pub const C_BUY: Color = Color::Rgb(100, 220, 100);
pub const C_SELL: Color = Color::Rgb(220, 100, 100);
pub const C_NEUTRAL: Color = Color::Rgb(180, 180, 100);
pub const C_DIM: Color = Color::Rgb(120, 120, 120);
pub const C_BRIGHT: Color = Color::Rgb(220, 220, 220);
pub const C_ACCENT: Color = Color::Rgb(100, 180, 220);
const C_CROSSHAIR_BG: Color = Color::Rgb(55, 55, 75);

/// Index of the first point shown when the series is wider than the panel:
/// the newest `width` buckets stay in view.
pub fn visible_offset(len: usize, width: usize) -> usize {
    len.saturating_sub(width)
}

/// Screen column of a series index inside `inner`, if currently in view.
pub fn column_of(index: usize, len: usize, inner: Rect) -> Option<u16> {
    let width = inner.width as usize;
    let offset = visible_offset(len, width);
    (index >= offset && index < offset + width).then(|| inner.x + (index - offset) as u16)
}

/// Map a pointer x to the nearest present bucket of this panel's series.
pub fn resolve_pointer(points: &[TimelinePoint], inner: Rect, pointer_x: f64) -> Option<usize> {
    nearest_present_index(
        points,
        |idx| column_of(idx, points.len(), inner).map(f64::from),
        pointer_x,
    )
}

/// The plot area inside a panel's borders.
pub fn inner_rect(area: Rect) -> Rect {
    Block::default().borders(Borders::ALL).inner(area)
}

/// Scale a value into a plot row (row 0 at the top).
fn scale_row(value: f64, lo: f64, hi: f64, height: u16) -> u16 {
    if height == 0 {
        return 0;
    }
    let t = ((value - lo) / (hi - lo)).clamp(0.0, 1.0);
    ((1.0 - t) * (height - 1) as f64).round() as u16
}

fn metric_color(metric: Metric) -> Color {
    match metric {
        Metric::Funding => C_ACCENT,
        Metric::Volume => C_NEUTRAL,
        Metric::Price => C_BRIGHT,
    }
}

/// Value text shown in the crosshair tooltip.
pub fn format_value(metric: Metric, mode: DisplayMode, value: f64) -> String {
    match metric {
        Metric::Funding => mode.format(value),
        Metric::Volume => format_adv(value),
        Metric::Price => {
            if value >= 1.0 {
                format!("${:.2}", value)
            } else {
                format!("${:.6}", value)
            }
        }
    }
}

/// Dollar figure with a K/M/B suffix.
pub fn format_adv(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("${:.2}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("${:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.2}K", value / 1_000.0)
    } else {
        format!("${:.2}", value)
    }
}

/// Render one chart panel.
///
/// `crosshair` is whatever the coordinator reported for this frame; the
/// vertical guide is drawn whether or not this panel owns the pointer, and
/// whether or not its own bucket at that index has data.
#[allow(clippy::too_many_arguments)]
pub fn render_panel(
    f: &mut Frame,
    area: Rect,
    metric: Metric,
    coin: &str,
    series: &SeriesResult,
    mode: DisplayMode,
    range: ChartRange,
    crosshair: (bool, Option<usize>),
    fallback: Option<&EntitySummary>,
) {
    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(metric_color(metric)))
        .title(Line::from(Span::styled(
            format!(" {} — {} ({}) ", metric.title(), coin, range.as_str().to_uppercase()),
            Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
        )));

    let points = match series {
        Ok(points) => points,
        Err(reason) => {
            let message = Paragraph::new(Line::from(Span::styled(
                format!("chart hidden — {}", reason),
                Style::default().fg(C_SELL).add_modifier(Modifier::ITALIC),
            )))
            .block(block)
            .alignment(Alignment::Center);
            f.render_widget(message, area);
            return;
        }
    };

    // Tooltip for the crosshair bucket, identical index on every panel.
    let (visible, resolved) = crosshair;
    if visible {
        if let Some(point) = resolved.and_then(|idx| points.get(idx)) {
            let text = match point.value {
                PointValue::Present(v) => {
                    format!(" {}: {} ", point.label, format_value(metric, mode, v))
                }
                _ => format!(" {}: no data ", point.label),
            };
            block = block.title_bottom(
                Line::from(Span::styled(text, Style::default().fg(C_BRIGHT)))
                    .alignment(Alignment::Right),
            );
        }
    }

    if !points.iter().any(|p| p.value.is_present()) {
        render_no_data(f, area, block, metric, coin, mode, fallback);
        return;
    }

    let inner = block.inner(area);
    f.render_widget(block, area);
    if inner.width == 0 || inner.height < 2 {
        return;
    }

    let plot_height = inner.height - 1;
    let width = inner.width as usize;
    let offset = visible_offset(points.len(), width);
    let visible_points = &points[offset..];

    // Scale over the present values currently in view.
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for point in visible_points {
        if let PointValue::Present(v) = point.value {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if !lo.is_finite() {
        // Every present point is scrolled out of view.
        lo = 0.0;
        hi = 1.0;
    }
    if metric == Metric::Funding {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if hi - lo < f64::EPSILON {
        hi += 1.0;
        lo -= 1.0;
    }

    let baseline = match metric {
        Metric::Funding => scale_row(0.0, lo, hi, plot_height),
        Metric::Volume | Metric::Price => plot_height - 1,
    };

    let mut lines: Vec<Line> = Vec::with_capacity(inner.height as usize);
    for row in 0..plot_height {
        let mut spans: Vec<Span> = Vec::with_capacity(width);
        for col in 0..width {
            // Series narrower than the panel: pad the right edge.
            let Some(point) = visible_points.get(col) else {
                spans.push(Span::raw(" "));
                continue;
            };
            let index = offset + col;
            let on_crosshair = visible && resolved == Some(index);

            let (glyph, mut style) = cell(metric, &point.value, row, baseline, lo, hi, plot_height);
            if on_crosshair {
                style = style.bg(C_CROSSHAIR_BG).add_modifier(Modifier::BOLD);
            }
            spans.push(Span::styled(glyph, style));
        }
        lines.push(Line::from(spans));
    }
    lines.push(axis_line(points, offset, width, range.label_stride()));

    f.render_widget(Paragraph::new(lines), inner);
}

/// One plot cell: glyph plus style for a bucket at a given row.
fn cell(
    metric: Metric,
    value: &PointValue,
    row: u16,
    baseline: u16,
    lo: f64,
    hi: f64,
    height: u16,
) -> (&'static str, Style) {
    match value {
        PointValue::Present(v) => {
            let value_row = scale_row(*v, lo, hi, height);
            let filled = match metric {
                Metric::Funding => {
                    if *v >= 0.0 {
                        row >= value_row && row <= baseline
                    } else {
                        row >= baseline && row <= value_row
                    }
                }
                Metric::Volume => row >= value_row,
                Metric::Price => row == value_row,
            };
            if !filled {
                return (" ", Style::default());
            }
            let color = match metric {
                Metric::Funding => {
                    if *v >= 0.0 {
                        C_BUY
                    } else {
                        C_SELL
                    }
                }
                Metric::Volume => C_ACCENT,
                Metric::Price => C_BRIGHT,
            };
            let glyph = if metric == Metric::Price { "•" } else { "█" };
            (glyph, Style::default().fg(color))
        }
        // A gap the operator should notice: marked on the baseline.
        PointValue::Missing if row == baseline => ("×", Style::default().fg(C_NEUTRAL)),
        PointValue::Missing => (" ", Style::default()),
        PointValue::OutOfRange => (" ", Style::default()),
    }
}

/// Hour labels along the bottom, one per label stride, left-aligned at
/// their bucket's column when there is room.
fn axis_line(points: &[TimelinePoint], offset: usize, width: usize, stride: usize) -> Line<'static> {
    let mut chars: Vec<char> = vec![' '; width];
    let stride = stride.max(1);
    let mut next_free = 0usize;

    for col in 0..width {
        let index = offset + col;
        if index >= points.len() {
            break;
        }
        if index % stride != 0 || col < next_free {
            continue;
        }
        let label = &points[index].label;
        if col + label.len() > width {
            break;
        }
        for (i, ch) in label.chars().enumerate() {
            chars[col + i] = ch;
        }
        next_free = col + label.len() + 2;
    }

    Line::from(Span::styled(
        chars.into_iter().collect::<String>(),
        Style::default().fg(C_DIM),
    ))
}

/// Zero present points: the distinct "no data in window" state, with the
/// summary window averages as a fallback when they exist.
fn render_no_data(
    f: &mut Frame,
    area: Rect,
    block: Block,
    metric: Metric,
    coin: &str,
    mode: DisplayMode,
    fallback: Option<&EntitySummary>,
) {
    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("No {} data for {} in this range.", metric.title(), coin),
            Style::default().fg(C_DIM).add_modifier(Modifier::ITALIC),
        )),
    ];

    if metric == Metric::Funding {
        if let Some(summary) = fallback {
            let avg = |label: &str, value: Option<f64>| {
                let text = value
                    .map(|v| mode.format(v))
                    .unwrap_or_else(|| "—".to_string());
                Line::from(vec![
                    Span::styled(format!("  {} avg: ", label), Style::default().fg(C_DIM)),
                    Span::styled(text, Style::default().fg(C_BRIGHT)),
                ])
            };
            lines.push(Line::from(""));
            lines.push(avg("1d", summary.avg_1d));
            lines.push(avg("3d", summary.avg_3d));
            lines.push(avg("5d", summary.avg_5d));
        }
    }

    let message = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Center);
    f.render_widget(message, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: PointValue) -> TimelinePoint {
        TimelinePoint {
            hour_ms: 0,
            label: "07 AM 12/05".to_string(),
            value,
        }
    }

    fn inner(x: u16, width: u16) -> Rect {
        Rect {
            x,
            y: 1,
            width,
            height: 10,
        }
    }

    #[test]
    fn test_visible_offset_keeps_newest() {
        assert_eq!(visible_offset(100, 40), 60);
        assert_eq!(visible_offset(10, 40), 0);
    }

    #[test]
    fn test_column_of_maps_visible_slice() {
        let area = inner(5, 40);
        // 100 points, columns show indices 60..100 at x 5..45.
        assert_eq!(column_of(60, 100, area), Some(5));
        assert_eq!(column_of(99, 100, area), Some(44));
        assert_eq!(column_of(59, 100, area), None);
    }

    #[test]
    fn test_resolve_pointer_snaps_to_present() {
        let mut points: Vec<TimelinePoint> =
            (0..10).map(|_| point(PointValue::Missing)).collect();
        points[3] = point(PointValue::Present(1.0));
        points[7] = point(PointValue::Present(2.0));

        let area = inner(0, 10);
        assert_eq!(resolve_pointer(&points, area, 2.0), Some(3));
        assert_eq!(resolve_pointer(&points, area, 6.0), Some(7));
        // Pointer over a missing bucket still snaps to the nearest data.
        assert_eq!(resolve_pointer(&points, area, 5.0), Some(3));
    }

    #[test]
    fn test_resolve_pointer_ignores_scrolled_out_points() {
        let mut points: Vec<TimelinePoint> =
            (0..20).map(|_| point(PointValue::Missing)).collect();
        points[0] = point(PointValue::Present(1.0));
        points[19] = point(PointValue::Present(2.0));

        // Width 10: only indices 10..20 are on screen.
        let area = inner(0, 10);
        assert_eq!(resolve_pointer(&points, area, 0.0), Some(19));
    }

    #[test]
    fn test_scale_row_bounds() {
        assert_eq!(scale_row(10.0, 0.0, 10.0, 8), 0);
        assert_eq!(scale_row(0.0, 0.0, 10.0, 8), 7);
        assert_eq!(scale_row(5.0, 0.0, 10.0, 8), 4);
    }

    #[test]
    fn test_format_adv_suffixes() {
        assert_eq!(format_adv(2_500_000_000.0), "$2.50B");
        assert_eq!(format_adv(12_300_000.0), "$12.30M");
        assert_eq!(format_adv(450_000.0), "$450.00K");
        assert_eq!(format_adv(123.456), "$123.46");
    }

    #[test]
    fn test_format_value_follows_display_mode() {
        assert_eq!(
            format_value(Metric::Funding, DisplayMode::Annualized, 10.95),
            "10.95%"
        );
        assert_eq!(
            format_value(Metric::Funding, DisplayMode::Hourly, 10.95),
            "0.001250%"
        );
        assert_eq!(format_value(Metric::Price, DisplayMode::Annualized, 0.5), "$0.500000");
    }
}
