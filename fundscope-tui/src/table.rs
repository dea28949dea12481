//! The overview table: one row per coin, merged from the summary feed.

use fundscope_data::{DisplayMode, EntitySummary};
use ratatui::Frame;
use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, List, ListItem, Paragraph};

use crate::app::AppState;
use crate::chart::{C_BRIGHT, C_BUY, C_DIM, C_NEUTRAL, C_SELL, format_adv};

/// APR at or below which a positive rate reads as unremarkable
/// (0.00125%/h, the baseline funding level).
const LOW_POSITIVE_APR: f64 = 10.951;

fn rate_style(rate: f64) -> Style {
    if rate < 0.0 {
        Style::default().fg(C_SELL)
    } else if rate <= LOW_POSITIVE_APR {
        Style::default().fg(C_NEUTRAL)
    } else {
        Style::default().fg(C_BUY)
    }
}

fn rate_cell(value: Option<f64>, mode: DisplayMode, width: usize) -> Span<'static> {
    match value {
        Some(rate) => Span::styled(format!("{:>width$}", mode.format(rate)), rate_style(rate)),
        None => Span::styled(format!("{:>width$}", "—"), Style::default().fg(C_DIM)),
    }
}

fn coin_cell(row: &EntitySummary) -> Vec<Span<'static>> {
    let mut spans = vec![Span::styled(
        format!("{:<8}", row.coin),
        Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
    )];
    if row.is_new {
        spans.push(Span::styled(
            format!("{:<10}", "(new)"),
            Style::default().fg(Color::Rgb(255, 215, 0)),
        ));
    } else if row.is_delisted {
        spans.push(Span::styled(
            format!("{:<10}", "(delisted)"),
            Style::default().fg(C_DIM).add_modifier(Modifier::ITALIC),
        ));
    } else {
        spans.push(Span::raw(" ".repeat(10)));
    }
    spans
}

pub fn render_table(f: &mut Frame, area: Rect, app: &AppState) {
    let mode = app.session.display_mode;
    let rows = app.filtered_rows();

    let title = Line::from(vec![
        Span::styled(
            " FUNDING RATES ",
            Style::default().fg(C_BRIGHT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("({} coins) ", rows.len()),
            Style::default().fg(C_DIM),
        ),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(C_DIM))
        .title_top(title.alignment(Alignment::Center));

    let inner = block.inner(area);
    f.render_widget(block, area);
    if inner.height < 2 {
        return;
    }

    if let Some(error) = &app.feed_error {
        let note = if app.summaries.is_empty() {
            format!("summary feed unavailable: {}", error)
        } else {
            format!("summary feed unavailable: {} (showing last good data)", error)
        };
        let banner = Paragraph::new(Line::from(Span::styled(
            note,
            Style::default().fg(C_SELL),
        )));
        f.render_widget(
            banner,
            Rect {
                height: 1,
                ..inner
            },
        );
    } else if app.summaries.is_empty() {
        let waiting = Paragraph::new(Line::from(Span::styled(
            "Waiting for summary feed...",
            Style::default().fg(C_DIM).add_modifier(Modifier::ITALIC),
        )))
        .alignment(Alignment::Center);
        f.render_widget(waiting, inner);
        return;
    }

    let header_offset = if app.feed_error.is_some() { 1 } else { 0 };
    let header = Line::from(Span::styled(
        format!(
            "{:<8}{:<10}{:>12}{:>12}{:>12}{:>12}{:>12}",
            "COIN",
            "",
            "RATE",
            "1D AVG",
            "3D AVG",
            "5D AVG",
            format!("ADV {}d", app.session.adv_window.days()),
        ),
        Style::default().fg(C_DIM).add_modifier(Modifier::UNDERLINED),
    ));
    f.render_widget(
        Paragraph::new(header),
        Rect {
            y: inner.y + header_offset,
            height: 1,
            ..inner
        },
    );

    let list_area = Rect {
        y: inner.y + header_offset + 1,
        height: inner.height.saturating_sub(header_offset + 1),
        ..inner
    };

    let page = list_area.height as usize;
    let offset = app.selected.saturating_sub(page.saturating_sub(1) / 2);
    let items: Vec<ListItem> = rows
        .iter()
        .enumerate()
        .skip(offset)
        .take(page)
        .map(|(idx, row)| {
            let mut spans = coin_cell(row);
            spans.push(rate_cell(row.latest_rate, mode, 12));
            spans.push(rate_cell(row.avg_1d, mode, 12));
            spans.push(rate_cell(row.avg_3d, mode, 12));
            spans.push(rate_cell(row.avg_5d, mode, 12));
            match row.adv {
                Some(adv) => spans.push(Span::styled(
                    format!("{:>12}", format_adv(adv)),
                    Style::default().fg(C_BRIGHT),
                )),
                None => spans.push(Span::styled(
                    format!("{:>12}", "—"),
                    Style::default().fg(C_DIM),
                )),
            }

            let mut line = Line::from(spans);
            if idx == app.selected {
                line = line.style(Style::default().add_modifier(Modifier::REVERSED));
            }
            ListItem::new(line)
        })
        .collect();

    f.render_widget(List::new(items), list_area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_style_thresholds() {
        let negative = rate_style(-1.0);
        let low = rate_style(10.95);
        let high = rate_style(11.0);
        assert_eq!(negative.fg, Some(C_SELL));
        assert_eq!(low.fg, Some(C_NEUTRAL));
        assert_eq!(high.fg, Some(C_BUY));
    }
}
