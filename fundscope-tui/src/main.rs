use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use fundscope_data::{ChartRange, Metric};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Position, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
};
use tokio::sync::Mutex;

mod app;
mod chart;
mod table;

use app::{
    ALL_PANELS, AppState, ChartStage, FUNDING_PANEL, PRICE_PANEL, VOLUME_PANEL, View,
    refresh_feed, spawn_chart_load, spawn_feed_refresh,
};
use chart::{C_ACCENT, C_BRIGHT, C_BUY, C_DIM, C_SELL};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let data_dir = PathBuf::from(
        std::env::var("FUNDSCOPE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
    );
    let refresh_secs = std::env::var("FUNDSCOPE_REFRESH_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(60);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create app state and start the periodic feed refresh
    let state = Arc::new(Mutex::new(AppState::new(data_dir)));
    spawn_feed_refresh(state.clone(), refresh_secs);

    // Run TUI
    let res = run_app(&mut terminal, state).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    state: Arc<Mutex<AppState>>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);

    loop {
        {
            let mut app = state.lock().await;
            terminal.draw(|f| ui(f, &mut app))?;
        }

        if event::poll(tick_rate)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    let mut app = state.lock().await;
                    if handle_key(&mut app, key, &state) {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => {
                    let mut app = state.lock().await;
                    handle_mouse(&mut app, mouse);
                }
                _ => {}
            }
        }
    }
}

/// Returns true when the app should quit.
fn handle_key(app: &mut AppState, key: KeyEvent, state: &Arc<Mutex<AppState>>) -> bool {
    // Search entry swallows everything except its own exits.
    if app.searching {
        match key.code {
            KeyCode::Esc => {
                app.searching = false;
                app.search.clear();
                app.selected = 0;
            }
            KeyCode::Enter => app.searching = false,
            KeyCode::Backspace => {
                app.search.pop();
                app.selected = 0;
            }
            KeyCode::Char(c) => {
                app.search.push(c);
                app.selected = 0;
            }
            _ => {}
        }
        return false;
    }

    match (app.view, key.code) {
        (_, KeyCode::Char('q')) => return true,
        (_, KeyCode::Char('m')) => {
            app.session.display_mode = app.session.display_mode.toggle();
        }

        (View::Table, KeyCode::Char('/')) => {
            app.searching = true;
            app.search.clear();
            app.selected = 0;
        }
        (View::Table, KeyCode::Up) => app.move_selection(-1),
        (View::Table, KeyCode::Down) => app.move_selection(1),
        (View::Table, KeyCode::PageUp) => app.move_selection(-10),
        (View::Table, KeyCode::PageDown) => app.move_selection(10),
        (View::Table, KeyCode::Char('[')) => {
            app.session.adv_window = app.session.adv_window.narrow();
            app.refresh_adv();
        }
        (View::Table, KeyCode::Char(']')) => {
            app.session.adv_window = app.session.adv_window.widen();
            app.refresh_adv();
        }
        (View::Table, KeyCode::Char('r')) => {
            let state = state.clone();
            tokio::spawn(async move { refresh_feed(&state).await });
        }
        (View::Table, KeyCode::Enter) => {
            if let Some((coin, generation)) = app.open_charts() {
                spawn_chart_load(state.clone(), coin, generation);
            }
        }

        (View::Charts, KeyCode::Esc | KeyCode::Backspace) => app.close_charts(),
        (View::Charts, KeyCode::Char('v')) => app.show_volume = !app.show_volume,
        (View::Charts, KeyCode::Char('p')) => app.show_price = !app.show_price,
        (View::Charts, KeyCode::Char('r')) => {
            if let Some((coin, generation)) = app.reload_charts() {
                spawn_chart_load(state.clone(), coin, generation);
            }
        }
        (View::Charts, KeyCode::Char(c)) => {
            if let Some(range) = range_for_key(c) {
                if app.session.chart_range != range {
                    // Supersedes any fetch still in flight for the old range.
                    app.session.chart_range = range;
                    if let Some((coin, generation)) = app.reload_charts() {
                        spawn_chart_load(state.clone(), coin, generation);
                    }
                }
            }
        }
        _ => {}
    }
    false
}

fn range_for_key(c: char) -> Option<ChartRange> {
    match c {
        '1' => Some(ChartRange::OneDay),
        '2' => Some(ChartRange::OneWeek),
        '3' => Some(ChartRange::TwoWeeks),
        '4' => Some(ChartRange::OneMonth),
        '5' => Some(ChartRange::TwoMonths),
        '6' => Some(ChartRange::ThreeMonths),
        _ => None,
    }
}

fn handle_mouse(app: &mut AppState, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Moved | MouseEventKind::Drag(_) => {
            if app.view == View::Charts {
                handle_pointer(app, mouse.column, mouse.row);
            }
        }
        MouseEventKind::ScrollUp if app.view == View::Table => app.move_selection(-1),
        MouseEventKind::ScrollDown if app.view == View::Table => app.move_selection(1),
        _ => {}
    }
}

/// Route pointer motion to the panel under it; that panel becomes the
/// crosshair authority and resolves the shared index.
fn handle_pointer(app: &mut AppState, column: u16, row: u16) {
    let position = Position::new(column, row);
    let hit = app
        .panel_rects
        .iter()
        .copied()
        .find(|(_, rect)| rect.contains(position));

    match hit {
        Some((panel, rect)) => {
            app.highlight.pointer_active(panel, f64::from(column), f64::from(row));
            let inner = chart::inner_rect(rect);
            let index = app
                .panel_points(panel)
                .and_then(|points| chart::resolve_pointer(points, inner, f64::from(column)));
            app.highlight.resolve(panel, index);
        }
        None => {
            // Only the authority's leave actually clears the highlight.
            for panel in ALL_PANELS {
                app.highlight.pointer_inactive(panel);
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_status_bar(f, chunks[0], app);

    match app.view {
        View::Table => {
            app.panel_rects.clear();
            table::render_table(f, chunks[1], app);
        }
        View::Charts => render_charts(f, chunks[1], app),
    }

    render_help_line(f, chunks[2], app);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    let refresh = match &app.last_refresh {
        Some(at) => format!(" updated {} ", at.format("%H:%M:%S")),
        None => " waiting for feed ".to_string(),
    };
    let status_color = if app.feed_error.is_some() { C_SELL } else { C_BUY };

    let line = Line::from(vec![
        Span::styled(
            " ◆ FUNDSCOPE ◆ ",
            Style::default().fg(C_ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(refresh, Style::default().fg(status_color)),
        Span::styled(
            format!(" {} ", match app.session.display_mode {
                fundscope_data::DisplayMode::Annualized => "APR",
                fundscope_data::DisplayMode::Hourly => "HOURLY",
            }),
            Style::default().fg(C_BRIGHT),
        ),
        Span::styled(
            format!(" range {} ", app.session.chart_range.as_str()),
            Style::default().fg(C_DIM),
        ),
        Span::styled(
            format!(" adv {}d ", app.session.adv_window.days()),
            Style::default().fg(C_DIM),
        ),
    ]);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(C_ACCENT));

    f.render_widget(
        Paragraph::new(line).block(block).alignment(Alignment::Center),
        area,
    );
}

fn render_charts(f: &mut Frame, area: Rect, app: &mut AppState) {
    let mut rects = Vec::new();

    match app.charts.as_ref() {
        None => {}
        Some(view) => match &view.stage {
            ChartStage::Loading => {
                let loading = Paragraph::new(Line::from(Span::styled(
                    format!("Loading {} history...", view.coin),
                    Style::default().fg(C_DIM).add_modifier(Modifier::ITALIC),
                )))
                .alignment(Alignment::Center);
                f.render_widget(loading, area);
            }
            ChartStage::Ready(data) => {
                let mut panels = vec![(FUNDING_PANEL, Metric::Funding, &data.funding)];
                if app.show_volume {
                    panels.push((VOLUME_PANEL, Metric::Volume, &data.volume));
                }
                if app.show_price {
                    panels.push((PRICE_PANEL, Metric::Price, &data.price));
                }

                let constraints =
                    vec![Constraint::Ratio(1, panels.len() as u32); panels.len()];
                let areas = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints(constraints)
                    .split(area);

                let crosshair = app.highlight.read_for_render();
                let mode = app.session.display_mode;
                let range = app.session.chart_range;
                let fallback = app.chart_summary().cloned();

                for (slot, (panel, metric, series)) in panels.into_iter().enumerate() {
                    chart::render_panel(
                        f,
                        areas[slot],
                        metric,
                        &view.coin,
                        series,
                        mode,
                        range,
                        crosshair,
                        fallback.as_ref(),
                    );
                    rects.push((panel, areas[slot]));
                }
            }
        },
    }

    app.panel_rects = rects;
}

fn render_help_line(f: &mut Frame, area: Rect, app: &AppState) {
    let text = if app.searching {
        format!(" /{}_  (Enter keep · Esc clear)", app.search)
    } else {
        match app.view {
            View::Table => {
                " ↑/↓ select · Enter charts · / search · m mode · [/] adv window · r refresh · q quit "
                    .to_string()
            }
            View::Charts => {
                " hover to inspect · 1-6 range · v volume · p price · m mode · r reload · Esc back · q quit "
                    .to_string()
            }
        }
    };
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(text, Style::default().fg(C_DIM)))),
        area,
    );
}

/// Logging goes to a file (the terminal belongs to ratatui); enabled by
/// setting FUNDSCOPE_LOG to a path.
fn init_logging() {
    let Ok(path) = std::env::var("FUNDSCOPE_LOG") else {
        return;
    };
    let Ok(file) = std::fs::File::create(&path) else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
}
