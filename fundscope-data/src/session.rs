//! Explicit session state: the selections every component reads.
//!
//! One structure, owned by the application and passed where needed, in
//! place of ambient globals. The fetch generation implements last-write
//! supersession: a selection change bumps the generation, and any response
//! still in flight for an older generation is discarded on arrival.

use crate::summary::AdvWindow;
use crate::timeline::ChartRange;

/// Hours in a year; the annualization divisor for hourly display.
const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// How funding rates are formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Percent APR, the feed's native unit.
    #[default]
    Annualized,
    /// Per-hour percentage.
    Hourly,
}

impl DisplayMode {
    pub fn toggle(&self) -> Self {
        match self {
            DisplayMode::Annualized => DisplayMode::Hourly,
            DisplayMode::Hourly => DisplayMode::Annualized,
        }
    }

    /// Convert an annualized percent rate into this mode's unit.
    pub fn convert(&self, annualized: f64) -> f64 {
        match self {
            DisplayMode::Annualized => annualized,
            DisplayMode::Hourly => annualized / HOURS_PER_YEAR,
        }
    }

    /// Format an annualized percent rate for display.
    pub fn format(&self, annualized: f64) -> String {
        match self {
            DisplayMode::Annualized => format!("{:.2}%", annualized),
            DisplayMode::Hourly => format!("{:.6}%", self.convert(annualized)),
        }
    }
}

/// The operator's current selections plus the fetch generation.
#[derive(Debug)]
pub struct SessionState {
    pub display_mode: DisplayMode,
    pub chart_range: ChartRange,
    pub adv_window: AdvWindow,
    generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::default(),
            chart_range: ChartRange::OneDay,
            adv_window: AdvWindow::default(),
            generation: 0,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation, to stamp an outgoing fetch with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Supersede every in-flight fetch; returns the new generation.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Whether a response stamped with `generation` is still wanted.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}
