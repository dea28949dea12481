//! Shared crosshair state for independently rendered chart panels.
//!
//! Several panels draw the same logical x-axis. Whichever panel last saw
//! pointer motion is the authority: it alone maps raw pointer coordinates
//! to a series index and writes it into the shared state. Every panel,
//! authoritative or not, reads the same resolved index back on its next
//! draw and renders its crosshair there, so the hover stays in lockstep
//! across all charts.

use crate::timeline::TimelinePoint;

/// Identifies one chart panel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelId(pub u16);

/// Snapshot of the shared highlight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightState {
    pub active_panel: Option<PanelId>,
    pub pointer: (f64, f64),
    pub resolved_index: Option<usize>,
    pub visible: bool,
}

impl Default for HighlightState {
    fn default() -> Self {
        Self {
            active_panel: None,
            pointer: (0.0, 0.0),
            resolved_index: None,
            visible: false,
        }
    }
}

/// Single shared instance coordinating the crosshair across panels.
///
/// Single-writer by construction: state-mutating calls from a panel that
/// is not the current authority are ignored, so a late event from a panel
/// the pointer already left cannot clobber the active panel's writes.
#[derive(Debug, Default)]
pub struct HighlightCoordinator {
    state: HighlightState,
}

impl HighlightCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pointer moved over `panel`: it becomes the authority.
    pub fn pointer_active(&mut self, panel: PanelId, x: f64, y: f64) {
        self.state.active_panel = Some(panel);
        self.state.pointer = (x, y);
        self.state.visible = true;
    }

    /// Write the index the authoritative panel resolved from the pointer.
    /// Ignored unless `panel` holds authority.
    pub fn resolve(&mut self, panel: PanelId, index: Option<usize>) {
        if self.state.active_panel == Some(panel) {
            self.state.resolved_index = index;
        }
    }

    /// Pointer left `panel`. Clears the highlight only when the leaving
    /// panel is the authority; a stale leave from another panel is a no-op.
    pub fn pointer_inactive(&mut self, panel: PanelId) {
        if self.state.active_panel == Some(panel) {
            self.state.active_panel = None;
            self.state.resolved_index = None;
            self.state.visible = false;
        }
    }

    /// What every panel renders from: identical for all readers at any
    /// given instant. The resolved index is only meaningful while visible.
    pub fn read_for_render(&self) -> (bool, Option<usize>) {
        (self.state.visible, self.state.resolved_index)
    }

    pub fn is_authoritative(&self, panel: PanelId) -> bool {
        self.state.active_panel == Some(panel)
    }

    pub fn pointer(&self) -> (f64, f64) {
        self.state.pointer
    }

    pub fn state(&self) -> HighlightState {
        self.state
    }
}

/// Nearest present point to `pointer_x` by horizontal distance.
///
/// Missing and out-of-range points never attract the crosshair; `x_of`
/// maps a series index to its screen x (returning `None` for points the
/// panel is not currently displaying).
pub fn nearest_present_index(
    points: &[TimelinePoint],
    x_of: impl Fn(usize) -> Option<f64>,
    pointer_x: f64,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, point) in points.iter().enumerate() {
        if !point.value.is_present() {
            continue;
        }
        let Some(x) = x_of(idx) else {
            continue;
        };
        let distance = (pointer_x - x).abs();
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((idx, distance));
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::PointValue;

    const PANEL_A: PanelId = PanelId(0);
    const PANEL_B: PanelId = PanelId(1);

    fn point(value: PointValue) -> TimelinePoint {
        TimelinePoint {
            hour_ms: 0,
            label: String::new(),
            value,
        }
    }

    #[test]
    fn test_all_panels_read_the_authoritys_index() {
        let mut coordinator = HighlightCoordinator::new();
        coordinator.pointer_active(PANEL_A, 42.0, 7.0);
        coordinator.resolve(PANEL_A, Some(7));

        // Panel B is not authoritative but must render at the same index,
        // even if its own point there is missing or out-of-range.
        assert!(!coordinator.is_authoritative(PANEL_B));
        assert_eq!(coordinator.read_for_render(), (true, Some(7)));
    }

    #[test]
    fn test_non_authority_resolve_is_ignored() {
        let mut coordinator = HighlightCoordinator::new();
        coordinator.pointer_active(PANEL_A, 42.0, 7.0);
        coordinator.resolve(PANEL_A, Some(7));
        coordinator.resolve(PANEL_B, Some(3));

        assert_eq!(coordinator.read_for_render(), (true, Some(7)));
    }

    #[test]
    fn test_authority_hand_off() {
        let mut coordinator = HighlightCoordinator::new();
        coordinator.pointer_active(PANEL_A, 10.0, 0.0);
        coordinator.resolve(PANEL_A, Some(2));

        coordinator.pointer_active(PANEL_B, 90.0, 0.0);
        assert!(coordinator.is_authoritative(PANEL_B));
        assert!(!coordinator.is_authoritative(PANEL_A));
        coordinator.resolve(PANEL_B, Some(9));
        assert_eq!(coordinator.read_for_render(), (true, Some(9)));
    }

    #[test]
    fn test_inactive_clears_only_for_authority() {
        let mut coordinator = HighlightCoordinator::new();
        coordinator.pointer_active(PANEL_A, 10.0, 0.0);
        coordinator.resolve(PANEL_A, Some(2));

        // A stale leave event from B changes nothing.
        coordinator.pointer_inactive(PANEL_B);
        assert_eq!(coordinator.read_for_render(), (true, Some(2)));

        coordinator.pointer_inactive(PANEL_A);
        assert_eq!(coordinator.read_for_render(), (false, None));
        assert!(!coordinator.is_authoritative(PANEL_A));
    }

    #[test]
    fn test_nearest_skips_non_present_points() {
        let points = vec![
            point(PointValue::Present(1.0)),
            point(PointValue::Missing),
            point(PointValue::Present(2.0)),
            point(PointValue::OutOfRange),
        ];
        // Columns at x = 0, 10, 20, 30; pointer right next to the missing
        // column still snaps to a present neighbour.
        let x_of = |idx: usize| Some(idx as f64 * 10.0);
        assert_eq!(nearest_present_index(&points, x_of, 8.0), Some(0));
        assert_eq!(nearest_present_index(&points, x_of, 16.0), Some(2));
        assert_eq!(nearest_present_index(&points, x_of, 31.0), Some(2));
    }

    #[test]
    fn test_nearest_with_no_present_points() {
        let points = vec![point(PointValue::Missing), point(PointValue::OutOfRange)];
        assert_eq!(
            nearest_present_index(&points, |idx| Some(idx as f64), 0.0),
            None
        );
    }

    #[test]
    fn test_nearest_respects_hidden_columns() {
        let points = vec![
            point(PointValue::Present(1.0)),
            point(PointValue::Present(2.0)),
        ];
        // Index 0 is scrolled out of view.
        let x_of = |idx: usize| (idx > 0).then(|| idx as f64 * 10.0);
        assert_eq!(nearest_present_index(&points, x_of, 0.0), Some(1));
    }
}
