//! Badge sink for the pending-action count.

use tracing::debug;

/// Badge colour while actions are pending.
pub const PENDING_COLOR: &str = "#d9534f";
/// Badge colour when nothing is pending.
pub const IDLE_COLOR: &str = "#5cb85c";

/// What the badge should show for a given count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BadgeState {
    pub text: String,
    pub color: &'static str,
    pub tooltip: String,
}

impl BadgeState {
    pub fn for_count(count: u32) -> Self {
        match count {
            0 => Self {
                text: String::new(),
                color: IDLE_COLOR,
                tooltip: "NoKey".to_string(),
            },
            1 => Self {
                text: "1".to_string(),
                color: PENDING_COLOR,
                tooltip: "NoKey: 1 pending action".to_string(),
            },
            n => Self {
                text: n.to_string(),
                color: PENDING_COLOR,
                tooltip: format!("NoKey: {n} pending actions"),
            },
        }
    }
}

/// Host surface showing the badge (browser action, tray icon, window title).
pub trait BadgeSink: Send + Sync {
    fn set_text(&self, text: &str);

    fn set_background_color(&self, color: &str);

    fn set_tooltip(&self, tooltip: &str);

    fn apply(&self, state: &BadgeState) {
        self.set_text(&state.text);
        self.set_background_color(state.color);
        self.set_tooltip(&state.tooltip);
    }
}

/// Sink that only logs. Used when the host has no badge surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBadge;

impl BadgeSink for TracingBadge {
    fn set_text(&self, text: &str) {
        debug!(text, "badge text");
    }

    fn set_background_color(&self, color: &str) {
        debug!(color, "badge colour");
    }

    fn set_tooltip(&self, tooltip: &str) {
        debug!(tooltip, "badge tooltip");
    }
}
