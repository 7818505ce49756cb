use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which frame source feeds the derived products: full-resolution data or the
/// cached thumbnail stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionMode {
    Full,
    Low,
}

/// State machine deciding the active resolution mode.
///
/// Auto-switching drops to Low before a timestep change takes effect, so the
/// slow full-resolution load is skipped while scrubbing, and returns to Full
/// only when the user lands back on the index at the most recent switch —
/// whose full frame is still resident, so no reload is needed.
#[derive(Debug, Clone)]
pub struct ResolutionController {
    mode: ResolutionMode,
    auto_switch: bool,
    mode_index: usize,
    mode_slice: usize,
}

impl Default for ResolutionController {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionController {
    pub fn new() -> Self {
        Self {
            mode: ResolutionMode::Full,
            auto_switch: false,
            mode_index: 0,
            mode_slice: 0,
        }
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    pub fn auto_switch(&self) -> bool {
        self.auto_switch
    }

    pub fn set_auto_switch(&mut self, on: bool) {
        self.auto_switch = on;
    }

    /// Timestep at the most recent mode switch — the last fully-loaded index
    /// while in Full mode.
    pub fn last_switch_index(&self) -> usize {
        self.mode_index
    }

    /// Slice index at the most recent mode switch.
    pub fn last_switch_slice(&self) -> usize {
        self.mode_slice
    }

    /// Back to Full mode at index 0, e.g. after a fresh series load.
    pub fn reset(&mut self, auto_switch: bool) {
        self.mode = ResolutionMode::Full;
        self.auto_switch = auto_switch;
        self.mode_index = 0;
        self.mode_slice = 0;
    }

    /// Explicit mode request. Transitions immediately; requesting the current
    /// mode is a no-op. Returns whether the mode changed.
    pub fn request(&mut self, mode: ResolutionMode, index: usize, slice: usize) -> bool {
        if self.mode == mode {
            return false;
        }
        debug!(?mode, index, slice, "resolution switch");
        self.mode = mode;
        self.mode_index = index;
        self.mode_slice = slice;
        true
    }

    /// Auto-switch step applied before a timestep change takes effect:
    /// Full drops to Low so the transient index skips its full load.
    /// `index`/`slice` are the values current at the time of the call.
    pub fn before_index_change(&mut self, index: usize, slice: usize) -> bool {
        if self.auto_switch && self.mode == ResolutionMode::Full {
            self.request(ResolutionMode::Low, index, slice)
        } else {
            false
        }
    }

    /// Auto-switch step applied once the new timestep is in place: Low
    /// returns to Full only when the index matches the last switch point.
    pub fn after_index_change(&mut self, index: usize, slice: usize) -> bool {
        if self.auto_switch && self.mode == ResolutionMode::Low && index == self.mode_index {
            self.request(ResolutionMode::Full, index, slice)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_idempotent() {
        let mut ctl = ResolutionController::new();
        assert!(!ctl.request(ResolutionMode::Full, 3, 0));
        assert_eq!(ctl.last_switch_index(), 0);
        assert!(ctl.request(ResolutionMode::Low, 3, 1));
        assert!(!ctl.request(ResolutionMode::Low, 5, 1));
        assert_eq!(ctl.last_switch_index(), 3);
    }

    #[test]
    fn auto_switch_drops_to_low_and_reenters_at_switch_point() {
        let mut ctl = ResolutionController::new();
        ctl.reset(true);

        // navigate 0 -> 2: drop to Low before the index applies
        assert!(ctl.before_index_change(0, 0));
        assert_eq!(ctl.mode(), ResolutionMode::Low);
        assert!(!ctl.after_index_change(2, 0));
        assert_eq!(ctl.mode(), ResolutionMode::Low);

        // navigate 2 -> 0: already Low, re-enters Full at the switch point
        assert!(!ctl.before_index_change(2, 0));
        assert!(ctl.after_index_change(0, 0));
        assert_eq!(ctl.mode(), ResolutionMode::Full);
        assert_eq!(ctl.last_switch_index(), 0);
    }

    #[test]
    fn auto_switch_disabled_never_changes_mode() {
        let mut ctl = ResolutionController::new();
        ctl.reset(false);
        assert!(!ctl.before_index_change(0, 0));
        assert!(!ctl.after_index_change(4, 0));
        assert_eq!(ctl.mode(), ResolutionMode::Full);
    }

    #[test]
    fn reentry_requires_the_exact_switch_index() {
        let mut ctl = ResolutionController::new();
        ctl.reset(true);
        ctl.before_index_change(5, 0);
        assert!(!ctl.after_index_change(4, 0));
        assert!(!ctl.after_index_change(6, 0));
        assert!(ctl.after_index_change(5, 0));
        assert_eq!(ctl.mode(), ResolutionMode::Full);
    }
}
