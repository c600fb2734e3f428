//! Popup notification state machine.
//!
//! States: `Idle -> PendingOpen -> Open -> Idle`, with `Suppressed` reachable
//! from anywhere. The machine is pure: time is passed in and the actions it
//! returns are carried out by the hub.

use std::time::{Duration, Instant};

/// Observable phase of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationPhase {
    Idle,
    PendingOpen,
    Open,
    Suppressed,
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationAction {
    OpenPopup,
    ClosePopup,
}

#[derive(Debug, Default, Clone)]
pub struct NotificationMachine {
    has_popup_open: bool,
    pending_open: bool,
    previous_count: u32,
    suppressed_until: Option<Instant>,
}

impl NotificationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn expire(&mut self, now: Instant) {
        if matches!(self.suppressed_until, Some(until) if now >= until) {
            self.suppressed_until = None;
        }
    }

    fn is_suppressed(&self) -> bool {
        self.suppressed_until.is_some()
    }

    pub fn phase(&mut self, now: Instant) -> NotificationPhase {
        self.expire(now);
        if self.is_suppressed() {
            NotificationPhase::Suppressed
        } else if self.pending_open {
            NotificationPhase::PendingOpen
        } else if self.has_popup_open {
            NotificationPhase::Open
        } else {
            NotificationPhase::Idle
        }
    }

    pub fn previous_count(&self) -> u32 {
        self.previous_count
    }

    /// A new pending-action count arrived.
    ///
    /// Opens the popup only on a rising count with nothing open and no
    /// suppression in effect. A count of zero closes an open popup. While
    /// suppressed the count is recorded and nothing else happens.
    pub fn on_count(&mut self, count: u32, now: Instant) -> Option<NotificationAction> {
        self.expire(now);
        let previous = std::mem::replace(&mut self.previous_count, count);
        if self.is_suppressed() {
            return None;
        }
        if count == 0 {
            if self.has_popup_open || self.pending_open {
                self.has_popup_open = false;
                self.pending_open = false;
                return Some(NotificationAction::ClosePopup);
            }
            return None;
        }
        if count > previous && !self.has_popup_open && !self.pending_open {
            self.pending_open = true;
            return Some(NotificationAction::OpenPopup);
        }
        None
    }

    /// The open-popup broadcast went out.
    pub fn confirm_open(&mut self) {
        if self.pending_open {
            self.pending_open = false;
            self.has_popup_open = true;
        }
    }

    /// The popup reported that it closed.
    pub fn on_close(&mut self) {
        self.has_popup_open = false;
        self.pending_open = false;
    }

    /// Close the popup and keep it closed for `duration`.
    pub fn on_suppress(&mut self, duration: Duration, now: Instant) -> NotificationAction {
        self.has_popup_open = false;
        self.pending_open = false;
        self.suppressed_until = Some(now + duration);
        NotificationAction::ClosePopup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drive(machine: &mut NotificationMachine, counts: &[u32], now: Instant) -> usize {
        let mut opens = 0;
        for &count in counts {
            if machine.on_count(count, now) == Some(NotificationAction::OpenPopup) {
                opens += 1;
                machine.confirm_open();
            }
        }
        opens
    }

    #[test]
    fn test_debounce_sequence() {
        let mut machine = NotificationMachine::new();
        assert_eq!(drive(&mut machine, &[0, 1, 2, 0, 1], Instant::now()), 2);
    }

    #[test]
    fn test_phases() {
        let now = Instant::now();
        let mut machine = NotificationMachine::new();
        assert_eq!(machine.phase(now), NotificationPhase::Idle);
        assert_eq!(machine.on_count(1, now), Some(NotificationAction::OpenPopup));
        assert_eq!(machine.phase(now), NotificationPhase::PendingOpen);
        machine.confirm_open();
        assert_eq!(machine.phase(now), NotificationPhase::Open);
        machine.on_close();
        assert_eq!(machine.phase(now), NotificationPhase::Idle);
    }

    #[test]
    fn test_count_zero_closes() {
        let now = Instant::now();
        let mut machine = NotificationMachine::new();
        machine.on_count(3, now);
        machine.confirm_open();
        assert_eq!(machine.on_count(0, now), Some(NotificationAction::ClosePopup));
        assert_eq!(machine.on_count(0, now), None);
    }

    #[test]
    fn test_suppression_window() {
        let start = Instant::now();
        let mut machine = NotificationMachine::new();
        machine.on_count(1, start);
        machine.confirm_open();
        assert_eq!(
            machine.on_suppress(Duration::from_secs(20), start),
            NotificationAction::ClosePopup
        );
        assert_eq!(machine.phase(start), NotificationPhase::Suppressed);

        // Rising counts inside the window are recorded but do not open.
        assert_eq!(machine.on_count(2, start + Duration::from_secs(5)), None);
        assert_eq!(machine.previous_count(), 2);

        // After the window only a further rise opens again.
        let later = start + Duration::from_secs(21);
        assert_eq!(machine.phase(later), NotificationPhase::Idle);
        assert_eq!(machine.on_count(2, later), None);
        assert_eq!(machine.on_count(3, later), Some(NotificationAction::OpenPopup));
    }

    #[test]
    fn test_no_reopen_while_open() {
        let now = Instant::now();
        let mut machine = NotificationMachine::new();
        assert_eq!(drive(&mut machine, &[1, 2, 3, 4], now), 1);
    }

    proptest! {
        // Exactly one open per rise from zero; the machine starts at zero.
        #[test]
        fn test_opens_bounded_by_rises(counts in prop::collection::vec(0u32..5, 0..40)) {
            let mut machine = NotificationMachine::new();
            let opens = drive(&mut machine, &counts, Instant::now());
            let mut rises = 0;
            let mut prev = 0;
            for &c in &counts {
                if prev == 0 && c > 0 {
                    rises += 1;
                }
                prev = c;
            }
            prop_assert_eq!(opens, rises);
        }
    }
}
