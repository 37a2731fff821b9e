// The break: silence, a noise riser, then everything slams back in with the
// bass. Modelled as a chain of deadlines on the engine clock, measured from
// the sample the break was triggered on:
//
//   t0        Ducking    master fades to 0 over 50 ms
//   t0+80ms   Rising     riser starts
//   t0+520ms  Restoring  master back to 1 over 20 ms, impact, bass loop,
//                        completion signalled
//   t0+540ms  Done       restore ramp finished
//
// Each phase can only advance to the one after it, one step per call, so the
// riser always lands before the restore even if both deadlines are overdue.

pub const DUCK_SECS: f32 = 0.05;
pub const RISER_DELAY_SECS: f64 = 0.08;
pub const RESTORE_DELAY_SECS: f64 = 0.52;
pub const RESTORE_RAMP_SECS: f32 = 0.02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakPhase {
    Idle,
    Ducking,
    Rising,
    Restoring,
    Done,
}

// What the engine has to do when a phase is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakAction {
    Duck,
    Rise,
    Restore,
    Settle,
}

#[derive(Clone, Debug)]
pub struct BreakDrop {
    phase: BreakPhase,
    riser_at: u64,
    restore_at: u64,
    done_at: u64,
    sample_rate: f64,
}

impl BreakDrop {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            phase: BreakPhase::Idle,
            riser_at: 0,
            restore_at: 0,
            done_at: 0,
            sample_rate: sample_rate as f64,
        }
    }

    pub fn phase(&self) -> BreakPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.phase, BreakPhase::Ducking | BreakPhase::Rising | BreakPhase::Restoring)
    }

    fn after(&self, now: u64, secs: f64) -> u64 {
        now + (secs * self.sample_rate).round() as u64
    }

    /// Start a break at `now`. Returns None if one is already running.
    pub fn trigger(&mut self, now: u64) -> Option<BreakAction> {
        if self.in_flight() {
            return None;
        }
        self.phase = BreakPhase::Ducking;
        self.riser_at = self.after(now, RISER_DELAY_SECS);
        self.restore_at = self.after(now, RESTORE_DELAY_SECS);
        self.done_at = self.after(now, RESTORE_DELAY_SECS + RESTORE_RAMP_SECS as f64);
        Some(BreakAction::Duck)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match self.phase {
            BreakPhase::Ducking => Some(self.riser_at),
            BreakPhase::Rising => Some(self.restore_at),
            BreakPhase::Restoring => Some(self.done_at),
            BreakPhase::Idle | BreakPhase::Done => None,
        }
    }

    /// Take at most one transition whose deadline is due at `now`.
    pub fn advance(&mut self, now: u64) -> Option<BreakAction> {
        let due = self.next_deadline()?;
        if due > now {
            return None;
        }
        let (next, action) = match self.phase {
            BreakPhase::Ducking => (BreakPhase::Rising, BreakAction::Rise),
            BreakPhase::Rising => (BreakPhase::Restoring, BreakAction::Restore),
            BreakPhase::Restoring => (BreakPhase::Done, BreakAction::Settle),
            BreakPhase::Idle | BreakPhase::Done => return None,
        };
        self.phase = next;
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1000; // one sample per millisecond keeps the numbers readable

    #[test]
    fn deadlines_are_measured_from_the_trigger() {
        let mut b = BreakDrop::new(SR);
        assert_eq!(b.trigger(100), Some(BreakAction::Duck));
        assert_eq!(b.phase(), BreakPhase::Ducking);
        assert_eq!(b.next_deadline(), Some(180));

        assert_eq!(b.advance(179), None);
        assert_eq!(b.advance(180), Some(BreakAction::Rise));
        // the restore deadline is t0 + 520, not riser + 520
        assert_eq!(b.next_deadline(), Some(620));
        assert_eq!(b.advance(619), None);
        assert_eq!(b.advance(620), Some(BreakAction::Restore));
        assert_eq!(b.phase(), BreakPhase::Restoring);
        assert_eq!(b.advance(640), Some(BreakAction::Settle));
        assert_eq!(b.phase(), BreakPhase::Done);
        assert_eq!(b.next_deadline(), None);
    }

    #[test]
    fn overdue_deadlines_still_fire_in_order() {
        let mut b = BreakDrop::new(SR);
        b.trigger(0);
        let mut actions = Vec::new();
        while let Some(a) = b.advance(10_000) {
            actions.push(a);
        }
        assert_eq!(actions, vec![BreakAction::Rise, BreakAction::Restore, BreakAction::Settle]);
    }

    #[test]
    fn retrigger_while_in_flight_is_refused() {
        let mut b = BreakDrop::new(SR);
        b.trigger(0);
        assert_eq!(b.trigger(10), None);
        b.advance(80);
        assert_eq!(b.trigger(90), None);
        b.advance(520);
        assert_eq!(b.trigger(530), None);
        b.advance(540);
        // finished breaks can run again
        assert_eq!(b.trigger(600), Some(BreakAction::Duck));
        assert_eq!(b.next_deadline(), Some(680));
    }

    #[test]
    fn idle_never_advances() {
        let mut b = BreakDrop::new(SR);
        assert!(!b.in_flight());
        assert_eq!(b.advance(u64::MAX), None);
        assert_eq!(b.phase(), BreakPhase::Idle);
    }
}
